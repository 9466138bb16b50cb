use std::env;
use std::path::PathBuf;

use dirs::data_dir;
use dirs::runtime_dir;

use super::types::{ConfigError, Result};

/// Location of the global config file (~/.config/rexec/config.toml).
pub fn global_config_path() -> Option<PathBuf> {
  dirs::config_dir().map(|p| p.join("rexec").join("config.toml"))
}

/// Location of the project config file (./.rexec/config.toml), if the
/// caller is invoking the client from within a project directory.
pub fn project_config_path(project_root: &std::path::Path) -> PathBuf {
  project_root.join(".rexec").join("config.toml")
}

/// Resolve the broker socket directory using `REXEC_SOCKET_DIR`, a config
/// value, or the platform's runtime/data directory, in that order.
pub fn resolve_socket_dir(config_value: Option<&str>) -> Result<PathBuf> {
  if let Ok(val) = env::var("REXEC_SOCKET_DIR") {
    return Ok(PathBuf::from(val));
  }
  if let Some(val) = config_value {
    return Ok(PathBuf::from(val));
  }
  runtime_dir()
    .or_else(data_dir)
    .ok_or(ConfigError::UnsupportedPlatform)
}

#[cfg(test)]
pub(crate) fn resolve_socket_dir_for(env_value: Option<PathBuf>) -> Result<PathBuf> {
  if let Some(val) = env_value {
    return Ok(val);
  }
  runtime_dir()
    .or_else(data_dir)
    .ok_or(ConfigError::UnsupportedPlatform)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn config_value_used_when_no_env_override() {
    assert!(std::env::var("REXEC_SOCKET_DIR").is_err());
    let got = resolve_socket_dir(Some("/tmp/rexec-sockets")).unwrap();
    assert_eq!(got, PathBuf::from("/tmp/rexec-sockets"));
  }

  #[test]
  fn explicit_value_wins_over_platform_fallback() {
    let p = PathBuf::from("/tmp/explicit");
    assert_eq!(resolve_socket_dir_for(Some(p.clone())).unwrap(), p);
  }
}
