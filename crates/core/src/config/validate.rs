use super::types::{Config, ConfigError, Result};

pub(super) fn validate(cfg: &Config) -> Result<()> {
  if cfg.connect_timeout_secs == 0 {
    return Err(ConfigError::InvalidTimeout);
  }
  Ok(())
}
