use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Log level for the client's log file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Off,
  Warn,
  #[default]
  Info,
  Debug,
  Trace,
}

/// Effective configuration after merging defaults, global, and project config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
  pub log_level: LogLevel,
  /// Seconds to wait for the broker negotiation and data channel handshake
  /// before giving up, unless overridden by `-w`/`-W` on the command line.
  pub connect_timeout_secs: u64,
  /// Replace non-printable bytes crossing the data channel with `_` before
  /// they reach the local terminal.
  pub sanitize_output: bool,
  /// Directory the broker's per-domain sockets live in, unless overridden by
  /// `REXEC_SOCKET_DIR`.
  pub socket_dir: Option<String>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      log_level: LogLevel::Info,
      connect_timeout_secs: 5,
      sanitize_output: false,
      socket_dir: None,
    }
  }
}

#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("io: {0}")]
  Io(#[from] std::io::Error),
  #[error("toml: {0}")]
  Toml(#[from] toml::de::Error),
  #[error("unsupported platform: no runtime or data directory available")]
  UnsupportedPlatform,
  #[error("connect_timeout_secs must be greater than zero")]
  InvalidTimeout,
}

pub type Result<T> = std::result::Result<T, ConfigError>;
