mod load;
pub mod paths;
pub mod types;
mod validate;

pub use load::load;
pub use paths::{global_config_path, project_config_path, resolve_socket_dir};
pub use types::{Config, ConfigError, LogLevel, Result};

#[cfg(test)]
pub(crate) use load::load_from_paths;
