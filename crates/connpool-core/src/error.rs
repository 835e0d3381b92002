//! Error types for configuration loading.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors that can occur while loading or validating pool configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field} duration: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("max_overflow must be -1 (unlimited) or non-negative, got {0}")]
    InvalidOverflow(i64),

    #[error("unknown pool class: {0}")]
    UnknownPoolClass(String),
}
