//! connpool-core: connection parameters, pool keys and pool configuration.
//!
//! - **params**: [`ConnectionParams`] and their canonical [`ConnectionKey`]
//! - **config**: [`PoolSettings`] defaults, `[pool]` TOML arguments, config files
//! - **error**: [`ConfigError`]

pub mod config;
pub mod error;
pub mod params;

pub use config::{PoolArguments, PoolClass, PoolConfigFile, PoolSettings, UNLIMITED_OVERFLOW};
pub use error::{ConfigError, ConfigResult};
pub use params::{ConnectionKey, ConnectionParams, KeyValue, ParamValue};
