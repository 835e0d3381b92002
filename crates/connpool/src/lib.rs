//! connpool: bounded, per-key connection pooling for blocking database drivers.
//!
//! Provides:
//! - **pool**: [`Pool`] queue pool with overflow, bounded wait and recycling
//! - **registry**: [`PoolRegistry`] mapping connection keys to pools, fork-aware
//! - **connector**: [`PooledConnector`] / [`DirectConnector`] `connect(params)` entry points
//! - **async_io**: [`AsyncConnector`] for use from tokio tasks
//! - **tcp**: [`TcpConnectionFactory`] reference TCP/TLS factory
//! - **factory**: the [`ConnectionFactory`] / [`ManagedConnection`] seams

pub mod async_io;
pub mod connector;
pub mod error;
pub mod factory;
pub mod pool;
pub mod registry;
pub mod stats;
pub mod tcp;

#[cfg(test)]
mod testing;

pub use async_io::AsyncConnector;
pub use connector::{Connector, DirectConnector, PooledConnector};
pub use error::{PoolError, PoolResult};
pub use factory::{ConnectionFactory, ManagedConnection};
pub use pool::{Pool, PooledConnection};
pub use registry::{OsProcess, PoolRegistry, ProcessIdentity};
pub use stats::PoolStatus;
pub use tcp::{TcpConnection, TcpConnectionFactory, TlsConfig};

pub use connpool_core::{
    ConfigError, ConnectionKey, ConnectionParams, ParamValue, PoolArguments, PoolClass,
    PoolConfigFile, PoolSettings,
};
