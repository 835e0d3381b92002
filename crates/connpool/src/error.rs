//! Error types surfaced by pools, the registry and connectors.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors returned by `acquire`, `release` and `connect`.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Overflow was exhausted and no idle connection appeared within `timeout`.
    #[error(
        "pool limit of size {size} overflow {overflow} reached, connection timed out, timeout {timeout:?}"
    )]
    Timeout {
        size: usize,
        overflow: i64,
        max_overflow: i64,
        timeout: Duration,
    },

    /// The connection factory failed; passed through unchanged.
    #[error(transparent)]
    Factory(anyhow::Error),

    /// A call sequence violated connection ownership.
    #[error("pool misuse: {0}")]
    Misuse(String),

    /// The blocking task running a connect on behalf of async code failed.
    #[error("connect task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PoolError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, PoolError::Timeout { .. })
    }

    /// The factory's original error, if this is a factory failure.
    pub fn factory_error(&self) -> Option<&anyhow::Error> {
        match self {
            PoolError::Factory(err) => Some(err),
            _ => None,
        }
    }
}
