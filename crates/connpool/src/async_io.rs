//! Async adapter for the blocking connect path.
//!
//! Pool acquisition may block for up to the pool timeout while waiting for a
//! connection to be released. [`AsyncConnector`] moves that wait onto tokio's
//! blocking thread pool so it never stalls the async executor. The returned
//! connection is the same value the wrapped connector produces; dropping a
//! [`PooledConnection`](crate::PooledConnection) from async code is fine,
//! check-in only takes the pool lock briefly.

use std::sync::Arc;

use connpool_core::ConnectionParams;

use crate::connector::Connector;
use crate::error::PoolResult;

/// Runs a [`Connector`] on the blocking thread pool.
pub struct AsyncConnector<C> {
    inner: Arc<C>,
}

impl<C> AsyncConnector<C>
where
    C: Connector + 'static,
    C::Connection: 'static,
{
    pub fn new(connector: C) -> Self {
        Self {
            inner: Arc::new(connector),
        }
    }

    pub fn from_arc(connector: Arc<C>) -> Self {
        Self { inner: connector }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Connect without blocking the calling task.
    pub async fn connect(&self, params: ConnectionParams) -> PoolResult<C::Connection> {
        let connector = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || connector.connect(&params)).await?
    }
}

impl<C> Clone for AsyncConnector<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
