//! The seams a caller plugs into the pool: how connections are made and
//! what the pool may do with them.

use connpool_core::ConnectionKey;

/// A live backend connection the pool can manage.
///
/// Every method has a default so plain handles only need an empty impl.
pub trait ManagedConnection: Send + 'static {
    /// Release the underlying transport. Called when the pool discards a
    /// connection (overflow checkin, recycling, dispose).
    fn close(&mut self) {}

    /// Return the connection to a clean state before it goes back to the idle
    /// set (e.g. roll back an open transaction). An error discards it.
    fn reset(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Cheap liveness probe used when pre-ping is enabled.
    fn is_alive(&mut self) -> bool {
        true
    }
}

/// Establishes new connections. Pools never see the transport behind it.
///
/// Must be safe to call concurrently, from many pools or repeatedly from one.
pub trait ConnectionFactory: Send + Sync + 'static {
    type Connection: ManagedConnection;

    /// Open a new connection for the parameters in `key`.
    fn create(&self, key: &ConnectionKey) -> anyhow::Result<Self::Connection>;
}

impl<F: ConnectionFactory> ConnectionFactory for std::sync::Arc<F> {
    type Connection = F::Connection;

    fn create(&self, key: &ConnectionKey) -> anyhow::Result<Self::Connection> {
        (**self).create(key)
    }
}
