//! The `connect(params)` entry point, pooled or direct.

use std::sync::Arc;

use connpool_core::{ConnectionKey, ConnectionParams};

use crate::error::{PoolError, PoolResult};
use crate::factory::ConnectionFactory;
use crate::pool::PooledConnection;
use crate::registry::PoolRegistry;

/// Opens a connection for a set of connection parameters.
pub trait Connector: Send + Sync {
    type Connection: Send;

    fn connect(&self, params: &ConnectionParams) -> PoolResult<Self::Connection>;
}

/// Routes every `connect` through the pool for the parameters' key.
pub struct PooledConnector<F: ConnectionFactory> {
    registry: Arc<PoolRegistry<F>>,
}

impl<F: ConnectionFactory> PooledConnector<F> {
    pub fn new(registry: Arc<PoolRegistry<F>>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<PoolRegistry<F>> {
        &self.registry
    }
}

impl<F: ConnectionFactory> Clone for PooledConnector<F> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<F: ConnectionFactory> Connector for PooledConnector<F> {
    type Connection = PooledConnection<F>;

    fn connect(&self, params: &ConnectionParams) -> PoolResult<PooledConnection<F>> {
        let key = ConnectionKey::normalize(params);
        self.registry.get_or_create(&key).acquire()
    }
}

/// Calls the factory for every `connect`, with no pooling.
pub struct DirectConnector<F: ConnectionFactory> {
    factory: Arc<F>,
}

impl<F: ConnectionFactory> DirectConnector<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory: Arc::new(factory),
        }
    }

    /// A direct connector sharing the registry's factory.
    pub fn from_registry(registry: &PoolRegistry<F>) -> Self {
        Self {
            factory: Arc::clone(registry.factory()),
        }
    }
}

impl<F: ConnectionFactory> Connector for DirectConnector<F> {
    type Connection = F::Connection;

    fn connect(&self, params: &ConnectionParams) -> PoolResult<F::Connection> {
        let key = ConnectionKey::normalize(params);
        self.factory.create(&key).map_err(PoolError::Factory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFactory, test_params};
    use connpool_core::PoolSettings;
    use std::time::Duration;

    fn pooled() -> (PooledConnector<Arc<MockFactory>>, Arc<MockFactory>) {
        let factory = Arc::new(MockFactory::new());
        let settings = PoolSettings::default()
            .with_capacity(1, 0)
            .with_timeout(Duration::from_millis(50));
        let registry = PoolRegistry::new(Arc::clone(&factory), settings);
        (PooledConnector::new(Arc::new(registry)), factory)
    }

    #[test]
    fn pooled_connect_reuses_connection() {
        let (connector, factory) = pooled();

        let first = connector.connect(&test_params()).unwrap();
        let serial = first.serial;
        drop(first);

        let second = connector.connect(&test_params()).unwrap();
        assert_eq!(second.serial, serial);
        assert_eq!(factory.creates(), 1);
    }

    #[test]
    fn pooled_connect_times_out_when_exhausted() {
        let (connector, _) = pooled();
        let _held = connector.connect(&test_params()).unwrap();

        let err = connector.connect(&test_params()).unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn pooled_connect_separates_parameter_sets() {
        let (connector, factory) = pooled();
        let _a = connector.connect(&test_params()).unwrap();
        let _b = connector.connect(&test_params().with("database", "reports")).unwrap();

        assert_eq!(connector.registry().len(), 2);
        assert_eq!(factory.creates(), 2);
    }

    #[test]
    fn clones_share_the_registry() {
        let (connector, _) = pooled();
        let other = connector.clone();
        let _held = connector.connect(&test_params()).unwrap();

        assert!(other.connect(&test_params()).unwrap_err().is_timeout());
    }

    #[test]
    fn direct_connect_never_reuses() {
        let factory = MockFactory::new();
        let connector = DirectConnector::new(factory);

        let a = connector.connect(&test_params()).unwrap();
        let b = connector.connect(&test_params()).unwrap();
        assert_ne!(a.serial, b.serial);
    }

    #[test]
    fn direct_connect_propagates_factory_error() {
        let factory = MockFactory::new();
        factory.fail_always(true);
        let connector = DirectConnector::new(factory);

        let err = connector.connect(&test_params()).unwrap_err();
        assert!(matches!(err, PoolError::Factory(_)));
    }

    #[test]
    fn direct_connector_shares_registry_factory() {
        let (pooled, factory) = pooled();
        let direct = DirectConnector::from_registry(pooled.registry());

        let _conn = direct.connect(&test_params()).unwrap();
        assert_eq!(factory.creates(), 1);
        assert!(pooled.registry().is_empty());
    }
}
