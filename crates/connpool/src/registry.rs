//! Pool registry, holding one pool per distinct connection key.
//!
//! The registry remembers which process built its pools. A forked child
//! inherits the parent's pools (and their sockets), which must not be shared,
//! so when the current process id no longer matches the recorded one the
//! whole map is abandoned and rebuilt lazily. Abandoned pools are dropped
//! without `close()` being called on their connections: closing would shut
//! down sockets the parent is still using.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use connpool_core::{ConfigResult, ConnectionKey, PoolArguments, PoolSettings};
use parking_lot::Mutex;

use crate::factory::ConnectionFactory;
use crate::pool::Pool;
use crate::stats::PoolStatus;

/// Source of the current process identifier, injectable for tests.
pub trait ProcessIdentity: Send + Sync {
    fn current(&self) -> u32;
}

/// The real process, via `std::process::id()`.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsProcess;

impl ProcessIdentity for OsProcess {
    fn current(&self) -> u32 {
        std::process::id()
    }
}

struct RegistryState<F: ConnectionFactory> {
    /// Process that created `pools`; `None` until the first lookup.
    pid: Option<u32>,
    pools: HashMap<ConnectionKey, Arc<Pool<F>>>,
}

/// Maps connection keys to their pools, creating pools on first use.
pub struct PoolRegistry<F: ConnectionFactory> {
    factory: Arc<F>,
    settings: PoolSettings,
    process: Arc<dyn ProcessIdentity>,
    state: Mutex<RegistryState<F>>,
}

impl<F: ConnectionFactory> PoolRegistry<F> {
    /// Create a registry whose pools all use `settings`.
    pub fn new(factory: F, settings: PoolSettings) -> Self {
        Self::with_process(factory, settings, Arc::new(OsProcess))
    }

    /// Create a registry from user overrides layered onto the defaults.
    pub fn from_arguments(factory: F, args: &PoolArguments) -> ConfigResult<Self> {
        Ok(Self::new(factory, PoolSettings::resolve(args)?))
    }

    /// Create a registry with an explicit process identity source.
    pub fn with_process(factory: F, settings: PoolSettings, process: Arc<dyn ProcessIdentity>) -> Self {
        Self {
            factory: Arc::new(factory),
            settings,
            process,
            state: Mutex::new(RegistryState {
                pid: None,
                pools: HashMap::new(),
            }),
        }
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// The pool for `key`, created on first use in this process.
    pub fn get_or_create(&self, key: &ConnectionKey) -> Arc<Pool<F>> {
        let current = self.process.current();
        let mut state = self.state.lock();

        if state.pid != Some(current) {
            if let Some(previous) = state.pid {
                tracing::warn!(
                    previous_pid = previous,
                    current_pid = current,
                    abandoned = state.pools.len(),
                    "process changed since pools were created, abandoning them"
                );
            }
            state.pools.clear();
            state.pid = Some(current);
        }

        let pool = state
            .pools
            .entry(key.clone())
            .or_insert_with(|| Pool::new(key.clone(), Arc::clone(&self.factory), &self.settings));
        Arc::clone(pool)
    }

    /// The pool for `key` if one exists for the current process.
    pub fn get(&self, key: &ConnectionKey) -> Option<Arc<Pool<F>>> {
        let state = self.state.lock();
        if state.pid != Some(self.process.current()) {
            return None;
        }
        state.pools.get(key).cloned()
    }

    /// Forget every pool without closing its connections, as fork detection
    /// does. Returns the number of pools abandoned.
    pub fn reset(&self) -> usize {
        let mut state = self.state.lock();
        let abandoned = state.pools.len();
        state.pools.clear();
        state.pid = None;
        tracing::info!(abandoned = abandoned, "pool registry reset");
        abandoned
    }

    /// Dispose every pool (closing idle connections) and empty the registry.
    /// Returns the number of idle connections closed.
    pub fn shutdown(&self) -> usize {
        let pools: Vec<_> = {
            let mut state = self.state.lock();
            state.pid = None;
            state.pools.drain().map(|(_, pool)| pool).collect()
        };
        let closed = pools.iter().map(|pool| pool.dispose()).sum();
        tracing::info!(pools = pools.len(), closed = closed, "pool registry shut down");
        closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status of every live pool.
    pub fn statuses(&self) -> Vec<(ConnectionKey, PoolStatus)> {
        let pools: Vec<_> = self.state.lock().pools.values().cloned().collect();
        pools
            .into_iter()
            .map(|pool| (pool.key().clone(), pool.status()))
            .collect()
    }
}

impl<F: ConnectionFactory> fmt::Debug for PoolRegistry<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolRegistry")
            .field("settings", &self.settings)
            .field("pools", &self.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockFactory, test_key, test_params};
    use connpool_core::ParamValue;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;
    use std::time::Duration;

    /// A process id the test can change to simulate a fork.
    struct FakeProcess(AtomicU32);

    impl FakeProcess {
        fn fork(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl ProcessIdentity for FakeProcess {
        fn current(&self) -> u32 {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn make_registry() -> (PoolRegistry<Arc<MockFactory>>, Arc<MockFactory>, Arc<FakeProcess>) {
        let factory = Arc::new(MockFactory::new());
        let process = Arc::new(FakeProcess(AtomicU32::new(100)));
        let settings = PoolSettings::default()
            .with_capacity(2, 1)
            .with_timeout(Duration::from_millis(100));
        let registry = PoolRegistry::with_process(Arc::clone(&factory), settings, process.clone());
        (registry, factory, process)
    }

    #[test]
    fn same_key_returns_same_pool() {
        let (registry, _, _) = make_registry();
        let a = registry.get_or_create(&test_key());
        let b = registry.get_or_create(&test_key());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn different_keys_get_separate_pools() {
        let (registry, _, _) = make_registry();
        let other = ConnectionKey::normalize(&test_params().with("database", "reports"));
        let a = registry.get_or_create(&test_key());
        let b = registry.get_or_create(&other);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn nested_map_order_does_not_split_pools() {
        let (registry, _, _) = make_registry();
        let ssl_a: HashMap<String, ParamValue> = HashMap::from([
            ("ca".to_string(), "/ca.pem".into()),
            ("cipher".to_string(), "AES256".into()),
        ]);
        let ssl_b: HashMap<String, ParamValue> = HashMap::from([
            ("cipher".to_string(), "AES256".into()),
            ("ca".to_string(), "/ca.pem".into()),
        ]);
        let a = registry.get_or_create(&ConnectionKey::normalize(&test_params().with("ssl", ssl_a)));
        let b = registry.get_or_create(&ConnectionKey::normalize(&test_params().with("ssl", ssl_b)));
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn pools_use_registry_settings() {
        let (registry, _, _) = make_registry();
        let pool = registry.get_or_create(&test_key());
        assert_eq!(pool.size(), 2);
        assert_eq!(pool.settings().max_overflow, 1);
    }

    #[test]
    fn from_arguments_layers_overrides() {
        let args = PoolArguments {
            size: Some(7),
            recycle: Some("30s".to_string()),
            ..PoolArguments::default()
        };
        let registry = PoolRegistry::from_arguments(MockFactory::new(), &args).unwrap();
        assert_eq!(registry.settings().size, 7);
        assert_eq!(registry.settings().recycle, Some(Duration::from_secs(30)));
        assert_eq!(registry.settings().max_overflow, 10);
    }

    #[test]
    fn fork_yields_new_pool() {
        let (registry, factory, process) = make_registry();
        let before = registry.get_or_create(&test_key());
        before.acquire().unwrap().release().unwrap();
        assert_eq!(before.checked_in(), 1);

        process.fork();
        let after = registry.get_or_create(&test_key());
        assert!(!Arc::ptr_eq(&before, &after));
        assert_ne!(before.id(), after.id());
        assert_eq!(registry.len(), 1);
        // The abandoned pool's connection was not closed.
        assert_eq!(factory.closes(), 0);
        assert_eq!(before.checked_in(), 1);
    }

    #[test]
    fn get_ignores_pools_from_another_process() {
        let (registry, _, process) = make_registry();
        registry.get_or_create(&test_key());
        assert!(registry.get(&test_key()).is_some());

        process.fork();
        assert!(registry.get(&test_key()).is_none());
    }

    #[test]
    fn reset_abandons_pools() {
        let (registry, factory, _) = make_registry();
        let before = registry.get_or_create(&test_key());
        before.acquire().unwrap().release().unwrap();

        assert_eq!(registry.reset(), 1);
        assert!(registry.is_empty());
        let after = registry.get_or_create(&test_key());
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(factory.closes(), 0);
    }

    #[test]
    fn shutdown_disposes_idle_connections() {
        let (registry, factory, _) = make_registry();
        let pool = registry.get_or_create(&test_key());
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        drop((a, b));

        assert_eq!(registry.shutdown(), 2);
        assert!(registry.is_empty());
        assert_eq!(factory.closes(), 2);
    }

    #[test]
    fn statuses_cover_every_pool() {
        let (registry, _, _) = make_registry();
        let pool = registry.get_or_create(&test_key());
        let _conn = pool.acquire().unwrap();

        let statuses = registry.statuses();
        assert_eq!(statuses.len(), 1);
        let (key, status) = &statuses[0];
        assert_eq!(key, &test_key());
        assert_eq!(status.checked_out, 1);
    }

    #[test]
    fn concurrent_lookups_share_one_pool() {
        let (registry, _, _) = make_registry();
        let registry = Arc::new(registry);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.get_or_create(&test_key()).id())
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(registry.len(), 1);
    }
}
