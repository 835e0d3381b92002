//! Mock factory shared by the unit tests.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use connpool_core::{ConnectionKey, ConnectionParams};

use crate::factory::{ConnectionFactory, ManagedConnection};

#[derive(Debug)]
pub struct MockConnection {
    pub serial: u64,
    pub alive: Arc<AtomicBool>,
    pub fail_reset: bool,
    closes: Arc<AtomicU64>,
}

impl ManagedConnection for MockConnection {
    fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    fn reset(&mut self) -> anyhow::Result<()> {
        if self.fail_reset {
            anyhow::bail!("rollback failed");
        }
        Ok(())
    }

    fn is_alive(&mut self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Counts calls, and fails on request: always, or on the n-th attempt.
#[derive(Default)]
pub struct MockFactory {
    attempts: AtomicU64,
    creates: AtomicU64,
    closes: Arc<AtomicU64>,
    fail_always: AtomicBool,
    fail_on: AtomicU64,
    panic_always: AtomicBool,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn creates(&self) -> u64 {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u64 {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    pub fn panic_on_create(&self, panic: bool) {
        self.panic_always.store(panic, Ordering::SeqCst);
    }

    /// Fail the `attempt`-th call to `create` (1-based).
    pub fn fail_on_create(&self, attempt: u64) {
        self.fail_on.store(attempt, Ordering::SeqCst);
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn create(&self, _key: &ConnectionKey) -> anyhow::Result<MockConnection> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.panic_always.load(Ordering::SeqCst) {
            panic!("driver crashed while connecting");
        }
        if self.fail_always.load(Ordering::SeqCst) || self.fail_on.load(Ordering::SeqCst) == attempt {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused").into());
        }
        let serial = self.creates.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MockConnection {
            serial,
            alive: Arc::new(AtomicBool::new(true)),
            fail_reset: false,
            closes: Arc::clone(&self.closes),
        })
    }
}

pub fn test_params() -> ConnectionParams {
    ConnectionParams::new()
        .with("host", "db.pool.local")
        .with("port", 3306)
        .with("user", "app")
}

pub fn test_key() -> ConnectionKey {
    ConnectionKey::normalize(&test_params())
}
