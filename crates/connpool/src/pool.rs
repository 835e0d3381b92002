//! Queue pool: the checkout/checkin state machine for a single connection key.
//!
//! ```text
//! acquire()
//!   → idle connection available        → recycle/pre-ping check → hand out
//!   → overflow exhausted (must block)  → wait up to `timeout` for a checkin
//!                                         → nothing arrived → Timeout
//!   → overflow slot reserved (CAS)     → factory.create() outside the lock
//!                                         → failure → roll back slot
//!   → slot lost to a racing caller     → retry (bounded by the deadline)
//! ```
//!
//! The overflow counter starts at `-size` and counts connections beyond the
//! base size, so `overflow + size` is the number of live connections. It is
//! only ever incremented by a compare-and-swap and only ever decremented while
//! the idle-set lock is held, which lets a blocked waiter rely on the condvar.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use connpool_core::{ConnectionKey, PoolSettings};
use parking_lot::{Condvar, Mutex};

use crate::error::{PoolError, PoolResult};
use crate::factory::{ConnectionFactory, ManagedConnection};
use crate::stats::PoolStatus;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A connection sitting in the idle set.
struct IdleConnection<C> {
    id: u64,
    conn: C,
    created_at: Instant,
}

struct PoolState<C> {
    /// Idle connections, oldest checkin first. Never longer than `size`.
    idle: VecDeque<IdleConnection<C>>,
    /// Ids of connections currently held by callers.
    checked_out: HashSet<u64>,
}

/// A bounded pool of connections for one [`ConnectionKey`].
pub struct Pool<F: ConnectionFactory> {
    id: u64,
    key: ConnectionKey,
    factory: Arc<F>,
    settings: PoolSettings,
    state: Mutex<PoolState<F::Connection>>,
    /// Signalled on every checkin and every released overflow slot.
    available: Condvar,
    overflow: AtomicI64,
    next_connection_id: AtomicU64,
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create an empty pool. Connections are opened lazily on checkout.
    pub fn new(key: ConnectionKey, factory: Arc<F>, settings: &PoolSettings) -> Arc<Self> {
        let settings = settings.effective();
        let pool = Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            key,
            factory,
            overflow: AtomicI64::new(-(settings.size as i64)),
            settings,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                checked_out: HashSet::new(),
            }),
            available: Condvar::new(),
            next_connection_id: AtomicU64::new(1),
        };

        tracing::info!(
            pool = pool.id,
            key = %pool.key,
            class = %pool.settings.class,
            size = pool.settings.size,
            max_overflow = pool.settings.max_overflow,
            timeout = ?pool.settings.timeout,
            "creating connection pool"
        );
        Arc::new(pool)
    }

    /// Process-unique pool identifier.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Settings the pool runs with (after pool-class adjustment).
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn size(&self) -> usize {
        self.settings.size
    }

    /// Connections beyond the base size; negative while below it.
    pub fn overflow(&self) -> i64 {
        self.overflow.load(Ordering::SeqCst)
    }

    pub fn checked_in(&self) -> usize {
        self.state.lock().idle.len()
    }

    pub fn checked_out(&self) -> usize {
        self.state.lock().checked_out.len()
    }

    /// Snapshot of the pool's counters.
    pub fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        PoolStatus {
            size: self.settings.size,
            checked_in: state.idle.len(),
            checked_out: state.checked_out.len(),
            overflow: self.overflow(),
            max_overflow: self.settings.max_overflow,
        }
    }

    /// Check out a connection, waiting up to the configured timeout when the
    /// pool and its overflow are both exhausted.
    pub fn acquire(self: &Arc<Self>) -> PoolResult<PooledConnection<F>> {
        // `None` when the timeout is too large to represent: wait without bound.
        let deadline = Instant::now().checked_add(self.settings.timeout);
        let limit = self.settings.overflow_limit();
        let mut warned = false;

        loop {
            let mut state = self.state.lock();
            let must_block = limit.is_some_and(|max| self.overflow() >= max);

            if let Some(mut idle) = state.idle.pop_front() {
                if self.is_stale(&idle) {
                    self.release_slot(&mut state);
                    drop(state);
                    tracing::debug!(
                        pool = self.id,
                        connection = idle.id,
                        age = ?idle.created_at.elapsed(),
                        "recycling stale connection"
                    );
                    idle.conn.close();
                    continue;
                }

                state.checked_out.insert(idle.id);
                drop(state);

                if self.settings.pre_ping && !idle.conn.is_alive() {
                    tracing::debug!(
                        pool = self.id,
                        connection = idle.id,
                        "discarding idle connection that failed pre-ping"
                    );
                    self.discard(idle.id, idle.conn);
                    continue;
                }

                return Ok(self.hand_out(idle.id, idle.conn, idle.created_at, "checked out idle connection"));
            }

            if must_block {
                if !warned {
                    tracing::warn!(
                        pool = self.id,
                        size = self.settings.size,
                        overflow = self.overflow(),
                        max_overflow = self.settings.max_overflow,
                        "connection pool full, waiting for a checkin"
                    );
                    warned = true;
                }
                match deadline {
                    Some(deadline) if Instant::now() >= deadline => return Err(self.timed_out()),
                    Some(deadline) => {
                        self.available.wait_until(&mut state, deadline);
                    }
                    None => self.available.wait(&mut state),
                }
                continue;
            }
            drop(state);

            match self.try_reserve_overflow(limit) {
                Some(overflow) => {
                    if overflow > 0 {
                        tracing::warn!(
                            pool = self.id,
                            size = self.settings.size,
                            overflow = overflow,
                            max_overflow = self.settings.max_overflow,
                            "connection pool full, opening overflow connection"
                        );
                    }
                    return self.open_connection();
                }
                // Another caller took the last slot between our check and the CAS.
                None if deadline.is_some_and(|d| Instant::now() >= d) => {
                    return Err(self.timed_out());
                }
                None => continue,
            }
        }
    }

    /// Return `conn` to this pool.
    ///
    /// A connection checked out from a different pool is rejected with
    /// [`PoolError::Misuse`]; it then goes back to its own pool on drop.
    pub fn release(&self, conn: PooledConnection<F>) -> PoolResult<()> {
        if conn.pool.id != self.id {
            return Err(PoolError::Misuse(format!(
                "connection {} belongs to pool {}, not pool {}",
                conn.id, conn.pool.id, self.id
            )));
        }
        conn.release()
    }

    /// Close every idle connection and release its slot. The pool stays
    /// usable; checked-out connections are unaffected.
    pub fn dispose(&self) -> usize {
        let mut state = self.state.lock();
        let drained: Vec<_> = state.idle.drain(..).collect();
        self.overflow.fetch_sub(drained.len() as i64, Ordering::SeqCst);
        drop(state);
        self.available.notify_all();

        let closed = drained.len();
        for mut idle in drained {
            idle.conn.close();
        }
        tracing::info!(pool = self.id, closed = closed, "disposed idle connections");
        closed
    }

    fn is_stale(&self, idle: &IdleConnection<F::Connection>) -> bool {
        self.settings
            .recycle
            .is_some_and(|max_age| idle.created_at.elapsed() >= max_age)
    }

    /// Reserve one overflow slot unless that would exceed `limit`.
    /// Returns the new overflow value.
    fn try_reserve_overflow(&self, limit: Option<i64>) -> Option<i64> {
        self.overflow
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| match limit {
                Some(max) if current >= max => None,
                _ => Some(current + 1),
            })
            .ok()
            .map(|previous| previous + 1)
    }

    /// Give back one slot. Takes the locked state so waiters cannot miss it.
    fn release_slot(&self, _state: &mut PoolState<F::Connection>) {
        self.overflow.fetch_sub(1, Ordering::SeqCst);
        self.available.notify_one();
    }

    /// Open a connection on an already reserved slot. The slot is given back
    /// if the factory fails or panics.
    fn open_connection(self: &Arc<Self>) -> PoolResult<PooledConnection<F>> {
        let reservation = SlotReservation { pool: Arc::as_ref(self), held: true };
        match self.factory.create(&self.key) {
            Ok(conn) => {
                reservation.keep();
                let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
                self.state.lock().checked_out.insert(id);
                Ok(self.hand_out(id, conn, Instant::now(), "opened new connection"))
            }
            Err(err) => {
                drop(reservation);
                tracing::warn!(
                    pool = self.id,
                    overflow = self.overflow(),
                    error = %err,
                    "connection factory failed"
                );
                Err(PoolError::Factory(err))
            }
        }
    }

    fn hand_out(
        self: &Arc<Self>,
        id: u64,
        conn: F::Connection,
        created_at: Instant,
        event: &'static str,
    ) -> PooledConnection<F> {
        self.log_event(event, id);
        PooledConnection {
            pool: Arc::clone(self),
            id,
            created_at,
            conn: Some(conn),
        }
    }

    /// Close a checked-out connection and give its slot back.
    fn discard(&self, id: u64, mut conn: F::Connection) {
        {
            let mut state = self.state.lock();
            state.checked_out.remove(&id);
            self.release_slot(&mut state);
        }
        conn.close();
    }

    fn checkin(&self, id: u64, mut conn: F::Connection, created_at: Instant) -> PoolResult<()> {
        if !self.state.lock().checked_out.contains(&id) {
            conn.close();
            return Err(PoolError::Misuse(format!(
                "connection {id} is not checked out from pool {}",
                self.id
            )));
        }

        let reset = conn.reset();

        let mut state = self.state.lock();
        state.checked_out.remove(&id);

        if let Err(err) = reset {
            self.release_slot(&mut state);
            drop(state);
            tracing::warn!(
                pool = self.id,
                connection = id,
                error = %err,
                "connection failed to reset on checkin, discarding"
            );
            conn.close();
            return Ok(());
        }

        if state.idle.len() < self.settings.size {
            state.idle.push_back(IdleConnection {
                id,
                conn,
                created_at,
            });
            drop(state);
            self.available.notify_one();
            self.log_event("checked in connection", id);
        } else {
            self.release_slot(&mut state);
            drop(state);
            conn.close();
            self.log_event("closed overflow connection on checkin", id);
        }
        Ok(())
    }

    fn forget(&self, id: u64) {
        let mut state = self.state.lock();
        if state.checked_out.remove(&id) {
            self.release_slot(&mut state);
        }
    }

    fn timed_out(&self) -> PoolError {
        let overflow = self.overflow();
        tracing::error!(
            pool = self.id,
            size = self.settings.size,
            overflow = overflow,
            max_overflow = self.settings.max_overflow,
            timeout = ?self.settings.timeout,
            "unable to check out a connection before the timeout"
        );
        PoolError::Timeout {
            size: self.settings.size,
            overflow,
            max_overflow: self.settings.max_overflow,
            timeout: self.settings.timeout,
        }
    }

    fn log_event(&self, event: &'static str, connection: u64) {
        if self.settings.echo {
            tracing::info!(pool = self.id, connection = connection, overflow = self.overflow(), "{event}");
        } else {
            tracing::debug!(pool = self.id, connection = connection, overflow = self.overflow(), "{event}");
        }
    }
}

/// An overflow slot taken by `try_reserve_overflow`, returned on drop unless kept.
struct SlotReservation<'a, F: ConnectionFactory> {
    pool: &'a Pool<F>,
    held: bool,
}

impl<F: ConnectionFactory> SlotReservation<'_, F> {
    fn keep(mut self) {
        self.held = false;
    }
}

impl<F: ConnectionFactory> Drop for SlotReservation<'_, F> {
    fn drop(&mut self) {
        if self.held {
            self.pool.release_slot(&mut self.pool.state.lock());
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("settings", &self.settings)
            .field("overflow", &self.overflow())
            .finish_non_exhaustive()
    }
}

/// A connection checked out of a [`Pool`].
///
/// Dereferences to the underlying connection. It goes back to its pool on
/// [`release`](Self::release) or, failing that, when dropped.
pub struct PooledConnection<F: ConnectionFactory> {
    pool: Arc<Pool<F>>,
    id: u64,
    created_at: Instant,
    conn: Option<F::Connection>,
}

impl<F: ConnectionFactory> PooledConnection<F> {
    /// Identifier of this connection within its pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pool_id(&self) -> u64 {
        self.pool.id
    }

    /// Time since the underlying connection was opened.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Return the connection to its pool now.
    pub fn release(mut self) -> PoolResult<()> {
        match self.conn.take() {
            Some(conn) => self.pool.checkin(self.id, conn, self.created_at),
            None => Err(PoolError::Misuse(format!("connection {} already released", self.id))),
        }
    }

    /// Take the raw connection out of the pool's bookkeeping. Its slot is
    /// released and the pool never sees it again.
    pub fn detach(mut self) -> F::Connection {
        let conn = self.conn.take().expect("connection present until released");
        self.pool.forget(self.id);
        tracing::debug!(pool = self.pool.id, connection = self.id, "detached connection");
        conn
    }
}

impl<F: ConnectionFactory> Deref for PooledConnection<F> {
    type Target = F::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection present until released")
    }
}

impl<F: ConnectionFactory> DerefMut for PooledConnection<F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection present until released")
    }
}

impl<F: ConnectionFactory> Drop for PooledConnection<F> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(err) = self.pool.checkin(self.id, conn, self.created_at) {
                tracing::error!(
                    pool = self.pool.id,
                    connection = self.id,
                    error = %err,
                    "failed to return connection to pool"
                );
            }
        }
    }
}

impl<F: ConnectionFactory> fmt::Debug for PooledConnection<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("pool", &self.pool.id)
            .field("id", &self.id)
            .field("age", &self.age())
            .finish_non_exhaustive()
    }
}
