//! Pool status snapshots.

use std::fmt;

/// Counters for a single pool at one instant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    /// Configured base size.
    pub size: usize,
    /// Idle connections held by the pool.
    pub checked_in: usize,
    /// Connections currently held by callers.
    pub checked_out: usize,
    /// Connections beyond the base size (negative while below it).
    pub overflow: i64,
    /// Configured overflow bound, `-1` when unlimited.
    pub max_overflow: i64,
}

impl PoolStatus {
    /// Live connections, idle or checked out.
    pub fn total(&self) -> usize {
        self.checked_in + self.checked_out
    }

    /// Whether a checkout would have to wait right now.
    pub fn is_saturated(&self) -> bool {
        self.checked_in == 0 && self.max_overflow >= 0 && self.overflow >= self.max_overflow
    }
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pool size: {}, connections in pool: {}, current overflow: {} of {}, checked out: {}",
            self.size, self.checked_in, self.overflow, self.max_overflow, self.checked_out
        )
    }
}
