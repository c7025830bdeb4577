//! Time sources for the rate limiter.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Source of nanosecond timestamps.
pub trait Clock: Send + Sync {
    /// Current time in nanoseconds.
    fn now_nanos(&self) -> i64;
}

/// Wall clock, nanoseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(since_epoch) => duration_to_nanos(since_epoch),
            // Clock set before the epoch.
            Err(e) => -duration_to_nanos(e.duration()),
        }
    }
}

/// Manually driven clock for deterministic tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicI64,
}

impl ManualClock {
    /// Create a clock starting at `start_nanos`.
    pub fn new(start_nanos: i64) -> Self {
        Self {
            nanos: AtomicI64::new(start_nanos),
        }
    }

    /// Set the current time.
    pub fn set(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    /// Move the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        self.nanos
            .fetch_add(duration_to_nanos(by), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Convert a duration to signed nanoseconds, saturating at `i64::MAX`.
pub(crate) fn duration_to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}
