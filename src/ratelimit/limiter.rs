//! Sharded sliding-window rate limiter.

use std::sync::Arc;
use std::time::Duration;

use tracing::{trace, warn};

use super::clock::{duration_to_nanos, Clock, SystemClock};
use super::shard::Shard;
use super::sweeper::{self, SweepStats, SweeperHandle, SweeperSettings};
use crate::error::{Result, ShardgateError};

/// Default number of shards.
pub const DEFAULT_SHARD_COUNT: usize = 64;
/// Default admission window.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Default maximum admissions per window.
pub const DEFAULT_BURST: usize = 10;
/// Default retention window, as a multiple of the admission window.
pub const DEFAULT_RETENTION_FACTOR: u32 = 3;

/// Limits shared by every key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterSettings {
    /// Trailing window over which admissions are counted
    pub window: Duration,
    /// Maximum admissions per window
    pub burst: usize,
    /// How far back the sweeper keeps timestamps; at least `window`
    pub retention: Duration,
    /// Number of lock-isolated partitions of the key space
    pub shard_count: usize,
}

impl LimiterSettings {
    /// Settings for `burst` requests per `window`, with default retention
    /// and shard count.
    pub fn new(window: Duration, burst: usize) -> Self {
        Self {
            window,
            burst,
            retention: window.saturating_mul(DEFAULT_RETENTION_FACTOR),
            shard_count: DEFAULT_SHARD_COUNT,
        }
    }

    /// Check the settings for consistency.
    pub fn validate(&self) -> Result<()> {
        if self.window.is_zero() {
            return Err(ShardgateError::Config(
                "window must be greater than zero".to_string(),
            ));
        }
        if self.burst == 0 {
            return Err(ShardgateError::Config(
                "burst must be greater than zero".to_string(),
            ));
        }
        if self.shard_count == 0 {
            return Err(ShardgateError::Config(
                "shard count must be greater than zero".to_string(),
            ));
        }
        if self.retention < self.window {
            return Err(ShardgateError::Config(format!(
                "retention ({:?}) must not be shorter than the window ({:?})",
                self.retention, self.window
            )));
        }
        Ok(())
    }
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_BURST)
    }
}

/// Per-key sliding-window rate limiter.
///
/// Keys are routed to one of a fixed set of shards by `key mod shard_count`.
/// Calls for the same key are serialized by that key's lock; calls for keys
/// in different shards never touch the same lock.
///
/// This struct is thread-safe and can be shared across threads and tasks.
pub struct RateLimiter {
    shards: Box<[Shard]>,
    settings: LimiterSettings,
    window_nanos: i64,
    retention_nanos: i64,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("settings", &self.settings)
            .field("key_count", &self.key_count())
            .finish()
    }
}

impl RateLimiter {
    /// Create a rate limiter with default settings and the system clock.
    pub fn new() -> Self {
        Self::build(LimiterSettings::default(), Arc::new(SystemClock))
    }

    /// Create a rate limiter with the given settings and the system clock.
    pub fn with_settings(settings: LimiterSettings) -> Result<Self> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    /// Create a rate limiter with the given settings and time source.
    pub fn with_clock(settings: LimiterSettings, clock: Arc<dyn Clock>) -> Result<Self> {
        settings.validate()?;
        Ok(Self::build(settings, clock))
    }

    fn build(settings: LimiterSettings, clock: Arc<dyn Clock>) -> Self {
        let shards = (0..settings.shard_count).map(|_| Shard::new()).collect();
        Self {
            shards,
            settings,
            window_nanos: duration_to_nanos(settings.window),
            retention_nanos: duration_to_nanos(settings.retention),
            clock,
        }
    }

    /// Decide whether a request for `key` may proceed right now.
    ///
    /// Negative keys cannot be routed and are always denied.
    pub fn allow_request(&self, key: i64) -> bool {
        self.allow_request_at(key, self.clock.now_nanos())
    }

    /// Like [`allow_request`](Self::allow_request), but reports an
    /// unroutable key as an error instead of a denial.
    pub fn try_allow_request(&self, key: i64) -> Result<bool> {
        self.try_allow_request_at(key, self.clock.now_nanos())
    }

    /// Admission decision for `key` at an explicit time in nanoseconds.
    pub fn allow_request_at(&self, key: i64, now: i64) -> bool {
        match self.try_allow_request_at(key, now) {
            Ok(allowed) => allowed,
            Err(e) => {
                warn!(key = key, error = %e, "Rejecting request with unroutable key");
                false
            }
        }
    }

    /// Fallible admission decision for `key` at an explicit time.
    pub fn try_allow_request_at(&self, key: i64, now: i64) -> Result<bool> {
        let index = self.shard_index(key)?;
        let shard = &self.shards[index];

        // A sweep may retire the limiter between lookup and admission; the
        // retry then finds or creates its replacement.
        loop {
            let limiter = shard.get_or_create(key, now, self.settings.burst);
            if let Some(allowed) = limiter.try_admit(now, self.window_nanos, self.settings.burst) {
                trace!(
                    key = key,
                    shard = index,
                    allowed = allowed,
                    "Admission decision"
                );
                return Ok(allowed);
            }
        }
    }

    /// Shard that owns `key`.
    pub fn shard_index(&self, key: i64) -> Result<usize> {
        let key = u64::try_from(key).map_err(|_| ShardgateError::InvalidKey(key))?;
        // Remainder is below shard_count, which is a usize.
        Ok((key % self.shards.len() as u64) as usize)
    }

    /// Start the background sweeper on the current tokio runtime.
    ///
    /// Returns immediately. The sweeper runs until the returned handle is
    /// stopped or dropped, or the limiter itself is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`ShardgateError::Config`] for a zero interval or idle
    /// threshold, and [`ShardgateError::Runtime`] when called outside a
    /// tokio runtime.
    pub fn start_cleanup(
        self: &Arc<Self>,
        interval: Duration,
        idle_threshold: Duration,
    ) -> Result<SweeperHandle> {
        let settings = SweeperSettings::new(interval, idle_threshold);
        settings.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ShardgateError::Runtime(e.to_string()))?;
        Ok(sweeper::spawn(&runtime, self, settings))
    }

    /// Run one sweep over every shard at an explicit time.
    pub fn sweep_at(&self, now: i64, idle_threshold: Duration) -> SweepStats {
        let mut stats = SweepStats::default();
        for index in 0..self.shards.len() {
            stats += self.sweep_shard(index, now, idle_threshold);
        }
        stats
    }

    pub(crate) fn sweep_shard(&self, index: usize, now: i64, idle_threshold: Duration) -> SweepStats {
        let retention_cutoff = now.saturating_sub(self.retention_nanos);
        self.shards[index].sweep(now, retention_cutoff, duration_to_nanos(idle_threshold))
    }

    /// Current time according to this limiter's clock.
    pub fn now_nanos(&self) -> i64 {
        self.clock.now_nanos()
    }

    /// Number of keys currently tracked.
    pub fn key_count(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    /// Number of timestamps held for `key`, if it is tracked.
    pub fn queue_len(&self, key: i64) -> Option<usize> {
        let index = self.shard_index(key).ok()?;
        self.shards[index].get(key).map(|limiter| limiter.queue_len())
    }

    /// Number of shards.
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Settings this limiter was built with.
    pub fn settings(&self) -> &LimiterSettings {
        &self.settings
    }

    /// Forget every key.
    pub fn clear(&self) {
        for shard in self.shards.iter() {
            shard.clear();
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
