//! Per-key sliding window state.

use parking_lot::{Mutex, MutexGuard};

use super::queue::TimestampQueue;

/// Upper bound on the queue slots reserved when a key is first seen.
const INITIAL_QUEUE_CAPACITY: usize = 16;

/// Rate limiting state for a single key.
///
/// All fields live behind one mutex; the admission decision, the eviction
/// that precedes it, and the `last_seen` update form a single critical
/// section.
#[derive(Debug)]
pub struct KeyLimiter {
    state: Mutex<KeyState>,
}

/// Mutable state guarded by the key lock.
#[derive(Debug)]
pub(crate) struct KeyState {
    /// Timestamps of admitted requests, oldest first
    queue: TimestampQueue,
    /// Time of the most recent admission attempt
    last_seen: i64,
    /// Set once the sweeper has unlinked this limiter from its shard
    retired: bool,
}

impl KeyLimiter {
    /// Create an empty limiter first seen at `now`.
    pub fn new(now: i64, burst: usize) -> Self {
        Self {
            state: Mutex::new(KeyState {
                queue: TimestampQueue::with_capacity(burst.min(INITIAL_QUEUE_CAPACITY)),
                last_seen: now,
                retired: false,
            }),
        }
    }

    /// Evict entries older than `now - window`, then admit if fewer than
    /// `burst` entries remain.
    ///
    /// Returns `None` when the limiter was retired by a sweep after the
    /// caller looked it up; the caller must resolve the key again.
    pub fn try_admit(&self, now: i64, window: i64, burst: usize) -> Option<bool> {
        let mut state = self.state.lock();
        if state.retired {
            return None;
        }

        state.last_seen = now;
        state.queue.evict_before(now.saturating_sub(window));

        if state.queue.len() >= burst {
            return Some(false);
        }

        state.queue.enqueue(now);
        Some(true)
    }

    /// Number of timestamps currently held, stale or not.
    pub fn queue_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Time of the most recent admission attempt.
    pub fn last_seen(&self) -> i64 {
        self.state.lock().last_seen
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, KeyState> {
        self.state.lock()
    }
}

impl KeyState {
    pub(crate) fn evict_before(&mut self, cutoff: i64) -> usize {
        self.queue.evict_before(cutoff)
    }

    /// Idle for longer than `idle_threshold` and holding no timestamps.
    pub(crate) fn is_reclaimable(&self, now: i64, idle_threshold: i64) -> bool {
        let idle = now.saturating_sub(self.last_seen) > idle_threshold;
        idle && self.queue.is_empty()
    }

    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }
}
