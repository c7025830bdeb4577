//! Per-key queue of admission timestamps.

use std::collections::VecDeque;

use crate::error::{Result, ShardgateError};

/// Ordered sequence of nanosecond timestamps, oldest first.
///
/// Entries are appended at the tail and removed from the head only.
/// They are expected to be non-decreasing, but nothing here relies on it:
/// eviction stops at the first head entry that is not stale.
#[derive(Debug, Default, Clone)]
pub struct TimestampQueue {
    entries: VecDeque<i64>,
}

impl TimestampQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty queue with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Append a timestamp at the tail.
    pub fn enqueue(&mut self, ts: i64) {
        self.entries.push_back(ts);
    }

    /// Remove and return the head.
    pub fn dequeue(&mut self) -> Result<i64> {
        self.entries.pop_front().ok_or(ShardgateError::EmptyQueue)
    }

    /// Look at the oldest entry without removing it.
    pub fn peek_head(&self) -> Option<i64> {
        self.entries.front().copied()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop head entries strictly older than `cutoff`.
    ///
    /// Returns the number of entries removed. This is the single eviction
    /// routine shared by admission and the reclamation sweep.
    pub fn evict_before(&mut self, cutoff: i64) -> usize {
        let mut evicted = 0;
        while let Some(head) = self.peek_head() {
            if head >= cutoff {
                break;
            }
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }
}
