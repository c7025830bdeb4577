//! A lock-isolated partition of the key space.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use super::key::KeyLimiter;
use super::sweeper::SweepStats;

/// Mapping from key to its limiter.
///
/// The shard lock only guards the map structure. It is never held while
/// waiting on a key lock, except during a sweep, which always takes the
/// shard lock first and the key lock second.
#[derive(Debug, Default)]
pub struct Shard {
    keys: RwLock<HashMap<i64, Arc<KeyLimiter>>>,
}

impl Shard {
    /// Create an empty shard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the limiter for `key`, creating it on first use.
    ///
    /// Lookups share the read lock; only a miss takes the write lock and
    /// re-checks before inserting, so at most one limiter exists per key.
    pub fn get_or_create(&self, key: i64, now: i64, burst: usize) -> Arc<KeyLimiter> {
        if let Some(limiter) = self.keys.read().get(&key) {
            return Arc::clone(limiter);
        }

        let mut keys = self.keys.write();
        let limiter = keys.entry(key).or_insert_with(|| {
            debug!(key = key, "Creating new key limiter");
            Arc::new(KeyLimiter::new(now, burst))
        });
        Arc::clone(limiter)
    }

    /// Look up the limiter for `key` without creating one.
    pub fn get(&self, key: i64) -> Option<Arc<KeyLimiter>> {
        self.keys.read().get(&key).cloned()
    }

    /// Number of keys tracked by this shard.
    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    /// Whether this shard tracks no keys.
    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }

    /// Drop every key limiter.
    pub fn clear(&self) {
        let mut keys = self.keys.write();
        for limiter in keys.values() {
            limiter.lock().retire();
        }
        keys.clear();
    }

    /// Evict entries older than `retention_cutoff` from every key and remove
    /// keys that are both idle and empty.
    ///
    /// The shard write lock is held for the whole pass, which stalls first
    /// use of new keys in this shard until it completes.
    pub(crate) fn sweep(&self, now: i64, retention_cutoff: i64, idle_threshold: i64) -> SweepStats {
        let mut stats = SweepStats::default();
        let mut keys = self.keys.write();

        keys.retain(|&key, limiter| {
            let mut state = limiter.lock();
            stats.keys_scanned += 1;
            stats.entries_evicted += state.evict_before(retention_cutoff);

            if !state.is_reclaimable(now, idle_threshold) {
                return true;
            }

            // Retired under the key lock; the entry is unlinked before the
            // shard lock is released, so a caller that already holds this
            // limiter looks the key up again and finds a fresh one.
            state.retire();
            stats.keys_removed += 1;
            debug!(key = key, "Reclaimed idle key limiter");
            false
        });

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEC: i64 = 1_000_000_000;
    const WINDOW: i64 = 60 * SEC;

    #[test]
    fn test_get_or_create_returns_same_limiter() {
        let shard = Shard::new();
        let first = shard.get_or_create(7, 0, 10);
        let second = shard.get_or_create(7, 0, 10);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn test_get_missing_key() {
        let shard = Shard::new();
        assert!(shard.get(1).is_none());
        assert!(shard.is_empty());
    }

    #[test]
    fn test_concurrent_first_use_creates_one_limiter() {
        let shard = Arc::new(Shard::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let shard = Arc::clone(&shard);
                std::thread::spawn(move || shard.get_or_create(42, 0, 10))
            })
            .collect();

        let limiters: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for limiter in &limiters[1..] {
            assert!(Arc::ptr_eq(&limiters[0], limiter));
        }
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn test_sweep_removes_idle_empty_keys() {
        let shard = Shard::new();
        let limiter = shard.get_or_create(1, 0, 10);
        assert_eq!(limiter.try_admit(0, WINDOW, 10), Some(true));

        let now = 10 * WINDOW;
        let stats = shard.sweep(now, now - 3 * WINDOW, 5 * WINDOW);

        assert_eq!(stats.keys_scanned, 1);
        assert_eq!(stats.entries_evicted, 1);
        assert_eq!(stats.keys_removed, 1);
        assert!(shard.is_empty());

        // The caller's stale handle is retired, not silently reused.
        assert_eq!(limiter.try_admit(now, WINDOW, 10), None);
    }

    #[test]
    fn test_sweep_keeps_recent_keys() {
        let shard = Shard::new();
        let limiter = shard.get_or_create(1, 0, 10);
        limiter.try_admit(0, WINDOW, 10);

        // Still inside the retention window.
        let now = 2 * WINDOW;
        let stats = shard.sweep(now, now - 3 * WINDOW, WINDOW);

        assert_eq!(stats.entries_evicted, 0);
        assert_eq!(stats.keys_removed, 0);
        assert_eq!(shard.len(), 1);
    }

    #[test]
    fn test_sweep_keeps_empty_but_active_keys() {
        let shard = Shard::new();
        let limiter = shard.get_or_create(1, 0, 10);
        limiter.try_admit(0, WINDOW, 10);

        let now = 4 * WINDOW;
        let stats = shard.sweep(now, now - 3 * WINDOW, 5 * WINDOW);

        assert_eq!(stats.entries_evicted, 1);
        assert_eq!(stats.keys_removed, 0);
        assert_eq!(limiter.queue_len(), 0);
    }

    #[test]
    fn test_sweep_removes_only_reclaimable_keys() {
        let shard = Shard::new();
        for key in 0..10 {
            let limiter = shard.get_or_create(key, 0, 10);
            limiter.try_admit(0, WINDOW, 10);
        }
        let active: Vec<_> = (10..15)
            .map(|key| {
                let limiter = shard.get_or_create(key, 9 * WINDOW, 10);
                limiter.try_admit(9 * WINDOW, WINDOW, 10);
                limiter
            })
            .collect();

        let now = 10 * WINDOW;
        let stats = shard.sweep(now, now - 3 * WINDOW, 5 * WINDOW);

        assert_eq!(stats.keys_scanned, 15);
        assert_eq!(stats.entries_evicted, 10);
        assert_eq!(stats.keys_removed, 10);
        assert_eq!(shard.len(), 5);
        for (key, limiter) in (10..15).zip(&active) {
            assert!(Arc::ptr_eq(&shard.get(key).unwrap(), limiter));
            assert_eq!(limiter.queue_len(), 1);
        }
        assert!(shard.get(0).is_none());
    }

    #[test]
    fn test_clear_retires_limiters() {
        let shard = Shard::new();
        let limiter = shard.get_or_create(3, 0, 10);
        shard.clear();

        assert!(shard.is_empty());
        assert_eq!(limiter.try_admit(0, WINDOW, 10), None);
    }
}
