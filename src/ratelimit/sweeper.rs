//! Background reclamation of idle key state.

use std::ops::AddAssign;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;
use crate::error::{Result, ShardgateError};

/// Default time between sweep ticks.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Default inactivity after which an empty key is reclaimed.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(300);

/// Timing of the reclamation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperSettings {
    /// Time between ticks
    pub interval: Duration,
    /// Inactivity after which an empty key is deleted
    pub idle_threshold: Duration,
}

impl SweeperSettings {
    /// Create settings from an interval and idle threshold.
    pub fn new(interval: Duration, idle_threshold: Duration) -> Self {
        Self {
            interval,
            idle_threshold,
        }
    }

    /// Check that both durations are non-zero.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(ShardgateError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }
        if self.idle_threshold.is_zero() {
            return Err(ShardgateError::Config(
                "idle threshold must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SweeperSettings {
    fn default() -> Self {
        Self::new(DEFAULT_SWEEP_INTERVAL, DEFAULT_IDLE_THRESHOLD)
    }
}

/// Outcome of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    /// Keys visited
    pub keys_scanned: usize,
    /// Timestamps dropped for falling outside the retention window
    pub entries_evicted: usize,
    /// Key limiters deleted
    pub keys_removed: usize,
}

impl AddAssign for SweepStats {
    fn add_assign(&mut self, other: Self) {
        self.keys_scanned += other.keys_scanned;
        self.entries_evicted += other.entries_evicted;
        self.keys_removed += other.keys_removed;
    }
}

/// Handle to a running sweeper task.
///
/// Dropping the handle stops the sweeper at its next wakeup.
#[derive(Debug)]
#[must_use = "dropping the handle stops the sweeper"]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Whether the sweeper task is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the sweeper and wait for the task to exit.
    ///
    /// Calling this more than once is a no-op.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Sweeper task ended abnormally");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Spawn the periodic sweep on `runtime`.
///
/// The task holds only a weak reference and exits once the limiter is gone.
pub(crate) fn spawn(
    runtime: &Handle,
    limiter: &Arc<RateLimiter>,
    settings: SweeperSettings,
) -> SweeperHandle {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let task = runtime.spawn(run(Arc::downgrade(limiter), settings, shutdown_rx));

    SweeperHandle {
        shutdown,
        task: Some(task),
    }
}

async fn run(
    weak: Weak<RateLimiter>,
    settings: SweeperSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval = ?settings.interval,
        idle_threshold = ?settings.idle_threshold,
        "Sweeper started"
    );

    let mut ticker = interval_at(Instant::now() + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                // A closed channel means the handle was dropped.
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let Some(limiter) = weak.upgrade() else {
            debug!("Rate limiter dropped, sweeper exiting");
            break;
        };

        let stats = sweep_yielding(&limiter, settings.idle_threshold).await;
        debug!(
            keys_scanned = stats.keys_scanned,
            entries_evicted = stats.entries_evicted,
            keys_removed = stats.keys_removed,
            remaining_keys = limiter.key_count(),
            "Sweep tick complete"
        );
    }

    info!("Sweeper stopped");
}

/// One tick over every shard, yielding to the runtime between shards.
async fn sweep_yielding(limiter: &RateLimiter, idle_threshold: Duration) -> SweepStats {
    let now = limiter.now_nanos();
    let mut stats = SweepStats::default();
    for index in 0..limiter.shard_count() {
        stats += limiter.sweep_shard(index, now, idle_threshold);
        tokio::task::yield_now().await;
    }
    stats
}
