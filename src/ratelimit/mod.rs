//! Rate limiting logic and state management.

mod clock;
mod key;
mod limiter;
mod queue;
mod shard;
mod sweeper;

pub use clock::{Clock, ManualClock, SystemClock};
pub use key::KeyLimiter;
pub use limiter::{
    LimiterSettings, RateLimiter, DEFAULT_BURST, DEFAULT_RETENTION_FACTOR, DEFAULT_SHARD_COUNT,
    DEFAULT_WINDOW,
};
pub use queue::TimestampQueue;
pub use shard::Shard;
pub use sweeper::{
    SweepStats, SweeperHandle, SweeperSettings, DEFAULT_IDLE_THRESHOLD, DEFAULT_SWEEP_INTERVAL,
};
