//! Configuration management for Shardgate.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{Result, ShardgateError};
use crate::ratelimit::{
    LimiterSettings, SweeperSettings, DEFAULT_BURST, DEFAULT_RETENTION_FACTOR,
    DEFAULT_SHARD_COUNT, DEFAULT_WINDOW, DEFAULT_IDLE_THRESHOLD, DEFAULT_SWEEP_INTERVAL,
};

/// Main configuration for Shardgate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardgateConfig {
    /// Admission limits
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Reclamation sweep timing
    #[serde(default)]
    pub sweeper: SweeperConfig,
}

/// Admission limit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Sliding window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Maximum admissions per window
    #[serde(default = "default_burst")]
    pub burst: usize,

    /// Retention window in seconds; defaults to three windows
    #[serde(default)]
    pub retention_secs: Option<u64>,

    /// Number of shards
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            burst: default_burst(),
            retention_secs: None,
            shard_count: default_shard_count(),
        }
    }
}

fn default_window_secs() -> u64 {
    DEFAULT_WINDOW.as_secs()
}

fn default_burst() -> usize {
    DEFAULT_BURST
}

fn default_shard_count() -> usize {
    DEFAULT_SHARD_COUNT
}

/// Sweeper configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweeperConfig {
    /// Seconds between sweep ticks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Seconds of inactivity before an empty key is reclaimed
    #[serde(default = "default_idle_threshold_secs")]
    pub idle_threshold_secs: u64,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            idle_threshold_secs: default_idle_threshold_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL.as_secs()
}

fn default_idle_threshold_secs() -> u64 {
    DEFAULT_IDLE_THRESHOLD.as_secs()
}

impl ShardgateConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ShardgateError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validated admission settings.
    pub fn limiter_settings(&self) -> Result<LimiterSettings> {
        let window = Duration::from_secs(self.limiter.window_secs);
        let retention = match self.limiter.retention_secs {
            Some(secs) => Duration::from_secs(secs),
            None => window.saturating_mul(DEFAULT_RETENTION_FACTOR),
        };

        let settings = LimiterSettings {
            window,
            burst: self.limiter.burst,
            retention,
            shard_count: self.limiter.shard_count,
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Validated sweeper settings.
    pub fn sweeper_settings(&self) -> Result<SweeperSettings> {
        let settings = SweeperSettings::new(
            Duration::from_secs(self.sweeper.interval_secs),
            Duration::from_secs(self.sweeper.idle_threshold_secs),
        );
        settings.validate()?;
        Ok(settings)
    }
}
