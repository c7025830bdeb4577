use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shardgate::config::ShardgateConfig;
use shardgate::ratelimit::RateLimiter;

/// Drive the sliding-window limiter for one key and report each decision.
#[derive(Debug, Parser)]
#[command(name = "shardgate", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "SHARDGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Key to issue requests for
    #[arg(long, default_value_t = 1, env = "SHARDGATE_KEY", allow_hyphen_values = true)]
    key: i64,

    /// Number of requests to issue
    #[arg(long, default_value_t = 12, env = "SHARDGATE_REQUESTS")]
    requests: u32,

    /// Override the window length in seconds
    #[arg(long, env = "SHARDGATE_WINDOW_SECS")]
    window_secs: Option<u64>,

    /// Override the burst cap
    #[arg(long, env = "SHARDGATE_BURST")]
    burst: Option<usize>,

    /// Keep the sweeper running until Ctrl+C or SIGTERM
    #[arg(long, env = "SHARDGATE_WAIT")]
    wait: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", env = "SHARDGATE_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Shardgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => ShardgateConfig::from_file(path)?,
        None => ShardgateConfig::default(),
    };
    if let Some(window_secs) = args.window_secs {
        config.limiter.window_secs = window_secs;
    }
    if let Some(burst) = args.burst {
        config.limiter.burst = burst;
    }

    let limiter_settings = config.limiter_settings()?;
    let sweeper_settings = config.sweeper_settings()?;
    info!(
        window = ?limiter_settings.window,
        burst = limiter_settings.burst,
        retention = ?limiter_settings.retention,
        shards = limiter_settings.shard_count,
        "Configuration loaded"
    );

    let rate_limiter = Arc::new(RateLimiter::with_settings(limiter_settings)?);
    let mut sweeper =
        rate_limiter.start_cleanup(sweeper_settings.interval, sweeper_settings.idle_threshold)?;

    for i in 1..=args.requests {
        let allowed = rate_limiter.allow_request(args.key);
        info!(key = args.key, request = i, allowed = allowed, "Request processed");
    }

    if args.wait {
        shutdown_signal().await;
    }

    sweeper.stop().await;
    info!(tracked_keys = rate_limiter.key_count(), "Shardgate stopped");
    Ok(())
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
