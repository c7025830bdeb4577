//! Error types for Shardgate.

use thiserror::Error;

/// Main error type for Shardgate operations.
#[derive(Error, Debug)]
pub enum ShardgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Key that cannot be routed to a shard
    #[error("Invalid key {0}: keys must be non-negative")]
    InvalidKey(i64),

    /// Removal from an empty timestamp queue
    #[error("Timestamp queue is empty")]
    EmptyQueue,

    /// No tokio runtime to run background tasks on
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Shardgate operations.
pub type Result<T> = std::result::Result<T, ShardgateError>;
