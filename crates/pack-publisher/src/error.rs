//! Error types for the publisher.

use thiserror::Error;

/// Publisher error type.
///
/// Per-event problems are reported as [`crate::SendOutcome::Failed`]; these
/// errors cover the batch as a whole.
#[derive(Error, Debug)]
pub enum PublishError {
    /// Redis connection or command error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// None of the configured endpoints accepted a connection
    #[error("No broker endpoint reachable (tried: {0})")]
    Unreachable(String),

    /// Connecting or writing took longer than allowed
    #[error("Timed out after {0} ms")]
    Timeout(u64),

    /// Shutdown cancelled the batch before any event was written
    #[error("Publish cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for publisher operations.
pub type PublishResult<T> = Result<T, PublishError>;
