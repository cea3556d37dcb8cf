//! Error types for the retranslation engine.

use thiserror::Error;

/// Engine error type.
///
/// Runtime store and broker failures never surface here; workers log and
/// count them and keep polling. These are construction and lifecycle errors.
#[derive(Error, Debug)]
pub enum RetranslatorError {
    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Metrics registration error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// `start` after `close`
    #[error("Retranslator already closed")]
    Closed,

    #[error("Store error: {0}")]
    Store(#[from] outbox_store::StoreError),

    #[error("Publish error: {0}")]
    Publish(#[from] pack_publisher::PublishError),
}

/// Result type for engine operations.
pub type RetranslatorResult<T> = Result<T, RetranslatorError>;
