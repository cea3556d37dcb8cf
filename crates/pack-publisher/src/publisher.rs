use crate::error::PublishResult;
use async_trait::async_trait;
use outbox_store::PackEvent;
use tokio_util::sync::CancellationToken;

/// What happened to one event of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// The broker acknowledged the event at the configured level.
    Delivered,
    /// The write failed; counts as an attempt.
    Failed(String),
    /// Shutdown interrupted the batch before this event was confirmed.
    Cancelled,
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered)
    }
}

/// Sends claimed events to the broker.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `batch` in order and return one outcome per event, in the
    /// same order.
    ///
    /// When `cancel` fires the in-flight write is abandoned and every event
    /// not yet confirmed is reported [`SendOutcome::Cancelled`]. A
    /// batch-level error means nothing in the batch was delivered.
    async fn send(
        &self,
        batch: &[PackEvent],
        cancel: &CancellationToken,
    ) -> PublishResult<Vec<SendOutcome>>;
}
