use crate::models::{Claim, EventStatus, NewPackEvent, PackEvent, StoreStats};
use crate::StoreResult;
use async_trait::async_trait;
use std::time::Duration;

/// Settings shared by every backend.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// A publish failure that takes `attempts` past this value marks the
    /// event `FAILED`.
    pub max_attempts: i32,
    /// How long a claim stays exclusive. A worker that dies mid-batch leaves
    /// its rows `IN_FLIGHT`; they become claimable again once this elapses.
    pub claim_lease: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            claim_lease: Duration::from_secs(60),
        }
    }
}

/// Access to the outbox table.
///
/// Implementations hold no business logic beyond applying the lifecycle
/// atomically; all polling and retry decisions live in the workers.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Claim up to `limit` claimable events, oldest first.
    ///
    /// Claimable means `CREATED`, or `IN_FLIGHT` with an expired lease. Rows
    /// held by a concurrent claim are skipped, never waited on. Returned
    /// events are already `IN_FLIGHT` with a fresh lease.
    async fn claim_batch(&self, limit: usize) -> StoreResult<Vec<PackEvent>>;

    /// Mark claimed events as `PROCESSED`. Rows no longer held under the
    /// given claim (already acknowledged, released, or re-claimed after the
    /// lease ran out) are left alone. Returns how many rows changed.
    async fn mark_sent(&self, claims: &[Claim]) -> StoreResult<usize>;

    /// Record a failed or cancelled publish for a claimed event.
    ///
    /// With `increment_attempt` the attempt is counted and `reason` stored;
    /// without it the claim is simply released. Returns the status the row
    /// ends up in. When the row is no longer held under `claim` nothing
    /// changes and its current status is returned, which is `IN_FLIGHT` when
    /// another worker has taken it over.
    async fn mark_failed(
        &self,
        claim: &Claim,
        increment_attempt: bool,
        reason: &str,
    ) -> StoreResult<EventStatus>;

    /// Insert a new `CREATED` event and return its id.
    async fn enqueue(&self, event: NewPackEvent) -> StoreResult<i64>;

    async fn get(&self, id: i64) -> StoreResult<Option<PackEvent>>;

    /// Row counts per status.
    async fn stats(&self) -> StoreResult<StoreStats>;

    async fn health_check(&self) -> StoreResult<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}
