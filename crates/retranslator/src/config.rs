//! Engine configuration.

use crate::error::{RetranslatorError, RetranslatorResult};
use outbox_store::StoreConfig;
use std::time::Duration;

/// Configuration for the worker pool.
///
/// # Fields
///
/// - `worker_count`: concurrent workers polling the store (default: 4)
/// - `batch_size`: events claimed per poll (default: 100)
/// - `poll_interval`: pause between polls that found less than a full batch (default: 500ms)
/// - `poll_jitter`: each pause is moved by a random amount up to this (default: 100ms)
/// - `max_attempts`: failed publishes an event may accumulate before it is `FAILED` (default: 5)
/// - `claim_lease`: how long a claim stays exclusive (default: 60s)
/// - `publish_timeout`: cap on one batch publish; a batch that runs over is
///   abandoned and every event in it counts a failed attempt. Must stay below
///   `claim_lease` (default: 30s)
/// - `shutdown_grace`: how long `close` lets in-flight batches finish (default: 10s)
/// - `release_timeout`: how long cancelled workers get to release their claims (default: 2s)
/// - `error_backoff_max`: cap for the pause after repeated store errors (default: 30s)
/// - `stats_interval`: how often the backlog gauges are refreshed, zero disables (default: 15s)
#[derive(Debug, Clone)]
pub struct RetranslatorConfig {
    pub worker_count: usize,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub poll_jitter: Duration,
    pub max_attempts: i32,
    pub claim_lease: Duration,
    pub publish_timeout: Duration,
    pub shutdown_grace: Duration,
    pub release_timeout: Duration,
    pub error_backoff_max: Duration,
    pub stats_interval: Duration,
}

impl Default for RetranslatorConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            batch_size: 100,
            poll_interval: Duration::from_millis(500),
            poll_jitter: Duration::from_millis(100),
            max_attempts: 5,
            claim_lease: Duration::from_secs(60),
            publish_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(10),
            release_timeout: Duration::from_secs(2),
            error_backoff_max: Duration::from_secs(30),
            stats_interval: Duration::from_secs(15),
        }
    }
}

impl RetranslatorConfig {
    pub fn validate(&self) -> RetranslatorResult<()> {
        if self.worker_count == 0 {
            return Err(RetranslatorError::Config("worker_count must be at least 1".into()));
        }
        if self.batch_size == 0 {
            return Err(RetranslatorError::Config("batch_size must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(RetranslatorError::Config("poll_interval must be positive".into()));
        }
        if self.max_attempts <= 0 {
            return Err(RetranslatorError::Config("max_attempts must be positive".into()));
        }
        if self.claim_lease.is_zero() {
            return Err(RetranslatorError::Config("claim_lease must be positive".into()));
        }
        if self.publish_timeout.is_zero() {
            return Err(RetranslatorError::Config("publish_timeout must be positive".into()));
        }
        // A batch still publishing when its lease runs out can be claimed a
        // second time.
        if self.publish_timeout >= self.claim_lease {
            return Err(RetranslatorError::Config(format!(
                "publish_timeout ({}ms) must be shorter than claim_lease ({}ms)",
                self.publish_timeout.as_millis(),
                self.claim_lease.as_millis()
            )));
        }
        Ok(())
    }

    /// The store settings that must agree with this engine.
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            max_attempts: self.max_attempts,
            claim_lease: self.claim_lease,
        }
    }
}
