//! One member of the dispatcher pool.
//!
//! Loop: wait for the next tick, claim a batch, publish it, acknowledge
//! every event according to its outcome. A full batch means more is likely
//! waiting, so the next claim happens right away.

use crate::config::RetranslatorConfig;
use crate::engine::lock;
use crate::metrics::RetranslatorMetrics;
use crate::schedule::{error_backoff, jittered};
use outbox_store::{Claim, EventStatus, EventStore, PackEvent, StoreError, StoreResult};
use pack_publisher::{PublishError, Publisher, SendOutcome};
use prometheus::IntGauge;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CANCELLED_REASON: &str = "publish cancelled by shutdown";

/// Holds a gauge incremented until dropped, including when the task is
/// aborted.
struct GaugeGuard(IntGauge);

impl GaugeGuard {
    fn new(gauge: &IntGauge) -> Self {
        gauge.inc();
        Self(gauge.clone())
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.dec();
    }
}

/// Claims each worker holds between claim and acknowledgement, so `close`
/// can hand back the rows of a worker it had to abort.
#[derive(Default)]
pub(crate) struct HeldClaims(Mutex<HashMap<usize, Vec<Claim>>>);

impl HeldClaims {
    fn hold(&self, worker: usize, claims: Vec<Claim>) {
        lock(&self.0).insert(worker, claims);
    }

    fn clear(&self, worker: usize) {
        lock(&self.0).remove(&worker);
    }

    pub(crate) fn take_all(&self) -> Vec<Claim> {
        lock(&self.0).drain().flat_map(|(_, claims)| claims).collect()
    }
}

pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(crate) config: RetranslatorConfig,
    pub(crate) store: Arc<dyn EventStore>,
    pub(crate) publisher: Arc<dyn Publisher>,
    pub(crate) metrics: Arc<RetranslatorMetrics>,
    pub(crate) held: Arc<HeldClaims>,
    /// No new claims once cancelled.
    pub(crate) stop: CancellationToken,
    /// Abandons the publish in progress once cancelled.
    pub(crate) abort: CancellationToken,
}

impl Worker {
    pub(crate) async fn run(self) {
        let _running = GaugeGuard::new(&self.metrics.workers_running);
        info!(worker_id = self.id, "Worker started");

        let mut rng = StdRng::from_entropy();
        let mut consecutive_errors: u32 = 0;
        // First poll right away.
        let mut delay = Duration::ZERO;

        loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            let tick = jittered(self.config.poll_interval, self.config.poll_jitter, &mut rng);
            delay = match self.poll_once().await {
                Ok(claimed) => {
                    consecutive_errors = 0;
                    if claimed >= self.config.batch_size {
                        Duration::ZERO
                    } else {
                        tick
                    }
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    self.metrics.store_errors.inc();
                    if e.is_transient() {
                        warn!(worker_id = self.id, error = %e, consecutive_errors, "Outbox store call failed");
                    } else {
                        error!(worker_id = self.id, error = %e, consecutive_errors, "Outbox store call failed");
                    }
                    tick.max(error_backoff(
                        consecutive_errors,
                        self.config.poll_interval,
                        self.config.error_backoff_max,
                    ))
                }
            };
        }

        info!(worker_id = self.id, "Worker stopped");
    }

    /// Claim, publish and acknowledge one batch. Returns how many events were
    /// claimed.
    async fn poll_once(&self) -> StoreResult<usize> {
        let batch = self.store.claim_batch(self.config.batch_size).await?;
        if batch.is_empty() {
            return Ok(0);
        }

        let claimed = batch.len();
        self.metrics.events_claimed.inc_by(claimed as u64);
        let _in_flight = GaugeGuard::new(&self.metrics.batches_in_flight);
        debug!(worker_id = self.id, claimed, "Claimed batch");

        self.held.hold(self.id, batch.iter().filter_map(PackEvent::claim).collect());

        let started = Instant::now();
        let outcomes = self.publish(&batch).await;
        self.metrics.batch_duration.observe(started.elapsed().as_secs_f64());

        let acknowledged = self.acknowledge(&batch, &outcomes).await;
        self.held.clear(self.id);
        acknowledged?;
        Ok(claimed)
    }

    async fn publish(&self, batch: &[PackEvent]) -> Vec<SendOutcome> {
        let limit = self.config.publish_timeout;
        let sent = tokio::time::timeout(limit, self.publisher.send(batch, &self.abort)).await;

        match sent {
            Err(_) => {
                warn!(
                    worker_id = self.id,
                    events = batch.len(),
                    timeout_ms = limit.as_millis() as u64,
                    "Batch publish timed out"
                );
                let reason = format!("publish timed out after {}ms", limit.as_millis());
                vec![SendOutcome::Failed(reason); batch.len()]
            }
            Ok(Ok(outcomes)) if outcomes.len() == batch.len() => outcomes,
            Ok(Ok(outcomes)) => {
                error!(
                    worker_id = self.id,
                    expected = batch.len(),
                    got = outcomes.len(),
                    "Publisher returned a mismatched outcome list"
                );
                let reason = format!("publisher returned {} outcomes for {} events", outcomes.len(), batch.len());
                vec![SendOutcome::Failed(reason); batch.len()]
            }
            Ok(Err(PublishError::Cancelled)) => vec![SendOutcome::Cancelled; batch.len()],
            Ok(Err(e)) => {
                warn!(worker_id = self.id, error = %e, events = batch.len(), "Batch publish failed");
                vec![SendOutcome::Failed(e.to_string()); batch.len()]
            }
        }
    }

    /// Write every outcome back to the store under the claim it was
    /// published with.
    ///
    /// Runs to completion even after `abort` fires so released claims do not
    /// wait for their lease to expire. Every event is attempted; the first
    /// store error is returned afterwards.
    async fn acknowledge(&self, batch: &[PackEvent], outcomes: &[SendOutcome]) -> StoreResult<()> {
        let mut first_error: Option<StoreError> = None;

        let delivered: Vec<Claim> = batch
            .iter()
            .zip(outcomes)
            .filter(|(_, outcome)| outcome.is_delivered())
            .filter_map(|(event, _)| event.claim())
            .collect();

        if !delivered.is_empty() {
            match self.store.mark_sent(&delivered).await {
                Ok(changed) => {
                    self.metrics.events_sent.inc_by(changed as u64);
                    debug!(worker_id = self.id, sent = changed, "Batch acknowledged");
                }
                // The rows stay IN_FLIGHT and are republished after the lease.
                Err(e) => first_error = Some(e),
            }
        }

        for (event, outcome) in batch.iter().zip(outcomes) {
            let (increment_attempt, reason) = match outcome {
                SendOutcome::Delivered => continue,
                SendOutcome::Failed(reason) => (true, reason.as_str()),
                SendOutcome::Cancelled => (false, CANCELLED_REASON),
            };
            let Some(claim) = event.claim() else {
                warn!(worker_id = self.id, event_id = event.id, "Event carries no claim, outcome not recorded");
                continue;
            };

            match self.store.mark_failed(&claim, increment_attempt, reason).await {
                Ok(EventStatus::Failed) => {
                    self.metrics.events_failed.inc();
                    error!(
                        worker_id = self.id,
                        event_id = event.id,
                        routing_key = %event.routing_key,
                        attempts = event.attempts + 1,
                        reason,
                        "Event permanently failed"
                    );
                }
                Ok(EventStatus::Created) if increment_attempt => {
                    self.metrics.events_retried.inc();
                    warn!(
                        worker_id = self.id,
                        event_id = event.id,
                        attempts = event.attempts + 1,
                        reason,
                        "Publish failed, event requeued"
                    );
                }
                Ok(EventStatus::Created) => {
                    self.metrics.events_released.inc();
                    debug!(worker_id = self.id, event_id = event.id, "Claim released");
                }
                Ok(EventStatus::InFlight) => {
                    warn!(worker_id = self.id, event_id = event.id, "Claim taken over by another worker");
                }
                Ok(status) => {
                    debug!(worker_id = self.id, event_id = event.id, status = %status, "Event no longer in flight");
                }
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(e) => {
                    self.metrics.store_errors.inc();
                    warn!(worker_id = self.id, event_id = event.id, error = %e, "Failed to record publish outcome");
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
