//! Prometheus metrics for the retranslation engine.
//!
//! The engine only records; exposing the registry over HTTP is the binary's
//! job.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Batch publish latency buckets, in seconds.
const BATCH_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// Engine metrics
#[derive(Debug, Clone)]
pub struct RetranslatorMetrics {
    /// Events claimed from the store
    pub events_claimed: IntCounter,
    /// Events the broker acknowledged and the store marked `PROCESSED`
    pub events_sent: IntCounter,
    /// Failed publishes requeued as `CREATED`
    pub events_retried: IntCounter,
    /// Events that ran out of attempts
    pub events_failed: IntCounter,
    /// Claims released by shutdown without counting an attempt
    pub events_released: IntCounter,
    /// Store calls that returned an error
    pub store_errors: IntCounter,
    /// Batches between claim and acknowledgement right now
    pub batches_in_flight: IntGauge,
    /// Worker tasks currently running
    pub workers_running: IntGauge,
    /// `CREATED` rows at the last stats refresh
    pub backlog_created: IntGauge,
    /// `FAILED` rows at the last stats refresh
    pub backlog_failed: IntGauge,
    /// Time from claim to the end of the publish
    pub batch_duration: Histogram,

    registry: Registry,
}

impl RetranslatorMetrics {
    /// Create the metrics and register them in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let events_claimed = IntCounter::new(
            "retranslator_events_claimed_total",
            "Events claimed from the outbox",
        )?;
        let events_sent = IntCounter::new(
            "retranslator_events_sent_total",
            "Events published and marked processed",
        )?;
        let events_retried = IntCounter::new(
            "retranslator_events_retried_total",
            "Failed publishes requeued for another attempt",
        )?;
        let events_failed = IntCounter::new(
            "retranslator_events_failed_total",
            "Events moved to FAILED after exhausting their attempts",
        )?;
        let events_released = IntCounter::new(
            "retranslator_events_released_total",
            "Claims released on shutdown without counting an attempt",
        )?;
        let store_errors = IntCounter::new(
            "retranslator_store_errors_total",
            "Outbox store calls that failed",
        )?;
        let batches_in_flight = IntGauge::new(
            "retranslator_batches_in_flight",
            "Batches claimed but not yet acknowledged",
        )?;
        let workers_running =
            IntGauge::new("retranslator_workers_running", "Running worker tasks")?;
        let backlog_created = IntGauge::new(
            "retranslator_backlog_created",
            "Events waiting in CREATED at the last stats refresh",
        )?;
        let backlog_failed = IntGauge::new(
            "retranslator_backlog_failed",
            "Events in FAILED at the last stats refresh",
        )?;
        let batch_duration = Histogram::with_opts(
            HistogramOpts::new(
                "retranslator_batch_duration_seconds",
                "Time to publish one claimed batch",
            )
            .buckets(BATCH_BUCKETS.to_vec()),
        )?;

        let registry = Registry::new();
        registry.register(Box::new(events_claimed.clone()))?;
        registry.register(Box::new(events_sent.clone()))?;
        registry.register(Box::new(events_retried.clone()))?;
        registry.register(Box::new(events_failed.clone()))?;
        registry.register(Box::new(events_released.clone()))?;
        registry.register(Box::new(store_errors.clone()))?;
        registry.register(Box::new(batches_in_flight.clone()))?;
        registry.register(Box::new(workers_running.clone()))?;
        registry.register(Box::new(backlog_created.clone()))?;
        registry.register(Box::new(backlog_failed.clone()))?;
        registry.register(Box::new(batch_duration.clone()))?;

        Ok(Self {
            events_claimed,
            events_sent,
            events_retried,
            events_failed,
            events_released,
            store_errors,
            batches_in_flight,
            workers_running,
            backlog_created,
            backlog_failed,
            batch_duration,
            registry,
        })
    }

    /// Get the registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
