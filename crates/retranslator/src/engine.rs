//! Worker pool lifecycle.

use crate::config::RetranslatorConfig;
use crate::error::{RetranslatorError, RetranslatorResult};
use crate::metrics::RetranslatorMetrics;
use crate::worker::{HeldClaims, Worker};
use outbox_store::{EventStatus, EventStore};
use pack_publisher::Publisher;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const ABANDONED_REASON: &str = "worker aborted during shutdown";

/// The retranslation engine.
///
/// # Lifecycle
///
/// 1. Create with [`Retranslator::new()`]
/// 2. [`Retranslator::start()`] spawns the workers and returns
/// 3. [`Retranslator::close()`] stops claiming, lets in-flight batches
///    finish for `shutdown_grace`, then cancels what is left
///
/// Both calls are idempotent; `close` without `start` is a no-op.
pub struct Retranslator {
    config: RetranslatorConfig,
    store: Arc<dyn EventStore>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<RetranslatorMetrics>,
    held: Arc<HeldClaims>,
    stop: CancellationToken,
    abort: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
    closing: tokio::sync::Mutex<()>,
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Retranslator {
    pub fn new(
        config: RetranslatorConfig,
        store: Arc<dyn EventStore>,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<RetranslatorMetrics>,
    ) -> RetranslatorResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            publisher,
            metrics,
            held: Arc::new(HeldClaims::default()),
            stop: CancellationToken::new(),
            abort: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            closing: tokio::sync::Mutex::new(()),
        })
    }

    /// Spawn the workers. Must be called from within a Tokio runtime.
    pub fn start(&self) -> RetranslatorResult<()> {
        let mut handles = lock(&self.handles);
        if self.closed.load(Ordering::SeqCst) {
            return Err(RetranslatorError::Closed);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            debug!("Retranslator already started");
            return Ok(());
        }

        for id in 0..self.config.worker_count {
            let worker = Worker {
                id,
                config: self.config.clone(),
                store: self.store.clone(),
                publisher: self.publisher.clone(),
                metrics: self.metrics.clone(),
                held: self.held.clone(),
                stop: self.stop.clone(),
                abort: self.abort.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }

        if !self.config.stats_interval.is_zero() {
            handles.push(tokio::spawn(refresh_stats(
                self.store.clone(),
                self.metrics.clone(),
                self.config.stats_interval,
                self.stop.clone(),
            )));
        }

        info!(
            workers = self.config.worker_count,
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            store = self.store.backend(),
            "Retranslator started"
        );
        Ok(())
    }

    /// Stop the pool.
    ///
    /// Workers finish the batch they hold for up to `shutdown_grace`. After
    /// that in-flight publishes are cancelled and workers get
    /// `release_timeout` to hand their claims back; anything still running
    /// then is aborted and the claims it held are released here.
    pub async fn close(&self) {
        let _closing = self.closing.lock().await;
        self.closed.store(true, Ordering::SeqCst);
        self.stop.cancel();

        let mut handles = std::mem::take(&mut *lock(&self.handles));
        if handles.is_empty() {
            self.abort.cancel();
            return;
        }

        info!(
            grace_ms = self.config.shutdown_grace.as_millis() as u64,
            "Stopping retranslator"
        );

        if !join_within(&mut handles, self.config.shutdown_grace).await {
            warn!(
                remaining = handles.len(),
                "Shutdown grace elapsed, cancelling in-flight publishes"
            );
            self.abort.cancel();

            if !join_within(&mut handles, self.config.release_timeout).await {
                warn!(
                    remaining = handles.len(),
                    "Workers did not release their claims in time, aborting"
                );
                for handle in &handles {
                    handle.abort();
                }
                join_within(&mut handles, self.config.release_timeout).await;
                self.release_abandoned().await;
            }
        }

        self.abort.cancel();
        info!("Retranslator stopped");
    }

    /// Hand back the claims of workers aborted between claim and
    /// acknowledgement. Claims they did acknowledge are no-ops in the store.
    async fn release_abandoned(&self) {
        let claims = self.held.take_all();
        if claims.is_empty() {
            return;
        }

        let releasing = async {
            let mut released = 0usize;
            for claim in &claims {
                match self.store.mark_failed(claim, false, ABANDONED_REASON).await {
                    Ok(EventStatus::Created) => {
                        released += 1;
                        self.metrics.events_released.inc();
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.metrics.store_errors.inc();
                        warn!(event_id = claim.id, error = %e, "Failed to release abandoned claim");
                    }
                }
            }
            released
        };

        match tokio::time::timeout(self.config.release_timeout, releasing).await {
            Ok(released) => info!(held = claims.len(), released, "Released claims of aborted workers"),
            Err(_) => warn!(
                held = claims.len(),
                "Timed out releasing claims of aborted workers, the rest return when their lease expires"
            ),
        }
    }

    pub fn is_running(&self) -> bool {
        self.started.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    pub fn metrics(&self) -> &Arc<RetranslatorMetrics> {
        &self.metrics
    }

    pub fn config(&self) -> &RetranslatorConfig {
        &self.config
    }
}

impl Drop for Retranslator {
    fn drop(&mut self) {
        self.stop.cancel();
        self.abort.cancel();
    }
}

/// Wait for every handle until `limit` elapses. Finished handles are removed;
/// returns whether none are left.
async fn join_within(handles: &mut Vec<JoinHandle<()>>, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while let Some(handle) = handles.last_mut() {
        let joined = tokio::time::timeout_at(deadline, handle).await;
        match joined {
            Ok(result) => {
                handles.pop();
                if let Err(e) = result {
                    if e.is_panic() {
                        error!(error = %e, "Retranslator task panicked");
                    }
                }
            }
            Err(_) => return false,
        }
    }
    true
}

/// Refresh the backlog gauges from the store until `stop` fires.
async fn refresh_stats(
    store: Arc<dyn EventStore>,
    metrics: Arc<RetranslatorMetrics>,
    every: Duration,
    stop: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match store.stats().await {
            Ok(stats) => {
                metrics.backlog_created.set(stats.created as i64);
                metrics.backlog_failed.set(stats.failed as i64);
                debug!(
                    created = stats.created,
                    in_flight = stats.in_flight,
                    processed = stats.processed,
                    failed = stats.failed,
                    "Outbox stats refreshed"
                );
            }
            Err(e) => {
                metrics.store_errors.inc();
                warn!(error = %e, "Failed to refresh outbox stats");
            }
        }
    }
}
