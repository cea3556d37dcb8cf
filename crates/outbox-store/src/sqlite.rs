//! SQLite outbox adapter.
//!
//! Timestamps are stored as unix milliseconds. Every write runs on the
//! executor thread inside an `IMMEDIATE` transaction, so two claims can never
//! interleave.

use crate::executor::AsyncDatabase;
use crate::lifecycle::Trigger;
use crate::models::{Claim, EventStatus, NewPackEvent, PackEvent, StoreStats};
use crate::store::{EventStore, StoreConfig};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use std::path::Path;
use tracing::{debug, warn};

const CLAIM_SQL: &str = "
    UPDATE pack_events
    SET status = 'IN_FLIGHT', locked_until = ?1, updated_at = ?2
    WHERE id IN (
        SELECT id FROM pack_events
        WHERE status = 'CREATED'
           OR (status = 'IN_FLIGHT' AND (locked_until IS NULL OR locked_until < ?2))
        ORDER BY created_at, id
        LIMIT ?3
    )
    RETURNING id, payload, routing_key, status, attempts, last_error,
              created_at, updated_at, last_attempt_at, locked_until";

const SELECT_SQL: &str = "
    SELECT id, payload, routing_key, status, attempts, last_error,
           created_at, updated_at, last_attempt_at, locked_until
    FROM pack_events WHERE id = ?1";

fn now_timestamp_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn parse_datetime_from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}

fn parse_status(idx: usize, value: String) -> rusqlite::Result<EventStatus> {
    value.parse::<EventStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<PackEvent> {
    Ok(PackEvent {
        id: row.get(0)?,
        payload: row.get(1)?,
        routing_key: row.get(2)?,
        status: parse_status(3, row.get(3)?)?,
        attempts: row.get(4)?,
        last_error: row.get(5)?,
        created_at: parse_datetime_from_millis(row.get(6)?),
        updated_at: parse_datetime_from_millis(row.get(7)?),
        last_attempt_at: row.get::<_, Option<i64>>(8)?.map(parse_datetime_from_millis),
        locked_until: row.get::<_, Option<i64>>(9)?.map(parse_datetime_from_millis),
    })
}

/// Outbox adapter over a local SQLite file.
#[derive(Clone)]
pub struct SqliteEventStore {
    db: AsyncDatabase,
    config: StoreConfig,
}

impl SqliteEventStore {
    pub fn new(db: AsyncDatabase, config: StoreConfig) -> Self {
        Self { db, config }
    }

    pub async fn open(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        Ok(Self::new(AsyncDatabase::open(path).await?, config))
    }

    pub async fn open_in_memory(config: StoreConfig) -> StoreResult<Self> {
        Ok(Self::new(AsyncDatabase::open_in_memory().await?, config))
    }

    pub fn database(&self) -> &AsyncDatabase {
        &self.db
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub async fn close(self) -> StoreResult<()> {
        self.db.close().await
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn claim_batch(&self, limit: usize) -> StoreResult<Vec<PackEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let lease_ms = self.config.claim_lease.as_millis() as i64;
        let mut events = self
            .db
            .call(move |conn| {
                let now = now_timestamp_ms();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let events = {
                    let mut stmt = tx.prepare_cached(CLAIM_SQL)?;
                    let rows = stmt.query_map(params![now + lease_ms, now, limit as i64], row_to_event)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };
                tx.commit()?;
                Ok(events)
            })
            .await?;

        // RETURNING order is unspecified.
        events.sort_by_key(|e| (e.created_at, e.id));

        if !events.is_empty() {
            debug!(count = events.len(), first_id = events[0].id, "Claimed pack events");
        }
        Ok(events)
    }

    async fn mark_sent(&self, claims: &[Claim]) -> StoreResult<usize> {
        if claims.is_empty() {
            return Ok(0);
        }

        let claims: Vec<(i64, i64)> = claims
            .iter()
            .map(|c| (c.id, c.locked_until.timestamp_millis()))
            .collect();
        let requested = claims.len();
        let changed = self
            .db
            .call(move |conn| {
                let now = now_timestamp_ms();
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut changed = 0;
                {
                    let mut stmt = tx.prepare_cached(
                        "UPDATE pack_events
                         SET status = 'PROCESSED', locked_until = NULL, updated_at = ?1
                         WHERE id = ?2 AND status = 'IN_FLIGHT' AND locked_until = ?3",
                    )?;
                    for (id, locked_until) in claims {
                        changed += stmt.execute(params![now, id, locked_until])?;
                    }
                }
                tx.commit()?;
                Ok(changed)
            })
            .await?;

        if changed < requested {
            debug!(requested, changed, "Some claims were no longer held when marked sent");
        }
        Ok(changed)
    }

    async fn mark_failed(
        &self,
        claim: &Claim,
        increment_attempt: bool,
        reason: &str,
    ) -> StoreResult<EventStatus> {
        let max_attempts = self.config.max_attempts;
        let reason = reason.to_string();
        let id = claim.id;
        let token = claim.locked_until.timestamp_millis();

        self.db
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

                let current = tx
                    .query_row(
                        "SELECT status, attempts, locked_until FROM pack_events WHERE id = ?1",
                        [id],
                        |row| {
                            Ok((
                                row.get::<_, String>(0)?,
                                row.get::<_, i32>(1)?,
                                row.get::<_, Option<i64>>(2)?,
                            ))
                        },
                    )
                    .optional()?;
                let Some((status, attempts, locked_until)) = current else {
                    return Err(StoreError::NotFound(format!("pack event {}", id)));
                };

                let status = parse_status(0, status)?;
                if status != EventStatus::InFlight {
                    warn!(event_id = id, status = %status, "Event not in flight, failure not recorded");
                    return Ok(status);
                }
                if locked_until != Some(token) {
                    warn!(event_id = id, "Claim taken over by another worker, failure not recorded");
                    return Ok(status);
                }

                let now = now_timestamp_ms();
                let next = if increment_attempt {
                    let next = status.apply(Trigger::PublishFailed, attempts, max_attempts)?;
                    tx.execute(
                        "UPDATE pack_events
                         SET status = ?1, attempts = ?2, last_error = ?3,
                             last_attempt_at = ?4, locked_until = NULL, updated_at = ?4
                         WHERE id = ?5",
                        params![next.status.as_str(), next.attempts, reason, now, id],
                    )?;
                    next
                } else {
                    let next = status.apply(Trigger::Cancelled, attempts, max_attempts)?;
                    tx.execute(
                        "UPDATE pack_events
                         SET status = ?1, locked_until = NULL, updated_at = ?2
                         WHERE id = ?3",
                        params![next.status.as_str(), now, id],
                    )?;
                    next
                };

                tx.commit()?;
                Ok(next.status)
            })
            .await
    }

    async fn enqueue(&self, event: NewPackEvent) -> StoreResult<i64> {
        self.db
            .call_sqlite(move |conn| {
                let now = now_timestamp_ms();
                conn.execute(
                    "INSERT INTO pack_events (payload, routing_key, status, attempts, created_at, updated_at)
                     VALUES (?1, ?2, 'CREATED', 0, ?3, ?3)",
                    params![event.payload, event.routing_key, now],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    async fn get(&self, id: i64) -> StoreResult<Option<PackEvent>> {
        self.db
            .call_sqlite(move |conn| {
                let mut stmt = conn.prepare_cached(SELECT_SQL)?;
                let event = stmt.query_row([id], row_to_event).optional()?;
                Ok(event)
            })
            .await
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        self.db
            .call(|conn| {
                let mut stmt =
                    conn.prepare_cached("SELECT status, COUNT(*) FROM pack_events GROUP BY status")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })?;

                let mut stats = StoreStats::default();
                for row in rows {
                    let (status, count) = row?;
                    let status = status.parse::<EventStatus>().map_err(StoreError::InvalidData)?;
                    stats.record(status, count);
                }
                Ok(stats)
            })
            .await
    }

    async fn health_check(&self) -> StoreResult<()> {
        self.db.health_check().await
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;
    use crate::schema;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    async fn create_store(config: StoreConfig) -> SqliteEventStore {
        let store = SqliteEventStore::open_in_memory(config).await.unwrap();
        store
            .database()
            .call_sqlite(|conn| conn.execute_batch(schema::SQLITE))
            .await
            .unwrap();
        store
    }

    async fn default_store() -> SqliteEventStore {
        create_store(conformance::config()).await
    }

    #[tokio::test]
    async fn test_claims_oldest_first() {
        conformance::claims_oldest_first(&default_store().await).await;
    }

    #[tokio::test]
    async fn test_zero_limit_claims_nothing() {
        conformance::zero_limit_claims_nothing(&default_store().await).await;
    }

    #[tokio::test]
    async fn test_mark_sent_is_idempotent() {
        conformance::mark_sent_is_idempotent(&default_store().await).await;
    }

    #[tokio::test]
    async fn test_retries_until_failed() {
        conformance::retries_until_failed(&default_store().await).await;
    }

    #[tokio::test]
    async fn test_release_keeps_attempts() {
        conformance::release_keeps_attempts(&default_store().await).await;
    }

    #[tokio::test]
    async fn test_mark_failed_outside_flight() {
        conformance::mark_failed_outside_flight(&default_store().await).await;
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let store = create_store(StoreConfig {
            claim_lease: Duration::ZERO,
            ..conformance::config()
        })
        .await;
        conformance::expired_lease_is_reclaimed(&store).await;
    }

    #[tokio::test]
    async fn test_stale_claim_is_not_acknowledged() {
        let store = create_store(StoreConfig {
            claim_lease: Duration::ZERO,
            ..conformance::config()
        })
        .await;
        conformance::stale_claim_is_not_acknowledged(&store).await;
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_disjoint() {
        let store = Arc::new(default_store().await);
        conformance::concurrent_claims_are_disjoint(store).await;
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        conformance::stats_counts_by_status(&default_store().await).await;
    }

    #[tokio::test]
    async fn test_file_backed_store_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("outbox.db");

        let store = SqliteEventStore::open(&path, conformance::config()).await.unwrap();
        store
            .database()
            .call_sqlite(|conn| conn.execute_batch(schema::SQLITE))
            .await
            .unwrap();
        let id = store.enqueue(NewPackEvent::new("pack.created", b"{}".to_vec())).await.unwrap();
        let claimed = store.claim_batch(10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        store.close().await.unwrap();

        let store = SqliteEventStore::open(&path, conformance::config()).await.unwrap();
        let event = store.get(id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::InFlight);
        assert!(event.locked_until.is_some());
        // Lease still held after restart.
        assert!(store.claim_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_status_is_invalid_data() {
        let store = default_store().await;
        store
            .database()
            .call_sqlite(|conn| {
                conn.execute_batch(
                    "DROP TABLE pack_events;
                     CREATE TABLE pack_events (status TEXT);
                     INSERT INTO pack_events (status) VALUES ('SHIPPED');",
                )
            })
            .await
            .unwrap();

        let err = store.stats().await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
        assert!(!err.is_transient());
    }
}
