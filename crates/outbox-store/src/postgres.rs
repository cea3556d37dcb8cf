//! PostgreSQL outbox adapter.
//!
//! Claims use `FOR UPDATE SKIP LOCKED`, so any number of relay processes can
//! poll the same table without blocking on each other's rows.

use crate::lifecycle::Trigger;
use crate::models::{Claim, EventStatus, NewPackEvent, PackEvent, StoreStats};
use crate::store::{EventStore, StoreConfig};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Connection pool limits.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: u32,
    pub min_connections: u32,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            idle_timeout: Some(Duration::from_secs(300)),
            max_lifetime: Some(Duration::from_secs(1800)),
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

/// Row struct for pack_events queries
#[derive(FromRow)]
struct PackEventRow {
    id: i64,
    payload: Vec<u8>,
    routing_key: String,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_attempt_at: Option<DateTime<Utc>>,
    locked_until: Option<DateTime<Utc>>,
}

impl TryFrom<PackEventRow> for PackEvent {
    type Error = StoreError;

    fn try_from(row: PackEventRow) -> Result<Self, Self::Error> {
        Ok(PackEvent {
            id: row.id,
            payload: row.payload,
            routing_key: row.routing_key,
            status: parse_status(&row.status)?,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_attempt_at: row.last_attempt_at,
            locked_until: row.locked_until,
        })
    }
}

fn parse_status(value: &str) -> StoreResult<EventStatus> {
    EventStatus::from_str(value).map_err(StoreError::InvalidData)
}

const CLAIM_SQL: &str = r#"
    WITH claimable AS (
        SELECT id FROM pack_events
        WHERE status = 'CREATED'
           OR (status = 'IN_FLIGHT' AND (locked_until IS NULL OR locked_until < NOW()))
        ORDER BY created_at, id
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    )
    UPDATE pack_events e
    SET status = 'IN_FLIGHT',
        locked_until = NOW() + make_interval(secs => $2),
        updated_at = NOW()
    FROM claimable
    WHERE e.id = claimable.id
    RETURNING e.id, e.payload, e.routing_key, e.status, e.attempts, e.last_error,
              e.created_at, e.updated_at, e.last_attempt_at, e.locked_until
"#;

/// Outbox adapter over a PostgreSQL pool.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
    config: StoreConfig,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool, config: StoreConfig) -> Self {
        Self { pool, config }
    }

    /// Open a pool against `url` (a libpq-style URL).
    pub async fn connect(url: &str, settings: &PoolSettings, config: StoreConfig) -> StoreResult<Self> {
        let options = PgConnectOptions::from_str(url)?;
        info!(
            host = %options.get_host(),
            port = options.get_port(),
            database = options.get_database().unwrap_or_default(),
            max_connections = settings.max_connections,
            "Connecting to PostgreSQL outbox"
        );

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .idle_timeout(settings.idle_timeout)
            .max_lifetime(settings.max_lifetime)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool, config))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("PostgreSQL outbox pool closed");
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn claim_batch(&self, limit: usize) -> StoreResult<Vec<PackEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<PackEventRow> = sqlx::query_as::<_, PackEventRow>(CLAIM_SQL)
            .bind(limit as i64)
            .bind(self.config.claim_lease.as_secs_f64())
            .fetch_all(&self.pool)
            .await?;

        let mut events = rows
            .into_iter()
            .map(PackEvent::try_from)
            .collect::<StoreResult<Vec<_>>>()?;
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

        let ids: Vec<i64> = claims.iter().map(|c| c.id).collect();
        let leases: Vec<DateTime<Utc>> = claims.iter().map(|c| c.locked_until).collect();
        let result = sqlx::query(
            r#"
            UPDATE pack_events e
            SET status = 'PROCESSED', locked_until = NULL, updated_at = NOW()
            FROM UNNEST($1::BIGINT[], $2::TIMESTAMPTZ[]) AS c(id, locked_until)
            WHERE e.id = c.id AND e.locked_until = c.locked_until AND e.status = 'IN_FLIGHT'
            "#,
        )
        .bind(ids)
        .bind(leases)
        .execute(&self.pool)
        .await?;

        let changed = result.rows_affected() as usize;
        if changed < claims.len() {
            debug!(requested = claims.len(), changed, "Some claims were no longer held when marked sent");
        }
        Ok(changed)
    }

    async fn mark_failed(
        &self,
        claim: &Claim,
        increment_attempt: bool,
        reason: &str,
    ) -> StoreResult<EventStatus> {
        let id = claim.id;
        let mut tx = self.pool.begin().await?;

        let current: Option<(String, i32, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT status, attempts, locked_until FROM pack_events WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some((status, attempts, locked_until)) = current else {
            return Err(StoreError::NotFound(format!("pack event {}", id)));
        };

        let status = parse_status(&status)?;
        if status != EventStatus::InFlight {
            warn!(event_id = id, status = %status, "Event not in flight, failure not recorded");
            return Ok(status);
        }
        if locked_until != Some(claim.locked_until) {
            warn!(event_id = id, "Claim taken over by another worker, failure not recorded");
            return Ok(status);
        }

        let next = if increment_attempt {
            let next = status.apply(Trigger::PublishFailed, attempts, self.config.max_attempts)?;
            sqlx::query(
                r#"
                UPDATE pack_events
                SET status = $2, attempts = $3, last_error = $4,
                    last_attempt_at = NOW(), locked_until = NULL, updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(next.status.as_str())
            .bind(next.attempts)
            .bind(reason)
            .execute(&mut *tx)
            .await?;
            next
        } else {
            let next = status.apply(Trigger::Cancelled, attempts, self.config.max_attempts)?;
            sqlx::query(
                "UPDATE pack_events SET status = $2, locked_until = NULL, updated_at = NOW() WHERE id = $1",
            )
            .bind(id)
            .bind(next.status.as_str())
            .execute(&mut *tx)
            .await?;
            next
        };

        tx.commit().await?;
        Ok(next.status)
    }

    async fn enqueue(&self, event: NewPackEvent) -> StoreResult<i64> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO pack_events (payload, routing_key) VALUES ($1, $2) RETURNING id",
        )
        .bind(event.payload)
        .bind(event.routing_key)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get(&self, id: i64) -> StoreResult<Option<PackEvent>> {
        let row: Option<PackEventRow> = sqlx::query_as::<_, PackEventRow>(
            r#"
            SELECT id, payload, routing_key, status, attempts, last_error,
                   created_at, updated_at, last_attempt_at, locked_until
            FROM pack_events WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PackEvent::try_from).transpose()
    }

    async fn stats(&self) -> StoreResult<StoreStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM pack_events GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut stats = StoreStats::default();
        for (status, count) in rows {
            stats.record(parse_status(&status)?, count);
        }
        Ok(stats)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        debug!("PostgreSQL health check passed");
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

/// These run only when `DATABASE_URL` points at a reachable server. Each test
/// gets its own schema so they can run in parallel.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;
    use crate::schema;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    static SCHEMA_SEQ: AtomicUsize = AtomicUsize::new(0);

    async fn create_store(config: StoreConfig) -> Option<PostgresEventStore> {
        let url = std::env::var("DATABASE_URL").ok()?;
        let base = PgConnectOptions::from_str(&url).ok()?;

        let admin = match PgPoolOptions::new()
            .max_connections(1)
            .acquire_timeout(Duration::from_secs(2))
            .connect_with(base.clone())
            .await
        {
            Ok(pool) => pool,
            Err(_) => return None,
        };
        let schema_name = format!(
            "pack_test_{}_{}",
            std::process::id(),
            SCHEMA_SEQ.fetch_add(1, Ordering::SeqCst)
        );
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", schema_name))
            .execute(&admin)
            .await
            .unwrap();
        sqlx::query(&format!("CREATE SCHEMA {}", schema_name))
            .execute(&admin)
            .await
            .unwrap();
        admin.close().await;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_with(base.options([("search_path", schema_name.as_str())]))
            .await
            .unwrap();
        sqlx::raw_sql(schema::POSTGRES).execute(&pool).await.unwrap();

        Some(PostgresEventStore::new(pool, config))
    }

    #[tokio::test]
    async fn test_claims_oldest_first() {
        let Some(store) = create_store(conformance::config()).await else { return };
        conformance::claims_oldest_first(&store).await;
    }

    #[tokio::test]
    async fn test_mark_sent_is_idempotent() {
        let Some(store) = create_store(conformance::config()).await else { return };
        conformance::mark_sent_is_idempotent(&store).await;
    }

    #[tokio::test]
    async fn test_retries_until_failed() {
        let Some(store) = create_store(conformance::config()).await else { return };
        conformance::retries_until_failed(&store).await;
    }

    #[tokio::test]
    async fn test_release_keeps_attempts() {
        let Some(store) = create_store(conformance::config()).await else { return };
        conformance::release_keeps_attempts(&store).await;
    }

    #[tokio::test]
    async fn test_mark_failed_outside_flight() {
        let Some(store) = create_store(conformance::config()).await else { return };
        conformance::mark_failed_outside_flight(&store).await;
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed() {
        let config = StoreConfig {
            claim_lease: Duration::ZERO,
            ..conformance::config()
        };
        let Some(store) = create_store(config).await else { return };
        conformance::expired_lease_is_reclaimed(&store).await;
    }

    #[tokio::test]
    async fn test_stale_claim_is_not_acknowledged() {
        let config = StoreConfig {
            claim_lease: Duration::ZERO,
            ..conformance::config()
        };
        let Some(store) = create_store(config).await else { return };
        conformance::stale_claim_is_not_acknowledged(&store).await;
    }

    #[tokio::test]
    async fn test_concurrent_claims_are_disjoint() {
        let Some(store) = create_store(conformance::config()).await else { return };
        conformance::concurrent_claims_are_disjoint(Arc::new(store)).await;
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let Some(store) = create_store(conformance::config()).await else { return };
        conformance::stats_counts_by_status(&store).await;
    }
}
