//! Outbox backend selection and startup checks.

use anyhow::{anyhow, Context};
use outbox_store::{EventStore, PostgresEventStore, SqliteEventStore};
use retranslator_config::{AppConfig, DatabaseDriver};
use std::sync::Arc;
use tracing::{info, warn};

/// The store the service runs against.
pub enum Outbox {
    Postgres(Arc<PostgresEventStore>),
    Sqlite(Arc<SqliteEventStore>),
}

impl Outbox {
    /// Connect within `database.connect_timeout_ms` and run a health check.
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let database = &config.database;
        let store_config = config.retranslator_config().store_config();

        let connecting = async {
            let outbox = match database.driver {
                DatabaseDriver::Postgres => {
                    let dsn = database.dsn()?;
                    let store =
                        PostgresEventStore::connect(&dsn, &database.pool_settings(), store_config).await?;
                    Self::Postgres(Arc::new(store))
                }
                DatabaseDriver::Sqlite => {
                    let store = SqliteEventStore::open(&database.path, store_config).await?;
                    Self::Sqlite(Arc::new(store))
                }
            };
            Ok::<_, anyhow::Error>(outbox)
        };

        let outbox = tokio::time::timeout(database.connect_timeout(), connecting)
            .await
            .map_err(|_| {
                anyhow!(
                    "Timed out after {}ms connecting to the outbox database",
                    database.connect_timeout_ms
                )
            })?
            .context("Failed to connect to the outbox database")?;

        outbox
            .store()
            .health_check()
            .await
            .context("Outbox health check failed")?;

        info!(backend = outbox.store().backend(), "Outbox database connected");
        Ok(outbox)
    }

    pub fn store(&self) -> Arc<dyn EventStore> {
        match self {
            Self::Postgres(store) => store.clone(),
            Self::Sqlite(store) => store.clone(),
        }
    }

    pub async fn close(self) {
        match self {
            Self::Postgres(store) => store.close().await,
            Self::Sqlite(store) => {
                if let Err(e) = store.as_ref().clone().close().await {
                    warn!(error = %e, "Failed to close outbox database");
                }
            }
        }
    }
}
