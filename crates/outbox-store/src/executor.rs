//! Async SQLite executor using a dedicated background thread.
//!
//! Every statement against the outbox file is sent to one thread owned by
//! `tokio_rusqlite`, so callers await results without blocking the runtime
//! and writes are naturally serialized. That single writer is what makes a
//! claim exclusive on SQLite.
//!
//! Only SQL and lightweight row mapping belong inside [`AsyncDatabase::call`];
//! anything slower starves every other worker's queries.

use crate::{StoreError, StoreResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to StoreError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => StoreError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => StoreError::Connection("Connection closed".to_string()),
        other => StoreError::Connection(other.to_string()),
    }
}

const PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA temp_store = MEMORY;
    PRAGMA busy_timeout = 5000;
";

/// Async SQLite database with a dedicated executor thread.
#[derive(Clone)]
pub struct AsyncDatabase {
    conn: Connection,
    path: String,
}

impl AsyncDatabase {
    /// Open a database file, creating it and its parent directory if needed.
    ///
    /// Enables WAL mode so producers inserting into the outbox from other
    /// processes are not blocked by the relay's reads.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening outbox database");

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        info!(path = %path_str, "Outbox database opened with WAL mode");

        Ok(Self {
            conn,
            path: path_str,
        })
    }

    /// Open a private in-memory database. Used by tests.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self {
            conn,
            path: ":memory:".to_string(),
        })
    }

    /// Execute a closure on the database connection.
    ///
    /// The closure runs on the dedicated SQLite thread and gets a mutable
    /// connection so it can open transactions. The caller's task is parked,
    /// not blocked, until the result is ready.
    pub async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // The store result travels inside tokio_rusqlite's Ok so our own
        // error variants survive the trip back.
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Execute a closure that only produces rusqlite errors.
    pub async fn call_sqlite<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.conn
            .call(move |conn| Ok(f(conn)?))
            .await
            .map_err(from_tokio_rusqlite)
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub async fn health_check(&self) -> StoreResult<()> {
        self.call_sqlite(|conn| conn.execute_batch("SELECT 1")).await?;
        debug!("Outbox database health check passed");
        Ok(())
    }

    /// Close the connection after pending operations finish.
    pub async fn close(self) -> StoreResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to close database: {:?}", e)))?;
        info!(path = %self.path, "Outbox database closed");
        Ok(())
    }
}
