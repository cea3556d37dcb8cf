//! Store error types.

use crate::lifecycle::TransitionError;
use thiserror::Error;

/// Event store error type.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// PostgreSQL error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// Connection could not be opened or was closed underneath us
    #[error("Connection error: {0}")]
    Connection(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// A row held a value the adapter cannot decode
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// The requested status change is not allowed by the event lifecycle
    #[error("Lifecycle error: {0}")]
    Transition(#[from] TransitionError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Whether retrying the same call later can reasonably succeed.
    ///
    /// Workers never stop on a store error; this only picks the log level
    /// and decides whether a failure is worth an alert.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Io(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
                    | rusqlite::ErrorCode::SystemIoFailure
            ),
            Self::Sqlite(_) => false,
            Self::Postgres(sqlx::Error::Database(db)) => {
                // serialization_failure, deadlock_detected, admin_shutdown
                matches!(db.code().as_deref(), Some("40001" | "40P01" | "57P01"))
            }
            Self::Postgres(err) => matches!(
                err,
                sqlx::Error::Io(_)
                    | sqlx::Error::PoolTimedOut
                    | sqlx::Error::PoolClosed
                    | sqlx::Error::WorkerCrashed
            ),
            Self::NotFound(_) | Self::InvalidData(_) | Self::Transition(_) => false,
        }
    }
}

/// Result type alias using StoreError.
pub type StoreResult<T> = Result<T, StoreError>;
