//! Outbox table adapters for the logistic pack retranslator.
//!
//! This crate provides:
//! - [`EventStore`]: claim, acknowledge and fail events atomically
//! - [`SqliteEventStore`]: single-file backend on a dedicated executor thread
//! - [`PostgresEventStore`]: pooled backend using `FOR UPDATE SKIP LOCKED`
//! - [`EventStatus::apply`]: the event lifecycle both backends follow
//!
//! Producers own the `pack_events` table. The DDL in [`schema`] documents
//! the columns each backend expects; nothing here creates it at runtime.

mod error;
mod executor;
pub mod lifecycle;
mod models;
mod postgres;
mod sqlite;
mod store;

#[cfg(test)]
mod conformance;

pub use error::{StoreError, StoreResult};
pub use executor::AsyncDatabase;
pub use lifecycle::{Transition, TransitionError, Trigger};
pub use models::{Claim, EventStatus, NewPackEvent, PackEvent, StoreStats};
pub use postgres::{PoolSettings, PostgresEventStore};
pub use sqlite::SqliteEventStore;
pub use store::{EventStore, StoreConfig};

/// Reference DDL for the `pack_events` table.
pub mod schema {
    pub const SQLITE: &str = include_str!("../sql/sqlite.sql");
    pub const POSTGRES: &str = include_str!("../sql/postgres.sql");
}
