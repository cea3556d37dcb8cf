//! # Retranslator: outbox to broker relay
//!
//! Moves logistic pack events from the `pack_events` outbox table to the
//! broker with at-least-once delivery, without ever holding locks in the
//! producers' transactions.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ claim_batch ┌──────────────┐    send     ┌──────────────┐
//! │  EventStore  │────────────▶│   Worker ×N  │────────────▶│  Publisher   │
//! │ (pack_events)│◀────────────│              │◀────────────│ (Redis XADD) │
//! └──────────────┘ mark_sent / └──────────────┘  outcomes   └──────────────┘
//!                  mark_failed
//! ```
//!
//! ## Key Features
//!
//! - **Exclusive claims**: the store hands each row to one worker at a time;
//!   a lease returns rows held by a crashed worker, and acknowledgements only
//!   apply to the claim they were made under.
//! - **Drain mode**: a worker that claimed a full batch polls again at once.
//! - **Retry**: failed publishes go back to `CREATED` with `attempts + 1`
//!   until `max_attempts`, then `FAILED`.
//! - **Graceful close**: in-flight batches get `shutdown_grace` to finish;
//!   cancelled or aborted ones are released without counting an attempt.
//!
//! ## Example
//!
//! ```ignore
//! let retranslator = Retranslator::new(config, store, publisher, metrics)?;
//! retranslator.start()?;
//! shutdown_signal().await;
//! retranslator.close().await;
//! ```

mod config;
mod engine;
mod error;
mod metrics;
mod schedule;
mod worker;

pub use config::RetranslatorConfig;
pub use engine::Retranslator;
pub use error::{RetranslatorError, RetranslatorResult};
pub use metrics::RetranslatorMetrics;

#[cfg(test)]
mod tests;
