//! Event lifecycle.
//!
//! ```text
//!             claimed                 published
//!  CREATED ────────────▶ IN_FLIGHT ────────────▶ PROCESSED
//!     ▲                   │  │  ↺ lease expired
//!     │ failed (< max)    │  │
//!     │ or cancelled      │  │ failed (≥ max)
//!     └───────────────────┘  └──────────────────▶ FAILED
//! ```
//!
//! Both store backends call [`EventStatus::apply`] inside the transaction
//! that holds the row lock, so the SQL never re-encodes these rules.

use crate::models::EventStatus;
use std::fmt;
use thiserror::Error;

/// Something that happened to a claimed (or claimable) event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A worker claimed a `CREATED` event.
    Claimed,
    /// A worker claimed an `IN_FLIGHT` event whose lease ran out.
    LeaseExpired,
    /// The broker acknowledged the event.
    Published,
    /// The broker rejected the event or the write failed.
    PublishFailed,
    /// Shutdown cancelled the publish before it completed.
    Cancelled,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Claimed => "claimed",
            Self::LeaseExpired => "lease_expired",
            Self::Published => "published",
            Self::PublishFailed => "publish_failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Result of applying a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub status: EventStatus,
    pub attempts: i32,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot apply '{trigger}' to an event in state {from}")]
pub struct TransitionError {
    pub from: EventStatus,
    pub trigger: Trigger,
}

impl EventStatus {
    /// Apply `trigger` to an event currently in `self` with `attempts` failed
    /// attempts, given the configured `max_attempts`.
    ///
    /// A failed publish always counts: the new attempt count is stored and
    /// the event becomes `FAILED` once that count exceeds `max_attempts`.
    pub fn apply(
        self,
        trigger: Trigger,
        attempts: i32,
        max_attempts: i32,
    ) -> Result<Transition, TransitionError> {
        let status = match (self, trigger) {
            (Self::Created, Trigger::Claimed) => Self::InFlight,
            (Self::InFlight, Trigger::LeaseExpired) => Self::InFlight,
            (Self::InFlight, Trigger::Published) => Self::Processed,
            (Self::InFlight, Trigger::Cancelled) => Self::Created,
            (Self::InFlight, Trigger::PublishFailed) => {
                let attempts = attempts.saturating_add(1);
                let status = if attempts > max_attempts {
                    Self::Failed
                } else {
                    Self::Created
                };
                return Ok(Transition { status, attempts });
            }
            (from, trigger) => return Err(TransitionError { from, trigger }),
        };

        Ok(Transition { status, attempts })
    }
}
