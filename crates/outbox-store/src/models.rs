//! Data models for the outbox table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A logistic pack notification waiting in the outbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackEvent {
    pub id: i64,
    pub payload: Vec<u8>,
    pub routing_key: String,
    pub status: EventStatus,
    /// Failed publish attempts so far.
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Claim lease; an `IN_FLIGHT` row past this instant may be claimed again.
    pub locked_until: Option<DateTime<Utc>>,
}

impl PackEvent {
    /// The claim this copy of the row was handed out under, if it is claimed.
    pub fn claim(&self) -> Option<Claim> {
        match (self.status, self.locked_until) {
            (EventStatus::InFlight, Some(locked_until)) => Some(Claim {
                id: self.id,
                locked_until,
            }),
            _ => None,
        }
    }
}

/// One worker's hold on one event.
///
/// Every claim pushes `locked_until` strictly past the previous value, so the
/// lease doubles as a fencing token: an acknowledgement carrying an older
/// `locked_until` belongs to a claim that has since been taken over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Claim {
    pub id: i64,
    pub locked_until: DateTime<Utc>,
}

/// New event for insertion by a producer.
#[derive(Debug, Clone)]
pub struct NewPackEvent {
    pub payload: Vec<u8>,
    pub routing_key: String,
}

impl NewPackEvent {
    pub fn new(routing_key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            routing_key: routing_key.into(),
        }
    }
}

/// Event status as stored in the `status` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    #[default]
    Created,
    InFlight,
    Processed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::InFlight => "IN_FLIGHT",
            Self::Processed => "PROCESSED",
            Self::Failed => "FAILED",
        }
    }

    /// `PROCESSED` and `FAILED` are never polled again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::Failed)
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CREATED" => Ok(Self::Created),
            "IN_FLIGHT" => Ok(Self::InFlight),
            "PROCESSED" => Ok(Self::Processed),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown event status '{}'", other)),
        }
    }
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub created: u64,
    pub in_flight: u64,
    pub processed: u64,
    pub failed: u64,
}

impl StoreStats {
    /// Add a `GROUP BY status` count.
    pub fn record(&mut self, status: EventStatus, count: i64) {
        let count = count.max(0) as u64;
        match status {
            EventStatus::Created => self.created += count,
            EventStatus::InFlight => self.in_flight += count,
            EventStatus::Processed => self.processed += count,
            EventStatus::Failed => self.failed += count,
        }
    }

    pub fn total(&self) -> u64 {
        self.created + self.in_flight + self.processed + self.failed
    }
}
