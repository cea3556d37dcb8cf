//! Broker side of the retranslator.
//!
//! - [`Publisher`]: cancellation-aware batch send with per-event outcomes
//! - [`RedisStreamPublisher`]: `XADD` per event, optional `WAIT` for replicas
//! - [`TopicRouter`]: routing key to stream (topic and partition)

mod config;
mod error;
mod publisher;
mod redis_stream;
mod router;

pub use config::{AckLevel, PublisherConfig};
pub use error::{PublishError, PublishResult};
pub use publisher::{Publisher, SendOutcome};
pub use redis_stream::RedisStreamPublisher;
pub use router::TopicRouter;
