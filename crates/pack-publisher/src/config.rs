//! Configuration for the broker publisher.

use crate::error::{PublishError, PublishResult};
use std::time::Duration;

/// How much confirmation a write needs before it counts as delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckLevel {
    /// The primary accepted the `XADD`.
    Leader,
    /// The primary accepted it and `WAIT` saw at least `count` replicas
    /// catch up within `timeout`.
    Replicas { count: u32, timeout: Duration },
}

impl Default for AckLevel {
    fn default() -> Self {
        Self::Leader
    }
}

/// Publisher configuration.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Redis URLs, tried in order on connect and reconnect
    pub endpoints: Vec<String>,

    /// Stream names. The first one is the default for routing keys that do
    /// not name a topic.
    pub topics: Vec<String>,

    /// Partitions per topic; 1 means one stream per topic
    pub partitions: u32,

    pub acks: AckLevel,

    /// Upper bound for a single `XADD` round trip
    pub write_timeout: Duration,

    /// Upper bound for opening a connection to one endpoint
    pub connect_timeout: Duration,

    /// Approximate `MAXLEN` trim applied on every write
    pub stream_max_len: Option<usize>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["redis://127.0.0.1:6379".to_string()],
            topics: vec!["logistic.packs".to_string()],
            partitions: 1,
            acks: AckLevel::Leader,
            write_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            stream_max_len: None,
        }
    }
}

impl PublisherConfig {
    pub fn validate(&self) -> PublishResult<()> {
        if self.endpoints.is_empty() {
            return Err(PublishError::Config("at least one broker endpoint is required".into()));
        }
        if self.topics.is_empty() || self.topics.iter().any(|t| t.trim().is_empty()) {
            return Err(PublishError::Config("topics must be non-empty names".into()));
        }
        if self.partitions == 0 {
            return Err(PublishError::Config("partitions must be at least 1".into()));
        }
        if let AckLevel::Replicas { count: 0, .. } = self.acks {
            return Err(PublishError::Config("replica acks need a replica count above 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(PublisherConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_empty_topics_and_zero_partitions() {
        let config = PublisherConfig {
            topics: vec![],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PublishError::Config(_))));

        let config = PublisherConfig {
            partitions: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = PublisherConfig {
            endpoints: vec![],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_replicas() {
        let config = PublisherConfig {
            acks: AckLevel::Replicas {
                count: 0,
                timeout: Duration::from_millis(100),
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
