//! Routing key to stream key mapping.
//!
//! A routing key of the form `<topic>:<anything>` whose prefix is a
//! configured topic goes to that topic; every other key goes to the default
//! (first) topic. With more than one partition the stream key is
//! `<topic>:<partition>`, where the partition is the Kafka-compatible
//! murmur2 hash of the whole routing key.

/// Maps routing keys onto stream keys.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    topics: Vec<String>,
    partitions: u32,
}

impl TopicRouter {
    /// `topics` must be non-empty and `partitions` at least 1; see
    /// [`crate::PublisherConfig::validate`].
    pub fn new(topics: Vec<String>, partitions: u32) -> Self {
        Self {
            topics,
            partitions: partitions.max(1),
        }
    }

    pub fn topic_for(&self, routing_key: &str) -> &str {
        let named = routing_key
            .split_once(':')
            .map(|(prefix, _)| prefix)
            .and_then(|prefix| self.topics.iter().find(|t| t.as_str() == prefix));

        match named.or_else(|| self.topics.first()) {
            Some(topic) => topic.as_str(),
            None => "",
        }
    }

    pub fn partition_for(&self, routing_key: &str) -> u32 {
        (murmur2(routing_key.as_bytes()) & 0x7fff_ffff) % self.partitions
    }

    pub fn stream_key(&self, routing_key: &str) -> String {
        let topic = self.topic_for(routing_key);
        if self.partitions == 1 {
            topic.to_string()
        } else {
            format!("{}:{}", topic, self.partition_for(routing_key))
        }
    }
}

/// Murmur2 as used by Kafka's default partitioner.
fn murmur2(data: &[u8]) -> u32 {
    const SEED: u32 = 0x9747_b28c;
    const M: u32 = 0x5bd1_e995;
    const R: u32 = 24;

    let mut h: u32 = SEED ^ (data.len() as u32);

    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        let mut k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h = h.wrapping_mul(M);
        h ^= k;
    }

    let tail = chunks.remainder();
    if tail.len() >= 3 {
        h ^= u32::from(tail[2]) << 16;
    }
    if tail.len() >= 2 {
        h ^= u32::from(tail[1]) << 8;
    }
    if !tail.is_empty() {
        h ^= u32::from(tail[0]);
        h = h.wrapping_mul(M);
    }

    h ^= h >> 13;
    h = h.wrapping_mul(M);
    h ^= h >> 15;
    h
}
