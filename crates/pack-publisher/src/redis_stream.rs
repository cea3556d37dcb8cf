//! Redis Streams publisher.
//!
//! Each event becomes one `XADD` with the fields `event_id`, `routing_key`,
//! `payload` and `created_at`. Events of a batch are written one after the
//! other on a shared multiplexed connection, so their order on a stream
//! follows claim order.

use crate::config::{AckLevel, PublisherConfig};
use crate::error::{PublishError, PublishResult};
use crate::publisher::{Publisher, SendOutcome};
use crate::router::TopicRouter;
use async_trait::async_trait;
use outbox_store::PackEvent;
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An open connection and the endpoint it belongs to.
struct Link {
    endpoint: String,
    conn: MultiplexedConnection,
}

/// Publisher writing to Redis Streams.
pub struct RedisStreamPublisher {
    config: PublisherConfig,
    router: TopicRouter,
    link: RwLock<Link>,
}

impl RedisStreamPublisher {
    /// Connect to the first reachable endpoint.
    pub async fn connect(config: PublisherConfig) -> PublishResult<Self> {
        config.validate()?;

        let link = open_link(&config.endpoints, config.connect_timeout).await?;
        info!(
            endpoint = %redact(&link.endpoint),
            topics = ?config.topics,
            partitions = config.partitions,
            acks = ?config.acks,
            "Connected to Redis broker"
        );

        let router = TopicRouter::new(config.topics.clone(), config.partitions);
        Ok(Self {
            config,
            router,
            link: RwLock::new(link),
        })
    }

    pub fn router(&self) -> &TopicRouter {
        &self.router
    }

    /// Endpoint of the current connection, without credentials.
    pub async fn endpoint(&self) -> String {
        redact(&self.link.read().await.endpoint)
    }

    /// Replace the connection, trying endpoints in configured order.
    pub async fn reconnect(&self) -> PublishResult<()> {
        let link = open_link(&self.config.endpoints, self.config.connect_timeout).await?;
        info!(endpoint = %redact(&link.endpoint), "Reconnected to Redis broker");
        *self.link.write().await = link;
        Ok(())
    }

    async fn xadd(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        event: &PackEvent,
    ) -> Result<String, RedisError> {
        // XADD key [MAXLEN ~ n] * field value [field value ...]
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream);
        if let Some(max_len) = self.config.stream_max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*")
            .arg("event_id")
            .arg(event.id)
            .arg("routing_key")
            .arg(&event.routing_key)
            .arg("payload")
            .arg(&event.payload[..])
            .arg("created_at")
            .arg(event.created_at.to_rfc3339());
        cmd.query_async(conn).await
    }
}

#[async_trait]
impl Publisher for RedisStreamPublisher {
    async fn send(
        &self,
        batch: &[PackEvent],
        cancel: &CancellationToken,
    ) -> PublishResult<Vec<SendOutcome>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        if cancel.is_cancelled() {
            return Err(PublishError::Cancelled);
        }

        let mut conn = self.link.read().await.conn.clone();
        let mut outcomes = Vec::with_capacity(batch.len());
        // Once the connection is gone the rest of the batch fails fast.
        let mut broken: Option<String> = None;

        for event in batch {
            if cancel.is_cancelled() {
                outcomes.push(SendOutcome::Cancelled);
                continue;
            }
            if let Some(reason) = &broken {
                outcomes.push(SendOutcome::Failed(reason.clone()));
                continue;
            }

            let stream = self.router.stream_key(&event.routing_key);
            let write = tokio::time::timeout(
                self.config.write_timeout,
                self.xadd(&mut conn, &stream, event),
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => SendOutcome::Cancelled,
                result = write => match result {
                    Ok(Ok(entry_id)) => {
                        debug!(event_id = event.id, stream = %stream, entry_id = %entry_id, "Event written");
                        SendOutcome::Delivered
                    }
                    Ok(Err(e)) => {
                        warn!(event_id = event.id, stream = %stream, error = %e, "XADD failed");
                        if is_connection_error(&e) {
                            broken = Some(format!("broker connection lost: {}", e));
                        }
                        SendOutcome::Failed(e.to_string())
                    }
                    Err(_) => {
                        let reason = format!(
                            "write to {} timed out after {} ms",
                            stream,
                            self.config.write_timeout.as_millis()
                        );
                        warn!(event_id = event.id, "{}", reason);
                        broken = Some(reason.clone());
                        SendOutcome::Failed(reason)
                    }
                },
            };
            outcomes.push(outcome);
        }

        if let AckLevel::Replicas { count, timeout } = self.config.acks {
            if outcomes.iter().any(SendOutcome::is_delivered) {
                let waited = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = wait_replicas(&mut conn, count, timeout) => Some(result),
                };
                match waited {
                    None => demote_delivered(&mut outcomes, &SendOutcome::Cancelled),
                    Some(Ok(acked)) if acked >= i64::from(count) => {}
                    Some(Ok(acked)) => {
                        warn!(acked, required = count, "Not enough replicas acknowledged the batch");
                        let reason = format!("only {} of {} replicas acknowledged", acked, count);
                        demote_delivered(&mut outcomes, &SendOutcome::Failed(reason));
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WAIT for replicas failed");
                        demote_delivered(&mut outcomes, &SendOutcome::Failed(e.to_string()));
                    }
                }
            }
        }

        if broken.is_some() {
            tokio::select! {
                _ = cancel.cancelled() => {}
                result = self.reconnect() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Broker reconnect failed, next batch will retry");
                    }
                }
            }
        }

        Ok(outcomes)
    }
}

async fn wait_replicas(
    conn: &mut MultiplexedConnection,
    count: u32,
    timeout: Duration,
) -> Result<i64, RedisError> {
    redis::cmd("WAIT")
        .arg(count)
        .arg(timeout.as_millis() as u64)
        .query_async(conn)
        .await
}

async fn open_link(endpoints: &[String], timeout: Duration) -> PublishResult<Link> {
    for endpoint in endpoints {
        match tokio::time::timeout(timeout, open_connection(endpoint)).await {
            Ok(Ok(conn)) => {
                return Ok(Link {
                    endpoint: endpoint.clone(),
                    conn,
                })
            }
            Ok(Err(e)) => {
                warn!(endpoint = %redact(endpoint), error = %e, "Broker endpoint unreachable");
            }
            Err(_) => {
                warn!(
                    endpoint = %redact(endpoint),
                    timeout_ms = timeout.as_millis() as u64,
                    "Timed out connecting to broker endpoint"
                );
            }
        }
    }

    let tried: Vec<String> = endpoints.iter().map(|e| redact(e)).collect();
    Err(PublishError::Unreachable(tried.join(", ")))
}

async fn open_connection(endpoint: &str) -> Result<MultiplexedConnection, RedisError> {
    let client = Client::open(endpoint)?;
    let mut conn = client.get_multiplexed_async_connection().await?;
    let _: String = redis::cmd("PING").query_async(&mut conn).await?;
    Ok(conn)
}

fn is_connection_error(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

/// Replace every `Delivered` outcome with `to`.
fn demote_delivered(outcomes: &mut [SendOutcome], to: &SendOutcome) {
    for outcome in outcomes.iter_mut().filter(|o| o.is_delivered()) {
        *outcome = to.clone();
    }
}

/// Strip `user:password@` from a URL before it reaches the logs.
fn redact(endpoint: &str) -> String {
    match (endpoint.find("://"), endpoint.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &endpoint[..scheme_end], &endpoint[at + 1..])
        }
        _ => endpoint.to_string(),
    }
}
