//! Scenarios every backend must pass. Each backend's test module builds a
//! store with [`config`] and an empty `pack_events` table, then calls these.

use crate::lifecycle::Trigger;
use crate::models::{Claim, EventStatus, NewPackEvent, PackEvent};
use crate::store::{EventStore, StoreConfig};
use crate::StoreError;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const MAX_ATTEMPTS: i32 = 3;

pub fn config() -> StoreConfig {
    StoreConfig {
        max_attempts: MAX_ATTEMPTS,
        claim_lease: Duration::from_secs(60),
    }
}

fn claims_of(events: &[PackEvent]) -> Vec<Claim> {
    events.iter().map(|e| e.claim().unwrap()).collect()
}

async fn enqueue_many(store: &dyn EventStore, count: usize) -> Vec<i64> {
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let event = NewPackEvent::new(format!("pack:{}", i % 4), format!("{{\"pack\":{}}}", i));
        ids.push(store.enqueue(event).await.unwrap());
    }
    ids
}

pub async fn claims_oldest_first(store: &dyn EventStore) {
    let ids = enqueue_many(store, 25).await;

    let first = store.claim_batch(10).await.unwrap();
    let first_ids: Vec<i64> = first.iter().map(|e| e.id).collect();
    assert_eq!(first_ids, ids[..10].to_vec());
    assert!(first.iter().all(|e| e.status == EventStatus::InFlight));
    assert!(first.iter().all(|e| e.locked_until.is_some()));

    // A second worker asking for more than is left gets the remaining 15.
    let second = store.claim_batch(100).await.unwrap();
    let second_ids: Vec<i64> = second.iter().map(|e| e.id).collect();
    assert_eq!(second_ids, ids[10..].to_vec());

    assert!(store.claim_batch(10).await.unwrap().is_empty());
}

pub async fn zero_limit_claims_nothing(store: &dyn EventStore) {
    enqueue_many(store, 3).await;
    assert!(store.claim_batch(0).await.unwrap().is_empty());
    assert_eq!(store.stats().await.unwrap().created, 3);
}

pub async fn mark_sent_is_idempotent(store: &dyn EventStore) {
    let ids = enqueue_many(store, 4).await;
    let claims = claims_of(&store.claim_batch(3).await.unwrap());

    assert_eq!(store.mark_sent(&claims).await.unwrap(), 3);
    assert_eq!(store.mark_sent(&claims).await.unwrap(), 0);
    assert_eq!(store.mark_sent(&[]).await.unwrap(), 0);

    for claim in &claims {
        let event = store.get(claim.id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Processed);
        assert!(event.locked_until.is_none());
    }

    // Never claimed, so never sent.
    let unclaimed = Claim { id: ids[3], locked_until: Utc::now() };
    assert_eq!(store.mark_sent(&[unclaimed]).await.unwrap(), 0);
    let untouched = store.get(ids[3]).await.unwrap().unwrap();
    assert_eq!(untouched.status, EventStatus::Created);
}

/// attempts 2 of max 3: one failure requeues with 3, the next one is terminal.
pub async fn retries_until_failed(store: &dyn EventStore) {
    let id = enqueue_many(store, 1).await[0];

    let mut attempts = 0;
    loop {
        let claimed = store.claim_batch(1).await.unwrap();
        if claimed.is_empty() {
            break;
        }
        assert_eq!(claimed[0].id, id);
        assert_eq!(claimed[0].attempts, attempts);

        let expected = EventStatus::InFlight
            .apply(Trigger::PublishFailed, attempts, MAX_ATTEMPTS)
            .unwrap();
        let claim = claimed[0].claim().unwrap();
        let status = store.mark_failed(&claim, true, "broker unavailable").await.unwrap();
        assert_eq!(status, expected.status);

        let event = store.get(id).await.unwrap().unwrap();
        assert_eq!(event.attempts, expected.attempts);
        assert_eq!(event.last_error.as_deref(), Some("broker unavailable"));
        assert!(event.last_attempt_at.is_some());
        attempts = event.attempts;

        if attempts == 3 {
            assert_eq!(event.status, EventStatus::Created);
        }
    }

    let event = store.get(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::Failed);
    assert_eq!(event.attempts, MAX_ATTEMPTS + 1);
    assert_eq!(store.stats().await.unwrap().failed, 1);
}

pub async fn release_keeps_attempts(store: &dyn EventStore) {
    let id = enqueue_many(store, 1).await[0];
    let claim = claims_of(&store.claim_batch(1).await.unwrap())[0];

    let status = store.mark_failed(&claim, false, "shutdown").await.unwrap();
    assert_eq!(status, EventStatus::Created);

    let event = store.get(id).await.unwrap().unwrap();
    assert_eq!(event.attempts, 0);
    assert!(event.last_error.is_none());
    assert!(event.locked_until.is_none());

    let reclaimed = store.claim_batch(1).await.unwrap();
    assert_eq!(reclaimed[0].id, id);
}

pub async fn mark_failed_outside_flight(store: &dyn EventStore) {
    let id = enqueue_many(store, 1).await[0];

    let early = Claim { id, locked_until: Utc::now() };
    let status = store.mark_failed(&early, true, "too early").await.unwrap();
    assert_eq!(status, EventStatus::Created);
    assert_eq!(store.get(id).await.unwrap().unwrap().attempts, 0);

    let claim = claims_of(&store.claim_batch(1).await.unwrap())[0];
    store.mark_sent(&[claim]).await.unwrap();
    let status = store.mark_failed(&claim, true, "too late").await.unwrap();
    assert_eq!(status, EventStatus::Processed);

    let nobody = Claim { id: id + 1000, locked_until: Utc::now() };
    let missing = store.mark_failed(&nobody, true, "nobody").await;
    assert!(matches!(missing, Err(StoreError::NotFound(_))));
}

/// Expects a store built with a zero claim lease.
pub async fn expired_lease_is_reclaimed(store: &dyn EventStore) {
    let id = enqueue_many(store, 1).await[0];

    let first = store.claim_batch(1).await.unwrap();
    assert_eq!(first[0].id, id);

    tokio::time::sleep(Duration::from_millis(20)).await;

    let second = store.claim_batch(1).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].id, id);
    assert_eq!(second[0].attempts, 0);
    assert_eq!(second[0].status, EventStatus::InFlight);
}

/// Expects a store built with a zero claim lease. Worker A's lease runs out
/// mid-publish and B takes the event over; A's late acknowledgements must
/// leave B's claim alone.
pub async fn stale_claim_is_not_acknowledged(store: &dyn EventStore) {
    let id = enqueue_many(store, 1).await[0];

    let a = claims_of(&store.claim_batch(1).await.unwrap())[0];
    tokio::time::sleep(Duration::from_millis(20)).await;
    let b = claims_of(&store.claim_batch(1).await.unwrap())[0];
    assert_eq!(a.id, id);
    assert_eq!(b.id, id);
    assert!(b.locked_until > a.locked_until);

    let status = store.mark_failed(&a, true, "stale failure").await.unwrap();
    assert_eq!(status, EventStatus::InFlight);
    let status = store.mark_failed(&a, false, "stale release").await.unwrap();
    assert_eq!(status, EventStatus::InFlight);
    assert_eq!(store.mark_sent(&[a]).await.unwrap(), 0);

    let event = store.get(id).await.unwrap().unwrap();
    assert_eq!(event.status, EventStatus::InFlight);
    assert_eq!(event.attempts, 0);
    assert!(event.last_error.is_none());
    assert_eq!(event.claim(), Some(b));

    // B still owns it and can finish.
    assert_eq!(store.mark_sent(&[b]).await.unwrap(), 1);
    assert_eq!(store.get(id).await.unwrap().unwrap().status, EventStatus::Processed);
}

pub async fn concurrent_claims_are_disjoint(store: Arc<dyn EventStore>) {
    let ids = enqueue_many(store.as_ref(), 50).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                let batch = store.claim_batch(7).await.unwrap();
                if batch.is_empty() {
                    break;
                }
                mine.extend(batch.into_iter().map(|e| e.id));
            }
            mine
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id), "event {} claimed twice", id);
        }
    }
    assert_eq!(seen, ids.into_iter().collect::<HashSet<_>>());
}

pub async fn stats_counts_by_status(store: &dyn EventStore) {
    enqueue_many(store, 6).await;
    let claims = claims_of(&store.claim_batch(3).await.unwrap());
    store.mark_sent(&claims[..2]).await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.created, 3);
    assert_eq!(stats.in_flight, 1);
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.total(), 6);
}
