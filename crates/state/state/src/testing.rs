//! Conformance test suites for store backends.
//!
//! Call these from a backend's test module with a fresh store instance.
//! Assertions panic on violation, which surfaces as a normal test failure.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};

use feedgate_core::{EventId, EventKind, InboundEvent, QueueItem, QueueStatus};

use crate::error::StateError;
use crate::store::{ConfigStore, EventStore, QueueStore};

fn sample_event(id: &str) -> InboundEvent {
    InboundEvent::new(
        id,
        EventKind::PriceChange,
        serde_json::json!({"sku": "SKU-1", "price_cents": 1999}),
    )
}

/// Run the event store conformance suite.
pub async fn run_event_store_conformance(store: &dyn EventStore) -> Result<(), StateError> {
    // Insert and read back.
    let created = store.insert_event(sample_event("evt-conf-1")).await?;
    assert!(created, "first insert should create the event");
    let event = store.get_event(&EventId::new("evt-conf-1")).await?;
    assert!(event.is_some(), "inserted event should be readable");

    // Duplicate ids are rejected without overwriting.
    let mut dup = sample_event("evt-conf-1");
    dup.payload = serde_json::json!({"tampered": true});
    let created = store.insert_event(dup).await?;
    assert!(!created, "duplicate insert should return false");
    let event = store.get_event(&EventId::new("evt-conf-1")).await?.unwrap();
    assert!(
        event.payload.get("tampered").is_none(),
        "duplicate insert must not overwrite the original payload"
    );

    // Failure metadata accumulates; success flips processed.
    let id = EventId::new("evt-conf-1");
    store.record_failure(&id, "boom", 1).await?;
    let event = store.get_event(&id).await?.unwrap();
    assert_eq!(event.retry_count, 1);
    assert_eq!(event.error_message.as_deref(), Some("boom"));
    assert!(!event.processed);

    store.mark_processed(&id).await?;
    let event = store.get_event(&id).await?.unwrap();
    assert!(event.processed);
    assert!(event.processed_at.is_some());

    let stats = store.event_stats().await?;
    assert_eq!(stats.total, 1);
    assert_eq!(stats.processed, 1);

    Ok(())
}

/// Run the queue store conformance suite, including ordering and lifecycle
/// transitions.
pub async fn run_queue_store_conformance(store: &dyn QueueStore) -> Result<(), StateError> {
    let now = Utc::now();

    // Priority beats schedule: the priority-1 item is scheduled earlier,
    // both are eligible, the priority-5 item must be claimed first.
    store
        .enqueue(QueueItem::new("evt-low", 1, now - Duration::seconds(30)))
        .await?;
    store
        .enqueue(QueueItem::new("evt-high", 5, now - Duration::seconds(5)))
        .await?;

    let first = store.claim_next(now).await?.expect("an item is eligible");
    assert_eq!(first.event_id.as_str(), "evt-high");
    assert_eq!(first.status, QueueStatus::Processing);

    let second = store.claim_next(now).await?.expect("one item remains");
    assert_eq!(second.event_id.as_str(), "evt-low");

    // Nothing else is eligible.
    assert!(store.claim_next(now).await?.is_none());

    // Completion is terminal.
    store.complete(&first.id).await?;
    let done = store.get_item(&first.id).await?.unwrap();
    assert_eq!(done.status, QueueStatus::Completed);

    // Reschedule returns to pending and respects the future schedule.
    let later = now + Duration::seconds(60);
    store.reschedule(&second.id, "transient", 1, later).await?;
    let retried = store.get_item(&second.id).await?.unwrap();
    assert_eq!(retried.status, QueueStatus::Pending);
    assert_eq!(retried.attempts, 1);
    assert_eq!(retried.last_error.as_deref(), Some("transient"));
    assert!(
        store.claim_next(now).await?.is_none(),
        "rescheduled item must not be claimable before its schedule"
    );
    let reclaimed = store.claim_next(later).await?.unwrap();
    assert_eq!(reclaimed.id, second.id);

    // Permanent failure, then manual reset.
    store.fail(&second.id, "exhausted", 3).await?;
    let failed = store.get_item(&second.id).await?.unwrap();
    assert_eq!(failed.status, QueueStatus::Failed);

    let stats = store.stats().await?;
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);

    let reset = store.reset_failed(None).await?;
    assert_eq!(reset, 1);
    let revived = store.get_item(&second.id).await?.unwrap();
    assert_eq!(revived.status, QueueStatus::Pending);

    // Retention cleanup deletes terminal rows only.
    let cutoff = Utc::now() + Duration::seconds(1);
    let deleted = store.delete_terminal_before(cutoff).await?;
    assert_eq!(deleted, 1, "only the completed item is terminal");
    assert!(store.get_item(&first.id).await?.is_none());
    assert!(store.get_item(&second.id).await?.is_some());

    Ok(())
}

/// Property check: concurrent drain loops never double-claim one item.
///
/// Enqueues `items` eligible rows, then races `workers` tasks calling
/// `claim_next` until the queue is drained, and asserts every item was
/// claimed exactly once.
pub async fn run_concurrent_claim_conformance(
    store: Arc<dyn QueueStore>,
    workers: usize,
    items: usize,
) -> Result<(), StateError> {
    let now = Utc::now();
    for i in 0..items {
        store
            .enqueue(QueueItem::new(format!("evt-race-{i}"), 0, now))
            .await?;
    }

    let mut handles = Vec::new();
    for _ in 0..workers {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(item) = store.claim_next(Utc::now()).await? {
                claimed.push(item.id);
                // Yield so claims from different workers interleave.
                tokio::task::yield_now().await;
            }
            Ok::<_, StateError>(claimed)
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        let claimed = handle
            .await
            .map_err(|e| StateError::Backend(format!("claim task panicked: {e}")))??;
        all.extend(claimed);
    }

    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(
        unique.len(),
        all.len(),
        "an item was claimed by more than one worker"
    );
    assert_eq!(all.len(), items, "every eligible item should be claimed");

    Ok(())
}

/// Run the config store conformance suite.
pub async fn run_config_store_conformance(store: &dyn ConfigStore) -> Result<(), StateError> {
    assert!(store.get("conf-missing").await?.is_none());

    // Seeding creates exactly once and never overwrites.
    let created = store
        .create_if_missing("conf-a", "false", Some("seeded"))
        .await?;
    assert!(created);
    let created = store
        .create_if_missing("conf-a", "true", Some("reseeded"))
        .await?;
    assert!(!created, "existing rows must not be reseeded");
    let row = store.get("conf-a").await?.unwrap();
    assert_eq!(row.value, "false");

    // Put overwrites.
    store.put("conf-a", "true", None).await?;
    let row = store.get("conf-a").await?.unwrap();
    assert_eq!(row.value, "true");

    let rows = store.all().await?;
    assert!(rows.iter().any(|r| r.key == "conf-a"));

    Ok(())
}
