use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use feedgate_core::{
    EntityId, EventId, EventStats, InboundEvent, MonitorConfig, QueueItem, QueueStats,
};

use crate::error::StateError;

/// A raw key-value configuration row.
///
/// Values are stored as strings; typed decoding happens at the flag-gate
/// boundary, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigRow {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable append-only log of inbound events.
///
/// Implementations must be `Send + Sync` and safe for concurrent access.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a new event. Returns `false` without overwriting when an event
    /// with the same id already exists (sender-side duplicate delivery).
    async fn insert_event(&self, event: InboundEvent) -> Result<bool, StateError>;

    /// Fetch an event by id.
    async fn get_event(&self, id: &EventId) -> Result<Option<InboundEvent>, StateError>;

    /// Mark an event as successfully processed.
    async fn mark_processed(&self, id: &EventId) -> Result<(), StateError>;

    /// Record a failed processing attempt on the event row.
    async fn record_failure(
        &self,
        id: &EventId,
        error: &str,
        retry_count: u32,
    ) -> Result<(), StateError>;

    /// Aggregate counters over the event log.
    async fn event_stats(&self) -> Result<EventStats, StateError>;
}

/// Durable work queue over inbound events.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a pending item.
    async fn enqueue(&self, item: QueueItem) -> Result<(), StateError>;

    /// Atomically claim the next eligible item.
    ///
    /// Eligible means `status = pending` and `scheduled_for <= now`. The
    /// highest priority wins, ties broken by earliest `scheduled_for`. The
    /// claimed item is flipped to `processing` before it is returned, so two
    /// concurrent drain loops can never both claim the same item.
    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<QueueItem>, StateError>;

    /// Mark a claimed item completed.
    async fn complete(&self, id: &str) -> Result<(), StateError>;

    /// Return a claimed item to `pending` with a new schedule after a failed
    /// attempt.
    async fn reschedule(
        &self,
        id: &str,
        error: &str,
        attempts: u32,
        scheduled_for: DateTime<Utc>,
    ) -> Result<(), StateError>;

    /// Park a claimed item as permanently `failed`.
    async fn fail(&self, id: &str, error: &str, attempts: u32) -> Result<(), StateError>;

    /// Fetch an item by id.
    async fn get_item(&self, id: &str) -> Result<Option<QueueItem>, StateError>;

    /// Aggregate counters over the queue.
    async fn stats(&self) -> Result<QueueStats, StateError>;

    /// Hard-delete terminal (`completed`/`failed`) items last updated before
    /// `cutoff`. Returns how many were deleted.
    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StateError>;

    /// Reset `failed` items back to `pending` for manual recovery. When
    /// `max_attempts` is given, only items with fewer attempts are reset.
    /// Returns how many were reset.
    async fn reset_failed(&self, max_attempts: Option<u32>) -> Result<u64, StateError>;
}

/// Durable key-value configuration rows backing the feature flag gate.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch a row by key.
    async fn get(&self, key: &str) -> Result<Option<ConfigRow>, StateError>;

    /// Insert or overwrite a row.
    async fn put(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<(), StateError>;

    /// Insert a row only if the key is absent. Returns `true` when the row
    /// was created. Existing values are never overwritten, making default
    /// seeding idempotent.
    async fn create_if_missing(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<bool, StateError>;

    /// List all rows.
    async fn all(&self) -> Result<Vec<ConfigRow>, StateError>;
}

/// Durable per-entity monitoring registrations.
#[async_trait]
pub trait MonitorStore: Send + Sync {
    /// Fetch the monitor for an entity.
    async fn get_monitor(&self, entity_id: &EntityId) -> Result<Option<MonitorConfig>, StateError>;

    /// Insert or overwrite a monitor.
    async fn put_monitor(&self, config: MonitorConfig) -> Result<(), StateError>;

    /// Flip a monitor's enabled state. Returns `false` when no monitor
    /// exists for the entity.
    async fn set_monitor_enabled(
        &self,
        entity_id: &EntityId,
        enabled: bool,
    ) -> Result<bool, StateError>;

    /// Count currently-enabled monitors.
    async fn count_enabled_monitors(&self) -> Result<u64, StateError>;
}
