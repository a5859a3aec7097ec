use std::cmp::Reverse;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;

use feedgate_core::{
    EntityId, EventId, EventStats, InboundEvent, MonitorConfig, QueueItem, QueueStats, QueueStatus,
};
use feedgate_state::error::StateError;
use feedgate_state::store::{ConfigRow, ConfigStore, EventStore, MonitorStore, QueueStore};

/// In-memory implementation of every Feedgate store trait.
///
/// Events, config rows, and monitors live in [`DashMap`]s. Queue items sit
/// behind one `RwLock`; `claim_next` takes the write lock for the whole
/// select-and-mark step, which is what makes the claim atomic.
#[derive(Debug, Default)]
pub struct MemoryStore {
    events: DashMap<String, InboundEvent>,
    queue: RwLock<HashMap<String, QueueItem>>,
    config: DashMap<String, ConfigRow>,
    monitors: DashMap<String, MonitorConfig>,
}

impl MemoryStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event(&self, event: InboundEvent) -> Result<bool, StateError> {
        // Entry API for atomicity: only insert if vacant.
        let inserted = match self.events.entry(event.id.as_str().to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(event);
                true
            }
        };
        Ok(inserted)
    }

    async fn get_event(&self, id: &EventId) -> Result<Option<InboundEvent>, StateError> {
        Ok(self.events.get(id.as_str()).map(|e| e.clone()))
    }

    async fn mark_processed(&self, id: &EventId) -> Result<(), StateError> {
        let mut event = self
            .events
            .get_mut(id.as_str())
            .ok_or_else(|| StateError::NotFound(format!("event {id}")))?;
        event.processed = true;
        event.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn record_failure(
        &self,
        id: &EventId,
        error: &str,
        retry_count: u32,
    ) -> Result<(), StateError> {
        let mut event = self
            .events
            .get_mut(id.as_str())
            .ok_or_else(|| StateError::NotFound(format!("event {id}")))?;
        event.error_message = Some(error.to_owned());
        event.retry_count = retry_count;
        Ok(())
    }

    async fn event_stats(&self) -> Result<EventStats, StateError> {
        let mut stats = EventStats::default();
        for event in &self.events {
            stats.total += 1;
            if event.processed {
                stats.processed += 1;
            } else {
                stats.unprocessed += 1;
            }
            if event.error_message.is_some() {
                stats.with_errors += 1;
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, item: QueueItem) -> Result<(), StateError> {
        self.queue.write().insert(item.id.clone(), item);
        Ok(())
    }

    async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<QueueItem>, StateError> {
        let mut queue = self.queue.write();

        // Highest priority first, ties broken by earliest schedule. The map
        // iteration order is arbitrary, so the item id is the final
        // tie-breaker to keep selection deterministic.
        let candidate = queue
            .values()
            .filter(|item| item.status == QueueStatus::Pending && item.scheduled_for <= now)
            .min_by_key(|item| (Reverse(item.priority), item.scheduled_for, item.id.clone()))
            .map(|item| item.id.clone());

        let Some(id) = candidate else {
            return Ok(None);
        };

        let item = queue
            .get_mut(&id)
            .ok_or_else(|| StateError::NotFound(format!("queue item {id}")))?;
        item.status = QueueStatus::Processing;
        item.updated_at = Utc::now();
        Ok(Some(item.clone()))
    }

    async fn complete(&self, id: &str) -> Result<(), StateError> {
        let mut queue = self.queue.write();
        let item = queue
            .get_mut(id)
            .ok_or_else(|| StateError::NotFound(format!("queue item {id}")))?;
        item.status = QueueStatus::Completed;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn reschedule(
        &self,
        id: &str,
        error: &str,
        attempts: u32,
        scheduled_for: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let mut queue = self.queue.write();
        let item = queue
            .get_mut(id)
            .ok_or_else(|| StateError::NotFound(format!("queue item {id}")))?;
        item.status = QueueStatus::Pending;
        item.attempts = attempts;
        item.last_error = Some(error.to_owned());
        item.scheduled_for = scheduled_for;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn fail(&self, id: &str, error: &str, attempts: u32) -> Result<(), StateError> {
        let mut queue = self.queue.write();
        let item = queue
            .get_mut(id)
            .ok_or_else(|| StateError::NotFound(format!("queue item {id}")))?;
        item.status = QueueStatus::Failed;
        item.attempts = attempts;
        item.last_error = Some(error.to_owned());
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn get_item(&self, id: &str) -> Result<Option<QueueItem>, StateError> {
        Ok(self.queue.read().get(id).cloned())
    }

    async fn stats(&self) -> Result<QueueStats, StateError> {
        let queue = self.queue.read();
        let mut stats = QueueStats::default();
        for item in queue.values() {
            match item.status {
                QueueStatus::Pending => stats.pending += 1,
                QueueStatus::Processing => stats.processing += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StateError> {
        let mut queue = self.queue.write();
        let before = queue.len();
        queue.retain(|_, item| !(item.status.is_terminal() && item.updated_at < cutoff));
        Ok((before - queue.len()) as u64)
    }

    async fn reset_failed(&self, max_attempts: Option<u32>) -> Result<u64, StateError> {
        let mut queue = self.queue.write();
        let now = Utc::now();
        let mut reset = 0;
        for item in queue.values_mut() {
            if item.status != QueueStatus::Failed {
                continue;
            }
            if let Some(ceiling) = max_attempts
                && item.attempts >= ceiling
            {
                continue;
            }
            item.status = QueueStatus::Pending;
            item.scheduled_for = now;
            item.updated_at = now;
            reset += 1;
        }
        Ok(reset)
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<ConfigRow>, StateError> {
        Ok(self.config.get(key).map(|row| row.clone()))
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<(), StateError> {
        let now = Utc::now();
        self.config
            .entry(key.to_owned())
            .and_modify(|row| {
                value.clone_into(&mut row.value);
                if let Some(desc) = description {
                    row.description = Some(desc.to_owned());
                }
                row.updated_at = now;
            })
            .or_insert_with(|| ConfigRow {
                key: key.to_owned(),
                value: value.to_owned(),
                description: description.map(str::to_owned),
                created_at: now,
                updated_at: now,
            });
        Ok(())
    }

    async fn create_if_missing(
        &self,
        key: &str,
        value: &str,
        description: Option<&str>,
    ) -> Result<bool, StateError> {
        let now = Utc::now();
        let created = match self.config.entry(key.to_owned()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(ConfigRow {
                    key: key.to_owned(),
                    value: value.to_owned(),
                    description: description.map(str::to_owned),
                    created_at: now,
                    updated_at: now,
                });
                true
            }
        };
        Ok(created)
    }

    async fn all(&self) -> Result<Vec<ConfigRow>, StateError> {
        Ok(self.config.iter().map(|row| row.clone()).collect())
    }
}

#[async_trait]
impl MonitorStore for MemoryStore {
    async fn get_monitor(&self, entity_id: &EntityId) -> Result<Option<MonitorConfig>, StateError> {
        Ok(self.monitors.get(entity_id.as_str()).map(|m| m.clone()))
    }

    async fn put_monitor(&self, config: MonitorConfig) -> Result<(), StateError> {
        self.monitors
            .insert(config.entity_id.as_str().to_owned(), config);
        Ok(())
    }

    async fn set_monitor_enabled(
        &self,
        entity_id: &EntityId,
        enabled: bool,
    ) -> Result<bool, StateError> {
        match self.monitors.get_mut(entity_id.as_str()) {
            Some(mut monitor) => {
                monitor.enabled = enabled;
                monitor.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn count_enabled_monitors(&self) -> Result<u64, StateError> {
        Ok(self.monitors.iter().filter(|m| m.enabled).count() as u64)
    }
}
