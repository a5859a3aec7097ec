use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::EventId;

/// Default number of processing attempts before an item is parked as failed.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Lifecycle status of a queue item.
///
/// `Completed` and `Failed` are terminal: no automatic transition leaves
/// them, and only retention cleanup deletes such rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Eligible for claiming once `scheduled_for` has passed.
    Pending,
    /// Claimed by exactly one worker.
    Processing,
    /// Processed successfully.
    Completed,
    /// Attempts exhausted; recoverable only via an explicit retry reset.
    Failed,
}

impl QueueStatus {
    /// Return the status as a lowercase string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether no further automatic transition leaves this status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scheduled unit of work wrapping exactly one inbound event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    /// Queue item id (UUID v7).
    pub id: String,

    /// The event this item processes.
    pub event_id: EventId,

    /// Higher priority is claimed sooner.
    pub priority: i32,

    /// Earliest time this item may be claimed. Delayed retries move this
    /// forward.
    pub scheduled_for: DateTime<Utc>,

    /// Processing attempts consumed so far.
    pub attempts: u32,

    /// Attempt budget before the item is parked as failed.
    pub max_attempts: u32,

    /// Current lifecycle status.
    pub status: QueueStatus,

    /// Error detail from the most recent failed attempt.
    pub last_error: Option<String>,

    /// When the item was enqueued.
    pub created_at: DateTime<Utc>,

    /// When the item last changed state.
    pub updated_at: DateTime<Utc>,
}

impl QueueItem {
    /// Create a pending item for `event_id`.
    #[must_use]
    pub fn new(event_id: impl Into<EventId>, priority: i32, scheduled_for: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7().to_string(),
            event_id: event_id.into(),
            priority,
            scheduled_for,
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            status: QueueStatus::Pending,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Override the attempt budget.
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Aggregate counters over the queue, by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Items waiting to be claimed.
    pub pending: u64,
    /// Items currently claimed.
    pub processing: u64,
    /// Items processed successfully.
    pub completed: u64,
    /// Items with attempts exhausted.
    pub failed: u64,
}

impl QueueStats {
    /// Total items across all statuses.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}
