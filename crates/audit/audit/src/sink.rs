use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AuditError;
use crate::record::{AuditEvent, MetricPoint};

/// Trait for audit/metrics sink backends.
///
/// Implementations must be `Send + Sync` to be shared across async tasks.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist an audit event.
    async fn log_event(&self, event: AuditEvent) -> Result<(), AuditError>;

    /// Return an hourly count series for events of `event_type` over the
    /// trailing `hours` hours, oldest bucket first.
    async fn metrics(&self, event_type: &str, hours: u32) -> Result<Vec<MetricPoint>, AuditError>;

    /// Remove events created before `cutoff`. Returns the number removed.
    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError>;
}
