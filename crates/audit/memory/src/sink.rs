use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, Utc};
use parking_lot::RwLock;

use feedgate_audit::error::AuditError;
use feedgate_audit::record::{AuditEvent, MetricPoint};
use feedgate_audit::sink::AuditSink;

/// In-memory [`AuditSink`] backed by a `Vec` behind an `RwLock`.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Create a new, empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of recorded events.
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether no events have been recorded.
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Snapshot of all recorded events, oldest first.
    pub fn all(&self) -> Vec<AuditEvent> {
        self.events.read().clone()
    }

    /// Events matching an `event_type`, oldest first.
    pub fn by_event_type(&self, event_type: &str) -> Vec<AuditEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn log_event(&self, event: AuditEvent) -> Result<(), AuditError> {
        self.events.write().push(event);
        Ok(())
    }

    async fn metrics(&self, event_type: &str, hours: u32) -> Result<Vec<MetricPoint>, AuditError> {
        let head = Utc::now()
            .duration_trunc(Duration::hours(1))
            .map_err(|e| AuditError::Serialization(e.to_string()))?;

        let events = self.events.read();
        let mut series: Vec<MetricPoint> = Vec::with_capacity(hours as usize);

        // One bucket per trailing hour, oldest first. The newest bucket is
        // the current (partial) hour.
        for offset in (0..i64::from(hours)).rev() {
            let bucket_start = head - Duration::hours(offset);
            let bucket_end = bucket_start + Duration::hours(1);
            let value = events
                .iter()
                .filter(|e| {
                    e.event_type == event_type
                        && e.created_at >= bucket_start
                        && e.created_at < bucket_end
                })
                .count() as u64;
            series.push(MetricPoint {
                timestamp: bucket_start,
                value,
            });
        }

        Ok(series)
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|e| e.created_at >= cutoff);
        Ok((before - events.len()) as u64)
    }
}
