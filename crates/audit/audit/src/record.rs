use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How serious an audit event is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Return the severity as a lowercase string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single operational audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique identifier for this record (UUID v7).
    pub id: String,

    /// Event type discriminator (e.g. `system_started`, `price_updated`).
    pub event_type: String,

    /// Kind of entity the event concerns (e.g. `system`, `product`, `queue`).
    pub entity_type: String,

    /// Specific entity id, when the event targets one.
    pub entity_id: Option<String>,

    /// What was done (e.g. `start`, `enable`, `cleanup`).
    pub action: String,

    /// Free-form structured context.
    pub metadata: serde_json::Value,

    /// Severity of the event.
    pub severity: Severity,

    /// Which component emitted the event.
    pub source: String,

    /// When the event was recorded.
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    /// Create an info-severity event; adjust with the builder methods.
    #[must_use]
    pub fn new(
        event_type: impl Into<String>,
        entity_type: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            event_type: event_type.into(),
            entity_type: entity_type.into(),
            entity_id: None,
            action: action.into(),
            metadata: serde_json::Value::Null,
            severity: Severity::Info,
            source: String::new(),
            created_at: Utc::now(),
        }
    }

    /// Target a specific entity.
    #[must_use]
    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    /// Attach structured metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Set the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Name the emitting component.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }
}

/// One point in an hourly metrics series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    /// Start of the hour bucket.
    pub timestamp: DateTime<Utc>,
    /// Number of matching events in the bucket.
    pub value: u64,
}
