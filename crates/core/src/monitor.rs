use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EntityId;

/// What a per-entity monitor tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    /// Follow price changes for the entity.
    Price,
    /// Follow stock-level changes for the entity (tracking only).
    Stock,
}

impl MonitorKind {
    /// Return the kind as a lowercase string.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Stock => "stock",
        }
    }
}

impl std::fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-entity monitoring registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// The locally-known entity being monitored.
    pub entity_id: EntityId,

    /// What is being tracked.
    pub kind: MonitorKind,

    /// Whether the monitor is currently active.
    pub enabled: bool,

    /// Marketplace listing id this entity maps to, if known.
    pub external_ref: Option<String>,

    /// When the monitor was first registered.
    pub created_at: DateTime<Utc>,

    /// When the monitor last changed.
    pub updated_at: DateTime<Utc>,
}

impl MonitorConfig {
    /// Create an enabled monitor for `entity_id`.
    #[must_use]
    pub fn new(entity_id: impl Into<EntityId>, kind: MonitorKind) -> Self {
        let now = Utc::now();
        Self {
            entity_id: entity_id.into(),
            kind,
            enabled: true,
            external_ref: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach the marketplace listing reference.
    #[must_use]
    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }
}

/// Outcome of an enable/disable monitoring request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringChange {
    /// Whether the change took effect.
    pub success: bool,
    /// Why the change was refused, when it was.
    pub reason: Option<String>,
}

impl MonitoringChange {
    /// An applied change.
    #[must_use]
    pub fn applied() -> Self {
        Self {
            success: true,
            reason: None,
        }
    }

    /// A refused change with a caller-visible reason.
    #[must_use]
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_monitor_is_enabled() {
        let monitor = MonitorConfig::new("prod-1", MonitorKind::Price);
        assert!(monitor.enabled);
        assert!(monitor.external_ref.is_none());
    }

    #[test]
    fn refused_carries_reason() {
        let change = MonitoringChange::refused("stock monitoring is disabled");
        assert!(!change.success);
        assert_eq!(change.reason.as_deref(), Some("stock monitoring is disabled"));
    }
}
