use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EventId;

/// Kind of change notification sent by the marketplace feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A listing's price changed.
    PriceChange,
    /// A listing's stock level changed.
    StockChange,
    /// A listing appeared that is not yet in the local catalog.
    NewItem,
}

impl EventKind {
    /// Return the wire name of this kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PriceChange => "price_change",
            Self::StockChange => "stock_change",
            Self::NewItem => "new_item",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = UnknownEventKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "price_change" => Ok(Self::PriceChange),
            "stock_change" => Ok(Self::StockChange),
            "new_item" => Ok(Self::NewItem),
            other => Err(UnknownEventKind(other.to_owned())),
        }
    }
}

/// Error returned when a wire string names no known event kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event kind: {0}")]
pub struct UnknownEventKind(pub String);

/// One verified notification received from the marketplace feed.
///
/// Rows are append-only: processing flips `processed`, failures accumulate
/// error and retry metadata, and nothing in the pipeline deletes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Sender-assigned event id (dedup key).
    pub id: EventId,

    /// What kind of change this event describes.
    pub kind: EventKind,

    /// Opaque sender payload, interpreted by the processor per kind.
    pub payload: serde_json::Value,

    /// When this event was accepted at the boundary.
    pub received_at: DateTime<Utc>,

    /// Whether processing completed successfully.
    pub processed: bool,

    /// When processing completed, if it has.
    pub processed_at: Option<DateTime<Utc>>,

    /// Most recent processing error, if any.
    pub error_message: Option<String>,

    /// Number of failed processing attempts recorded against this event.
    pub retry_count: u32,
}

impl InboundEvent {
    /// Create a freshly-received, unprocessed event.
    #[must_use]
    pub fn new(id: impl Into<EventId>, kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            kind,
            payload,
            received_at: Utc::now(),
            processed: false,
            processed_at: None,
            error_message: None,
            retry_count: 0,
        }
    }
}

/// Aggregate counters over the event log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventStats {
    /// Total events recorded.
    pub total: u64,
    /// Events that completed processing.
    pub processed: u64,
    /// Events still awaiting a successful processing pass.
    pub unprocessed: u64,
    /// Events carrying at least one recorded error.
    pub with_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_wire_names_round_trip() {
        for kind in [
            EventKind::PriceChange,
            EventKind::StockChange,
            EventKind::NewItem,
        ] {
            let parsed: EventKind = kind.as_str().parse().unwrap();
            assert_eq!(parsed, kind);
        }
    }

    #[test]
    fn unknown_kind_is_an_error() {
        let err = "price_drop".parse::<EventKind>().unwrap_err();
        assert_eq!(err, UnknownEventKind("price_drop".into()));
    }

    #[test]
    fn new_event_is_unprocessed() {
        let event = InboundEvent::new("evt-1", EventKind::PriceChange, serde_json::json!({}));
        assert!(!event.processed);
        assert!(event.processed_at.is_none());
        assert!(event.error_message.is_none());
        assert_eq!(event.retry_count, 0);
    }

    #[test]
    fn kind_serde_uses_snake_case() {
        let json = serde_json::to_string(&EventKind::NewItem).unwrap();
        assert_eq!(json, "\"new_item\"");
    }
}
