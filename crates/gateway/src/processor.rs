//! The event-processing function applied to each claimed queue item.
//!
//! Per event kind, the processor decodes the payload, consults the feature
//! flag gate for whether the effect is allowed, and applies the change
//! through the catalog collaborator with the circuit breaker wrapped around
//! the commit. Every applied or withheld effect leaves an audit event.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use feedgate_audit::{AuditEvent, AuditSink, Severity};
use feedgate_core::{EventKind, InboundEvent, NewProduct, ProductCatalog, Sku};

use crate::circuit_breaker::{CircuitBreaker, CircuitError};
use crate::flags::{FeatureFlags, MonitoringSettings};
use crate::queue::{EventProcessor, ProcessorError};

const AUDIT_SOURCE: &str = "feed_processor";

#[derive(Debug, Deserialize)]
struct PricePayload {
    sku: Sku,
    price_cents: i64,
}

#[derive(Debug, Deserialize)]
struct StockPayload {
    sku: Sku,
    quantity: i64,
}

#[derive(Debug, Deserialize)]
struct NewItemPayload {
    sku: Sku,
    title: String,
    price_cents: i64,
    #[serde(default)]
    stock_quantity: i64,
    #[serde(default)]
    external_ref: Option<String>,
}

/// Applies marketplace feed events to the local catalog under flag control.
pub struct FeedEventProcessor {
    flags: Arc<FeatureFlags>,
    catalog: Arc<dyn ProductCatalog>,
    audit: Arc<dyn AuditSink>,
    breaker: Arc<CircuitBreaker>,
}

impl FeedEventProcessor {
    /// Create a processor. `breaker` wraps every catalog commit.
    pub fn new(
        flags: Arc<FeatureFlags>,
        catalog: Arc<dyn ProductCatalog>,
        audit: Arc<dyn AuditSink>,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            flags,
            catalog,
            audit,
            breaker,
        }
    }

    fn decode<T: serde::de::DeserializeOwned>(
        event: &InboundEvent,
    ) -> Result<T, ProcessorError> {
        serde_json::from_value(event.payload.clone())
            .map_err(|e| ProcessorError::Payload(e.to_string()))
    }

    /// Audit writes are observability, not correctness: failures are logged
    /// and swallowed so they cannot fail event processing.
    async fn log_audit(&self, event: AuditEvent) {
        if let Err(e) = self.audit.log_event(event).await {
            warn!(error = %e, "audit write failed during event processing");
        }
    }

    fn audit_event(event: &InboundEvent, event_type: &str, action: &str) -> AuditEvent {
        AuditEvent::new(event_type, "product", action)
            .with_source(AUDIT_SOURCE)
            .with_metadata(serde_json::json!({ "feed_event_id": event.id.as_str() }))
    }

    async fn apply_price_change(
        &self,
        event: &InboundEvent,
        settings: &MonitoringSettings,
    ) -> Result<(), ProcessorError> {
        let payload: PricePayload = Self::decode(event)?;

        if !settings.price_updates_enabled {
            self.log_audit(
                Self::audit_event(event, "price_update_skipped", "skip")
                    .with_entity_id(payload.sku.as_str()),
            )
            .await;
            return Ok(());
        }

        self.breaker
            .execute(|| self.catalog.update_price(&payload.sku, payload.price_cents))
            .await
            .map_err(flatten_circuit)?;

        self.log_audit(
            Self::audit_event(event, "price_updated", "update")
                .with_entity_id(payload.sku.as_str())
                .with_metadata(serde_json::json!({
                    "feed_event_id": event.id.as_str(),
                    "price_cents": payload.price_cents,
                })),
        )
        .await;
        Ok(())
    }

    async fn apply_stock_change(
        &self,
        event: &InboundEvent,
        settings: &MonitoringSettings,
    ) -> Result<(), ProcessorError> {
        let payload: StockPayload = Self::decode(event)?;

        if !settings.stock_monitoring_enabled && !settings.stock_updates_enabled {
            self.log_audit(
                Self::audit_event(event, "stock_event_skipped", "skip")
                    .with_entity_id(payload.sku.as_str()),
            )
            .await;
            return Ok(());
        }

        if settings.stock_monitoring_enabled {
            // Tracking-only observation; does not touch the live quantity.
            self.catalog
                .record_stock_level(&payload.sku, payload.quantity)
                .await?;
            self.log_audit(
                Self::audit_event(event, "stock_level_recorded", "observe")
                    .with_entity_id(payload.sku.as_str())
                    .with_metadata(serde_json::json!({
                        "feed_event_id": event.id.as_str(),
                        "quantity": payload.quantity,
                    })),
            )
            .await;
        }

        if settings.stock_updates_enabled {
            // Direct mutation of live stock. Reached only when an operator
            // explicitly enabled the stock-update flag; it defaults off.
            self.breaker
                .execute(|| self.catalog.set_stock_level(&payload.sku, payload.quantity))
                .await
                .map_err(flatten_circuit)?;
            self.log_audit(
                Self::audit_event(event, "stock_level_applied", "update")
                    .with_entity_id(payload.sku.as_str())
                    .with_severity(Severity::Warning)
                    .with_metadata(serde_json::json!({
                        "feed_event_id": event.id.as_str(),
                        "quantity": payload.quantity,
                    })),
            )
            .await;
        }

        Ok(())
    }

    async fn apply_new_item(
        &self,
        event: &InboundEvent,
        settings: &MonitoringSettings,
    ) -> Result<(), ProcessorError> {
        let payload: NewItemPayload = Self::decode(event)?;

        if !settings.new_item_detection_enabled {
            self.log_audit(
                Self::audit_event(event, "new_item_skipped", "skip")
                    .with_entity_id(payload.sku.as_str()),
            )
            .await;
            return Ok(());
        }

        let sku = payload.sku.clone();
        let product = NewProduct {
            sku: payload.sku,
            title: payload.title,
            price_cents: payload.price_cents,
            stock_quantity: payload.stock_quantity,
            external_ref: payload.external_ref,
        };

        self.breaker
            .execute(|| self.catalog.create_product(product.clone()))
            .await
            .map_err(flatten_circuit)?;

        self.log_audit(
            Self::audit_event(event, "product_created", "create").with_entity_id(sku.as_str()),
        )
        .await;
        Ok(())
    }
}

/// Collapse a breaker outcome into the processor error taxonomy: an open
/// circuit is "downstream unavailable", everything else is the catalog's
/// own error.
fn flatten_circuit(err: CircuitError<feedgate_core::CatalogError>) -> ProcessorError {
    match err {
        CircuitError::Open(name) => {
            ProcessorError::Downstream(format!("circuit breaker '{name}' is open"))
        }
        CircuitError::Inner(e) => ProcessorError::Catalog(e),
    }
}

#[async_trait]
impl EventProcessor for FeedEventProcessor {
    async fn process(&self, event: &InboundEvent) -> Result<(), ProcessorError> {
        let settings = self.flags.monitoring_settings().await;
        match event.kind {
            EventKind::PriceChange => self.apply_price_change(event, &settings).await,
            EventKind::StockChange => self.apply_stock_change(event, &settings).await,
            EventKind::NewItem => self.apply_new_item(event, &settings).await,
        }
    }
}
