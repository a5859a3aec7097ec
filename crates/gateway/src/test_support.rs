//! Shared fakes for unit tests across the gateway modules.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use feedgate_audit::{AuditError, AuditEvent, AuditSink, MetricPoint};
use feedgate_audit_memory::MemoryAuditSink;
use feedgate_core::{
    CatalogError, InboundEvent, InventoryError, InventoryService, NewProduct, ProductCatalog,
    ReservationCleanup, ReserveOptions, Sku, StockAvailability, StockItem, StockReservation,
};

use crate::queue::{EventProcessor, ProcessorError};

/// Processor that accepts everything.
pub(crate) struct NoopProcessor;

#[async_trait]
impl EventProcessor for NoopProcessor {
    async fn process(&self, _event: &InboundEvent) -> Result<(), ProcessorError> {
        Ok(())
    }
}

/// One observed catalog mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum CatalogCall {
    UpdatePrice { sku: String, price_cents: i64 },
    RecordStockLevel { sku: String, quantity: i64 },
    SetStockLevel { sku: String, quantity: i64 },
    CreateProduct { sku: String, title: String },
}

/// Catalog fake that records every call and can be switched to fail.
#[derive(Default)]
pub(crate) struct RecordingCatalog {
    calls: Mutex<Vec<CatalogCall>>,
    fail_with: Mutex<Option<String>>,
}

impl RecordingCatalog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn calls(&self) -> Vec<CatalogCall> {
        self.calls.lock().clone()
    }

    pub(crate) fn fail_with(&self, message: &str) {
        *self.fail_with.lock() = Some(message.to_owned());
    }

    pub(crate) fn clear_failure(&self) {
        *self.fail_with.lock() = None;
    }

    fn record(&self, call: CatalogCall) -> Result<(), CatalogError> {
        if let Some(message) = self.fail_with.lock().clone() {
            return Err(CatalogError::Backend(message));
        }
        self.calls.lock().push(call);
        Ok(())
    }
}

#[async_trait]
impl ProductCatalog for RecordingCatalog {
    async fn update_price(&self, sku: &Sku, price_cents: i64) -> Result<(), CatalogError> {
        self.record(CatalogCall::UpdatePrice {
            sku: sku.as_str().to_owned(),
            price_cents,
        })
    }

    async fn record_stock_level(&self, sku: &Sku, quantity: i64) -> Result<(), CatalogError> {
        self.record(CatalogCall::RecordStockLevel {
            sku: sku.as_str().to_owned(),
            quantity,
        })
    }

    async fn set_stock_level(&self, sku: &Sku, quantity: i64) -> Result<(), CatalogError> {
        self.record(CatalogCall::SetStockLevel {
            sku: sku.as_str().to_owned(),
            quantity,
        })
    }

    async fn create_product(&self, product: NewProduct) -> Result<(), CatalogError> {
        self.record(CatalogCall::CreateProduct {
            sku: product.sku.as_str().to_owned(),
            title: product.title,
        })
    }
}

/// Inventory fake with a fixed released count per cleanup sweep.
pub(crate) struct StubInventory {
    pub(crate) released_per_sweep: u64,
    pub(crate) sweeps: AtomicU64,
    pub(crate) fail: AtomicBool,
}

impl StubInventory {
    pub(crate) fn new(released_per_sweep: u64) -> Self {
        Self {
            released_per_sweep,
            sweeps: AtomicU64::new(0),
            fail: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl InventoryService for StubInventory {
    async fn check_stock_availability(
        &self,
        items: &[StockItem],
    ) -> Result<Vec<StockAvailability>, InventoryError> {
        Ok(items
            .iter()
            .map(|item| StockAvailability {
                sku: item.sku.clone(),
                requested: item.quantity,
                available: 100,
                sufficient: item.quantity <= 100,
            })
            .collect())
    }

    async fn reserve_stock(
        &self,
        items: &[StockItem],
        opts: ReserveOptions,
    ) -> Result<Vec<StockReservation>, InventoryError> {
        let ttl = opts.ttl_seconds.unwrap_or(900);
        let expires_at: DateTime<Utc> = Utc::now() + Duration::seconds(i64::try_from(ttl).unwrap_or(900));
        Ok(items
            .iter()
            .enumerate()
            .map(|(i, item)| StockReservation {
                id: format!("res-{i}"),
                sku: item.sku.clone(),
                quantity: item.quantity,
                expires_at,
            })
            .collect())
    }

    async fn cleanup_expired_reservations(&self) -> Result<ReservationCleanup, InventoryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(InventoryError::Backend("inventory offline".into()));
        }
        self.sweeps.fetch_add(1, Ordering::SeqCst);
        Ok(ReservationCleanup {
            released: self.released_per_sweep,
        })
    }
}

/// Audit sink wrapper whose individual operations can be made to fail.
pub(crate) struct FlakyAuditSink {
    pub(crate) inner: Arc<MemoryAuditSink>,
    pub(crate) fail_log: AtomicBool,
    pub(crate) fail_metrics: AtomicBool,
    pub(crate) fail_cleanup: AtomicBool,
}

impl FlakyAuditSink {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(MemoryAuditSink::new()),
            fail_log: AtomicBool::new(false),
            fail_metrics: AtomicBool::new(false),
            fail_cleanup: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl AuditSink for FlakyAuditSink {
    async fn log_event(&self, event: AuditEvent) -> Result<(), AuditError> {
        if self.fail_log.load(Ordering::SeqCst) {
            return Err(AuditError::Storage("audit sink offline".into()));
        }
        self.inner.log_event(event).await
    }

    async fn metrics(&self, event_type: &str, hours: u32) -> Result<Vec<MetricPoint>, AuditError> {
        if self.fail_metrics.load(Ordering::SeqCst) {
            return Err(AuditError::Storage("audit sink offline".into()));
        }
        self.inner.metrics(event_type, hours).await
    }

    async fn cleanup_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AuditError> {
        if self.fail_cleanup.load(Ordering::SeqCst) {
            return Err(AuditError::Storage("audit sink offline".into()));
        }
        self.inner.cleanup_before(cutoff).await
    }
}
