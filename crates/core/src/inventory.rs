use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Sku;

/// Errors from the external inventory service.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("insufficient stock for {sku}: requested {requested}, available {available}")]
    Insufficient {
        sku: Sku,
        requested: u32,
        available: u32,
    },

    #[error("unknown sku: {0}")]
    UnknownSku(Sku),

    #[error("inventory backend error: {0}")]
    Backend(String),
}

/// One SKU/quantity pair in an availability or reservation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    pub sku: Sku,
    pub quantity: u32,
}

impl StockItem {
    /// Create a stock item.
    #[must_use]
    pub fn new(sku: impl Into<Sku>, quantity: u32) -> Self {
        Self {
            sku: sku.into(),
            quantity,
        }
    }
}

/// Availability answer for one requested SKU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAvailability {
    pub sku: Sku,
    pub requested: u32,
    pub available: u32,
    /// Whether `available >= requested`.
    pub sufficient: bool,
}

/// Options applied to a reservation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReserveOptions {
    /// Seconds until unclaimed reservations expire. Backend default applies
    /// when absent.
    pub ttl_seconds: Option<u64>,
    /// Caller reference (e.g. cart or checkout id) for tracing.
    pub reference: Option<String>,
}

/// A held stock reservation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockReservation {
    pub id: String,
    pub sku: Sku,
    pub quantity: u32,
    pub expires_at: DateTime<Utc>,
}

/// Result of sweeping expired reservations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCleanup {
    /// Number of reservations released back to available stock.
    pub released: u64,
}

/// Narrow interface to the external inventory/stock service.
#[async_trait]
pub trait InventoryService: Send + Sync {
    /// Check whether the requested quantities are currently available.
    async fn check_stock_availability(
        &self,
        items: &[StockItem],
    ) -> Result<Vec<StockAvailability>, InventoryError>;

    /// Reserve stock for the given items.
    async fn reserve_stock(
        &self,
        items: &[StockItem],
        opts: ReserveOptions,
    ) -> Result<Vec<StockReservation>, InventoryError>;

    /// Release reservations whose TTL has lapsed. Returns how many were
    /// released.
    async fn cleanup_expired_reservations(&self) -> Result<ReservationCleanup, InventoryError>;
}
