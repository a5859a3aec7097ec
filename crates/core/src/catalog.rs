use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Sku;

/// Errors from the local product catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown sku: {0}")]
    UnknownSku(Sku),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("catalog backend error: {0}")]
    Backend(String),
}

/// A product record created from a `new_item` feed event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub sku: Sku,
    pub title: String,
    pub price_cents: i64,
    /// Initial stock level reported by the feed.
    pub stock_quantity: i64,
    /// Marketplace listing id, for later correlation.
    pub external_ref: Option<String>,
}

/// Narrow interface to the local catalog the feed is allowed to touch.
///
/// `record_stock_level` is a tracking-only observation; `set_stock_level`
/// directly mutates the live quantity and callers gate it behind the
/// stock-update permission flag.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Apply a new price to an existing product.
    async fn update_price(&self, sku: &Sku, price_cents: i64) -> Result<(), CatalogError>;

    /// Record an observed marketplace stock level without touching the live
    /// quantity.
    async fn record_stock_level(&self, sku: &Sku, quantity: i64) -> Result<(), CatalogError>;

    /// Overwrite the live stock quantity.
    async fn set_stock_level(&self, sku: &Sku, quantity: i64) -> Result<(), CatalogError>;

    /// Create a product from a marketplace listing.
    async fn create_product(&self, product: NewProduct) -> Result<(), CatalogError>;
}
