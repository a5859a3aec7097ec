//! Core types and collaborator traits for the Feedgate inbound event
//! pipeline.
//!
//! This crate holds the domain model shared by every other Feedgate crate:
//! inbound events, queue items, per-entity monitors, and the narrow
//! async traits through which the pipeline talks to the external inventory
//! service and the local product catalog.

pub mod catalog;
pub mod event;
pub mod inventory;
pub mod monitor;
pub mod queue;
pub mod types;

pub use catalog::{CatalogError, NewProduct, ProductCatalog};
pub use event::{EventKind, EventStats, InboundEvent, UnknownEventKind};
pub use inventory::{
    InventoryError, InventoryService, ReservationCleanup, ReserveOptions, StockAvailability,
    StockItem, StockReservation,
};
pub use monitor::{MonitorConfig, MonitorKind, MonitoringChange};
pub use queue::{DEFAULT_MAX_ATTEMPTS, QueueItem, QueueStats, QueueStatus};
pub use types::{EntityId, EventId, Sku};
