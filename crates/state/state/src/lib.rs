//! Durable store trait abstractions for the Feedgate pipeline.
//!
//! The relational store is the pipeline's single source of truth and its
//! only cross-process synchronization point. This crate defines the four
//! narrow table-shaped interfaces the pipeline consumes — the event log,
//! the processing queue, the key-value config rows, and per-entity monitor
//! registrations — plus conformance suites every backend runs.

pub mod error;
pub mod store;
pub mod testing;

pub use error::StateError;
pub use store::{ConfigRow, ConfigStore, EventStore, MonitorStore, QueueStore};
