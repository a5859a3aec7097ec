//! Audit sink trait and record types for the Feedgate pipeline.
//!
//! The pipeline's failure surface is operational: audit events and the
//! hourly metrics series derived from them are how operators see what the
//! gateway did and why.

pub mod error;
pub mod record;
pub mod sink;

pub use error::AuditError;
pub use record::{AuditEvent, MetricPoint, Severity};
pub use sink::AuditSink;
