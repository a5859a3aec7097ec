//! In-memory audit sink for Feedgate.
//!
//! Backs tests and single-node deployments; records are lost on process
//! exit.

mod sink;

pub use sink::MemoryAuditSink;
