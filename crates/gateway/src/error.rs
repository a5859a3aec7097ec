use thiserror::Error;

use crate::flags::FlagError;

/// Errors that can occur during gateway pipeline operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// An error occurred in the durable store.
    #[error("state error: {0}")]
    State(#[from] feedgate_state::StateError),

    /// An error occurred in the audit sink.
    #[error("audit error: {0}")]
    Audit(#[from] feedgate_audit::AuditError),

    /// An error occurred in the feature flag gate.
    #[error("flag error: {0}")]
    Flag(#[from] FlagError),

    /// An error from the external inventory service.
    #[error("inventory error: {0}")]
    Inventory(#[from] feedgate_core::InventoryError),

    /// The pipeline was misconfigured (e.g. missing required components).
    #[error("configuration error: {0}")]
    Configuration(String),
}
