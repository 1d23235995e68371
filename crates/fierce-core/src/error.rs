use thiserror::Error;

use crate::Amount;

/// Ledger-wide error types for the Fierce reward ledger.
///
/// Every variant is raised before any state is mutated, or triggers a full
/// rollback of the operation that produced it. Funding shortfalls during
/// emission are tracked in the pool and never surface here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FierceError {
    /// Rejected input: amount below minimum, zero principal, bad duration tier.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation conflicts with current state (inactive stake, already started).
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// Referenced position, schedule, or deposit does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Funding is below what the operation needs.
    #[error("Insufficient funding: required {required}, available {available}")]
    InsufficientFunding { required: Amount, available: Amount },

    /// Checked arithmetic failed. Reaching this is a bug in the caller's bounds.
    #[error("Arithmetic error: {0}")]
    Arithmetic(String),

    /// The external token collaborator refused or failed a transfer.
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl FierceError {
    /// Shorthand for an overflow in the named computation.
    pub fn overflow(context: &str) -> Self {
        FierceError::Arithmetic(format!("overflow in {}", context))
    }
}

impl From<serde_json::Error> for FierceError {
    fn from(e: serde_json::Error) -> Self {
        FierceError::Serialization(e.to_string())
    }
}
