//! Error types for carry-state.

use crate::record::TxState;
use thiserror::Error;

/// State journal and state machine errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// The requested move is outside the current state's successor set.
    #[error("Invalid transition for {intent_id}: {from} -> {to}")]
    InvalidTransition {
        intent_id: String,
        from: TxState,
        to: TxState,
    },

    /// No record exists for the intent and the target is not `Building`.
    #[error("New transaction {intent_id} must start with building, got {target}")]
    NewTransactionMustBuild { intent_id: String, target: TxState },

    #[error("Journal I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for state operations.
pub type StateResult<T> = std::result::Result<T, StateError>;
