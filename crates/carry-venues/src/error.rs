//! Error types for venue collaborators.

use thiserror::Error;

/// Errors surfaced by venue clients and persistence collaborators.
///
/// Transient-retry policy lives inside client implementations; by the
/// time an error reaches the core it is final for saga purposes.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("Venue rejected request: {0}")]
    Rejected(String),

    #[error("Venue call timed out: {0}")]
    Timeout(String),

    #[error("Venue unavailable: {0}")]
    Unavailable(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Position not found on venue: {0}")]
    UnknownPosition(String),

    #[error("Transaction not found on chain: {0}")]
    UnknownTransaction(String),

    #[error("Persistence I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for venue operations.
pub type VenueResult<T> = std::result::Result<T, VenueError>;
