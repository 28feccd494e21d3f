//! Position lifecycle errors.
//!
//! Two-leg operations report failures tagged with the saga stage that
//! broke, so callers and the audit log can tell a long that never opened
//! from a hedge that failed after the long was already committed.

use carry_core::{PositionId, PositionStatus};
use carry_state::StateError;
use carry_venues::VenueError;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Stage of a two-leg saga at which a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStage {
    LongOpen,
    HedgeOpen,
    HedgeClose,
    LongClose,
}

impl fmt::Display for SagaStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LongOpen => "long_open",
            Self::HedgeOpen => "hedge_open",
            Self::HedgeClose => "hedge_close",
            Self::LongClose => "long_close",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("preflight has not passed for opportunity {0}")]
    PreflightNotRun(String),

    #[error("position {0} not found")]
    NotFound(PositionId),

    #[error("position {position_id} is {status}, not open")]
    NotOpen {
        position_id: PositionId,
        status: PositionStatus,
    },

    #[error("max concurrent positions reached ({0})")]
    MaxPositionsReached(usize),

    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("saga failed at {stage}: {source}")]
    Saga {
        stage: SagaStage,
        #[source]
        source: Box<PositionError>,
        /// Whether the compensating long close was attempted and landed.
        unwound: bool,
        unwind_error: Option<String>,
    },

    #[error("state machine error: {0}")]
    State(#[from] StateError),

    #[error("venue error: {0}")]
    Venue(#[from] VenueError),
}

impl PositionError {
    /// Saga stage if this is a stage-tagged failure.
    pub fn stage(&self) -> Option<SagaStage> {
        match self {
            Self::Saga { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

pub type PositionResult<T> = Result<T, PositionError>;
