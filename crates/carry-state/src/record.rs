//! Transaction states and the durable record format.
//!
//! A venue-side operation progresses build -> sign -> submit -> confirm,
//! and any of those steps can crash the process. The journal record for
//! an intent is the single source of truth for "how far did we get", so
//! recovery never re-submits a confirmed transaction or loses a
//! signed-but-unsubmitted one.

use carry_core::IntentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// State of a single venue-side transaction intent.
///
/// Legal progression:
/// `Idle -> Building -> Built -> Signing -> Signed -> Submitting ->
/// Submitted -> Confirmed`, with `Failed` reachable from every
/// non-terminal state. `Confirmed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxState {
    Idle,
    Building,
    Built,
    Signing,
    Signed,
    Submitting,
    Submitted,
    Confirmed,
    Failed,
}

impl TxState {
    /// All states, in progression order (for exhaustive tests).
    pub const ALL: [TxState; 9] = [
        TxState::Idle,
        TxState::Building,
        TxState::Built,
        TxState::Signing,
        TxState::Signed,
        TxState::Submitting,
        TxState::Submitted,
        TxState::Confirmed,
        TxState::Failed,
    ];

    /// Terminal states accept no further transitions.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Confirmed | Self::Failed)
    }

    /// States a transition may move to from `self`.
    pub fn allowed_successors(&self) -> &'static [TxState] {
        match self {
            Self::Idle => &[TxState::Building, TxState::Failed],
            Self::Building => &[TxState::Built, TxState::Failed],
            Self::Built => &[TxState::Signing, TxState::Failed],
            Self::Signing => &[TxState::Signed, TxState::Failed],
            Self::Signed => &[TxState::Submitting, TxState::Failed],
            Self::Submitting => &[TxState::Submitted, TxState::Failed],
            Self::Submitted => &[TxState::Confirmed, TxState::Failed],
            Self::Confirmed | Self::Failed => &[],
        }
    }

    #[inline]
    pub fn can_transition_to(&self, target: TxState) -> bool {
        self.allowed_successors().contains(&target)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Building => "building",
            Self::Built => "built",
            Self::Signing => "signing",
            Self::Signed => "signed",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One durable journal record: the latest known state of an intent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub intent_id: IntentId,
    pub state: TxState,
    pub timestamp: DateTime<Utc>,
    /// Chain signature, captured at submit and carried forward.
    pub signature: Option<String>,
    /// Opaque venue-specific payload (never interpreted by the core).
    pub metadata: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Optional fields attached to a transition.
///
/// `signature` and `metadata` left as `None` are carried forward from the
/// previous record; `error` is not (a success transition clears any
/// stale error text).
#[derive(Debug, Clone, Default)]
pub struct TransitionCtx {
    pub signature: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl TransitionCtx {
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}
