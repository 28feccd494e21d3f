//! Request/response types shared across venue contracts.

use carry_core::{Asset, LendingProtocol, Leverage, PositionId, Price, Size};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which long-venue transaction a payload drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LongTxKind {
    Open,
    Close,
}

impl fmt::Display for LongTxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// Parameters for opening the long leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongOpenRequest {
    pub asset: Asset,
    pub protocol: LendingProtocol,
    pub collateral_usd: Decimal,
    pub leverage: Leverage,
}

/// Unsigned transaction produced by `build_*`. The `data` blob is owned
/// by the venue client and never interpreted here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxPayload {
    pub kind: LongTxKind,
    pub data: serde_json::Value,
}

/// Signed transaction ready for submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignedTx {
    pub kind: LongTxKind,
    pub blob: serde_json::Value,
}

/// Chain signature returned at submit time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxSignature(String);

impl TxSignature {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Confirmation receipt. `position_handle` is set for open transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub signature: TxSignature,
    pub kind: LongTxKind,
    pub position_handle: Option<String>,
    pub confirmed_at: DateTime<Utc>,
}

/// Live state of a lending-venue position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongPositionState {
    pub position_handle: String,
    pub health_factor: Decimal,
    pub token_amount: Size,
    pub collateral_usd: Decimal,
    pub borrowed_usd: Decimal,
    pub current_price: Price,
    /// False once the venue-side position is fully closed.
    pub is_active: bool,
}

/// Fill details for an opened short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortFill {
    pub order_id: String,
    pub avg_price: Price,
}

/// Live state of the perp short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortPositionState {
    pub coin: String,
    pub signed_size: Size,
    pub margin_used: Decimal,
    pub margin_fraction: Decimal,
    pub account_value: Decimal,
    pub mark_price: Price,
}

/// Cross-venue price agreement check result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub asset: String,
    pub long_price: Price,
    pub short_price: Price,
    /// Absolute relative deviation between the two venue prices.
    pub deviation: Decimal,
    pub within_threshold: bool,
    pub checked_at: DateTime<Utc>,
}

/// Audit record emitted after every state-changing manager operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub at: DateTime<Utc>,
    pub position_id: Option<PositionId>,
    pub action: String,
    pub stage: Option<String>,
    pub detail: String,
}

impl ActionRecord {
    pub fn new(action: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            position_id: None,
            action: action.into(),
            stage: None,
            detail: detail.into(),
        }
    }

    pub fn for_position(mut self, position_id: PositionId) -> Self {
        self.position_id = Some(position_id);
        self
    }

    pub fn at_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }
}
