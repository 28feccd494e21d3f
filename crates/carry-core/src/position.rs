//! Position entities: the two legs and the combined position record.
//!
//! A `CombinedPosition` is only assembled once both legs exist, so the
//! "both legs present while open" invariant is enforced by construction
//! rather than by checks. Per-leg close progress is tracked explicitly so
//! an interrupted close can resume without re-closing a leg.

use crate::asset::{Asset, LendingProtocol, Leverage};
use crate::decimal::{Price, Size};
use crate::ids::{IntentId, PositionId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Leveraged long leg on the lending venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongLegPosition {
    /// Venue-assigned identifier for the lending position.
    pub position_handle: String,
    /// Intent that opened this leg (state-journal key).
    pub intent_id: IntentId,
    pub asset: Asset,
    pub protocol: LendingProtocol,
    pub collateral_usd: Decimal,
    pub position_size_usd: Decimal,
    pub leverage: Leverage,
    /// Tokens held after the leveraged swap.
    pub token_amount: Size,
    /// USD debt drawn against the collateral.
    pub borrowed_usd: Decimal,
    pub entry_price: Price,
    /// Refreshed by the monitor poll.
    pub current_price: Price,
    /// Collateral/debt ratio; lower = closer to liquidation.
    pub current_health_factor: Decimal,
}

/// Perpetual short leg on the derivatives venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortLegPosition {
    pub coin: String,
    /// Negative while short.
    pub signed_size: Size,
    pub entry_price: Price,
    pub leverage: Leverage,
    pub margin_used: Decimal,
    /// Margin/notional; lower = closer to liquidation.
    pub margin_fraction: Decimal,
    pub account_value: Decimal,
    /// Refreshed by the monitor poll.
    pub mark_price: Price,
}

impl ShortLegPosition {
    /// Notional value of the hedge at the current mark.
    pub fn notional_usd(&self) -> Decimal {
        self.signed_size.notional(self.mark_price)
    }
}

/// Entry prices captured at consensus time, the baseline for delta and
/// LST-appreciation math.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReferencePrices {
    pub long_price: Price,
    pub short_price: Price,
    pub captured_at: DateTime<Utc>,
}

/// Lifecycle state of a combined position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    /// A close was started and has not completed; the reconciler
    /// re-drives it.
    Closing,
    Closed,
}

impl fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Why a position was (or should be) closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    ChainOutage,
    HealthFactor,
    MarginFraction,
    LstDepeg,
    PriceDeviation,
    NegativeApy,
    FundingFlip,
    Manual,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChainOutage => write!(f, "chain_outage"),
            Self::HealthFactor => write!(f, "health_factor"),
            Self::MarginFraction => write!(f, "margin_fraction"),
            Self::LstDepeg => write!(f, "lst_depeg"),
            Self::PriceDeviation => write!(f, "price_deviation"),
            Self::NegativeApy => write!(f, "negative_apy"),
            Self::FundingFlip => write!(f, "funding_flip"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// Severity attached to risk evaluations and exit decisions.
///
/// Ordered: `Normal < Warning < Emergency < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Normal,
    Warning,
    Emergency,
    Critical,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Warning => write!(f, "warning"),
            Self::Emergency => write!(f, "emergency"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// The delta-neutral pair: long lending leg + short perp leg.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedPosition {
    pub position_id: PositionId,
    pub opportunity_id: String,
    pub long_leg: LongLegPosition,
    pub short_leg: ShortLegPosition,
    pub reference_prices: ReferencePrices,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub exit_reason: Option<ExitReason>,
    pub exit_time: Option<DateTime<Utc>>,
    pub realized_pnl: Option<Decimal>,
    /// Estimated funding received (negative rates pay the short),
    /// accrued each monitor interval.
    #[serde(default)]
    pub accrued_funding_usd: Decimal,
    /// Per-leg close progress, so an interrupted close resumes where it
    /// stopped instead of re-closing a leg.
    #[serde(default)]
    pub short_leg_closed: bool,
    #[serde(default)]
    pub long_leg_closed: bool,
}

impl CombinedPosition {
    pub fn new(
        opportunity_id: String,
        long_leg: LongLegPosition,
        short_leg: ShortLegPosition,
        reference_prices: ReferencePrices,
    ) -> Self {
        Self {
            position_id: PositionId::generate(),
            opportunity_id,
            long_leg,
            short_leg,
            reference_prices,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            exit_reason: None,
            exit_time: None,
            realized_pnl: None,
            accrued_funding_usd: Decimal::ZERO,
            short_leg_closed: false,
            long_leg_closed: false,
        }
    }

    #[inline]
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Size of the position at entry, in USD.
    pub fn position_size_usd(&self) -> Decimal {
        self.long_leg.position_size_usd
    }

    /// Realized P&L if both legs were exited at the given prices:
    /// long leg marks against its entry, short leg gains when price falls,
    /// plus funding accrued while the position was held.
    pub fn realized_pnl_at(&self, exit_long: Price, exit_short: Price) -> Decimal {
        let long_pnl =
            self.long_leg.token_amount.inner().abs() * (exit_long.inner() - self.long_leg.entry_price.inner());
        let short_pnl = self.short_leg.signed_size.inner().abs()
            * (self.short_leg.entry_price.inner() - exit_short.inner());
        long_pnl + short_pnl + self.accrued_funding_usd
    }

    /// Seconds this position has been held.
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.opened_at).num_seconds()
    }
}
