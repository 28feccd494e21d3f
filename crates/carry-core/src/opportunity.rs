//! Arbitrage opportunity input: what the upstream scanner hands the
//! position manager.

use crate::asset::{Asset, LendingProtocol, Leverage};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Point-in-time funding rates on the perp venue, hourly fractions
/// (Hyperliquid convention: -0.0001 = shorts receive 1bp per hour).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FundingSnapshot {
    pub current: Decimal,
    pub predicted: Decimal,
    pub captured_at: DateTime<Utc>,
}

impl FundingSnapshot {
    pub fn new(current: Decimal, predicted: Decimal) -> Self {
        Self {
            current,
            predicted,
            captured_at: Utc::now(),
        }
    }

    /// Shorts are currently being paid.
    #[inline]
    pub fn pays_short(&self) -> bool {
        self.current.is_sign_negative() && !self.current.is_zero()
    }

    /// Funding flip: shorts are paid now but the predicted rate is
    /// non-negative, so the carry is about to invert.
    #[inline]
    pub fn is_flip(&self) -> bool {
        self.pays_short() && !self.predicted.is_sign_negative()
    }

    /// Annualized rate the short side receives at the current funding.
    pub fn short_receive_apy(&self) -> Decimal {
        -self.current * dec!(24) * dec!(365)
    }
}

/// Candidate trade produced by the upstream scanner.
///
/// The manager re-validates the time-sensitive parts (funding sign,
/// price deviation, balances) in preflight; the scanner's snapshot is
/// only trusted for sizing and scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub opportunity_id: String,
    pub asset: Asset,
    pub protocol: LendingProtocol,
    pub funding: FundingSnapshot,
    /// Realized volatility of the funding rate, as a fraction.
    pub funding_volatility: Decimal,
    pub leverage: Leverage,
    /// Capital to deploy as long-leg collateral.
    pub capital_usd: Decimal,
    /// Target position size (capital × leverage).
    pub position_size_usd: Decimal,
    pub gross_apy: Decimal,
    pub net_apy: Decimal,
    /// Long/short venue price deviation observed at detection, fraction.
    pub price_deviation: Decimal,
    pub meets_entry_criteria: bool,
    /// Set by the manager after preflight, for audit.
    #[serde(default)]
    pub preflight_passed: bool,
}

impl ArbitrageOpportunity {
    /// Funding volatility ceiling for entry (50%).
    pub const MAX_FUNDING_VOLATILITY: Decimal = dec!(0.5);
    /// Cross-venue price deviation ceiling for entry (0.5%).
    pub const MAX_PRICE_DEVIATION: Decimal = dec!(0.005);

    /// The five-condition entry gate: funding currently negative, predicted
    /// still negative, positive net APY, volatility and deviation in bounds.
    pub fn entry_criteria_met(&self) -> bool {
        self.funding.pays_short()
            && self.funding.predicted.is_sign_negative()
            && self.net_apy > Decimal::ZERO
            && self.funding_volatility < Self::MAX_FUNDING_VOLATILITY
            && self.price_deviation < Self::MAX_PRICE_DEVIATION
    }

    /// Recompute and store the gate (used after refreshing the snapshot).
    pub fn refresh_entry_criteria(&mut self) {
        self.meets_entry_criteria = self.entry_criteria_met();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_opportunity() -> ArbitrageOpportunity {
        ArbitrageOpportunity {
            opportunity_id: "opp-0001".to_string(),
            asset: Asset::new("jitoSOL", "J1toso1uCk3RLmjorhTtrVwY9HJ7X8V9yYac6Y7kGCPn", "SOL", true),
            protocol: LendingProtocol::Kamino,
            funding: FundingSnapshot::new(dec!(-0.0000125), dec!(-0.00001)),
            funding_volatility: dec!(0.2),
            leverage: Leverage::new(dec!(3.0)).unwrap(),
            capital_usd: dec!(5000),
            position_size_usd: dec!(15000),
            gross_apy: dec!(0.11),
            net_apy: dec!(0.08),
            price_deviation: dec!(0.001),
            meets_entry_criteria: true,
            preflight_passed: false,
        }
    }

    #[test]
    fn test_entry_criteria_all_pass() {
        let opp = sample_opportunity();
        assert!(opp.entry_criteria_met());
    }

    #[test]
    fn test_entry_criteria_positive_funding_fails() {
        let mut opp = sample_opportunity();
        opp.funding.current = dec!(0.00001);
        assert!(!opp.entry_criteria_met());
    }

    #[test]
    fn test_entry_criteria_predicted_flip_fails() {
        let mut opp = sample_opportunity();
        opp.funding.predicted = Decimal::ZERO;
        assert!(!opp.entry_criteria_met());
        assert!(opp.funding.is_flip());
    }

    #[test]
    fn test_entry_criteria_volatility_bound() {
        let mut opp = sample_opportunity();
        opp.funding_volatility = dec!(0.5);
        assert!(!opp.entry_criteria_met());
        opp.funding_volatility = dec!(0.49);
        assert!(opp.entry_criteria_met());
    }

    #[test]
    fn test_entry_criteria_deviation_bound() {
        let mut opp = sample_opportunity();
        opp.price_deviation = dec!(0.005);
        assert!(!opp.entry_criteria_met());
    }

    #[test]
    fn test_refresh_updates_flag() {
        let mut opp = sample_opportunity();
        opp.net_apy = dec!(-0.01);
        opp.refresh_entry_criteria();
        assert!(!opp.meets_entry_criteria);
    }

    #[test]
    fn test_short_receive_apy_sign() {
        let funding = FundingSnapshot::new(dec!(-0.0000125), dec!(-0.00001));
        // Negative hourly funding annualizes to a positive short-side APY.
        assert_eq!(funding.short_receive_apy(), dec!(0.1095));
    }
}
