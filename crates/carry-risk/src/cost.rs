//! Close and rebalance cost estimation.
//!
//! Venue fee schedules move and there is no settled estimator for drift
//! cost, so every constant here is configuration rather than logic. The
//! model only has to be good enough to gate "act now vs. hold one more
//! interval" decisions.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

const SECONDS_PER_YEAR: u64 = 31_536_000; // 365 * 24 * 3600

/// Cost estimates used by the negative-APY exit gate and the rebalance
/// gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostModel {
    /// Taker fee rate on perp notional.
    #[serde(default = "default_taker_fee_rate")]
    pub taker_fee_rate: Decimal,

    /// Fixed chain cost of closing the long leg (tx + priority fees).
    #[serde(default = "default_fixed_close_cost_usd")]
    pub fixed_close_cost_usd: Decimal,

    /// Fixed venue overhead per rebalance order.
    #[serde(default = "default_fixed_rebalance_cost_usd")]
    pub fixed_rebalance_cost_usd: Decimal,

    /// Expected adverse move of unhedged delta over one interval, as a
    /// fraction of the open delta.
    #[serde(default = "default_drift_factor_per_interval")]
    pub drift_factor_per_interval: Decimal,

    /// Monitoring interval the "held one more interval" horizon refers to.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl CostModel {
    /// Estimated cost of fully closing a position now: taker fee on the
    /// short notional plus the fixed chain cost of the long close.
    pub fn estimated_close_cost(&self, position_size_usd: Decimal) -> Decimal {
        position_size_usd * self.taker_fee_rate + self.fixed_close_cost_usd
    }

    /// Expected loss from holding a negative-carry position for one more
    /// monitoring interval. Zero while the position still earns.
    pub fn expected_loss_if_held(
        &self,
        current_apy: Decimal,
        position_size_usd: Decimal,
    ) -> Decimal {
        if current_apy >= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let interval_fraction =
            Decimal::from(self.interval_secs) / Decimal::from(SECONDS_PER_YEAR);
        -current_apy * position_size_usd * interval_fraction
    }

    /// Fees to adjust the short leg back to notional parity.
    pub fn rebalance_cost(&self, delta_usd: Decimal) -> Decimal {
        delta_usd.abs() * self.taker_fee_rate + self.fixed_rebalance_cost_usd
    }

    /// Expected P&L cost of leaving the delta unhedged for one interval.
    pub fn drift_cost(&self, delta_usd: Decimal) -> Decimal {
        delta_usd.abs() * self.drift_factor_per_interval
    }
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            taker_fee_rate: default_taker_fee_rate(),
            fixed_close_cost_usd: default_fixed_close_cost_usd(),
            fixed_rebalance_cost_usd: default_fixed_rebalance_cost_usd(),
            drift_factor_per_interval: default_drift_factor_per_interval(),
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_taker_fee_rate() -> Decimal {
    Decimal::new(45, 5) // 0.00045 = 4.5 bps
}
fn default_fixed_close_cost_usd() -> Decimal {
    Decimal::new(2, 0) // $2
}
fn default_fixed_rebalance_cost_usd() -> Decimal {
    Decimal::new(1, 0) // $1
}
fn default_drift_factor_per_interval() -> Decimal {
    Decimal::new(1, 3) // 0.001
}
fn default_interval_secs() -> u64 {
    300 // 5 minutes
}
