//! Risk thresholds and level classification.

use carry_core::RiskLevel;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Liquidation-proximity and divergence thresholds.
///
/// The two venue metrics are "lower = riskier": the long leg's health
/// factor and the short leg's margin fraction. Delta ratio and price
/// deviation are "higher = riskier". All boundaries are inclusive
/// (a metric sitting exactly on a threshold is classified at that level).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Health factor at/below this is Warning.
    #[serde(default = "default_hf_warning")]
    pub hf_warning: Decimal,

    /// Health factor at/below this is Emergency.
    #[serde(default = "default_hf_emergency")]
    pub hf_emergency: Decimal,

    /// Health factor at/below this is Critical and forces an exit.
    #[serde(default = "default_hf_critical")]
    pub hf_critical: Decimal,

    /// Margin fraction at/below this is Warning.
    #[serde(default = "default_mf_warning")]
    pub mf_warning: Decimal,

    /// Margin fraction at/below this is Critical and forces an exit.
    #[serde(default = "default_mf_critical")]
    pub mf_critical: Decimal,

    /// Absolute delta ratio at/above this is Warning.
    #[serde(default = "default_delta_warning")]
    pub delta_warning: Decimal,

    /// Absolute delta ratio at/above this is Critical.
    #[serde(default = "default_delta_critical")]
    pub delta_critical: Decimal,

    /// Cross-venue price deviation at/above this forces an exit.
    #[serde(default = "default_price_deviation_critical")]
    pub price_deviation_critical: Decimal,

    /// Width of the proximity band above the warning threshold, as a
    /// fraction of it. 0.2 widens an 0.20 warning line to an 0.24 band,
    /// so the dwell timer starts before the metric is formally Warning.
    #[serde(default = "default_proximity_factor")]
    pub proximity_factor: Decimal,

    /// Continuous seconds a metric must stay inside the proximity band
    /// before the dwell exit fires.
    #[serde(default = "default_dwell_secs")]
    pub dwell_secs: u64,
}

impl RiskThresholds {
    pub fn hf_level(&self, health_factor: Decimal) -> RiskLevel {
        if health_factor <= self.hf_critical {
            RiskLevel::Critical
        } else if health_factor <= self.hf_emergency {
            RiskLevel::Emergency
        } else if health_factor <= self.hf_warning {
            RiskLevel::Warning
        } else {
            RiskLevel::Normal
        }
    }

    pub fn mf_level(&self, margin_fraction: Decimal) -> RiskLevel {
        if margin_fraction <= self.mf_critical {
            RiskLevel::Critical
        } else if margin_fraction <= self.mf_warning {
            RiskLevel::Warning
        } else {
            RiskLevel::Normal
        }
    }

    pub fn delta_level(&self, delta_ratio: Decimal) -> RiskLevel {
        let abs = delta_ratio.abs();
        if abs >= self.delta_critical {
            RiskLevel::Critical
        } else if abs >= self.delta_warning {
            RiskLevel::Warning
        } else {
            RiskLevel::Normal
        }
    }

    /// Upper edge of the health-factor proximity band.
    pub fn hf_proximity_bound(&self) -> Decimal {
        self.hf_warning * (Decimal::ONE + self.proximity_factor)
    }

    /// Upper edge of the margin-fraction proximity band.
    pub fn mf_proximity_bound(&self) -> Decimal {
        self.mf_warning * (Decimal::ONE + self.proximity_factor)
    }
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            hf_warning: default_hf_warning(),
            hf_emergency: default_hf_emergency(),
            hf_critical: default_hf_critical(),
            mf_warning: default_mf_warning(),
            mf_critical: default_mf_critical(),
            delta_warning: default_delta_warning(),
            delta_critical: default_delta_critical(),
            price_deviation_critical: default_price_deviation_critical(),
            proximity_factor: default_proximity_factor(),
            dwell_secs: default_dwell_secs(),
        }
    }
}

fn default_hf_warning() -> Decimal {
    Decimal::new(20, 2) // 0.20
}
fn default_hf_emergency() -> Decimal {
    Decimal::new(10, 2) // 0.10
}
fn default_hf_critical() -> Decimal {
    Decimal::new(5, 2) // 0.05
}
fn default_mf_warning() -> Decimal {
    Decimal::new(10, 2) // 0.10
}
fn default_mf_critical() -> Decimal {
    Decimal::new(4, 2) // 0.04
}
fn default_delta_warning() -> Decimal {
    Decimal::new(5, 3) // 0.005 = 0.5%
}
fn default_delta_critical() -> Decimal {
    Decimal::new(2, 2) // 0.02 = 2%
}
fn default_price_deviation_critical() -> Decimal {
    Decimal::new(2, 2) // 0.02 = 2%
}
fn default_proximity_factor() -> Decimal {
    Decimal::new(2, 1) // 0.2
}
fn default_dwell_secs() -> u64 {
    20
}
