//! Risk evaluation for combined positions.
//!
//! Pure decision logic: [`RiskThresholds`] classifies metrics into levels,
//! [`DwellTracker`] debounces threshold proximity, [`CostModel`] prices
//! close/rebalance actions, and [`RiskEngine`] combines them into a single
//! prioritized exit decision per evaluation pass.

pub mod cost;
pub mod dwell;
pub mod engine;
pub mod thresholds;

pub use cost::CostModel;
pub use dwell::{DwellMetric, DwellTracker};
pub use engine::{ExitDecision, LiveMetrics, RiskEngine};
pub use thresholds::RiskThresholds;
