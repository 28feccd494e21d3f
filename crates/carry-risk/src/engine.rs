//! Exit-trigger evaluation.
//!
//! `RiskEngine` is a pure decision component: the only state it keeps is
//! the dwell bookkeeping. Given a position and the metrics the monitor
//! just polled, it reports whether to exit and why, checked in a fixed
//! priority order so exactly one reason is reported even when several
//! conditions are true at once.

use crate::cost::CostModel;
use crate::dwell::{DwellMetric, DwellTracker};
use crate::thresholds::RiskThresholds;
use carry_core::{CombinedPosition, ExitReason, FundingSnapshot, PositionId, RiskLevel};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Point-in-time inputs the monitor assembles from venue reads.
#[derive(Debug, Clone, Serialize)]
pub struct LiveMetrics {
    pub health_factor: Decimal,
    pub margin_fraction: Decimal,
    /// Signed; positive = long-heavy.
    pub delta_ratio: Decimal,
    /// Absolute cross-venue price deviation, as a fraction.
    pub price_deviation: Decimal,
    pub funding: FundingSnapshot,
    /// Net APY of the position at current rates.
    pub current_apy: Decimal,
    /// Cost of closing both legs now.
    pub estimated_close_cost: Decimal,
    pub long_chain_healthy: bool,
    pub short_chain_healthy: bool,
    pub lst_depeg: bool,
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Serialize)]
pub struct ExitDecision {
    pub should_exit: bool,
    pub reason: Option<ExitReason>,
    pub level: RiskLevel,
    pub details: BTreeMap<String, String>,
    pub estimated_close_cost: Decimal,
    pub expected_loss_if_held: Decimal,
    pub timestamp: DateTime<Utc>,
}

pub struct RiskEngine {
    thresholds: RiskThresholds,
    cost_model: CostModel,
    dwell: DwellTracker,
}

impl RiskEngine {
    pub fn new(thresholds: RiskThresholds, cost_model: CostModel) -> Self {
        Self {
            thresholds,
            cost_model,
            dwell: DwellTracker::new(),
        }
    }

    /// Worst of the per-metric levels, for reporting.
    pub fn overall_level(&self, metrics: &LiveMetrics) -> RiskLevel {
        self.thresholds
            .hf_level(metrics.health_factor)
            .max(self.thresholds.mf_level(metrics.margin_fraction))
            .max(self.thresholds.delta_level(metrics.delta_ratio))
    }

    /// Drop dwell timers for a position that is no longer monitored.
    pub fn forget_position(&mut self, position_id: &PositionId) {
        self.dwell.clear_position(position_id);
    }

    pub fn active_dwell_timers(&self) -> usize {
        self.dwell.active_timers()
    }

    /// Evaluate all exit conditions for one position; first match wins.
    ///
    /// Priority: chain outage, critical health factor, critical margin
    /// fraction, LST depeg, price deviation, cost-gated negative APY,
    /// funding flip, elapsed proximity dwell.
    pub fn evaluate_exit_trigger(
        &mut self,
        position: &CombinedPosition,
        metrics: &LiveMetrics,
        now: DateTime<Utc>,
    ) -> ExitDecision {
        let decision = self.evaluate_inner(position, metrics, now);
        match decision.reason {
            Some(reason) if decision.should_exit => {
                warn!(
                    position_id = %position.position_id,
                    reason = %reason,
                    level = %decision.level,
                    "exit trigger raised"
                );
            }
            _ => {
                debug!(
                    position_id = %position.position_id,
                    level = %decision.level,
                    "no exit trigger"
                );
            }
        }
        decision
    }

    fn evaluate_inner(
        &mut self,
        position: &CombinedPosition,
        metrics: &LiveMetrics,
        now: DateTime<Utc>,
    ) -> ExitDecision {
        let thresholds = &self.thresholds;
        let mut details = BTreeMap::new();
        details.insert(
            "health_factor".to_string(),
            metrics.health_factor.to_string(),
        );
        details.insert(
            "margin_fraction".to_string(),
            metrics.margin_fraction.to_string(),
        );
        details.insert("delta_ratio".to_string(), metrics.delta_ratio.to_string());
        details.insert(
            "price_deviation".to_string(),
            metrics.price_deviation.to_string(),
        );

        // Dwell bookkeeping advances on every evaluation, not just when
        // the dwell branch is reached, so a higher-priority trigger one
        // tick does not stall the timers.
        let hf_in_proximity = metrics.health_factor <= thresholds.hf_proximity_bound();
        let mf_in_proximity = metrics.margin_fraction <= thresholds.mf_proximity_bound();
        let hf_elapsed = self.dwell.observe(
            &position.position_id,
            DwellMetric::HealthFactor,
            hf_in_proximity,
            now,
        );
        let mf_elapsed = self.dwell.observe(
            &position.position_id,
            DwellMetric::MarginFraction,
            mf_in_proximity,
            now,
        );

        let estimated_close_cost = metrics.estimated_close_cost;
        let expected_loss_if_held = self
            .cost_model
            .expected_loss_if_held(metrics.current_apy, position.position_size_usd());

        let exit = |reason: ExitReason, level: RiskLevel, details: BTreeMap<String, String>| {
            ExitDecision {
                should_exit: true,
                reason: Some(reason),
                level,
                details,
                estimated_close_cost,
                expected_loss_if_held,
                timestamp: now,
            }
        };

        if !metrics.long_chain_healthy || !metrics.short_chain_healthy {
            details.insert(
                "long_chain_healthy".to_string(),
                metrics.long_chain_healthy.to_string(),
            );
            details.insert(
                "short_chain_healthy".to_string(),
                metrics.short_chain_healthy.to_string(),
            );
            return exit(ExitReason::ChainOutage, RiskLevel::Critical, details);
        }

        if metrics.health_factor <= thresholds.hf_critical {
            return exit(ExitReason::HealthFactor, RiskLevel::Critical, details);
        }

        if metrics.margin_fraction <= thresholds.mf_critical {
            return exit(ExitReason::MarginFraction, RiskLevel::Critical, details);
        }

        if metrics.lst_depeg {
            return exit(ExitReason::LstDepeg, RiskLevel::Critical, details);
        }

        if metrics.price_deviation >= thresholds.price_deviation_critical {
            return exit(ExitReason::PriceDeviation, RiskLevel::Critical, details);
        }

        // Economic exit, gated on cost-effectiveness: closing must be
        // cheaper than bleeding for one more interval.
        if metrics.current_apy < Decimal::ZERO && estimated_close_cost < expected_loss_if_held {
            details.insert("current_apy".to_string(), metrics.current_apy.to_string());
            return exit(ExitReason::NegativeApy, RiskLevel::Warning, details);
        }

        if metrics.funding.is_flip() {
            details.insert(
                "funding_current".to_string(),
                metrics.funding.current.to_string(),
            );
            details.insert(
                "funding_predicted".to_string(),
                metrics.funding.predicted.to_string(),
            );
            return exit(ExitReason::FundingFlip, RiskLevel::Warning, details);
        }

        let dwell_window = thresholds.dwell_secs as i64;
        if let Some(elapsed) = hf_elapsed {
            if elapsed >= dwell_window {
                details.insert(
                    "dwell_metric".to_string(),
                    DwellMetric::HealthFactor.to_string(),
                );
                details.insert("dwell_elapsed_secs".to_string(), elapsed.to_string());
                return exit(ExitReason::HealthFactor, RiskLevel::Warning, details);
            }
        }
        if let Some(elapsed) = mf_elapsed {
            if elapsed >= dwell_window {
                details.insert(
                    "dwell_metric".to_string(),
                    DwellMetric::MarginFraction.to_string(),
                );
                details.insert("dwell_elapsed_secs".to_string(), elapsed.to_string());
                return exit(ExitReason::MarginFraction, RiskLevel::Warning, details);
            }
        }

        ExitDecision {
            should_exit: false,
            reason: None,
            level: self.overall_level(metrics),
            details,
            estimated_close_cost,
            expected_loss_if_held,
            timestamp: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carry_core::{
        Asset, IntentId, LendingProtocol, Leverage, LongLegPosition, Price, ReferencePrices,
        ShortLegPosition, Size,
    };
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn sample_position() -> CombinedPosition {
        let long_leg = LongLegPosition {
            position_handle: "asgard_7f3a".to_string(),
            intent_id: IntentId::generate("open_long"),
            asset: Asset::new("jitoSOL", "J1toso1m", "SOL", true),
            protocol: LendingProtocol::Kamino,
            collateral_usd: dec!(5000),
            position_size_usd: dec!(15000),
            leverage: Leverage::new(dec!(3.0)).unwrap(),
            token_amount: Size::new(dec!(150)),
            borrowed_usd: dec!(10000),
            entry_price: Price::new(dec!(100)),
            current_price: Price::new(dec!(100)),
            current_health_factor: dec!(0.35),
        };
        let short_leg = ShortLegPosition {
            coin: "SOL".to_string(),
            signed_size: Size::new(dec!(-150)),
            entry_price: Price::new(dec!(100)),
            leverage: Leverage::new(dec!(3.0)).unwrap(),
            margin_used: dec!(5000),
            margin_fraction: dec!(0.33),
            account_value: dec!(5100),
            mark_price: Price::new(dec!(100)),
        };
        CombinedPosition::new(
            "opp-0001".to_string(),
            long_leg,
            short_leg,
            ReferencePrices {
                long_price: Price::new(dec!(100)),
                short_price: Price::new(dec!(100)),
                captured_at: Utc::now(),
            },
        )
    }

    fn healthy_metrics() -> LiveMetrics {
        LiveMetrics {
            health_factor: dec!(0.35),
            margin_fraction: dec!(0.33),
            delta_ratio: dec!(0.0001),
            price_deviation: dec!(0.001),
            funding: FundingSnapshot::new(dec!(-0.0000125), dec!(-0.00001)),
            current_apy: dec!(0.08),
            estimated_close_cost: dec!(8.75),
            long_chain_healthy: true,
            short_chain_healthy: true,
            lst_depeg: false,
        }
    }

    fn engine() -> RiskEngine {
        RiskEngine::new(RiskThresholds::default(), CostModel::default())
    }

    #[test]
    fn test_healthy_position_holds() {
        let mut engine = engine();
        let position = sample_position();
        let decision = engine.evaluate_exit_trigger(&position, &healthy_metrics(), Utc::now());
        assert!(!decision.should_exit);
        assert_eq!(decision.reason, None);
        assert_eq!(decision.level, RiskLevel::Normal);
        assert!(decision.details.contains_key("health_factor"));
    }

    #[test]
    fn test_health_factor_beats_funding_flip() {
        let mut engine = engine();
        let position = sample_position();
        let mut metrics = healthy_metrics();
        metrics.health_factor = dec!(0.03);
        metrics.funding = FundingSnapshot::new(dec!(-0.0001), dec!(0.0001));
        assert!(metrics.funding.is_flip());

        let decision = engine.evaluate_exit_trigger(&position, &metrics, Utc::now());
        assert!(decision.should_exit);
        assert_eq!(decision.reason, Some(ExitReason::HealthFactor));
        assert_eq!(decision.level, RiskLevel::Critical);
    }

    #[test]
    fn test_chain_outage_beats_critical_health_factor() {
        let mut engine = engine();
        let position = sample_position();
        let mut metrics = healthy_metrics();
        metrics.health_factor = dec!(0.01);
        metrics.short_chain_healthy = false;

        let decision = engine.evaluate_exit_trigger(&position, &metrics, Utc::now());
        assert_eq!(decision.reason, Some(ExitReason::ChainOutage));
        assert_eq!(decision.level, RiskLevel::Critical);
    }

    #[test]
    fn test_margin_fraction_critical() {
        let mut engine = engine();
        let position = sample_position();
        let mut metrics = healthy_metrics();
        metrics.margin_fraction = dec!(0.04);

        let decision = engine.evaluate_exit_trigger(&position, &metrics, Utc::now());
        assert!(decision.should_exit);
        assert_eq!(decision.reason, Some(ExitReason::MarginFraction));
    }

    #[test]
    fn test_margin_fraction_beats_lst_depeg() {
        let mut engine = engine();
        let position = sample_position();
        let mut metrics = healthy_metrics();
        metrics.margin_fraction = dec!(0.03);
        metrics.lst_depeg = true;

        let decision = engine.evaluate_exit_trigger(&position, &metrics, Utc::now());
        assert_eq!(decision.reason, Some(ExitReason::MarginFraction));

        let mut engine = RiskEngine::new(RiskThresholds::default(), CostModel::default());
        metrics.margin_fraction = dec!(0.33);
        let decision = engine.evaluate_exit_trigger(&position, &metrics, Utc::now());
        assert_eq!(decision.reason, Some(ExitReason::LstDepeg));
        assert_eq!(decision.level, RiskLevel::Critical);
    }

    #[test]
    fn test_price_deviation_critical() {
        let mut engine = engine();
        let position = sample_position();
        let mut metrics = healthy_metrics();
        metrics.price_deviation = dec!(0.02);

        let decision = engine.evaluate_exit_trigger(&position, &metrics, Utc::now());
        assert_eq!(decision.reason, Some(ExitReason::PriceDeviation));
        assert_eq!(decision.level, RiskLevel::Critical);
    }

    #[test]
    fn test_negative_apy_exit_when_close_is_cheaper() {
        let mut engine = engine();
        let mut position = sample_position();
        position.long_leg.position_size_usd = dec!(20000000);
        let mut metrics = healthy_metrics();
        metrics.current_apy = dec!(-0.5);
        metrics.estimated_close_cost = dec!(50);

        let decision = engine.evaluate_exit_trigger(&position, &metrics, Utc::now());
        assert!(decision.should_exit);
        assert_eq!(decision.reason, Some(ExitReason::NegativeApy));
        assert_eq!(decision.level, RiskLevel::Warning);
        // -50% APY on $20M over 5 minutes bleeds ~$95.
        assert!(decision.expected_loss_if_held > dec!(90));
        assert!(decision.estimated_close_cost < decision.expected_loss_if_held);
    }

    #[test]
    fn test_negative_apy_held_when_close_costs_more() {
        let mut engine = engine();
        let mut position = sample_position();
        position.long_leg.position_size_usd = dec!(10000);
        let mut metrics = healthy_metrics();
        metrics.current_apy = dec!(-0.5);
        metrics.estimated_close_cost = dec!(100);

        let decision = engine.evaluate_exit_trigger(&position, &metrics, Utc::now());
        assert!(!decision.should_exit);
        assert!(decision.expected_loss_if_held < dec!(1));
    }

    #[test]
    fn test_funding_flip_exit() {
        let mut engine = engine();
        let position = sample_position();
        let mut metrics = healthy_metrics();
        metrics.funding = FundingSnapshot::new(dec!(-0.0001), Decimal::ZERO);

        let decision = engine.evaluate_exit_trigger(&position, &metrics, Utc::now());
        assert!(decision.should_exit);
        assert_eq!(decision.reason, Some(ExitReason::FundingFlip));
        assert_eq!(decision.level, RiskLevel::Warning);
    }

    #[test]
    fn test_proximity_dwell_fires_after_window() {
        let mut engine = engine();
        let position = sample_position();
        let mut metrics = healthy_metrics();
        // 0.22 is above the warning line (0.20) but inside the proximity
        // band (0.24), so only the dwell rule can trigger.
        metrics.health_factor = dec!(0.22);
        let t0 = Utc::now();

        let decision = engine.evaluate_exit_trigger(&position, &metrics, t0);
        assert!(!decision.should_exit);
        assert_eq!(decision.level, RiskLevel::Normal);

        let decision =
            engine.evaluate_exit_trigger(&position, &metrics, t0 + Duration::seconds(10));
        assert!(!decision.should_exit);

        let decision =
            engine.evaluate_exit_trigger(&position, &metrics, t0 + Duration::seconds(20));
        assert!(decision.should_exit);
        assert_eq!(decision.reason, Some(ExitReason::HealthFactor));
        assert_eq!(decision.level, RiskLevel::Warning);
        assert_eq!(decision.details.get("dwell_elapsed_secs").unwrap(), "20");
    }

    #[test]
    fn test_proximity_dwell_resets_on_healthy_reading() {
        let mut engine = engine();
        let position = sample_position();
        let mut in_band = healthy_metrics();
        in_band.health_factor = dec!(0.22);
        let healthy = healthy_metrics();
        let t0 = Utc::now();

        engine.evaluate_exit_trigger(&position, &in_band, t0);
        engine.evaluate_exit_trigger(&position, &in_band, t0 + Duration::seconds(15));
        // A healthy reading wipes the accumulated 15 seconds.
        engine.evaluate_exit_trigger(&position, &healthy, t0 + Duration::seconds(16));

        let decision =
            engine.evaluate_exit_trigger(&position, &in_band, t0 + Duration::seconds(30));
        assert!(!decision.should_exit);

        let decision =
            engine.evaluate_exit_trigger(&position, &in_band, t0 + Duration::seconds(50));
        assert!(decision.should_exit);
        assert_eq!(decision.reason, Some(ExitReason::HealthFactor));
    }

    #[test]
    fn test_margin_fraction_dwell() {
        let mut engine = engine();
        let position = sample_position();
        let mut metrics = healthy_metrics();
        // Inside the mf proximity band (0.12) but above warning.
        metrics.margin_fraction = dec!(0.11);
        let t0 = Utc::now();

        engine.evaluate_exit_trigger(&position, &metrics, t0);
        let decision =
            engine.evaluate_exit_trigger(&position, &metrics, t0 + Duration::seconds(25));
        assert!(decision.should_exit);
        assert_eq!(decision.reason, Some(ExitReason::MarginFraction));
        assert_eq!(decision.level, RiskLevel::Warning);
    }

    #[test]
    fn test_emergency_level_reported_without_exit() {
        let mut engine = engine();
        let position = sample_position();
        let mut metrics = healthy_metrics();
        metrics.health_factor = dec!(0.08);

        let decision = engine.evaluate_exit_trigger(&position, &metrics, Utc::now());
        // Emergency is reported but only critical forces an immediate exit.
        assert!(!decision.should_exit);
        assert_eq!(decision.level, RiskLevel::Emergency);
    }

    #[test]
    fn test_forget_position_clears_dwell_state() {
        let mut engine = engine();
        let position = sample_position();
        let mut metrics = healthy_metrics();
        metrics.health_factor = dec!(0.22);
        let t0 = Utc::now();

        engine.evaluate_exit_trigger(&position, &metrics, t0);
        assert_eq!(engine.active_dwell_timers(), 1);

        engine.forget_position(&position.position_id);
        assert_eq!(engine.active_dwell_timers(), 0);

        // Timer restarts from zero after the forget.
        let decision =
            engine.evaluate_exit_trigger(&position, &metrics, t0 + Duration::seconds(30));
        assert!(!decision.should_exit);
    }
}
