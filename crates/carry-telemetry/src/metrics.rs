//! Prometheus metrics for the carry bot.
//!
//! Provides observability for:
//! - Position lifecycle (opens, closes, unwinds)
//! - Risk monitoring (health factor, margin fraction, delta)
//! - Preflight and exit decisions
//! - Transaction state machine progress
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, register_int_gauge,
    CounterVec, GaugeVec, HistogramVec, IntGauge,
};

/// Number of currently open combined positions.
pub static POSITIONS_OPEN: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("carry_positions_open", "Currently open combined positions").unwrap()
});

/// Total positions opened.
pub static POSITIONS_OPENED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "carry_positions_opened_total",
        "Total combined positions opened",
        &["asset"]
    )
    .unwrap()
});

/// Total positions closed.
/// Labels: asset, exit_reason (health_factor/funding_flip/manual/...)
pub static POSITIONS_CLOSED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "carry_positions_closed_total",
        "Total combined positions closed",
        &["asset", "exit_reason"]
    )
    .unwrap()
});

/// Total long-leg unwinds after a failed hedge open.
/// Labels: outcome (success/failure)
pub static UNWINDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "carry_unwinds_total",
        "Total long-leg unwind attempts after hedge failure",
        &["outcome"]
    )
    .unwrap()
});

/// Total exit triggers fired by the risk engine.
pub static EXIT_TRIGGERS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "carry_exit_triggers_total",
        "Total exit triggers fired",
        &["reason", "level"]
    )
    .unwrap()
});

/// Total preflight runs by outcome (passed/failed).
pub static PREFLIGHT_RUNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "carry_preflight_runs_total",
        "Total preflight runs",
        &["outcome"]
    )
    .unwrap()
});

/// Total individual preflight check failures.
pub static PREFLIGHT_CHECKS_FAILED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "carry_preflight_checks_failed_total",
        "Total individual preflight check failures",
        &["check"]
    )
    .unwrap()
});

/// Total transaction state machine transitions by target state.
pub static TX_TRANSITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "carry_tx_transitions_total",
        "Total transaction state transitions",
        &["state"]
    )
    .unwrap()
});

/// Positions whose latest snapshot failed to persist and await a retry.
pub static DIRTY_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "carry_dirty_positions",
        "Positions with unpersisted state awaiting retry"
    )
    .unwrap()
});

/// Current delta ratio per position (deltaUSD / positionSizeUSD).
pub static DELTA_RATIO: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "carry_delta_ratio",
        "Net delta as a fraction of position size",
        &["position_id"]
    )
    .unwrap()
});

/// Current long-leg health factor per position.
pub static HEALTH_FACTOR: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "carry_health_factor",
        "Long-leg health factor",
        &["position_id"]
    )
    .unwrap()
});

/// Current short-leg margin fraction per position.
pub static MARGIN_FRACTION: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "carry_margin_fraction",
        "Short-leg margin fraction",
        &["position_id"]
    )
    .unwrap()
});

/// Annualized funding APY received by the short side, per coin.
pub static FUNDING_APY: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "carry_funding_apy",
        "Annualized APY received by the short side",
        &["coin"]
    )
    .unwrap()
});

/// Realized PnL in USD per closed position.
pub static REALIZED_PNL_USD: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "carry_realized_pnl_usd",
        "Realized PnL in USD per closed position",
        &["asset", "exit_reason"],
        vec![
            -1000.0, -500.0, -200.0, -100.0, -50.0, -20.0, 0.0, 20.0, 50.0, 100.0, 200.0, 500.0,
            1000.0, 2000.0,
        ]
    )
    .unwrap()
});

/// Position holding time in hours.
pub static HOLDING_TIME_HOURS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "carry_holding_time_hours",
        "Position holding time in hours",
        &["asset", "exit_reason"],
        vec![1.0, 4.0, 8.0, 12.0, 24.0, 48.0, 96.0, 168.0, 336.0, 720.0]
    )
    .unwrap()
});

/// Total rebalance evaluations by outcome.
/// Labels: outcome (executed/within_band/drift_below_cost)
pub static REBALANCES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "carry_rebalances_total",
        "Total rebalance evaluations",
        &["outcome"]
    )
    .unwrap()
});

/// Total stale transaction intents resolved by reconciliation.
/// Labels: outcome (confirmed/failed)
pub static RECONCILE_RESOLVED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "carry_reconcile_resolved_total",
        "Total stale intents resolved by reconciliation",
        &["outcome"]
    )
    .unwrap()
});

/// Total opportunities evaluated by the scanner.
/// Labels: asset, outcome (actionable/rejected)
pub static OPPORTUNITIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "carry_opportunities_total",
        "Total funding opportunities evaluated",
        &["asset", "outcome"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record a position opened.
    pub fn position_opened(asset: &str) {
        POSITIONS_OPENED_TOTAL.with_label_values(&[asset]).inc();
        POSITIONS_OPEN.inc();
    }

    /// Record a position closed.
    pub fn position_closed(asset: &str, exit_reason: &str) {
        POSITIONS_CLOSED_TOTAL
            .with_label_values(&[asset, exit_reason])
            .inc();
        POSITIONS_OPEN.dec();
    }

    /// Set the open position count (used after startup recovery).
    pub fn positions_open_set(count: i64) {
        POSITIONS_OPEN.set(count);
    }

    /// Record a long-leg unwind attempt after a failed hedge open.
    pub fn unwind_attempted(succeeded: bool) {
        let outcome = if succeeded { "success" } else { "failure" };
        UNWINDS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record an exit trigger fired by the risk engine.
    pub fn exit_trigger(reason: &str, level: &str) {
        EXIT_TRIGGERS_TOTAL
            .with_label_values(&[reason, level])
            .inc();
    }

    /// Record a preflight run outcome.
    pub fn preflight_run(passed: bool) {
        let outcome = if passed { "passed" } else { "failed" };
        PREFLIGHT_RUNS_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record an individual preflight check failure.
    pub fn preflight_check_failed(check: &str) {
        PREFLIGHT_CHECKS_FAILED_TOTAL
            .with_label_values(&[check])
            .inc();
    }

    /// Record a transaction state transition.
    pub fn tx_transition(state: &str) {
        TX_TRANSITIONS_TOTAL.with_label_values(&[state]).inc();
    }

    /// Set the dirty position count.
    pub fn dirty_positions(count: i64) {
        DIRTY_POSITIONS.set(count);
    }

    /// Update the delta ratio for a position.
    pub fn delta_ratio(position_id: &str, ratio: f64) {
        DELTA_RATIO.with_label_values(&[position_id]).set(ratio);
    }

    /// Update the health factor for a position.
    pub fn health_factor(position_id: &str, hf: f64) {
        HEALTH_FACTOR.with_label_values(&[position_id]).set(hf);
    }

    /// Update the margin fraction for a position.
    pub fn margin_fraction(position_id: &str, mf: f64) {
        MARGIN_FRACTION.with_label_values(&[position_id]).set(mf);
    }

    /// Update the annualized funding APY for a coin.
    pub fn funding_apy(coin: &str, apy: f64) {
        FUNDING_APY.with_label_values(&[coin]).set(apy);
    }

    /// Record realized PnL for a closed position.
    pub fn realized_pnl(asset: &str, exit_reason: &str, pnl_usd: f64) {
        REALIZED_PNL_USD
            .with_label_values(&[asset, exit_reason])
            .observe(pnl_usd);
    }

    /// Record holding time for a closed position.
    pub fn holding_time(asset: &str, exit_reason: &str, hours: f64) {
        HOLDING_TIME_HOURS
            .with_label_values(&[asset, exit_reason])
            .observe(hours);
    }

    /// Record a rebalance evaluation outcome.
    pub fn rebalance(outcome: &str) {
        REBALANCES_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record a stale intent resolved by reconciliation.
    pub fn reconcile_resolved(outcome: &str) {
        RECONCILE_RESOLVED_TOTAL.with_label_values(&[outcome]).inc();
    }

    /// Record an opportunity evaluation.
    pub fn opportunity_evaluated(asset: &str, actionable: bool) {
        let outcome = if actionable { "actionable" } else { "rejected" };
        OPPORTUNITIES_TOTAL
            .with_label_values(&[asset, outcome])
            .inc();
    }
}
