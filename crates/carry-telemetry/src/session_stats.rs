//! Session statistics output.
//!
//! Periodically summarizes the position lifecycle counters per asset:
//! - positions opened / closed since startup
//! - closes broken down by exit reason
//! - realized PnL total and average
//! - average holding time

use crate::metrics::{
    HOLDING_TIME_HOURS, POSITIONS_CLOSED_TOTAL, POSITIONS_OPENED_TOTAL, REALIZED_PNL_USD,
    UNWINDS_TOTAL,
};
use carry_core::ExitReason;
use chrono::{DateTime, Utc};
use prometheus::core::Collector;
use std::collections::HashMap;
use tracing::info;

/// Exit reasons enumerated for per-reason counter reads.
const EXIT_REASONS: &[ExitReason] = &[
    ExitReason::ChainOutage,
    ExitReason::HealthFactor,
    ExitReason::MarginFraction,
    ExitReason::LstDepeg,
    ExitReason::PriceDeviation,
    ExitReason::NegativeApy,
    ExitReason::FundingFlip,
    ExitReason::Manual,
];

/// Session statistics for a single asset.
#[derive(Debug, Clone)]
pub struct AssetSessionStats {
    pub asset: String,
    pub opened_total: u64,
    pub closed_total: u64,
    pub closed_by_reason: HashMap<String, u64>,
    pub realized_pnl_total_usd: f64,
    pub realized_pnl_avg_usd: f64,
    pub avg_holding_hours: f64,
}

/// Session statistics reporter.
pub struct SessionStatsReporter {
    assets: Vec<String>,
    start_time: DateTime<Utc>,
}

impl SessionStatsReporter {
    /// Create a new session stats reporter.
    pub fn new(assets: Vec<String>) -> Self {
        Self {
            assets,
            start_time: Utc::now(),
        }
    }

    /// Get current statistics for all tracked assets.
    pub fn get_stats(&self) -> Vec<AssetSessionStats> {
        self.assets
            .iter()
            .map(|asset| self.get_asset_stats(asset))
            .collect()
    }

    /// Log a summary line per asset plus session totals.
    pub fn log_summary(&self) {
        let uptime_hours = (Utc::now() - self.start_time).num_seconds() as f64 / 3600.0;
        let unwind_failures = self.get_counter_value(&UNWINDS_TOTAL, &["failure"]);

        for stats in self.get_stats() {
            info!(
                asset = %stats.asset,
                opened = stats.opened_total,
                closed = stats.closed_total,
                pnl_total_usd = stats.realized_pnl_total_usd,
                pnl_avg_usd = stats.realized_pnl_avg_usd,
                avg_holding_hours = stats.avg_holding_hours,
                "session stats"
            );
        }
        info!(
            uptime_hours = uptime_hours,
            unwind_failures = unwind_failures,
            "session summary"
        );
    }

    /// Get statistics for a single asset.
    fn get_asset_stats(&self, asset: &str) -> AssetSessionStats {
        let opened_total = self.get_counter_value(&POSITIONS_OPENED_TOTAL, &[asset]);

        let mut closed_total = 0u64;
        let mut closed_by_reason = HashMap::new();
        for reason in EXIT_REASONS {
            let label = reason.to_string();
            let count = self.get_counter_value(&POSITIONS_CLOSED_TOTAL, &[asset, &label]);
            if count > 0 {
                closed_by_reason.insert(label, count);
            }
            closed_total += count;
        }

        let (pnl_sum, pnl_count) = self.histogram_sum_count(&REALIZED_PNL_USD, asset);
        let realized_pnl_avg_usd = if pnl_count > 0 {
            pnl_sum / pnl_count as f64
        } else {
            0.0
        };

        let (holding_sum, holding_count) = self.histogram_sum_count(&HOLDING_TIME_HOURS, asset);
        let avg_holding_hours = if holding_count > 0 {
            holding_sum / holding_count as f64
        } else {
            0.0
        };

        AssetSessionStats {
            asset: asset.to_string(),
            opened_total,
            closed_total,
            closed_by_reason,
            realized_pnl_total_usd: pnl_sum,
            realized_pnl_avg_usd,
            avg_holding_hours,
        }
    }

    /// Get counter value for given labels.
    fn get_counter_value(&self, counter: &prometheus::CounterVec, labels: &[&str]) -> u64 {
        counter.with_label_values(labels).get() as u64
    }

    /// Sum a histogram's sample sum and count across all exit reasons for one asset.
    fn histogram_sum_count(&self, histogram: &prometheus::HistogramVec, asset: &str) -> (f64, u64) {
        let mut total_sum = 0.0;
        let mut total_count = 0u64;

        let metric_families = histogram.collect();
        for mf in metric_families {
            for m in mf.get_metric() {
                let label_pairs = m.get_label();
                if label_pairs.len() != 2 {
                    continue;
                }
                if label_pairs[0].get_value() == asset {
                    let h = m.get_histogram();
                    total_sum += h.get_sample_sum();
                    total_count += h.get_sample_count();
                }
            }
        }

        (total_sum, total_count)
    }
}
