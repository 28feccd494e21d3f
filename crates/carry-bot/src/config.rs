//! Application configuration.

use crate::error::{AppError, AppResult};
use carry_core::{Asset, LendingProtocol, Leverage};
use carry_position::ManagerConfig;
use carry_risk::{CostModel, RiskThresholds};
use carry_state::JournalConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Sim-backed venues: the full lifecycle runs without capital.
    #[default]
    Paper,
    /// Real venue clients, injected by the embedding application.
    Live,
}

/// One asset the scan cadence may open a position on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchedAsset {
    /// Long-leg token symbol (e.g. "jitoSOL").
    pub symbol: String,
    /// Token mint for wallet balance reads on the long chain.
    pub mint: String,
    /// Coin the hedge trades on the derivatives venue (e.g. "SOL").
    pub perp_coin: String,
    /// Liquid-staking tokens appreciate against the perp coin via staking
    /// yield; delta math treats that drift as expected, not hedge error.
    #[serde(default)]
    pub is_lst: bool,
    /// Lending venue for the long leg.
    #[serde(default = "default_protocol")]
    pub protocol: LendingProtocol,
    /// Collateral to deploy per position (USD).
    #[serde(default = "default_capital_usd")]
    pub capital_usd: Decimal,
    /// Long-leg leverage. Global bound 1.1-4.0; protocol caps sit below.
    #[serde(default = "default_leverage")]
    pub leverage: Decimal,
}

impl WatchedAsset {
    pub fn asset(&self) -> Asset {
        Asset::new(&self.symbol, &self.mint, &self.perp_coin, self.is_lst)
    }

    /// Leverage as the bounded domain type, checked against the
    /// protocol's own ceiling.
    pub fn bounded_leverage(&self) -> AppResult<Leverage> {
        let leverage = Leverage::new(self.leverage)?;
        if !leverage.allowed_on(self.protocol) {
            return Err(AppError::Config(format!(
                "{}: leverage {} exceeds {} cap of {}",
                self.symbol,
                self.leverage,
                self.protocol,
                self.protocol.max_leverage()
            )));
        }
        Ok(leverage)
    }
}

fn default_protocol() -> LendingProtocol {
    LendingProtocol::Kamino
}

fn default_capital_usd() -> Decimal {
    Decimal::from(5000)
}

fn default_leverage() -> Decimal {
    Decimal::from(3)
}

/// Scan cadence: candidate assembly and opening.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Seconds between scans of the watchlist.
    #[serde(default = "default_scan_interval_secs")]
    pub interval_secs: u64,
    /// Expected holding period used to amortize round-trip costs into
    /// the candidate's net APY.
    #[serde(default = "default_expected_hold_hours")]
    pub expected_hold_hours: Decimal,
    /// Funding-rate volatility estimate fed into each candidate.
    /// Estimation itself is upstream's job; this is the operator's
    /// standing assumption.
    #[serde(default = "default_funding_volatility")]
    pub funding_volatility: Decimal,
}

fn default_scan_interval_secs() -> u64 {
    60
}

fn default_expected_hold_hours() -> Decimal {
    Decimal::from(72)
}

fn default_funding_volatility() -> Decimal {
    Decimal::new(2, 1) // 0.2
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_scan_interval_secs(),
            expected_hold_hours: default_expected_hold_hours(),
            funding_volatility: default_funding_volatility(),
        }
    }
}

/// Monitor cadence: leg refresh, exit evaluation, rebalance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between monitoring passes over open positions.
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
    /// An LST is flagged as depegged once its appreciation runs this far
    /// negative, as a fraction of position size.
    #[serde(default = "default_lst_depeg_ratio")]
    pub lst_depeg_ratio: Decimal,
}

fn default_monitor_interval_secs() -> u64 {
    300
}

fn default_lst_depeg_ratio() -> Decimal {
    Decimal::new(2, 2) // 0.02
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
            lst_depeg_ratio: default_lst_depeg_ratio(),
        }
    }
}

/// Reconciliation sweep cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    #[serde(default = "default_reconcile_interval_secs")]
    pub interval_secs: u64,
}

fn default_reconcile_interval_secs() -> u64 {
    120
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval_secs(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Seconds between session statistics summaries.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,
}

fn default_stats_interval_secs() -> u64 {
    3600
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            stats_interval_secs: default_stats_interval_secs(),
        }
    }
}

/// Durable store location and journal sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the transaction journal and position snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Rewrite the journal on open once it exceeds this many lines.
    #[serde(default = "default_compact_after_lines")]
    pub compact_after_lines: u64,
    /// Terminal journal records older than this are dropped at compaction.
    #[serde(default = "default_retain_terminal_secs")]
    pub retain_terminal_secs: i64,
}

impl StoreConfig {
    pub fn journal(&self) -> JournalConfig {
        JournalConfig {
            compact_after_lines: self.compact_after_lines,
            retain_terminal_secs: self.retain_terminal_secs,
        }
    }
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_compact_after_lines() -> u64 {
    10_000
}

fn default_retain_terminal_secs() -> i64 {
    7 * 24 * 3600
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            compact_after_lines: default_compact_after_lines(),
            retain_terminal_secs: default_retain_terminal_secs(),
        }
    }
}

/// Sim venue seeding for paper mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    /// USD deposited on the sim short venue.
    #[serde(default = "default_deposited_usd")]
    pub deposited_usd: Decimal,
    /// Native gas balance on the sim long chain.
    #[serde(default = "default_gas_balance")]
    pub gas_balance: Decimal,
    /// Collateral-token balance in the sim long wallet.
    #[serde(default = "default_collateral_balance_usd")]
    pub collateral_balance_usd: Decimal,
    /// Seed price applied to both venues for every watched asset.
    #[serde(default = "default_paper_price")]
    pub price: Decimal,
    /// Seed hourly funding rate (negative pays the short).
    #[serde(default = "default_funding_current")]
    pub funding_current: Decimal,
    #[serde(default = "default_funding_predicted")]
    pub funding_predicted: Decimal,
}

fn default_deposited_usd() -> Decimal {
    Decimal::from(50_000)
}

fn default_gas_balance() -> Decimal {
    Decimal::from(5)
}

fn default_collateral_balance_usd() -> Decimal {
    Decimal::from(100_000)
}

fn default_paper_price() -> Decimal {
    Decimal::from(100)
}

fn default_funding_current() -> Decimal {
    Decimal::new(-1, 4) // -0.0001/hour
}

fn default_funding_predicted() -> Decimal {
    Decimal::new(-8, 5)
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            deposited_usd: default_deposited_usd(),
            gas_balance: default_gas_balance(),
            collateral_balance_usd: default_collateral_balance_usd(),
            price: default_paper_price(),
            funding_current: default_funding_current(),
            funding_predicted: default_funding_predicted(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Operating mode.
    #[serde(default)]
    pub mode: OperatingMode,
    /// Assets the scan cadence considers.
    #[serde(default = "default_watchlist")]
    pub watchlist: Vec<WatchedAsset>,
    /// Scan cadence configuration.
    #[serde(default)]
    pub scan: ScanConfig,
    /// Monitor cadence configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Reconciliation sweep configuration.
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    /// Durable store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Position manager configuration (includes preflight).
    #[serde(default)]
    pub manager: ManagerConfig,
    /// Risk thresholds for exit evaluation.
    #[serde(default)]
    pub risk: RiskThresholds,
    /// Close/rebalance cost model.
    #[serde(default)]
    pub costs: CostModel,
    /// Paper-mode sim seeding.
    #[serde(default)]
    pub paper: PaperConfig,
}

fn default_watchlist() -> Vec<WatchedAsset> {
    vec![WatchedAsset {
        symbol: "jitoSOL".to_string(),
        mint: "J1toso1uCk3RLmjorhTtrVwY9HJ7X8V9yYac6Y7kGCPn".to_string(),
        perp_coin: "SOL".to_string(),
        is_lst: true,
        protocol: default_protocol(),
        capital_usd: default_capital_usd(),
        leverage: default_leverage(),
    }]
}

impl AppConfig {
    /// Load configuration from the `CARRY_CONFIG` path or the default
    /// location, falling back to defaults when no file exists.
    pub fn load() -> AppResult<Self> {
        let config_path =
            std::env::var("CARRY_CONFIG").unwrap_or_else(|_| "config/default.toml".to_string());

        if Path::new(&config_path).exists() {
            Self::from_file(&config_path)
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that could not run.
    pub fn validate(&self) -> AppResult<()> {
        if self.watchlist.is_empty() {
            return Err(AppError::Config("watchlist is empty".to_string()));
        }
        for watched in &self.watchlist {
            watched.bounded_leverage()?;
        }
        if self.costs.interval_secs != self.monitor.interval_secs {
            tracing::warn!(
                cost_interval = self.costs.interval_secs,
                monitor_interval = self.monitor.interval_secs,
                "Cost model interval differs from monitor interval"
            );
        }
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Paper,
            watchlist: default_watchlist(),
            scan: ScanConfig::default(),
            monitor: MonitorConfig::default(),
            reconcile: ReconcileConfig::default(),
            store: StoreConfig::default(),
            telemetry: TelemetryConfig::default(),
            manager: ManagerConfig::default(),
            risk: RiskThresholds::default(),
            costs: CostModel::default(),
            paper: PaperConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.mode, OperatingMode::Paper);
        assert_eq!(config.watchlist.len(), 1);
        assert_eq!(config.watchlist[0].symbol, "jitoSOL");
        assert_eq!(config.manager.max_concurrent_positions, 3);
        assert_eq!(config.risk.dwell_secs, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_partial_override() {
        let toml_str = r#"
mode = "live"

[monitor]
interval_secs = 60

[costs]
interval_secs = 60

[[watchlist]]
symbol = "SOL"
mint = "So11111111111111111111111111111111111111112"
perp_coin = "SOL"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.mode, OperatingMode::Live);
        assert_eq!(config.monitor.interval_secs, 60);
        // Watched-asset defaults fill the unspecified fields.
        assert_eq!(config.watchlist.len(), 1);
        assert!(!config.watchlist[0].is_lst);
        assert_eq!(config.watchlist[0].protocol, LendingProtocol::Kamino);
        assert_eq!(config.watchlist[0].capital_usd, dec!(5000));
        // Untouched sections keep their defaults.
        assert_eq!(config.scan.interval_secs, 60);
        assert_eq!(config.manager.confirm_timeout_secs, 180);
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("mode"));
        assert!(toml_str.contains("watchlist"));
        assert!(toml_str.contains("data_dir"));
    }

    #[test]
    fn test_leverage_out_of_bounds_rejected() {
        let mut config = AppConfig::default();
        config.watchlist[0].leverage = dec!(5.0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_leverage_above_protocol_cap_rejected() {
        let mut config = AppConfig::default();
        config.watchlist[0].protocol = LendingProtocol::MarginFi;
        config.watchlist[0].leverage = dec!(3.5);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("marginfi"));
    }

    #[test]
    fn test_empty_watchlist_rejected() {
        let mut config = AppConfig::default();
        config.watchlist.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_journal_conversion() {
        let store = StoreConfig {
            data_dir: "elsewhere".to_string(),
            compact_after_lines: 42,
            retain_terminal_secs: 60,
        };
        let journal = store.journal();
        assert_eq!(journal.compact_after_lines, 42);
        assert_eq!(journal.retain_terminal_secs, 60);
    }
}
