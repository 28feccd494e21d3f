//! Entry preflight: the last gate before capital is committed.
//!
//! Re-validates an opportunity against live venue state immediately before
//! the open saga starts. Every check runs even after one fails, so a
//! single report names everything currently wrong with the trade. Venue
//! read failures fail the corresponding check instead of aborting the run.

use carry_core::ArbitrageOpportunity;
use carry_venues::{ChainClient, PriceConsensus, ShortVenueClient};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Check names as they appear in [`PreflightReport::checks`].
pub const CHECK_PRICE_CONSENSUS: &str = "price_consensus";
pub const CHECK_FUNDING_NEGATIVE: &str = "funding_negative";
pub const CHECK_FUNDING_VOLATILITY: &str = "funding_volatility";
pub const CHECK_LONG_WALLET: &str = "long_wallet_balance";
pub const CHECK_SHORT_MARGIN: &str = "short_margin_balance";
pub const CHECK_LEVERAGE_BOUND: &str = "leverage_bound";

/// Thresholds and identities for the entry preflight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightConfig {
    /// Maximum allowed cross-venue price deviation, as a fraction.
    #[serde(default = "default_max_price_deviation")]
    pub max_price_deviation: Decimal,

    /// Maximum allowed funding volatility, as a fraction.
    #[serde(default = "default_max_funding_volatility")]
    pub max_funding_volatility: Decimal,

    /// Minimum native balance on the long chain, in gas tokens.
    #[serde(default = "default_min_gas_balance")]
    pub min_gas_balance: Decimal,

    /// Required short-venue deposit as a multiple of the exact margin.
    #[serde(default = "default_margin_buffer")]
    pub margin_buffer: Decimal,

    /// Collateral token mint on the long chain.
    #[serde(default = "default_collateral_mint")]
    pub collateral_mint: String,

    /// Wallet address on the long chain.
    #[serde(default)]
    pub wallet_address: String,
}

fn default_max_price_deviation() -> Decimal {
    Decimal::new(5, 3) // 0.005
}

fn default_max_funding_volatility() -> Decimal {
    Decimal::new(5, 1) // 0.5
}

fn default_min_gas_balance() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_margin_buffer() -> Decimal {
    Decimal::new(11, 1) // 1.1
}

fn default_collateral_mint() -> String {
    "USDC".to_string()
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            max_price_deviation: default_max_price_deviation(),
            max_funding_volatility: default_max_funding_volatility(),
            min_gas_balance: default_min_gas_balance(),
            margin_buffer: default_margin_buffer(),
            collateral_mint: default_collateral_mint(),
            wallet_address: String::new(),
        }
    }
}

/// Outcome of one preflight run.
#[derive(Debug, Clone, Serialize)]
pub struct PreflightReport {
    pub passed: bool,
    pub checks: BTreeMap<String, bool>,
    pub errors: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

impl PreflightReport {
    pub fn check_passed(&self, name: &str) -> bool {
        self.checks.get(name).copied().unwrap_or(false)
    }
}

pub(crate) async fn run_checks(
    config: &PreflightConfig,
    consensus: &dyn PriceConsensus,
    short_venue: &dyn ShortVenueClient,
    long_chain: &dyn ChainClient,
    opportunity: &ArbitrageOpportunity,
) -> PreflightReport {
    let mut checks = BTreeMap::new();
    let mut errors = Vec::new();

    // 1. Both venues agree on price.
    match consensus
        .check_consensus(&opportunity.asset, config.max_price_deviation)
        .await
    {
        Ok(c) => {
            checks.insert(CHECK_PRICE_CONSENSUS.to_string(), c.within_threshold);
            if !c.within_threshold {
                errors.push(format!(
                    "price deviation {} exceeds {}",
                    c.deviation, config.max_price_deviation
                ));
            }
        }
        Err(e) => {
            checks.insert(CHECK_PRICE_CONSENSUS.to_string(), false);
            errors.push(format!("consensus check failed: {e}"));
        }
    }

    // 2. Funding still pays the short at execution time, not just at scan
    //    time.
    match short_venue
        .funding_snapshot(&opportunity.asset.perp_coin)
        .await
    {
        Ok(snapshot) => {
            let pays = snapshot.pays_short();
            checks.insert(CHECK_FUNDING_NEGATIVE.to_string(), pays);
            if !pays {
                errors.push(format!(
                    "funding {} no longer pays the short",
                    snapshot.current
                ));
            }
        }
        Err(e) => {
            checks.insert(CHECK_FUNDING_NEGATIVE.to_string(), false);
            errors.push(format!("funding fetch failed: {e}"));
        }
    }

    // 3. Funding volatility under the ceiling.
    let calm = opportunity.funding_volatility <= config.max_funding_volatility;
    checks.insert(CHECK_FUNDING_VOLATILITY.to_string(), calm);
    if !calm {
        errors.push(format!(
            "funding volatility {} exceeds {}",
            opportunity.funding_volatility, config.max_funding_volatility
        ));
    }

    // 4. Long-chain wallet covers the collateral and keeps gas.
    let mut long_ok = true;
    match long_chain
        .token_balance(&config.collateral_mint, &config.wallet_address)
        .await
    {
        Ok(balance) if balance >= opportunity.capital_usd => {}
        Ok(balance) => {
            long_ok = false;
            errors.push(format!(
                "long wallet holds {balance} of {} required collateral",
                opportunity.capital_usd
            ));
        }
        Err(e) => {
            long_ok = false;
            errors.push(format!("long collateral balance fetch failed: {e}"));
        }
    }
    match long_chain.balance(&config.wallet_address).await {
        Ok(balance) if balance >= config.min_gas_balance => {}
        Ok(balance) => {
            long_ok = false;
            errors.push(format!(
                "long chain gas balance {balance} below {}",
                config.min_gas_balance
            ));
        }
        Err(e) => {
            long_ok = false;
            errors.push(format!("long gas balance fetch failed: {e}"));
        }
    }
    checks.insert(CHECK_LONG_WALLET.to_string(), long_ok);

    // 5. Short-venue deposit covers the hedge margin with buffer.
    let required_margin =
        opportunity.position_size_usd / opportunity.leverage.inner() * config.margin_buffer;
    match short_venue.deposited_balance().await {
        Ok(balance) => {
            let funded = balance >= required_margin;
            checks.insert(CHECK_SHORT_MARGIN.to_string(), funded);
            if !funded {
                errors.push(format!(
                    "short venue deposit {balance} below required margin {required_margin}"
                ));
            }
        }
        Err(e) => {
            checks.insert(CHECK_SHORT_MARGIN.to_string(), false);
            errors.push(format!("short deposit fetch failed: {e}"));
        }
    }

    // 6. Requested leverage within the protocol's cap.
    let leverage_ok = opportunity.leverage.allowed_on(opportunity.protocol);
    checks.insert(CHECK_LEVERAGE_BOUND.to_string(), leverage_ok);
    if !leverage_ok {
        errors.push(format!(
            "{} exceeds {} cap",
            opportunity.leverage, opportunity.protocol
        ));
    }

    let passed = checks.values().all(|ok| *ok);
    PreflightReport {
        passed,
        checks,
        errors,
        checked_at: Utc::now(),
    }
}
