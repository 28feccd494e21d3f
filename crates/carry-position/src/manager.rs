//! Combined-position lifecycle manager.
//!
//! Owns the open and close sagas, the in-memory position registry, and
//! the per-position serialization that keeps lifecycle operations from
//! interleaving on the same position. Leg ordering is fixed: opening
//! places the leveraged long before any short exists, closing removes
//! the short before the long, so the system is never net short.

use crate::delta::{compute_delta, DeltaInfo};
use crate::error::{PositionError, PositionResult, SagaStage};
use crate::intent::{execute_long_tx, LongTxRequest};
use crate::preflight::{self, PreflightConfig, PreflightReport};
use carry_core::{
    ArbitrageOpportunity, CombinedPosition, ExitReason, IntentId, LongLegPosition, PositionId,
    PositionStatus, ReferencePrices, ShortLegPosition, Size,
};
use carry_risk::CostModel;
use carry_state::{StateStore, TransactionStateMachine, TransitionCtx, TxState};
use carry_telemetry::Metrics;
use carry_venues::{
    ActionRecord, ChainClient, LongOpenRequest, LongPositionState, LongVenueClient, PositionStore,
    PriceConsensus, ShortVenueClient, TxSignature, VenueError,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerConfig {
    /// Hard cap on positions that are not closed.
    #[serde(default = "default_max_concurrent_positions")]
    pub max_concurrent_positions: usize,

    /// How long to wait for a submitted transaction to confirm.
    #[serde(default = "default_confirm_timeout_secs")]
    pub confirm_timeout_secs: u64,

    /// Delta band (fraction of position size) inside which no rebalance
    /// is considered.
    #[serde(default = "default_neutral_band")]
    pub neutral_band: Decimal,

    #[serde(default)]
    pub preflight: PreflightConfig,
}

fn default_max_concurrent_positions() -> usize {
    3
}

fn default_confirm_timeout_secs() -> u64 {
    180
}

fn default_neutral_band() -> Decimal {
    Decimal::new(5, 3) // 0.005
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_positions: default_max_concurrent_positions(),
            confirm_timeout_secs: default_confirm_timeout_secs(),
            neutral_band: default_neutral_band(),
            preflight: PreflightConfig::default(),
        }
    }
}

/// Everything the manager talks to, wired at startup.
pub struct ManagerDeps {
    pub state_store: Arc<dyn StateStore>,
    pub long_venue: Arc<dyn LongVenueClient>,
    pub short_venue: Arc<dyn ShortVenueClient>,
    pub consensus: Arc<dyn PriceConsensus>,
    pub long_chain: Arc<dyn ChainClient>,
    pub position_store: Arc<dyn PositionStore>,
}

// ============================================================================
// Rebalance outcome
// ============================================================================

/// Why a rebalance evaluation did not trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceSkip {
    WithinBand,
    DriftBelowCost,
}

/// Outcome of one rebalance evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct RebalanceResult {
    pub delta: DeltaInfo,
    pub executed: bool,
    /// Token change applied to the short leg's signed size
    /// (negative means the short grew).
    pub adjustment: Option<Size>,
    pub skipped: Option<RebalanceSkip>,
}

// ============================================================================
// Manager
// ============================================================================

pub struct PositionManager {
    config: ManagerConfig,
    cost_model: CostModel,
    machine: TransactionStateMachine,
    long_venue: Arc<dyn LongVenueClient>,
    short_venue: Arc<dyn ShortVenueClient>,
    consensus: Arc<dyn PriceConsensus>,
    long_chain: Arc<dyn ChainClient>,
    store: Arc<dyn PositionStore>,
    positions: RwLock<HashMap<PositionId, CombinedPosition>>,
    /// One async mutex per position; every lifecycle operation on an
    /// existing position runs under it.
    locks: DashMap<PositionId, Arc<tokio::sync::Mutex<()>>>,
    preflights: DashMap<String, PreflightReport>,
    last_accrual: DashMap<PositionId, DateTime<Utc>>,
    /// Positions whose latest snapshot failed to persist.
    dirty: Mutex<HashSet<PositionId>>,
    /// Cancelling this aborts in-flight venue confirm-waits.
    cancel: CancellationToken,
}

impl PositionManager {
    pub fn new(config: ManagerConfig, cost_model: CostModel, deps: ManagerDeps) -> Self {
        Self {
            config,
            cost_model,
            machine: TransactionStateMachine::new(deps.state_store),
            long_venue: deps.long_venue,
            short_venue: deps.short_venue,
            consensus: deps.consensus,
            long_chain: deps.long_chain,
            store: deps.position_store,
            positions: RwLock::new(HashMap::new()),
            locks: DashMap::new(),
            preflights: DashMap::new(),
            last_accrual: DashMap::new(),
            dirty: Mutex::new(HashSet::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Token that aborts in-flight venue confirm-waits when cancelled.
    /// Interrupted intents are journaled `Failed` with their signature
    /// kept, so the next startup recovery resolves them.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    // ------------------------------------------------------------------
    // Preflight
    // ------------------------------------------------------------------

    /// Run the six entry checks against live venue state.
    ///
    /// The outcome is remembered per opportunity id; [`open_position`]
    /// refuses to run without a passing report. The opportunity's own
    /// flags are refreshed so the scan log shows why entry was or was
    /// not taken.
    ///
    /// [`open_position`]: PositionManager::open_position
    pub async fn run_preflight_checks(
        &self,
        opportunity: &mut ArbitrageOpportunity,
    ) -> PreflightReport {
        let report = preflight::run_checks(
            &self.config.preflight,
            self.consensus.as_ref(),
            self.short_venue.as_ref(),
            self.long_chain.as_ref(),
            opportunity,
        )
        .await;

        opportunity.preflight_passed = report.passed;
        opportunity.refresh_entry_criteria();

        Metrics::preflight_run(report.passed);
        for (check, ok) in &report.checks {
            if !ok {
                Metrics::preflight_check_failed(check);
            }
        }
        if report.passed {
            info!(opportunity = %opportunity.opportunity_id, "preflight passed");
        } else {
            warn!(
                opportunity = %opportunity.opportunity_id,
                errors = ?report.errors,
                "preflight failed"
            );
        }
        self.log_action(ActionRecord::new(
            "preflight",
            format!(
                "opportunity={} passed={} errors={:?}",
                opportunity.opportunity_id, report.passed, report.errors
            ),
        ));

        if report.passed {
            self.preflights
                .insert(opportunity.opportunity_id.clone(), report.clone());
        }
        report
    }

    /// Latest passing preflight report for an opportunity. `None` once
    /// the opportunity has been opened or if no run has passed.
    pub fn preflight_report(&self, opportunity_id: &str) -> Option<PreflightReport> {
        self.preflights.get(opportunity_id).map(|r| r.clone())
    }

    // ------------------------------------------------------------------
    // Open saga
    // ------------------------------------------------------------------

    /// Open both legs for a preflighted opportunity.
    ///
    /// The long leg is opened and confirmed first; the short is then
    /// sized to the long's actual token amount. If anything after the
    /// long confirm fails, the long is unwound exactly once and the
    /// error carries the `hedge_open` stage together with the unwind
    /// outcome.
    pub async fn open_position(
        &self,
        opportunity: &ArbitrageOpportunity,
    ) -> PositionResult<CombinedPosition> {
        let preflighted = self
            .preflights
            .get(&opportunity.opportunity_id)
            .map(|r| r.passed)
            .unwrap_or(false);
        if !preflighted {
            return Err(PositionError::PreflightNotRun(
                opportunity.opportunity_id.clone(),
            ));
        }

        if self.open_count() >= self.config.max_concurrent_positions {
            return Err(PositionError::MaxPositionsReached(
                self.config.max_concurrent_positions,
            ));
        }

        // Entry prices for both legs, captured at consensus time.
        let consensus = self
            .consensus
            .check_consensus(&opportunity.asset, self.config.preflight.max_price_deviation)
            .await?;
        let reference_prices = ReferencePrices {
            long_price: consensus.long_price,
            short_price: consensus.short_price,
            captured_at: consensus.checked_at,
        };

        info!(
            opportunity = %opportunity.opportunity_id,
            asset = %opportunity.asset.symbol,
            capital_usd = %opportunity.capital_usd,
            leverage = %opportunity.leverage,
            "opening combined position"
        );

        // Long leg first.
        let request = LongOpenRequest {
            asset: opportunity.asset.clone(),
            protocol: opportunity.protocol,
            collateral_usd: opportunity.capital_usd,
            leverage: opportunity.leverage,
        };
        let intent_id = IntentId::generate("open_long");
        let receipt = execute_long_tx(
            &self.machine,
            self.long_venue.as_ref(),
            &intent_id,
            LongTxRequest::Open(&request),
            self.confirm_timeout(),
            &self.cancel,
        )
        .await
        .map_err(|e| Self::saga_failed(SagaStage::LongOpen, e, false, None))?;

        let position_handle = receipt.position_handle.ok_or_else(|| {
            Self::saga_failed(
                SagaStage::LongOpen,
                PositionError::Venue(VenueError::Rejected(
                    "confirmed open returned no position handle".to_string(),
                )),
                false,
                None,
            )
        })?;

        // From here on, either both legs exist or the long is unwound.
        let (long_state, short_leg) = match self.open_hedge(opportunity, &position_handle).await {
            Ok(legs) => legs,
            Err(e) => {
                warn!(
                    handle = %position_handle,
                    error = %e,
                    "hedge open failed; unwinding long leg"
                );
                let unwind = self.unwind_long(&position_handle).await;
                Metrics::unwind_attempted(unwind.is_ok());
                let (unwound, unwind_error) = match unwind {
                    Ok(()) => (true, None),
                    Err(msg) => {
                        error!(
                            handle = %position_handle,
                            error = %msg,
                            "long unwind failed; manual intervention required"
                        );
                        (false, Some(msg))
                    }
                };
                self.log_action(
                    ActionRecord::new(
                        "unwind_long",
                        format!("handle={position_handle} unwound={unwound}"),
                    )
                    .at_stage(SagaStage::HedgeOpen.to_string()),
                );
                return Err(Self::saga_failed(SagaStage::HedgeOpen, e, unwound, unwind_error));
            }
        };

        let long_leg = LongLegPosition {
            position_handle,
            intent_id,
            asset: opportunity.asset.clone(),
            protocol: opportunity.protocol,
            collateral_usd: opportunity.capital_usd,
            position_size_usd: opportunity.position_size_usd,
            leverage: opportunity.leverage,
            token_amount: long_state.token_amount,
            borrowed_usd: long_state.borrowed_usd,
            entry_price: reference_prices.long_price,
            current_price: long_state.current_price,
            current_health_factor: long_state.health_factor,
        };

        let position = CombinedPosition::new(
            opportunity.opportunity_id.clone(),
            long_leg,
            short_leg,
            reference_prices,
        );

        self.locks.insert(
            position.position_id.clone(),
            Arc::new(tokio::sync::Mutex::new(())),
        );
        self.positions
            .write()
            .insert(position.position_id.clone(), position.clone());
        self.persist(&position);
        // A preflight admits exactly one open.
        self.preflights.remove(&opportunity.opportunity_id);

        self.log_action(
            ActionRecord::new(
                "open_position",
                format!(
                    "asset={} size_usd={} leverage={}",
                    opportunity.asset.symbol, opportunity.position_size_usd, opportunity.leverage
                ),
            )
            .for_position(position.position_id.clone()),
        );
        Metrics::position_opened(&opportunity.asset.symbol);
        info!(
            position = %position.position_id,
            handle = %position.long_leg.position_handle,
            short_size = %position.short_leg.signed_size,
            "combined position open"
        );

        Ok(position)
    }

    /// Place the short leg against an already-confirmed long.
    ///
    /// Any failure here, including reading the long back, is a hedge
    /// failure: the caller unwinds the long.
    async fn open_hedge(
        &self,
        opportunity: &ArbitrageOpportunity,
        position_handle: &str,
    ) -> PositionResult<(LongPositionState, ShortLegPosition)> {
        let long_state = self.long_venue.position_state(position_handle).await?;
        let coin = opportunity.asset.perp_coin.as_str();
        let size = long_state.token_amount.abs();

        self.short_venue
            .update_leverage(coin, opportunity.leverage)
            .await?;
        let fill = self
            .short_venue
            .open_short(coin, size, opportunity.leverage)
            .await?;
        debug!(coin, order = %fill.order_id, price = %fill.avg_price, "short leg filled");

        // Venue-reported state when available; the fill is enough to
        // book the leg otherwise.
        let short_leg = match self.short_venue.position(coin).await {
            Ok(Some(state)) => ShortLegPosition {
                coin: state.coin,
                signed_size: state.signed_size,
                entry_price: fill.avg_price,
                leverage: opportunity.leverage,
                margin_used: state.margin_used,
                margin_fraction: state.margin_fraction,
                account_value: state.account_value,
                mark_price: state.mark_price,
            },
            Ok(None) | Err(_) => {
                let margin = size.notional(fill.avg_price) / opportunity.leverage.inner();
                ShortLegPosition {
                    coin: coin.to_string(),
                    signed_size: size.neg(),
                    entry_price: fill.avg_price,
                    leverage: opportunity.leverage,
                    margin_used: margin,
                    margin_fraction: Decimal::ONE / opportunity.leverage.inner(),
                    account_value: margin,
                    mark_price: fill.avg_price,
                }
            }
        };
        Ok((long_state, short_leg))
    }

    /// Compensate a confirmed long open whose hedge could not be placed.
    /// Attempted exactly once; failure is reported, not retried.
    async fn unwind_long(&self, position_handle: &str) -> Result<(), String> {
        let intent_id = IntentId::generate("unwind_long");
        execute_long_tx(
            &self.machine,
            self.long_venue.as_ref(),
            &intent_id,
            LongTxRequest::Close { position_handle },
            self.confirm_timeout(),
            &self.cancel,
        )
        .await
        .map(|_| ())
        .map_err(|e| e.to_string())
    }

    // ------------------------------------------------------------------
    // Close saga
    // ------------------------------------------------------------------

    /// Close both legs, short first, and realize PnL.
    ///
    /// A leg failure persists the partial state and returns a
    /// stage-tagged error; calling again resumes from the leg that is
    /// still open. The hedge is removed before the long so the position
    /// is never short-only while closing.
    pub async fn close_position(
        &self,
        position_id: &PositionId,
        reason: ExitReason,
    ) -> PositionResult<CombinedPosition> {
        let lock = self.position_lock(position_id)?;
        let _guard = lock.lock().await;

        let mut position = self.get(position_id)?;
        if position.status == PositionStatus::Closed {
            return Err(PositionError::NotOpen {
                position_id: position_id.clone(),
                status: position.status,
            });
        }

        info!(position = %position_id, reason = %reason, "closing combined position");

        if position.exit_reason.is_none() {
            position.exit_reason = Some(reason);
        }
        if position.status != PositionStatus::Closing {
            position.status = PositionStatus::Closing;
        }
        self.update(&position);

        // Exit prices, best effort; leg snapshots stand in when the
        // consensus read fails mid-incident.
        let consensus = self
            .consensus
            .check_consensus(
                &position.long_leg.asset,
                self.config.preflight.max_price_deviation,
            )
            .await
            .ok();
        let exit_long = consensus
            .as_ref()
            .map(|c| c.long_price)
            .unwrap_or(position.long_leg.current_price);
        let exit_short = consensus
            .as_ref()
            .map(|c| c.short_price)
            .unwrap_or(position.short_leg.mark_price);

        // Short leg first.
        if !position.short_leg_closed {
            let size = position.short_leg.signed_size.abs();
            match self
                .short_venue
                .close_short(&position.short_leg.coin, size)
                .await
            {
                Ok(order_id) => {
                    position.short_leg_closed = true;
                    self.update(&position);
                    debug!(position = %position_id, order = %order_id, "short leg closed");
                }
                Err(e) => {
                    self.log_action(
                        ActionRecord::new("close_position", format!("short close failed: {e}"))
                            .for_position(position_id.clone())
                            .at_stage(SagaStage::HedgeClose.to_string()),
                    );
                    return Err(Self::saga_failed(
                        SagaStage::HedgeClose,
                        e.into(),
                        false,
                        None,
                    ));
                }
            }
        }

        // Then the long.
        if !position.long_leg_closed {
            let intent_id = IntentId::generate("close_long");
            let result = execute_long_tx(
                &self.machine,
                self.long_venue.as_ref(),
                &intent_id,
                LongTxRequest::Close {
                    position_handle: &position.long_leg.position_handle,
                },
                self.confirm_timeout(),
                &self.cancel,
            )
            .await;
            match result {
                Ok(_) => {
                    position.long_leg_closed = true;
                    self.update(&position);
                }
                Err(e) => {
                    self.log_action(
                        ActionRecord::new("close_position", format!("long close failed: {e}"))
                            .for_position(position_id.clone())
                            .at_stage(SagaStage::LongClose.to_string()),
                    );
                    return Err(Self::saga_failed(SagaStage::LongClose, e, false, None));
                }
            }
        }

        position.status = PositionStatus::Closed;
        position.exit_time = Some(Utc::now());
        position.realized_pnl = Some(position.realized_pnl_at(exit_long, exit_short));
        self.update(&position);
        self.last_accrual.remove(position_id);

        let reason_label = position.exit_reason.unwrap_or(reason).to_string();
        let symbol = position.long_leg.asset.symbol.clone();
        Metrics::position_closed(&symbol, &reason_label);
        if let Some(pnl) = position.realized_pnl {
            Metrics::realized_pnl(&symbol, &reason_label, pnl.to_f64().unwrap_or(0.0));
        }
        Metrics::holding_time(
            &symbol,
            &reason_label,
            position.age_secs(Utc::now()) as f64 / 3600.0,
        );
        self.log_action(
            ActionRecord::new(
                "close_position",
                format!(
                    "reason={reason_label} pnl={}",
                    position.realized_pnl.unwrap_or_default()
                ),
            )
            .for_position(position_id.clone()),
        );
        info!(
            position = %position_id,
            reason = %reason_label,
            pnl = %position.realized_pnl.unwrap_or_default(),
            "combined position closed"
        );

        Ok(position)
    }

    // ------------------------------------------------------------------
    // Delta and rebalancing
    // ------------------------------------------------------------------

    /// Delta breakdown at current consensus prices.
    pub async fn position_delta(&self, position_id: &PositionId) -> PositionResult<DeltaInfo> {
        let position = self.get(position_id)?;
        let consensus = self
            .consensus
            .check_consensus(
                &position.long_leg.asset,
                self.config.preflight.max_price_deviation,
            )
            .await?;
        let info = compute_delta(
            &position,
            consensus.long_price,
            consensus.short_price,
            self.config.neutral_band,
        );
        Metrics::delta_ratio(
            position_id.as_str(),
            info.delta_ratio.to_f64().unwrap_or(0.0),
        );
        Ok(info)
    }

    /// Adjust the short leg back toward neutral, but only when the drift
    /// costs more than the trade that fixes it.
    pub async fn rebalance_if_needed(
        &self,
        position_id: &PositionId,
    ) -> PositionResult<RebalanceResult> {
        let lock = self.position_lock(position_id)?;
        let _guard = lock.lock().await;

        let mut position = self.get(position_id)?;
        if position.status != PositionStatus::Open {
            return Err(PositionError::NotOpen {
                position_id: position_id.clone(),
                status: position.status,
            });
        }

        let consensus = self
            .consensus
            .check_consensus(
                &position.long_leg.asset,
                self.config.preflight.max_price_deviation,
            )
            .await?;
        let delta = compute_delta(
            &position,
            consensus.long_price,
            consensus.short_price,
            self.config.neutral_band,
        );

        if !delta.needs_rebalance {
            Metrics::rebalance("within_band");
            return Ok(RebalanceResult {
                delta,
                executed: false,
                adjustment: None,
                skipped: Some(RebalanceSkip::WithinBand),
            });
        }

        let drift_cost = self.cost_model.drift_cost(delta.effective_delta_usd);
        let trade_cost = self.cost_model.rebalance_cost(delta.delta_usd);
        if drift_cost <= trade_cost {
            debug!(
                position = %position_id,
                drift_cost = %drift_cost,
                trade_cost = %trade_cost,
                "rebalance skipped, drift below cost"
            );
            Metrics::rebalance("drift_below_cost");
            return Ok(RebalanceResult {
                delta,
                executed: false,
                adjustment: None,
                skipped: Some(RebalanceSkip::DriftBelowCost),
            });
        }

        // Positive delta means long-heavy: grow the short. Negative:
        // shrink it.
        let coin = position.short_leg.coin.clone();
        let tokens = delta.delta_usd / consensus.short_price.inner();
        let adjustment = if delta.delta_usd > Decimal::ZERO {
            let add = Size::new(tokens);
            self.short_venue
                .open_short(&coin, add.abs(), position.short_leg.leverage)
                .await?;
            add.neg()
        } else {
            let reduce = Size::new(tokens.abs());
            self.short_venue.close_short(&coin, reduce).await?;
            reduce
        };

        match self.short_venue.position(&coin).await {
            Ok(Some(state)) => {
                position.short_leg.signed_size = state.signed_size;
                position.short_leg.margin_used = state.margin_used;
                position.short_leg.margin_fraction = state.margin_fraction;
                position.short_leg.account_value = state.account_value;
                position.short_leg.mark_price = state.mark_price;
            }
            Ok(None) | Err(_) => {
                position.short_leg.signed_size = position.short_leg.signed_size + adjustment;
            }
        }
        self.update(&position);

        self.log_action(
            ActionRecord::new(
                "rebalance",
                format!("delta_usd={} adjustment={adjustment}", delta.delta_usd),
            )
            .for_position(position_id.clone()),
        );
        Metrics::rebalance("executed");
        info!(
            position = %position_id,
            delta_usd = %delta.delta_usd,
            adjustment = %adjustment,
            "rebalanced short leg"
        );

        Ok(RebalanceResult {
            delta,
            executed: true,
            adjustment: Some(adjustment),
            skipped: None,
        })
    }

    // ------------------------------------------------------------------
    // Monitoring support
    // ------------------------------------------------------------------

    /// Refresh both legs from the venues and accrue funding since the
    /// last refresh. No-op for positions that are not open.
    pub async fn refresh_position(
        &self,
        position_id: &PositionId,
    ) -> PositionResult<CombinedPosition> {
        let lock = self.position_lock(position_id)?;
        let _guard = lock.lock().await;

        let mut position = self.get(position_id)?;
        if position.status != PositionStatus::Open {
            return Ok(position);
        }

        let long_state = self
            .long_venue
            .position_state(&position.long_leg.position_handle)
            .await?;
        position.long_leg.token_amount = long_state.token_amount;
        position.long_leg.borrowed_usd = long_state.borrowed_usd;
        position.long_leg.current_price = long_state.current_price;
        position.long_leg.current_health_factor = long_state.health_factor;

        if let Ok(Some(state)) = self.short_venue.position(&position.short_leg.coin).await {
            position.short_leg.signed_size = state.signed_size;
            position.short_leg.margin_used = state.margin_used;
            position.short_leg.margin_fraction = state.margin_fraction;
            position.short_leg.account_value = state.account_value;
            position.short_leg.mark_price = state.mark_price;
        }

        if let Ok(funding) = self
            .short_venue
            .funding_snapshot(&position.short_leg.coin)
            .await
        {
            let now = Utc::now();
            let since = self
                .last_accrual
                .get(position_id)
                .map(|e| *e.value())
                .unwrap_or(position.opened_at);
            let hours = Decimal::from((now - since).num_seconds()) / Decimal::from(3600);
            let notional = position.short_leg.notional_usd();
            position.accrued_funding_usd += funding_accrued(funding.current, notional, hours);
            self.last_accrual.insert(position_id.clone(), now);
            Metrics::funding_apy(
                &position.short_leg.coin,
                funding.short_receive_apy().to_f64().unwrap_or(0.0),
            );
        }

        Metrics::health_factor(
            position_id.as_str(),
            position.long_leg.current_health_factor.to_f64().unwrap_or(0.0),
        );
        Metrics::margin_fraction(
            position_id.as_str(),
            position.short_leg.margin_fraction.to_f64().unwrap_or(0.0),
        );

        self.update(&position);
        Ok(position)
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    pub fn position(&self, position_id: &PositionId) -> Option<CombinedPosition> {
        self.positions.read().get(position_id).cloned()
    }

    /// Positions that are not closed, oldest first.
    pub fn open_positions(&self) -> Vec<CombinedPosition> {
        let mut open: Vec<CombinedPosition> = self
            .positions
            .read()
            .values()
            .filter(|p| p.status != PositionStatus::Closed)
            .cloned()
            .collect();
        open.sort_by(|a, b| a.opened_at.cmp(&b.opened_at));
        open
    }

    pub fn open_count(&self) -> usize {
        self.positions
            .read()
            .values()
            .filter(|p| p.status != PositionStatus::Closed)
            .count()
    }

    /// Re-register a persisted position after restart, without writing
    /// it back out.
    pub fn restore(&self, position: CombinedPosition) {
        self.locks
            .entry(position.position_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())));
        self.positions
            .write()
            .insert(position.position_id.clone(), position);
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.lock().len()
    }

    /// Retry persistence for positions whose last save failed. Returns
    /// how many are still dirty afterwards.
    pub fn flush_dirty(&self) -> usize {
        let ids: Vec<PositionId> = self.dirty.lock().iter().cloned().collect();
        for id in ids {
            match self.position(&id) {
                Some(position) => match self.store.save(&position) {
                    Ok(()) => {
                        self.dirty.lock().remove(&id);
                    }
                    Err(e) => warn!(position = %id, error = %e, "dirty flush failed"),
                },
                None => {
                    self.dirty.lock().remove(&id);
                }
            }
        }
        let remaining = self.dirty.lock().len();
        Metrics::dirty_positions(remaining as i64);
        remaining
    }

    // ------------------------------------------------------------------
    // Intent reconciliation
    // ------------------------------------------------------------------

    /// Resolve every transaction intent left non-terminal by a crash.
    ///
    /// Startup-only: no lifecycle task is running yet, so any
    /// non-terminal record is an orphan. Submitted intents with a
    /// signature are re-polled once: landed means `Confirmed`, anything
    /// else means `Failed`. Intents that never reached submission have
    /// no transaction on chain and are failed directly. Nothing is ever
    /// re-submitted.
    pub async fn resolve_incomplete_intents(&self) -> PositionResult<usize> {
        self.resolve_intents(None).await
    }

    /// Sweep variant of [`resolve_incomplete_intents`]: only touches
    /// records whose last transition is older than the confirm timeout.
    /// An intent a live task is still driving updates its record at
    /// every stage, so it stays younger than that and is left alone.
    ///
    /// [`resolve_incomplete_intents`]: Self::resolve_incomplete_intents
    pub async fn resolve_stale_intents(&self) -> PositionResult<usize> {
        let cutoff =
            Utc::now() - chrono::Duration::seconds(self.config.confirm_timeout_secs as i64);
        self.resolve_intents(Some(cutoff)).await
    }

    async fn resolve_intents(&self, cutoff: Option<DateTime<Utc>>) -> PositionResult<usize> {
        let incomplete = self.machine.recover_incomplete()?;
        let mut resolved = 0usize;

        for record in incomplete {
            if let Some(cutoff) = cutoff {
                if record.timestamp > cutoff {
                    continue;
                }
            }
            let outcome = match (&record.state, &record.signature) {
                (TxState::Submitted, Some(signature)) => {
                    let signature = TxSignature::new(signature.clone());
                    match self.long_venue.confirm(&signature).await {
                        Ok(receipt) => {
                            info!(
                                intent = %record.intent_id,
                                signature = %receipt.signature,
                                "stale transaction had landed, confirming"
                            );
                            self.machine.transition(
                                &record.intent_id,
                                TxState::Confirmed,
                                TransitionCtx::default(),
                            )?;
                            "confirmed"
                        }
                        Err(e) => {
                            self.machine.transition(
                                &record.intent_id,
                                TxState::Failed,
                                TransitionCtx::default()
                                    .with_error(format!("confirm re-poll failed: {e}")),
                            )?;
                            "failed"
                        }
                    }
                }
                (state, _) => {
                    self.machine.transition(
                        &record.intent_id,
                        TxState::Failed,
                        TransitionCtx::default().with_error(format!("stale at {state}")),
                    )?;
                    "failed"
                }
            };
            Metrics::reconcile_resolved(outcome);
            resolved += 1;
        }

        if resolved > 0 {
            info!(count = resolved, "resolved incomplete transaction intents");
        }
        Ok(resolved)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.config.confirm_timeout_secs)
    }

    fn saga_failed(
        stage: SagaStage,
        source: PositionError,
        unwound: bool,
        unwind_error: Option<String>,
    ) -> PositionError {
        PositionError::Saga {
            stage,
            source: Box::new(source),
            unwound,
            unwind_error,
        }
    }

    fn position_lock(&self, position_id: &PositionId) -> PositionResult<Arc<tokio::sync::Mutex<()>>> {
        self.locks
            .get(position_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PositionError::NotFound(position_id.clone()))
    }

    fn get(&self, position_id: &PositionId) -> PositionResult<CombinedPosition> {
        self.position(position_id)
            .ok_or_else(|| PositionError::NotFound(position_id.clone()))
    }

    /// Write-through: registry first, then durable store.
    fn update(&self, position: &CombinedPosition) {
        self.positions
            .write()
            .insert(position.position_id.clone(), position.clone());
        self.persist(position);
    }

    /// Store failures are queued for retry, never fatal to the
    /// operation that produced the state.
    fn persist(&self, position: &CombinedPosition) {
        match self.store.save(position) {
            Ok(()) => {
                self.dirty.lock().remove(&position.position_id);
            }
            Err(e) => {
                warn!(
                    position = %position.position_id,
                    error = %e,
                    "position save failed, queued for retry"
                );
                self.dirty.lock().insert(position.position_id.clone());
            }
        }
        Metrics::dirty_positions(self.dirty.lock().len() as i64);
    }

    fn log_action(&self, record: ActionRecord) {
        if let Err(e) = self.store.log_action(&record) {
            warn!(action = %record.action, error = %e, "action log write failed");
        }
    }
}

/// USD received by the short over `hours` at an hourly funding rate.
/// Negative rates pay the short.
fn funding_accrued(hourly_rate: Decimal, notional_usd: Decimal, hours: Decimal) -> Decimal {
    -hourly_rate * notional_usd * hours
}
