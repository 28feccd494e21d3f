//! Application wiring and the main lifecycle loop.
//!
//! The application owns the cadences; the position manager owns the
//! positions. Three timers drive everything: the scan tick assembles
//! candidates from the watchlist and opens when the entry gate and
//! preflight agree, the monitor tick refreshes open positions and asks
//! the risk engine whether to exit or rebalance, and a background
//! reconciler re-drives anything a crash or venue failure left halfway.

use crate::config::{AppConfig, OperatingMode, WatchedAsset};
use crate::error::{AppError, AppResult};
use carry_core::{
    ArbitrageOpportunity, CombinedPosition, FundingSnapshot, PositionId, PositionStatus, Price,
};
use carry_position::{DeltaInfo, ManagerDeps, PositionManager, Reconciler};
use carry_risk::{LiveMetrics, RiskEngine};
use carry_state::{JournalStore, StateStore};
use carry_telemetry::{Metrics, SessionStatsReporter};
use carry_venues::{
    ChainClient, JsonlPositionStore, LongVenueClient, PositionStore, PriceConsensus,
    ShortVenueClient, SimChainClient, SimConsensus, SimLongVenue, SimPriceBoard, SimShortVenue,
};
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Collaborators the application is built over.
///
/// Paper mode fills these with sims; live mode expects the embedding
/// application to inject real clients via [`Application::with_deps`].
pub struct BotDeps {
    pub state_store: Arc<dyn StateStore>,
    pub long_venue: Arc<dyn LongVenueClient>,
    pub short_venue: Arc<dyn ShortVenueClient>,
    pub consensus: Arc<dyn PriceConsensus>,
    pub long_chain: Arc<dyn ChainClient>,
    pub short_chain: Arc<dyn ChainClient>,
    pub position_store: Arc<dyn PositionStore>,
}

/// Main application.
pub struct Application {
    config: AppConfig,
    manager: Arc<PositionManager>,
    risk: RiskEngine,
    stats: SessionStatsReporter,
    consensus: Arc<dyn PriceConsensus>,
    short_venue: Arc<dyn ShortVenueClient>,
    long_chain: Arc<dyn ChainClient>,
    short_chain: Arc<dyn ChainClient>,
    position_store: Arc<dyn PositionStore>,
    /// Held only so shutdown can close them; paper mode populates these.
    journal: Option<Arc<JournalStore>>,
    disk_store: Option<Arc<JsonlPositionStore>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Application {
    /// Build the application for the configured mode.
    ///
    /// Paper mode is self-contained: sim venues seeded from
    /// `config.paper`, durable stores under `config.store.data_dir`.
    /// Live mode has no built-in venue clients and must be constructed
    /// through [`with_deps`].
    ///
    /// [`with_deps`]: Application::with_deps
    pub fn new(config: AppConfig) -> AppResult<Self> {
        match config.mode {
            OperatingMode::Paper => Self::new_paper(config),
            OperatingMode::Live => Err(AppError::Config(
                "live mode requires injected venue clients; construct via Application::with_deps"
                    .to_string(),
            )),
        }
    }

    fn new_paper(config: AppConfig) -> AppResult<Self> {
        let board = SimPriceBoard::new();
        for watched in &config.watchlist {
            let asset = watched.asset();
            board.set_prices(
                &asset,
                Price::new(config.paper.price),
                Price::new(config.paper.price),
            );
            board.set_funding(
                &watched.perp_coin,
                FundingSnapshot::new(config.paper.funding_current, config.paper.funding_predicted),
            );
        }

        let long_chain = SimChainClient::new("solana");
        long_chain.set_balance(config.paper.gas_balance);
        long_chain.set_token_balance(
            &config.manager.preflight.collateral_mint,
            config.paper.collateral_balance_usd,
        );

        let journal = Arc::new(JournalStore::open(
            &config.store.data_dir,
            config.store.journal(),
        )?);
        let disk_store = Arc::new(JsonlPositionStore::open(&config.store.data_dir)?);

        let deps = BotDeps {
            state_store: journal.clone(),
            long_venue: Arc::new(SimLongVenue::new(board.clone())),
            short_venue: Arc::new(SimShortVenue::new(board.clone(), config.paper.deposited_usd)),
            consensus: Arc::new(SimConsensus::new(board)),
            long_chain: Arc::new(long_chain),
            short_chain: Arc::new(SimChainClient::new("hyperliquid")),
            position_store: disk_store.clone(),
        };

        let mut app = Self::with_deps(config, deps);
        app.journal = Some(journal);
        app.disk_store = Some(disk_store);
        Ok(app)
    }

    /// Build over injected collaborators (live mode, tests).
    pub fn with_deps(config: AppConfig, deps: BotDeps) -> Self {
        let manager_deps = ManagerDeps {
            state_store: deps.state_store,
            long_venue: deps.long_venue,
            short_venue: deps.short_venue.clone(),
            consensus: deps.consensus.clone(),
            long_chain: deps.long_chain.clone(),
            position_store: deps.position_store.clone(),
        };
        let manager = Arc::new(PositionManager::new(
            config.manager.clone(),
            config.costs.clone(),
            manager_deps,
        ));
        let risk = RiskEngine::new(config.risk.clone(), config.costs.clone());
        let stats =
            SessionStatsReporter::new(config.watchlist.iter().map(|w| w.symbol.clone()).collect());

        Self {
            config,
            manager,
            risk,
            stats,
            consensus: deps.consensus,
            short_venue: deps.short_venue,
            long_chain: deps.long_chain,
            short_chain: deps.short_chain,
            position_store: deps.position_store,
            journal: None,
            disk_store: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn manager(&self) -> &Arc<PositionManager> {
        &self.manager
    }

    /// Token an embedding application can use to stop the run loop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Recover state from the previous run: finish or roll back
    /// incomplete venue transactions, then rehydrate surviving
    /// positions from disk.
    pub async fn startup_recovery(&self) -> AppResult<()> {
        let resolved = self.manager.resolve_incomplete_intents().await?;
        if resolved > 0 {
            info!(resolved, "Resolved incomplete transaction intents");
        }

        let mut restored = 0usize;
        for position in self.position_store.load_open()? {
            debug!(
                position_id = %position.position_id,
                status = %position.status,
                "Rehydrating position"
            );
            self.manager.restore(position);
            restored += 1;
        }
        if restored > 0 {
            info!(restored, "Rehydrated positions from disk");
        }
        Metrics::positions_open_set(self.manager.open_count() as i64);
        Ok(())
    }

    /// One scan pass: walk the watchlist and open where the entry gate
    /// and preflight both pass. Assets already held are skipped.
    pub async fn scan_once(&self) -> AppResult<()> {
        let open = self.manager.open_positions();
        if open.len() >= self.config.manager.max_concurrent_positions {
            debug!(open = open.len(), "At position capacity, skipping scan");
            return Ok(());
        }
        let held: HashSet<&str> = open.iter().map(|p| p.long_leg.asset.symbol.as_str()).collect();

        for watched in &self.config.watchlist {
            if held.contains(watched.symbol.as_str()) {
                continue;
            }
            if self.manager.open_count() >= self.config.manager.max_concurrent_positions {
                break;
            }
            if let Err(e) = self.try_open(watched).await {
                warn!(asset = %watched.symbol, error = %e, "Open attempt failed");
            }
        }
        Ok(())
    }

    async fn try_open(&self, watched: &WatchedAsset) -> AppResult<()> {
        let Some(mut opportunity) = self.candidate(watched).await? else {
            return Ok(());
        };

        let report = self.manager.run_preflight_checks(&mut opportunity).await;
        if !report.passed {
            debug!(asset = %watched.symbol, errors = ?report.errors, "Preflight rejected candidate");
            return Ok(());
        }

        let position = self.manager.open_position(&opportunity).await?;
        info!(
            position_id = %position.position_id,
            asset = %watched.symbol,
            size_usd = %position.position_size_usd(),
            net_apy = %opportunity.net_apy,
            "Opened position"
        );
        Ok(())
    }

    /// Assemble a candidate from configuration plus live venue reads.
    /// Returns `None` when the entry gate rejects it.
    async fn candidate(&self, watched: &WatchedAsset) -> AppResult<Option<ArbitrageOpportunity>> {
        let leverage = watched.bounded_leverage()?;
        let asset = watched.asset();

        let funding = self.short_venue.funding_snapshot(&watched.perp_coin).await?;
        let consensus = self
            .consensus
            .check_consensus(&asset, self.config.manager.preflight.max_price_deviation)
            .await?;

        let position_size_usd = watched.capital_usd * leverage.inner();
        let gross_apy = funding.short_receive_apy();
        let net_apy = gross_apy - self.annualized_cost_apy(position_size_usd);

        let mut opportunity = ArbitrageOpportunity {
            opportunity_id: format!("scan_{}_{}", watched.symbol, Utc::now().timestamp_millis()),
            asset,
            protocol: watched.protocol,
            funding,
            funding_volatility: self.config.scan.funding_volatility,
            leverage,
            capital_usd: watched.capital_usd,
            position_size_usd,
            gross_apy,
            net_apy,
            price_deviation: consensus.deviation,
            meets_entry_criteria: false,
            preflight_passed: false,
        };
        opportunity.refresh_entry_criteria();
        Metrics::opportunity_evaluated(&watched.symbol, opportunity.meets_entry_criteria);

        if !opportunity.meets_entry_criteria {
            debug!(
                asset = %watched.symbol,
                funding = %funding.current,
                predicted = %funding.predicted,
                net_apy = %net_apy,
                deviation = %consensus.deviation,
                "Candidate does not meet entry criteria"
            );
            return Ok(None);
        }
        Ok(Some(opportunity))
    }

    /// Round-trip venue costs spread over the expected holding period,
    /// as an annualized rate on position size. Subtracted from gross
    /// funding APY to get the candidate's net APY.
    fn annualized_cost_apy(&self, position_size_usd: Decimal) -> Decimal {
        if position_size_usd <= Decimal::ZERO
            || self.config.scan.expected_hold_hours <= Decimal::ZERO
        {
            return Decimal::ZERO;
        }
        let round_trip = Decimal::TWO * self.config.costs.estimated_close_cost(position_size_usd);
        let hours_per_year = Decimal::from(24 * 365);
        (round_trip / position_size_usd) * (hours_per_year / self.config.scan.expected_hold_hours)
    }

    /// One monitoring pass over every open position.
    pub async fn monitor_once(&mut self) {
        for position in self.manager.open_positions() {
            if position.status != PositionStatus::Open {
                continue;
            }
            if let Err(e) = self.monitor_position(&position.position_id).await {
                warn!(position_id = %position.position_id, error = %e, "Monitor pass failed");
            }
        }
        Metrics::positions_open_set(self.manager.open_count() as i64);
    }

    async fn monitor_position(&mut self, position_id: &PositionId) -> AppResult<()> {
        let position = self.manager.refresh_position(position_id).await?;
        if position.status != PositionStatus::Open {
            return Ok(());
        }

        let delta = self.manager.position_delta(position_id).await?;
        let metrics = self.live_metrics(&position, &delta).await?;
        let decision = self.risk.evaluate_exit_trigger(&position, &metrics, Utc::now());

        if decision.should_exit {
            if let Some(reason) = decision.reason {
                info!(
                    position_id = %position_id,
                    reason = %reason,
                    level = %decision.level,
                    est_close_cost = %decision.estimated_close_cost,
                    "Exit triggered"
                );
                Metrics::exit_trigger(&reason.to_string(), &decision.level.to_string());

                // Dwell timers must not survive into a reopened position
                // on the same asset, so the engine forgets this id even
                // when the close itself fails.
                let result = self.manager.close_position(position_id, reason).await;
                self.risk.forget_position(position_id);
                let closed = result?;
                info!(
                    position_id = %position_id,
                    reason = %reason,
                    pnl_usd = %closed.realized_pnl.unwrap_or_default(),
                    "Closed position"
                );
            }
            return Ok(());
        }

        let rebalance = self.manager.rebalance_if_needed(position_id).await?;
        if rebalance.executed {
            info!(
                position_id = %position_id,
                delta_usd = %rebalance.delta.delta_usd,
                adjustment = ?rebalance.adjustment,
                "Rebalanced hedge"
            );
        }
        Ok(())
    }

    /// Gather the inputs the risk engine evaluates, from the freshly
    /// refreshed position plus live venue reads.
    async fn live_metrics(
        &self,
        position: &CombinedPosition,
        delta: &DeltaInfo,
    ) -> AppResult<LiveMetrics> {
        let funding = self
            .short_venue
            .funding_snapshot(&position.short_leg.coin)
            .await?;
        let consensus = self
            .consensus
            .check_consensus(
                &position.long_leg.asset,
                self.config.manager.preflight.max_price_deviation,
            )
            .await?;
        let long_chain_healthy = self.long_chain.health_check().await;
        let short_chain_healthy = self.short_chain.health_check().await;

        let size_usd = position.position_size_usd();
        let lst_depeg = position.long_leg.asset.is_lst
            && !size_usd.is_zero()
            && delta.lst_appreciation_usd / size_usd <= -self.config.monitor.lst_depeg_ratio;

        Ok(LiveMetrics {
            health_factor: position.long_leg.current_health_factor,
            margin_fraction: position.short_leg.margin_fraction,
            delta_ratio: delta.delta_ratio,
            price_deviation: consensus.deviation,
            funding,
            current_apy: funding.short_receive_apy(),
            estimated_close_cost: self
                .config
                .costs
                .estimated_close_cost(position.short_leg.notional_usd()),
            long_chain_healthy,
            short_chain_healthy,
            lst_depeg,
        })
    }

    /// Main loop: recover, spawn the reconciler, then drive the scan,
    /// monitor, and stats cadences until ctrl-c or cancellation.
    pub async fn run(mut self) -> AppResult<()> {
        info!(
            mode = ?self.config.mode,
            assets = self.config.watchlist.len(),
            max_positions = self.config.manager.max_concurrent_positions,
            "Starting application"
        );

        self.startup_recovery().await?;

        // A stop request must reach venue confirm-waits that are already
        // in flight, not just the loop below.
        let venue_cancel = self.manager.cancellation_token();
        let stop = self.cancel.clone();
        tokio::spawn(async move {
            stop.cancelled().await;
            venue_cancel.cancel();
        });

        let reconciler = Reconciler::new(
            self.manager.clone(),
            Duration::from_secs(self.config.reconcile.interval_secs),
        );
        let reconcile_cancel = self.cancel.clone();
        let reconcile_handle = tokio::spawn(async move {
            reconciler.run(reconcile_cancel).await;
        });

        let mut scan_interval =
            tokio::time::interval(Duration::from_secs(self.config.scan.interval_secs));
        scan_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut monitor_interval =
            tokio::time::interval(Duration::from_secs(self.config.monitor.interval_secs));
        monitor_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Nothing to monitor until the first scan has run.
        monitor_interval.tick().await;

        let mut stats_interval = tokio::time::interval(Duration::from_secs(
            self.config.telemetry.stats_interval_secs,
        ));
        stats_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        stats_interval.tick().await;

        info!("Entering main event loop");
        let cancel = self.cancel.clone();
        loop {
            tokio::select! {
                _ = scan_interval.tick() => {
                    if let Err(e) = self.scan_once().await {
                        warn!(error = %e, "Scan pass failed");
                    }
                }

                _ = monitor_interval.tick() => {
                    self.monitor_once().await;
                }

                _ = stats_interval.tick() => {
                    info!("Periodic statistics summary");
                    self.stats.log_summary();
                }

                _ = cancel.cancelled() => {
                    info!("Stop requested");
                    break;
                }

                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown(reconcile_handle).await
    }

    async fn shutdown(self, reconcile_handle: JoinHandle<()>) -> AppResult<()> {
        info!("Shutting down");
        self.cancel.cancel();
        if let Err(e) = reconcile_handle.await {
            warn!(error = %e, "Reconciler task ended abnormally");
        }

        let flushed = self.manager.flush_dirty();
        if flushed > 0 {
            warn!(flushed, "Flushed unsynced positions during shutdown");
        }

        info!("Final statistics summary:");
        self.stats.log_summary();

        if let Some(store) = &self.disk_store {
            store.close()?;
        }
        if let Some(journal) = &self.journal {
            journal.close()?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
