//! In-memory venue implementations.
//!
//! Used as the live clients in paper mode and as fakes in tests. The sim
//! venues model just enough venue behavior to exercise the full open/close
//! saga: staged long transactions that take effect at confirm time, a perp
//! book that accumulates signed size, and a shared price board both sides
//! read from.

use crate::error::{VenueError, VenueResult};
use crate::traits::{ChainClient, LongVenueClient, PriceConsensus, ShortVenueClient};
use crate::types::{
    Consensus, LongOpenRequest, LongPositionState, LongTxKind, ShortFill, ShortPositionState,
    SignedTx, TxPayload, TxReceipt, TxSignature,
};
use async_trait::async_trait;
use carry_core::{Asset, FundingSnapshot, Leverage, Price, Size};
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Shared record of venue calls in invocation order, for leg-ordering
/// assertions across both sim venues.
pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn new_call_log() -> CallLog {
    Arc::new(Mutex::new(Vec::new()))
}

fn short_uuid() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}

/// Injection points for one-shot failures. The next matching call fails
/// once, then the venue behaves normally again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimFailure {
    BuildOpen,
    BuildClose,
    Sign,
    Submit,
    Confirm,
    UpdateLeverage,
    OpenShort,
    CloseShort,
}

// ============================================================================
// Price board
// ============================================================================

/// Price and funding state shared by all sim venues.
///
/// Long prices are keyed by the asset symbol, short prices and funding by
/// the perp coin.
#[derive(Debug, Default)]
pub struct SimPriceBoard {
    long_prices: DashMap<String, Price>,
    short_prices: DashMap<String, Price>,
    funding: DashMap<String, FundingSnapshot>,
}

impl SimPriceBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_long_price(&self, symbol: &str, price: Price) {
        self.long_prices.insert(symbol.to_string(), price);
    }

    pub fn set_short_price(&self, coin: &str, price: Price) {
        self.short_prices.insert(coin.to_string(), price);
    }

    /// Set both venue prices for an asset in one call.
    pub fn set_prices(&self, asset: &Asset, long: Price, short: Price) {
        self.set_long_price(&asset.symbol, long);
        self.set_short_price(&asset.perp_coin, short);
    }

    pub fn set_funding(&self, coin: &str, snapshot: FundingSnapshot) {
        self.funding.insert(coin.to_string(), snapshot);
    }

    pub fn long_price(&self, symbol: &str) -> Option<Price> {
        self.long_prices.get(symbol).map(|p| *p)
    }

    pub fn short_price(&self, coin: &str) -> Option<Price> {
        self.short_prices.get(coin).map(|p| *p)
    }

    pub fn funding(&self, coin: &str) -> Option<FundingSnapshot> {
        self.funding.get(coin).map(|f| f.clone())
    }
}

// ============================================================================
// Long venue
// ============================================================================

/// Simulated lending venue. Transactions only take effect at `confirm`,
/// matching the staged chain flow: a crash (or injected failure) before
/// confirm leaves no venue-side position.
pub struct SimLongVenue {
    board: Arc<SimPriceBoard>,
    positions: DashMap<String, LongPositionState>,
    /// handle -> asset symbol, for price refresh on `position_state`.
    symbols: DashMap<String, String>,
    /// signature -> submitted-but-unconfirmed transaction.
    pending: DashMap<String, SignedTx>,
    fail_next: Mutex<Option<SimFailure>>,
    call_log: Option<CallLog>,
}

impl SimLongVenue {
    pub fn new(board: Arc<SimPriceBoard>) -> Self {
        Self {
            board,
            positions: DashMap::new(),
            symbols: DashMap::new(),
            pending: DashMap::new(),
            fail_next: Mutex::new(None),
            call_log: None,
        }
    }

    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.call_log = Some(log);
        self
    }

    /// Arm a one-shot failure at the given injection point.
    pub fn inject_failure(&self, failure: SimFailure) {
        *self.fail_next.lock() = Some(failure);
    }

    pub fn active_position_count(&self) -> usize {
        self.positions.iter().filter(|p| p.is_active).count()
    }

    fn take_failure(&self, point: SimFailure) -> bool {
        let mut guard = self.fail_next.lock();
        if *guard == Some(point) {
            *guard = None;
            return true;
        }
        false
    }

    fn record(&self, call: &str) {
        if let Some(log) = &self.call_log {
            log.lock().push(call.to_string());
        }
    }
}

#[async_trait]
impl LongVenueClient for SimLongVenue {
    async fn build_open(&self, request: &LongOpenRequest) -> VenueResult<TxPayload> {
        self.record("long.build_open");
        if self.take_failure(SimFailure::BuildOpen) {
            return Err(VenueError::Rejected("injected build failure".to_string()));
        }
        if !request.leverage.allowed_on(request.protocol) {
            return Err(VenueError::Rejected(format!(
                "{} exceeds {} leverage cap",
                request.leverage, request.protocol
            )));
        }
        if request.collateral_usd <= Decimal::ZERO {
            return Err(VenueError::Rejected(
                "collateral must be positive".to_string(),
            ));
        }
        Ok(TxPayload {
            kind: LongTxKind::Open,
            data: serde_json::to_value(request)?,
        })
    }

    async fn build_close(&self, position_handle: &str) -> VenueResult<TxPayload> {
        self.record("long.build_close");
        if self.take_failure(SimFailure::BuildClose) {
            return Err(VenueError::Rejected("injected build failure".to_string()));
        }
        let active = self
            .positions
            .get(position_handle)
            .map(|p| p.is_active)
            .unwrap_or(false);
        if !active {
            return Err(VenueError::UnknownPosition(position_handle.to_string()));
        }
        Ok(TxPayload {
            kind: LongTxKind::Close,
            data: json!({ "position_handle": position_handle }),
        })
    }

    async fn sign(&self, payload: &TxPayload) -> VenueResult<SignedTx> {
        self.record("long.sign");
        if self.take_failure(SimFailure::Sign) {
            return Err(VenueError::Rejected("injected sign failure".to_string()));
        }
        Ok(SignedTx {
            kind: payload.kind,
            blob: payload.data.clone(),
        })
    }

    async fn submit(&self, tx: &SignedTx) -> VenueResult<TxSignature> {
        self.record("long.submit");
        if self.take_failure(SimFailure::Submit) {
            return Err(VenueError::Timeout("injected submit timeout".to_string()));
        }
        let signature = TxSignature::new(format!("sig_{}", short_uuid()));
        self.pending.insert(signature.to_string(), tx.clone());
        Ok(signature)
    }

    async fn confirm(&self, signature: &TxSignature) -> VenueResult<TxReceipt> {
        self.record("long.confirm");
        if self.take_failure(SimFailure::Confirm) {
            return Err(VenueError::Timeout("injected confirm timeout".to_string()));
        }
        let (_, tx) = self
            .pending
            .remove(signature.as_str())
            .ok_or_else(|| VenueError::UnknownTransaction(signature.to_string()))?;

        let position_handle = match tx.kind {
            LongTxKind::Open => {
                let request: LongOpenRequest = serde_json::from_value(tx.blob)?;
                let price = self.board.long_price(&request.asset.symbol).ok_or_else(|| {
                    VenueError::Unavailable(format!("no price for {}", request.asset.symbol))
                })?;
                let position_size = request.collateral_usd * request.leverage.inner();
                let borrowed = position_size - request.collateral_usd;
                let health_factor = if borrowed > Decimal::ZERO {
                    request.collateral_usd / borrowed
                } else {
                    dec!(10)
                };
                let handle = format!("asgard_{}", short_uuid());
                self.positions.insert(
                    handle.clone(),
                    LongPositionState {
                        position_handle: handle.clone(),
                        health_factor,
                        token_amount: Size::new(position_size / price.inner()),
                        collateral_usd: request.collateral_usd,
                        borrowed_usd: borrowed,
                        current_price: price,
                        is_active: true,
                    },
                );
                self.symbols.insert(handle.clone(), request.asset.symbol);
                handle
            }
            LongTxKind::Close => {
                let handle = tx
                    .blob
                    .get("position_handle")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        VenueError::Rejected("close payload missing position_handle".to_string())
                    })?
                    .to_string();
                match self.positions.get_mut(&handle) {
                    Some(mut position) => position.is_active = false,
                    None => return Err(VenueError::UnknownPosition(handle)),
                }
                handle
            }
        };

        Ok(TxReceipt {
            signature: signature.clone(),
            kind: tx.kind,
            position_handle: Some(position_handle),
            confirmed_at: Utc::now(),
        })
    }

    async fn position_state(&self, position_handle: &str) -> VenueResult<LongPositionState> {
        let mut state = self
            .positions
            .get(position_handle)
            .map(|p| p.clone())
            .ok_or_else(|| VenueError::UnknownPosition(position_handle.to_string()))?;

        // Re-price against the board so health factor tracks the market.
        let symbol = self.symbols.get(position_handle).map(|s| s.clone());
        if let Some(price) = symbol.and_then(|s| self.board.long_price(&s)) {
            let token_value = state.token_amount.inner() * price.inner();
            state.current_price = price;
            state.health_factor = if state.borrowed_usd > Decimal::ZERO {
                (token_value - state.borrowed_usd) / state.borrowed_usd
            } else {
                dec!(10)
            };
        }
        Ok(state)
    }
}

// ============================================================================
// Short venue
// ============================================================================

/// Simulated perp venue with a single cross-margined account.
pub struct SimShortVenue {
    board: Arc<SimPriceBoard>,
    positions: DashMap<String, ShortPositionState>,
    leverage: DashMap<String, Leverage>,
    deposited: Mutex<Decimal>,
    fail_next: Mutex<Option<SimFailure>>,
    call_log: Option<CallLog>,
}

impl SimShortVenue {
    pub fn new(board: Arc<SimPriceBoard>, deposited: Decimal) -> Self {
        Self {
            board,
            positions: DashMap::new(),
            leverage: DashMap::new(),
            deposited: Mutex::new(deposited),
            fail_next: Mutex::new(None),
            call_log: None,
        }
    }

    pub fn with_call_log(mut self, log: CallLog) -> Self {
        self.call_log = Some(log);
        self
    }

    pub fn inject_failure(&self, failure: SimFailure) {
        *self.fail_next.lock() = Some(failure);
    }

    pub fn set_deposited(&self, usd: Decimal) {
        *self.deposited.lock() = usd;
    }

    /// Leverage last set for a coin via `update_leverage`.
    pub fn leverage_for(&self, coin: &str) -> Option<Leverage> {
        self.leverage.get(coin).map(|l| *l)
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.len()
    }

    fn take_failure(&self, point: SimFailure) -> bool {
        let mut guard = self.fail_next.lock();
        if *guard == Some(point) {
            *guard = None;
            return true;
        }
        false
    }

    fn record(&self, call: &str) {
        if let Some(log) = &self.call_log {
            log.lock().push(call.to_string());
        }
    }
}

#[async_trait]
impl ShortVenueClient for SimShortVenue {
    async fn update_leverage(&self, coin: &str, leverage: Leverage) -> VenueResult<()> {
        self.record("short.update_leverage");
        if self.take_failure(SimFailure::UpdateLeverage) {
            return Err(VenueError::Rejected(
                "injected leverage rejection".to_string(),
            ));
        }
        self.leverage.insert(coin.to_string(), leverage);
        Ok(())
    }

    async fn open_short(
        &self,
        coin: &str,
        size: Size,
        leverage: Leverage,
    ) -> VenueResult<ShortFill> {
        self.record("short.open_short");
        if self.take_failure(SimFailure::OpenShort) {
            return Err(VenueError::Rejected(
                "injected short-open rejection".to_string(),
            ));
        }
        let price = self
            .board
            .short_price(coin)
            .ok_or_else(|| VenueError::Unavailable(format!("no mark price for {coin}")))?;
        let quantity = size.abs();
        if quantity.is_zero() {
            return Err(VenueError::Rejected("zero-size order".to_string()));
        }
        let margin_needed = quantity.notional(price) / leverage.inner();
        let account_value = *self.deposited.lock();
        if margin_needed > account_value {
            return Err(VenueError::InsufficientBalance(format!(
                "margin {margin_needed} exceeds account value {account_value}"
            )));
        }

        let mut entry = self.positions.entry(coin.to_string()).or_insert_with(|| {
            ShortPositionState {
                coin: coin.to_string(),
                signed_size: Size::ZERO,
                margin_used: Decimal::ZERO,
                margin_fraction: Decimal::ZERO,
                account_value,
                mark_price: price,
            }
        });
        entry.signed_size = entry.signed_size - quantity;
        entry.margin_used += margin_needed;
        entry.mark_price = price;
        entry.account_value = account_value;
        let notional = entry.signed_size.notional(price);
        entry.margin_fraction = account_value / notional;
        drop(entry);

        Ok(ShortFill {
            order_id: format!("ord_{}", short_uuid()),
            avg_price: price,
        })
    }

    async fn close_short(&self, coin: &str, size: Size) -> VenueResult<String> {
        self.record("short.close_short");
        if self.take_failure(SimFailure::CloseShort) {
            return Err(VenueError::Rejected(
                "injected short-close rejection".to_string(),
            ));
        }
        let quantity = size.abs();
        let fully_closed = {
            let mut entry = self
                .positions
                .get_mut(coin)
                .ok_or_else(|| VenueError::UnknownPosition(coin.to_string()))?;
            let before = entry.signed_size.abs();
            let remaining = entry.signed_size + quantity;
            if remaining.is_negative() {
                entry.margin_used = entry.margin_used * remaining.abs().inner() / before.inner();
                entry.signed_size = remaining;
                false
            } else {
                true
            }
        };
        if fully_closed {
            self.positions.remove(coin);
        }
        Ok(format!("ord_{}", short_uuid()))
    }

    async fn position(&self, coin: &str) -> VenueResult<Option<ShortPositionState>> {
        let Some(mut state) = self.positions.get(coin).map(|p| p.clone()) else {
            return Ok(None);
        };
        if let Some(price) = self.board.short_price(coin) {
            state.mark_price = price;
            state.account_value = *self.deposited.lock();
            let notional = state.signed_size.notional(price);
            if notional > Decimal::ZERO {
                state.margin_fraction = state.account_value / notional;
            }
        }
        Ok(Some(state))
    }

    async fn deposited_balance(&self) -> VenueResult<Decimal> {
        Ok(*self.deposited.lock())
    }

    async fn funding_snapshot(&self, coin: &str) -> VenueResult<FundingSnapshot> {
        self.board
            .funding(coin)
            .ok_or_else(|| VenueError::Unavailable(format!("no funding data for {coin}")))
    }
}

// ============================================================================
// Consensus + chain probes
// ============================================================================

/// Price-consensus probe backed by the sim board.
pub struct SimConsensus {
    board: Arc<SimPriceBoard>,
}

impl SimConsensus {
    pub fn new(board: Arc<SimPriceBoard>) -> Self {
        Self { board }
    }
}

#[async_trait]
impl PriceConsensus for SimConsensus {
    async fn check_consensus(
        &self,
        asset: &Asset,
        max_deviation: Decimal,
    ) -> VenueResult<Consensus> {
        let long_price = self
            .board
            .long_price(&asset.symbol)
            .ok_or_else(|| VenueError::Unavailable(format!("no price for {}", asset.symbol)))?;
        let short_price = self
            .board
            .short_price(&asset.perp_coin)
            .ok_or_else(|| VenueError::Unavailable(format!("no mark for {}", asset.perp_coin)))?;
        let deviation = long_price
            .deviation_from(short_price)
            .ok_or_else(|| VenueError::Unavailable("short price is zero".to_string()))?;
        Ok(Consensus {
            asset: asset.symbol.clone(),
            long_price,
            short_price,
            deviation,
            within_threshold: deviation <= max_deviation,
            checked_at: Utc::now(),
        })
    }
}

/// Chain probe with settable balances and health.
pub struct SimChainClient {
    name: String,
    healthy: AtomicBool,
    native_balance: Mutex<Decimal>,
    token_balances: DashMap<String, Decimal>,
}

impl SimChainClient {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            healthy: AtomicBool::new(true),
            native_balance: Mutex::new(dec!(1)),
            token_balances: DashMap::new(),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn set_balance(&self, amount: Decimal) {
        *self.native_balance.lock() = amount;
    }

    pub fn set_token_balance(&self, mint: &str, amount: Decimal) {
        self.token_balances.insert(mint.to_string(), amount);
    }
}

#[async_trait]
impl ChainClient for SimChainClient {
    fn chain_name(&self) -> &str {
        &self.name
    }

    async fn balance(&self, _address: &str) -> VenueResult<Decimal> {
        Ok(*self.native_balance.lock())
    }

    async fn token_balance(&self, mint: &str, _address: &str) -> VenueResult<Decimal> {
        Ok(self
            .token_balances
            .get(mint)
            .map(|b| *b)
            .unwrap_or(Decimal::ZERO))
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}
