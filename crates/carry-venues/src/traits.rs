//! Collaborator contracts the lifecycle engine consumes.
//!
//! One narrow trait per collaborator so production code depends only on
//! interfaces and tests supply fakes. All implementations own their own
//! transient-retry policy; the core treats a returned error as final.

use crate::error::VenueResult;
use crate::types::{
    ActionRecord, Consensus, LongOpenRequest, LongPositionState, ShortFill, ShortPositionState,
    SignedTx, TxPayload, TxReceipt, TxSignature,
};
use async_trait::async_trait;
use carry_core::{Asset, CombinedPosition, FundingSnapshot, Leverage, PositionId, Size};
use rust_decimal::Decimal;

/// Lending/margin venue driving the long leg.
///
/// Exposed as the four chain stages (build, sign, submit, confirm) so the
/// caller can persist progress through the transaction state machine
/// between each network boundary.
#[async_trait]
pub trait LongVenueClient: Send + Sync {
    async fn build_open(&self, request: &LongOpenRequest) -> VenueResult<TxPayload>;

    async fn build_close(&self, position_handle: &str) -> VenueResult<TxPayload>;

    async fn sign(&self, payload: &TxPayload) -> VenueResult<SignedTx>;

    async fn submit(&self, tx: &SignedTx) -> VenueResult<TxSignature>;

    /// Wait for the transaction to land. For opens the receipt carries
    /// the venue-assigned position handle.
    async fn confirm(&self, signature: &TxSignature) -> VenueResult<TxReceipt>;

    async fn position_state(&self, position_handle: &str) -> VenueResult<LongPositionState>;
}

/// Derivatives venue driving the perp short.
#[async_trait]
pub trait ShortVenueClient: Send + Sync {
    async fn update_leverage(&self, coin: &str, leverage: Leverage) -> VenueResult<()>;

    /// `size` is the absolute quantity to short.
    async fn open_short(&self, coin: &str, size: Size, leverage: Leverage)
        -> VenueResult<ShortFill>;

    /// Returns the close order id.
    async fn close_short(&self, coin: &str, size: Size) -> VenueResult<String>;

    async fn position(&self, coin: &str) -> VenueResult<Option<ShortPositionState>>;

    async fn deposited_balance(&self) -> VenueResult<Decimal>;

    /// Current + predicted funding, re-fetched at execution time.
    async fn funding_snapshot(&self, coin: &str) -> VenueResult<FundingSnapshot>;
}

/// Cross-venue price agreement probe.
#[async_trait]
pub trait PriceConsensus: Send + Sync {
    async fn check_consensus(&self, asset: &Asset, max_deviation: Decimal)
        -> VenueResult<Consensus>;
}

/// Read-only chain probe for balances and outage detection.
#[async_trait]
pub trait ChainClient: Send + Sync {
    fn chain_name(&self) -> &str;

    /// Native balance in the chain's gas token.
    async fn balance(&self, address: &str) -> VenueResult<Decimal>;

    async fn token_balance(&self, mint: &str, address: &str) -> VenueResult<Decimal>;

    async fn health_check(&self) -> bool;
}

/// Durability/audit sink for combined positions.
///
/// Failures here are logged, not fatal to the in-memory operation; the
/// reconciliation sweep retries until memory and disk agree.
pub trait PositionStore: Send + Sync {
    fn save(&self, position: &CombinedPosition) -> VenueResult<()>;

    fn load(&self, position_id: &PositionId) -> VenueResult<Option<CombinedPosition>>;

    /// Positions that are not closed (open and closing), for rehydration.
    fn load_open(&self) -> VenueResult<Vec<CombinedPosition>>;

    fn log_action(&self, action: &ActionRecord) -> VenueResult<()>;
}
