//! Core domain types for the carry funding-arbitrage engine.
//!
//! This crate provides the fundamental types shared by every other crate:
//! - `Price`, `Size`: precision-safe numeric types
//! - `IntentId`, `PositionId`: engine-generated identifiers
//! - `Asset`, `LendingProtocol`, `Leverage`: trade universe types
//! - `LongLegPosition`, `ShortLegPosition`, `CombinedPosition`: position model
//! - `ArbitrageOpportunity`, `FundingSnapshot`: scanner input

pub mod asset;
pub mod decimal;
pub mod error;
pub mod ids;
pub mod opportunity;
pub mod position;

pub use asset::{Asset, LendingProtocol, Leverage};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use ids::{IntentId, PositionId};
pub use opportunity::{ArbitrageOpportunity, FundingSnapshot};
pub use position::{
    CombinedPosition, ExitReason, LongLegPosition, PositionStatus, ReferencePrices, RiskLevel,
    ShortLegPosition,
};
