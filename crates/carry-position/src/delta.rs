//! Net-exposure math for a combined position.
//!
//! The raw delta is long value minus short value at live prices. For LST
//! collateral part of that drift is staking yield showing up in the long
//! price, which the hedge is supposed to let run; it is reported
//! separately and subtracted out of the effective delta used for the
//! rebalance cost gate.

use carry_core::{CombinedPosition, Price};
use rust_decimal::Decimal;
use serde::Serialize;

/// Exposure breakdown at a pair of live prices.
#[derive(Debug, Clone, Serialize)]
pub struct DeltaInfo {
    pub long_value_usd: Decimal,
    pub short_value_usd: Decimal,
    /// Long value minus short value; positive means long-heavy.
    pub delta_usd: Decimal,
    /// Delta as a fraction of position size.
    pub delta_ratio: Decimal,
    /// Long-leg drift attributable to LST appreciation since entry.
    pub lst_appreciation_usd: Decimal,
    /// Delta net of expected LST appreciation: the actual hedge error.
    pub effective_delta_usd: Decimal,
    /// Whether the delta ratio sits outside the neutral band.
    pub needs_rebalance: bool,
}

pub fn compute_delta(
    position: &CombinedPosition,
    long_price: Price,
    short_price: Price,
    neutral_band: Decimal,
) -> DeltaInfo {
    let long_value_usd = position.long_leg.token_amount.notional(long_price);
    let short_value_usd = position.short_leg.signed_size.notional(short_price);
    let delta_usd = long_value_usd - short_value_usd;

    let size = position.position_size_usd();
    let delta_ratio = if size.is_zero() {
        Decimal::ZERO
    } else {
        delta_usd / size
    };

    let lst_appreciation_usd = if position.long_leg.asset.is_lst {
        position.long_leg.token_amount.inner()
            * (long_price.inner() - position.reference_prices.long_price.inner())
    } else {
        Decimal::ZERO
    };
    let effective_delta_usd = delta_usd - lst_appreciation_usd;

    DeltaInfo {
        long_value_usd,
        short_value_usd,
        delta_usd,
        delta_ratio,
        lst_appreciation_usd,
        effective_delta_usd,
        needs_rebalance: delta_ratio.abs() > neutral_band,
    }
}
