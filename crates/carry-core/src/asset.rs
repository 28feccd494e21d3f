//! Asset, lending protocol, and leverage types.

use crate::error::{CoreError, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The asset a combined position is built on.
///
/// `symbol` is the long-leg token (often a liquid-staking derivative,
/// e.g. "jitoSOL"); `perp_coin` is the coin the hedge trades on the
/// derivatives venue (e.g. "SOL"); `mint` is the token address used for
/// wallet balance reads on the long chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Asset {
    pub symbol: String,
    pub mint: String,
    pub perp_coin: String,
    /// Liquid-staking tokens appreciate against the perp coin via staking
    /// yield; delta math treats that drift as expected, not hedge error.
    pub is_lst: bool,
}

impl Asset {
    pub fn new(
        symbol: impl Into<String>,
        mint: impl Into<String>,
        perp_coin: impl Into<String>,
        is_lst: bool,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            mint: mint.into(),
            perp_coin: perp_coin.into(),
            is_lst,
        }
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol)
    }
}

/// Lending venues the long leg can be opened on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LendingProtocol {
    Kamino,
    MarginFi,
    Drift,
}

impl LendingProtocol {
    /// Protocol-side leverage ceiling, below the global bound where the
    /// venue is more conservative.
    pub fn max_leverage(&self) -> Decimal {
        match self {
            Self::Kamino => dec!(4.0),
            Self::MarginFi => dec!(3.0),
            Self::Drift => dec!(3.5),
        }
    }
}

impl fmt::Display for LendingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kamino => write!(f, "kamino"),
            Self::MarginFi => write!(f, "marginfi"),
            Self::Drift => write!(f, "drift"),
        }
    }
}

/// Long-leg leverage, bounded 1.1–4.0.
///
/// Constructed only through `new`, so a `Leverage` value is always within
/// the global bounds; the per-protocol cap is checked at preflight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Leverage(Decimal);

impl Leverage {
    pub const MIN: Decimal = dec!(1.1);
    pub const MAX: Decimal = dec!(4.0);

    pub fn new(value: Decimal) -> Result<Self> {
        if value < Self::MIN || value > Self::MAX {
            return Err(CoreError::InvalidLeverage(format!(
                "{value} outside [{}, {}]",
                Self::MIN,
                Self::MAX
            )));
        }
        Ok(Self(value))
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    /// Whether this leverage is allowed on the given protocol.
    pub fn allowed_on(&self, protocol: LendingProtocol) -> bool {
        self.0 <= protocol.max_leverage()
    }
}

impl fmt::Display for Leverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leverage_bounds() {
        assert!(Leverage::new(dec!(1.0)).is_err());
        assert!(Leverage::new(dec!(1.1)).is_ok());
        assert!(Leverage::new(dec!(2.5)).is_ok());
        assert!(Leverage::new(dec!(4.0)).is_ok());
        assert!(Leverage::new(dec!(4.01)).is_err());
    }

    #[test]
    fn test_protocol_caps() {
        let lev = Leverage::new(dec!(3.2)).unwrap();
        assert!(lev.allowed_on(LendingProtocol::Kamino));
        assert!(lev.allowed_on(LendingProtocol::Drift));
        assert!(!lev.allowed_on(LendingProtocol::MarginFi));
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(LendingProtocol::MarginFi.to_string(), "marginfi");
        assert_eq!(
            serde_json::to_string(&LendingProtocol::Kamino).unwrap(),
            "\"kamino\""
        );
    }
}
