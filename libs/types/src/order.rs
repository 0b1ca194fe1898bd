//! Order enums and flag bitset

use serde::{Deserialize, Serialize};

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Get the opposite side
    pub fn opposite(&self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    /// Wire encoding (`0 = Buy`, `1 = Sell`).
    pub fn to_u8(self) -> u8 {
        match self {
            Side::Buy => 0,
            Side::Sell => 1,
        }
    }

    /// Inverse of [`Side::to_u8`]; anything nonzero decodes as `Sell`.
    pub fn from_u8(raw: u8) -> Self {
        if raw == 0 {
            Side::Buy
        } else {
            Side::Sell
        }
    }
}

/// Time-in-force policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-till-cancel: rests until filled or cancelled
    #[default]
    Gtc,
    /// Immediate-or-cancel: match what crosses, drop the remainder
    Ioc,
    /// Fill-or-kill: full quantity must be fillable or the order is rejected
    Fok,
    /// Rests like GTC; expiry is enforced by an outer scheduler
    GoodTilBlock,
    /// Rests like GTC; expiry is enforced by an outer scheduler
    GoodTilTime,
}

/// Order flag bitset carried on the wire as a `u16`.
pub mod flags {
    pub const NONE: u16 = 0;
    /// Must rest; rejected if it would cross.
    pub const POST_ONLY: u16 = 1 << 0;
    /// May only shrink |position|, never grow or flip it.
    pub const REDUCE_ONLY: u16 = 1 << 1;
    /// Invisible in market data, still matches in FIFO order.
    pub const HIDDEN: u16 = 1 << 2;
    /// Shows only `display_quantity`; the rest refreshes in place.
    pub const ICEBERG: u16 = 1 << 3;
}

/// Check whether `flag` is set in `bits`.
pub fn has_flag(bits: u16, flag: u16) -> bool {
    bits & flag != 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Buy.opposite(), Side::Sell);
        assert_eq!(Side::Sell.opposite(), Side::Buy);
    }

    #[test]
    fn test_side_wire_roundtrip() {
        assert_eq!(Side::from_u8(Side::Buy.to_u8()), Side::Buy);
        assert_eq!(Side::from_u8(Side::Sell.to_u8()), Side::Sell);
    }

    #[test]
    fn test_flags() {
        let bits = flags::POST_ONLY | flags::ICEBERG;
        assert!(has_flag(bits, flags::POST_ONLY));
        assert!(has_flag(bits, flags::ICEBERG));
        assert!(!has_flag(bits, flags::HIDDEN));
        assert!(!has_flag(flags::NONE, flags::REDUCE_ONLY));
    }
}
