//! Identifier types for engine entities
//!
//! All identifiers are small fixed-width integers wrapped in distinct
//! newtypes so a market id can never be passed where an account id is
//! expected. `OrderId` packs into a single `u64` that keys the per-market
//! order tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Nanoseconds from a monotonic reference.
pub type TimestampNs = i64;

/// Market identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MarketId(pub u16);

/// Session identifier within a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u16);

/// Session-local order sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SequenceId(pub u32);

/// Account identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub u64);

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Order identifier: `(market, session, local)`.
///
/// The canonical 64-bit encoding is `market << 48 | session << 32 | local`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct OrderId {
    pub market: MarketId,
    pub session: SessionId,
    pub local: SequenceId,
}

impl OrderId {
    pub fn new(market: MarketId, session: SessionId, local: SequenceId) -> Self {
        Self {
            market,
            session,
            local,
        }
    }

    /// Canonical 64-bit encoding used as the order-table key.
    pub fn encode(&self) -> u64 {
        (u64::from(self.market.0) << 48) | (u64::from(self.session.0) << 32) | u64::from(self.local.0)
    }

    /// Inverse of [`OrderId::encode`].
    pub fn decode(encoded: u64) -> Self {
        Self {
            market: MarketId((encoded >> 48) as u16),
            session: SessionId(((encoded >> 32) & 0xffff) as u16),
            local: SequenceId((encoded & 0xffff_ffff) as u32),
        }
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.market.0, self.session.0, self.local.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_id_encoding() {
        let id = OrderId::new(MarketId(1), SessionId(2), SequenceId(3));
        assert_eq!(id.encode(), (1u64 << 48) | (2u64 << 32) | 3);
    }

    #[test]
    fn test_order_id_roundtrip() {
        let id = OrderId::new(MarketId(0xabcd), SessionId(0x1234), SequenceId(0xdead_beef));
        assert_eq!(OrderId::decode(id.encode()), id);
    }

    #[test]
    fn test_order_id_decode_extremes() {
        assert_eq!(OrderId::decode(0), OrderId::default());
        let all = OrderId::decode(u64::MAX);
        assert_eq!(all.market, MarketId(u16::MAX));
        assert_eq!(all.session, SessionId(u16::MAX));
        assert_eq!(all.local, SequenceId(u32::MAX));
    }

    #[test]
    fn test_id_serialization_is_transparent() {
        let market = MarketId(7);
        assert_eq!(serde_json::to_string(&market).unwrap(), "7");
        let account: AccountId = serde_json::from_str("42").unwrap();
        assert_eq!(account, AccountId(42));
    }
}
