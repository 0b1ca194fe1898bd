//! Per-market funding state
//!
//! `update_market` clamps the mid into a band around the index to produce
//! the mark price, derives a premium rate in basis points, caps it at the
//! market's maximum funding rate, and accrues `rate * elapsed_seconds`
//! into the accumulator until settlement rolls it.

use std::collections::BTreeMap;
use types::ids::MarketId;

const BASIS_POINT_DENOMINATOR: i64 = 10_000;

#[derive(Debug, Clone, Copy, Default)]
pub struct MarketFundingConfig {
    /// Half-width of the mark band and premium clamp, in basis points.
    pub clamp_bp: i64,
    /// Funding rate cap, in basis points.
    pub max_rate_bp: i64,
}

#[derive(Debug, Clone, Copy, Default)]
struct MarketState {
    config: MarketFundingConfig,
    mark_price: i64,
    index_price: i64,
    premium_rate: i64,
    funding_accumulator: i64,
}

/// The rolling funding view returned by `update_market`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingSnapshot {
    pub mark_price: i64,
    pub index_price: i64,
    pub premium_rate: i64,
    pub funding_rate: i64,
}

#[derive(Default)]
pub struct FundingEngine {
    markets: BTreeMap<MarketId, MarketState>,
}

impl FundingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure_market(&mut self, market: MarketId, config: MarketFundingConfig) {
        self.markets.entry(market).or_default().config = config;
    }

    pub fn update_market(
        &mut self,
        market: MarketId,
        index_price: i64,
        mid_price: i64,
        elapsed_seconds: i64,
    ) -> FundingSnapshot {
        let state = self.markets.entry(market).or_default();
        state.index_price = index_price;

        let band = (index_price * state.config.clamp_bp) / BASIS_POINT_DENOMINATOR;
        state.mark_price = mid_price.clamp(index_price - band, index_price + band);

        let mut premium = 0;
        if index_price > 0 {
            premium = ((mid_price - index_price) * BASIS_POINT_DENOMINATOR) / index_price;
        }
        premium = premium.clamp(-state.config.clamp_bp, state.config.clamp_bp);
        state.premium_rate = premium;

        let funding_rate = premium.clamp(-state.config.max_rate_bp, state.config.max_rate_bp);
        state.funding_accumulator += funding_rate * elapsed_seconds;

        FundingSnapshot {
            mark_price: state.mark_price,
            index_price: state.index_price,
            premium_rate: state.premium_rate,
            funding_rate,
        }
    }

    pub fn mark_price(&self, market: MarketId) -> i64 {
        self.markets
            .get(&market)
            .map(|state| state.mark_price)
            .unwrap_or(0)
    }

    pub fn accumulated_funding(&self, market: MarketId) -> i64 {
        self.markets
            .get(&market)
            .map(|state| state.funding_accumulator)
            .unwrap_or(0)
    }

    pub fn reset_accumulated_funding(&mut self, market: MarketId) {
        if let Some(state) = self.markets.get_mut(&market) {
            state.funding_accumulator = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> FundingEngine {
        let mut engine = FundingEngine::new();
        engine.configure_market(
            MarketId(1),
            MarketFundingConfig {
                clamp_bp: 50,
                max_rate_bp: 100,
            },
        );
        engine
    }

    #[test]
    fn test_premium_and_accrual() {
        let mut engine = engine();
        let snapshot = engine.update_market(MarketId(1), 1_000, 1_020, 1);
        // Mid clamps to the +0.5% band edge; premium clamps to 50bp
        assert_eq!(snapshot.mark_price, 1_005);
        assert_eq!(snapshot.premium_rate, 50);
        assert_eq!(snapshot.funding_rate, 50);
        assert_eq!(engine.accumulated_funding(MarketId(1)), 50);
    }

    #[test]
    fn test_mid_within_band_passes_through() {
        let mut engine = engine();
        let snapshot = engine.update_market(MarketId(1), 1_000, 1_003, 1);
        assert_eq!(snapshot.mark_price, 1_003);
        assert_eq!(snapshot.premium_rate, 30);
    }

    #[test]
    fn test_negative_premium_clamps() {
        let mut engine = engine();
        let snapshot = engine.update_market(MarketId(1), 1_000, 900, 1);
        assert_eq!(snapshot.mark_price, 995);
        assert_eq!(snapshot.premium_rate, -50);
        assert_eq!(snapshot.funding_rate, -50);
    }

    #[test]
    fn test_rate_cap_applies() {
        let mut engine = FundingEngine::new();
        engine.configure_market(
            MarketId(1),
            MarketFundingConfig {
                clamp_bp: 500,
                max_rate_bp: 100,
            },
        );
        let snapshot = engine.update_market(MarketId(1), 1_000, 1_030, 1);
        assert_eq!(snapshot.premium_rate, 300);
        assert_eq!(snapshot.funding_rate, 100);
    }

    #[test]
    fn test_accumulator_scales_with_elapsed() {
        let mut engine = engine();
        engine.update_market(MarketId(1), 1_000, 1_020, 3);
        assert_eq!(engine.accumulated_funding(MarketId(1)), 150);
        engine.update_market(MarketId(1), 1_000, 1_020, 1);
        assert_eq!(engine.accumulated_funding(MarketId(1)), 200);
    }

    #[test]
    fn test_zero_index_means_zero_premium() {
        let mut engine = engine();
        let snapshot = engine.update_market(MarketId(1), 0, 1_000, 1);
        assert_eq!(snapshot.premium_rate, 0);
        assert_eq!(snapshot.funding_rate, 0);
    }

    #[test]
    fn test_reset_accumulator() {
        let mut engine = engine();
        engine.update_market(MarketId(1), 1_000, 1_020, 1);
        engine.reset_accumulated_funding(MarketId(1));
        assert_eq!(engine.accumulated_funding(MarketId(1)), 0);
    }

    #[test]
    fn test_unknown_market_reads_zero() {
        let engine = FundingEngine::new();
        assert_eq!(engine.mark_price(MarketId(9)), 0);
        assert_eq!(engine.accumulated_funding(MarketId(9)), 0);
    }
}
