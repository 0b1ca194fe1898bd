//! Submit/cancel/replace entry points and the match loop

use crate::book::{MarketShard, OrderHandle, OrderRecord};
use crate::events::{
    reject, CancelRequest, CancelResult, FillEvent, OrderRequest, OrderResult, ReplaceRequest,
    ReplaceResult,
};
use std::collections::HashMap;
use types::ids::MarketId;
use types::order::{flags, has_flag, Side, TimeInForce};

#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    /// Approximate arena budget per market, in bytes.
    pub arena_bytes: usize,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            arena_bytes: 1 << 20,
        }
    }
}

/// Visible depth at one price level (market-data view).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDepth {
    pub price: i64,
    pub total_qty: i64,
    pub visible_qty: i64,
}

pub struct MatchingEngine {
    markets: HashMap<MarketId, MarketShard>,
    arena_capacity: usize,
}

impl MatchingEngine {
    pub fn new(config: MatcherConfig) -> Self {
        let slot = std::mem::size_of::<OrderRecord>().max(1);
        Self {
            markets: HashMap::new(),
            arena_capacity: config.arena_bytes / slot,
        }
    }

    pub fn add_market(&mut self, market: MarketId) {
        let capacity = self.arena_capacity;
        self.markets
            .entry(market)
            .or_insert_with(|| MarketShard::new(capacity));
    }

    /// Drop every order in the market; one arena reset.
    pub fn clear_market(&mut self, market: MarketId) {
        let capacity = self.arena_capacity;
        self.markets.insert(market, MarketShard::new(capacity));
    }

    /// Place a new order. Markets are created lazily on first reference.
    pub fn submit(&mut self, request: &OrderRequest) -> OrderResult {
        let capacity = self.arena_capacity;
        let shard = self
            .markets
            .entry(request.id.market)
            .or_insert_with(|| MarketShard::new(capacity));

        if let Some(code) = Self::validate(shard, request, true) {
            return OrderResult::rejected(code);
        }
        Self::place_order(shard, *request)
    }

    /// Cancel a resting order.
    pub fn cancel(&mut self, request: &CancelRequest) -> CancelResult {
        let Some(shard) = self.markets.get_mut(&request.id.market) else {
            return CancelResult {
                cancelled: false,
                reject_code: reject::UNKNOWN_MARKET,
            };
        };

        let encoded = request.id.encode();
        let Some(handle) = shard.orders.remove(&encoded) else {
            return CancelResult {
                cancelled: false,
                reject_code: reject::ORDER_NOT_FOUND,
            };
        };

        Self::remove_from_book(shard, handle);
        CancelResult {
            cancelled: true,
            reject_code: 0,
        }
    }

    /// Atomic cancel-then-submit preserving account, side, and iceberg
    /// display size. The replacement loses time priority (fresh fifo_seq).
    /// Validation runs before the old order is touched, so a rejected
    /// replace leaves the book unchanged.
    pub fn replace(&mut self, request: &ReplaceRequest) -> ReplaceResult {
        let Some(shard) = self.markets.get_mut(&request.id.market) else {
            return ReplaceResult {
                reject_code: reject::UNKNOWN_MARKET,
                ..ReplaceResult::default()
            };
        };

        let encoded = request.id.encode();
        let Some(&handle) = shard.orders.get(&encoded) else {
            return ReplaceResult {
                reject_code: reject::ORDER_NOT_FOUND,
                ..ReplaceResult::default()
            };
        };

        let old = shard.arena.get(handle).request;
        let new_request = OrderRequest {
            id: request.id,
            account: old.account,
            side: old.side,
            quantity: request.new_quantity,
            price: request.new_price,
            display_quantity: old.display_quantity,
            tif: request.new_tif,
            flags: request.new_flags,
        };

        // The old entry is about to be removed, so its id is not a duplicate.
        if let Some(code) = Self::validate(shard, &new_request, false) {
            return ReplaceResult {
                reject_code: code,
                ..ReplaceResult::default()
            };
        }

        shard.orders.remove(&encoded);
        Self::remove_from_book(shard, handle);

        let result = Self::place_order(shard, new_request);
        ReplaceResult {
            accepted: result.accepted,
            resting: result.resting,
            reject_code: result.reject_code,
            fills: result.fills,
        }
    }

    pub fn best_bid(&self, market: MarketId) -> Option<i64> {
        self.markets
            .get(&market)
            .and_then(|shard| shard.bids.keys().next_back().copied())
    }

    pub fn best_ask(&self, market: MarketId) -> Option<i64> {
        self.markets
            .get(&market)
            .and_then(|shard| shard.asks.keys().next().copied())
    }

    /// Best-first depth view; hidden quantity is absent from `visible_qty`.
    pub fn book_depth(&self, market: MarketId, side: Side, max_levels: usize) -> Vec<LevelDepth> {
        let Some(shard) = self.markets.get(&market) else {
            return Vec::new();
        };
        let level_view = |(&price, level): (&i64, &crate::book::PriceLevel)| LevelDepth {
            price,
            total_qty: level.total_qty,
            visible_qty: level.visible_qty,
        };
        match side {
            Side::Buy => shard
                .bids
                .iter()
                .rev()
                .take(max_levels)
                .map(level_view)
                .collect(),
            Side::Sell => shard.asks.iter().take(max_levels).map(level_view).collect(),
        }
    }

    /// Remaining and displayed quantity of a resting order, if any.
    pub fn resting_order(&self, market: MarketId, encoded_id: u64) -> Option<(i64, i64)> {
        let shard = self.markets.get(&market)?;
        let &handle = shard.orders.get(&encoded_id)?;
        let record = shard.arena.get(handle);
        Some((record.remaining, record.display_remaining))
    }

    pub fn open_order_count(&self, market: MarketId) -> usize {
        self.markets
            .get(&market)
            .map(|shard| shard.orders.len())
            .unwrap_or(0)
    }

    // ── Internal ────────────────────────────────────────────────────

    fn crosses(side: Side, taker_price: i64, maker_price: i64) -> bool {
        match side {
            Side::Buy => maker_price <= taker_price,
            Side::Sell => maker_price >= taker_price,
        }
    }

    /// All submit-time checks. Returns the reject code, if any. Runs before
    /// any state change so every rejection leaves the book untouched.
    fn validate(shard: &MarketShard, request: &OrderRequest, check_duplicate: bool) -> Option<u16> {
        if request.quantity <= 0 {
            return Some(reject::INVALID_QUANTITY);
        }

        if has_flag(request.flags, flags::ICEBERG)
            && !(request.display_quantity > 0 && request.display_quantity <= request.quantity)
        {
            return Some(reject::INVALID_QUANTITY);
        }

        if check_duplicate && shard.orders.contains_key(&request.id.encode()) {
            return Some(reject::DUPLICATE_ORDER_ID);
        }

        if has_flag(request.flags, flags::POST_ONLY) {
            let best_opposite = match request.side {
                Side::Buy => shard.asks.keys().next().copied(),
                Side::Sell => shard.bids.keys().next_back().copied(),
            };
            if let Some(best_price) = best_opposite {
                if Self::crosses(request.side, request.price, best_price) {
                    return Some(reject::POST_ONLY_WOULD_CROSS);
                }
            }
        }

        if request.tif == TimeInForce::Fok
            && Self::fillable_quantity(shard, request) < request.quantity
        {
            return Some(reject::INSUFFICIENT_LIQUIDITY);
        }

        None
    }

    /// Opposite-side quantity reachable within the limit price, capped at
    /// the requested quantity.
    fn fillable_quantity(shard: &MarketShard, request: &OrderRequest) -> i64 {
        let mut total = 0i64;
        match request.side {
            Side::Buy => {
                for (&price, level) in shard.asks.iter() {
                    if !Self::crosses(Side::Buy, request.price, price) {
                        break;
                    }
                    total += level.total_qty;
                    if total >= request.quantity {
                        return total;
                    }
                }
            }
            Side::Sell => {
                for (&price, level) in shard.bids.iter().rev() {
                    if !Self::crosses(Side::Sell, request.price, price) {
                        break;
                    }
                    total += level.total_qty;
                    if total >= request.quantity {
                        return total;
                    }
                }
            }
        }
        total
    }

    fn place_order(shard: &mut MarketShard, request: OrderRequest) -> OrderResult {
        let mut result = OrderResult {
            accepted: true,
            ..OrderResult::default()
        };

        let fifo_seq = shard.next_sequence;
        shard.next_sequence += 1;
        let mut taker = OrderRecord::new(request, fifo_seq);

        Self::match_order(shard, &mut taker, &mut result.fills);

        if taker.remaining > 0 {
            if matches!(request.tif, TimeInForce::Ioc | TimeInForce::Fok) {
                return result;
            }
            taker.refresh_display();
            Self::rest_order(shard, taker);
            result.resting = true;
        } else {
            result.fully_filled = true;
        }

        result
    }

    /// Consume the opposite book: price levels in book order, FIFO within a
    /// level, trading at the maker's price. A single taker may sweep any
    /// number of levels.
    fn match_order(shard: &mut MarketShard, taker: &mut OrderRecord, fills: &mut Vec<FillEvent>) {
        let MarketShard {
            arena,
            orders,
            bids,
            asks,
            ..
        } = shard;

        let side = taker.request.side;
        let limit = taker.request.price;
        let book = match side {
            Side::Buy => asks,
            Side::Sell => bids,
        };

        loop {
            if taker.remaining <= 0 {
                break;
            }
            let best = match side {
                Side::Buy => book.keys().next().copied(),
                Side::Sell => book.keys().next_back().copied(),
            };
            let Some(maker_price) = best else {
                break;
            };
            if !Self::crosses(side, limit, maker_price) {
                break;
            }

            let level_emptied = {
                let level = book
                    .get_mut(&maker_price)
                    .expect("best price level must exist");

                let mut cursor = level.head;
                while let Some(handle) = cursor {
                    if taker.remaining <= 0 {
                        break;
                    }

                    let maker = arena.get_mut(handle);
                    let traded = taker.remaining.min(maker.remaining);
                    taker.remaining -= traded;
                    maker.remaining -= traded;

                    // Refresh the visible slice in place: an exhausted
                    // iceberg slice re-arms without losing FIFO position.
                    let old_display = maker.display_remaining;
                    maker.refresh_display();
                    let display_delta = maker.display_remaining - old_display;

                    level.total_qty -= traded;
                    level.visible_qty += display_delta;

                    fills.push(FillEvent {
                        maker_order: maker.request.id,
                        taker_order: taker.request.id,
                        quantity: traded,
                        price: maker_price,
                    });

                    let next = maker.next;
                    let maker_done = maker.remaining == 0;
                    let encoded = maker.request.id.encode();
                    if maker_done {
                        level.unlink(arena, handle);
                        arena.remove(handle);
                        orders.remove(&encoded);
                    }
                    cursor = next;
                }

                level.is_empty()
            };

            if level_emptied {
                book.remove(&maker_price);
            } else {
                // Level not exhausted: the taker is done.
                break;
            }
        }
    }

    fn rest_order(shard: &mut MarketShard, record: OrderRecord) {
        let MarketShard {
            arena,
            orders,
            bids,
            asks,
            ..
        } = shard;

        let price = record.request.price;
        let side = record.request.side;
        let encoded = record.request.id.encode();

        let handle = arena.insert(record);
        let book = match side {
            Side::Buy => bids,
            Side::Sell => asks,
        };
        book.entry(price).or_default().push_back(arena, handle);
        orders.insert(encoded, handle);
    }

    fn remove_from_book(shard: &mut MarketShard, handle: OrderHandle) {
        let MarketShard {
            arena, bids, asks, ..
        } = shard;

        let (side, price) = {
            let record = arena.get(handle);
            (record.request.side, record.request.price)
        };
        let book = match side {
            Side::Buy => bids,
            Side::Sell => asks,
        };
        if let Some(level) = book.get_mut(&price) {
            level.unlink(arena, handle);
            if level.is_empty() {
                book.remove(&price);
            }
        }
        arena.remove(handle);
    }
}

#[cfg(test)]
impl MatchingEngine {
    /// Walk every level and cross-check the book invariants:
    /// totals equal member sums, FIFO sequence is ascending, and the
    /// order map and levels reference each other exactly.
    pub(crate) fn check_invariants(&self, market: MarketId) {
        let shard = self.markets.get(&market).expect("market exists");
        let mut seen = 0usize;

        for (book, side) in [(&shard.bids, Side::Buy), (&shard.asks, Side::Sell)] {
            for (&price, level) in book.iter() {
                assert!(!level.is_empty(), "empty level {price} left in book");
                let mut total = 0i64;
                let mut visible = 0i64;
                let mut last_seq = 0u64;
                let mut cursor = level.head;
                let mut prev = None;
                while let Some(handle) = cursor {
                    let record = shard.arena.get(handle);
                    assert_eq!(record.request.side, side);
                    assert_eq!(record.request.price, price);
                    assert!(record.remaining > 0);
                    assert!(record.display_remaining <= record.remaining);
                    assert!(record.fifo_seq > last_seq, "FIFO order violated");
                    last_seq = record.fifo_seq;
                    assert_eq!(record.prev, prev);
                    assert_eq!(
                        shard.orders.get(&record.request.id.encode()),
                        Some(&handle),
                        "resting order missing from order map"
                    );
                    total += record.remaining;
                    visible += record.display_remaining;
                    seen += 1;
                    prev = cursor;
                    cursor = record.next;
                }
                assert_eq!(level.tail, prev);
                assert_eq!(level.total_qty, total);
                assert_eq!(level.visible_qty, visible);
            }
        }
        assert_eq!(shard.orders.len(), seen, "order map out of sync with levels");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{OrderId, SequenceId, SessionId};

    fn engine() -> MatchingEngine {
        let mut engine = MatchingEngine::new(MatcherConfig::default());
        engine.add_market(MarketId(1));
        engine
    }

    fn oid(local: u32) -> OrderId {
        OrderId::new(MarketId(1), SessionId(1), SequenceId(local))
    }

    fn order(local: u32, account: u64, side: Side, qty: i64, price: i64) -> OrderRequest {
        OrderRequest {
            id: oid(local),
            account: types::ids::AccountId(account),
            side,
            quantity: qty,
            price,
            ..OrderRequest::default()
        }
    }

    #[test]
    fn test_maker_rests_taker_crosses() {
        let mut engine = engine();

        let maker_res = engine.submit(&order(1, 1001, Side::Sell, 5, 1000));
        assert!(maker_res.accepted);
        assert!(maker_res.resting);
        assert!(maker_res.fills.is_empty());

        let taker_res = engine.submit(&OrderRequest {
            tif: TimeInForce::Ioc,
            ..order(2, 1002, Side::Buy, 3, 1100)
        });
        assert!(taker_res.accepted);
        assert!(!taker_res.resting);
        assert!(taker_res.fully_filled);
        assert_eq!(
            taker_res.fills,
            vec![FillEvent {
                maker_order: oid(1),
                taker_order: oid(2),
                quantity: 3,
                price: 1000,
            }]
        );
        engine.check_invariants(MarketId(1));

        let cancel_res = engine.cancel(&CancelRequest { id: oid(1) });
        assert!(cancel_res.cancelled);
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_invalid_quantity_rejected() {
        let mut engine = engine();
        let result = engine.submit(&order(1, 1, Side::Buy, 0, 1000));
        assert!(!result.accepted);
        assert_eq!(result.reject_code, reject::INVALID_QUANTITY);
    }

    #[test]
    fn test_no_cross_rests() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 5, 1010));
        let result = engine.submit(&order(2, 2, Side::Buy, 5, 1000));
        assert!(result.resting);
        assert!(result.fills.is_empty());
        assert_eq!(engine.best_bid(MarketId(1)), Some(1000));
        assert_eq!(engine.best_ask(MarketId(1)), Some(1010));
    }

    #[test]
    fn test_touching_prices_match() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 5, 1000));
        let result = engine.submit(&order(2, 2, Side::Buy, 5, 1000));
        assert!(result.fully_filled);
        assert_eq!(result.fills[0].price, 1000);
    }

    #[test]
    fn test_price_priority_across_levels() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 5, 1010));
        engine.submit(&order(2, 1, Side::Sell, 5, 1000));
        engine.submit(&order(3, 1, Side::Sell, 5, 1020));

        let result = engine.submit(&OrderRequest {
            tif: TimeInForce::Ioc,
            ..order(4, 2, Side::Buy, 12, 1020)
        });
        // Best price first, then monotonically worse
        assert_eq!(result.fills.len(), 3);
        assert_eq!(result.fills[0].price, 1000);
        assert_eq!(result.fills[1].price, 1010);
        assert_eq!(result.fills[2].price, 1020);
        assert_eq!(result.fills[2].quantity, 2);
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_fifo_within_level() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 5, 1000));
        engine.submit(&order(2, 2, Side::Sell, 5, 1000));

        let result = engine.submit(&OrderRequest {
            tif: TimeInForce::Ioc,
            ..order(3, 3, Side::Buy, 7, 1000)
        });
        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[0].maker_order, oid(1));
        assert_eq!(result.fills[0].quantity, 5);
        assert_eq!(result.fills[1].maker_order, oid(2));
        assert_eq!(result.fills[1].quantity, 2);
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_partial_fill_then_rest() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 3, 1000));
        let result = engine.submit(&order(2, 2, Side::Buy, 10, 1000));
        assert!(result.accepted);
        assert!(result.resting);
        assert!(!result.fully_filled);
        assert_eq!(result.fills.len(), 1);
        assert_eq!(engine.resting_order(MarketId(1), oid(2).encode()), Some((7, 7)));
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_ioc_remainder_dropped() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 3, 1000));
        let result = engine.submit(&OrderRequest {
            tif: TimeInForce::Ioc,
            ..order(2, 2, Side::Buy, 10, 1000)
        });
        assert!(result.accepted);
        assert!(!result.resting);
        assert!(!result.fully_filled);
        assert_eq!(engine.open_order_count(MarketId(1)), 0);
    }

    #[test]
    fn test_fok_insufficient_liquidity() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 3, 1000));
        let result = engine.submit(&OrderRequest {
            tif: TimeInForce::Fok,
            ..order(2, 2, Side::Buy, 10, 1000)
        });
        assert!(!result.accepted);
        assert_eq!(result.reject_code, reject::INSUFFICIENT_LIQUIDITY);
        // Book untouched by the reject
        assert_eq!(engine.resting_order(MarketId(1), oid(1).encode()), Some((3, 3)));
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_fok_sufficient_liquidity_fills() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 6, 1000));
        engine.submit(&order(2, 1, Side::Sell, 6, 1001));
        let result = engine.submit(&OrderRequest {
            tif: TimeInForce::Fok,
            ..order(3, 2, Side::Buy, 10, 1001)
        });
        assert!(result.accepted);
        assert!(result.fully_filled);
        assert_eq!(result.fills.len(), 2);
    }

    #[test]
    fn test_post_only_would_cross() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 5, 1000));
        let result = engine.submit(&OrderRequest {
            flags: flags::POST_ONLY,
            ..order(2, 2, Side::Buy, 5, 1000)
        });
        assert!(!result.accepted);
        assert_eq!(result.reject_code, reject::POST_ONLY_WOULD_CROSS);

        let result = engine.submit(&OrderRequest {
            flags: flags::POST_ONLY,
            ..order(3, 2, Side::Buy, 5, 999)
        });
        assert!(result.resting);
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_duplicate_order_id_leaves_book_unchanged() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 5, 1000));
        // Same id, would otherwise cross its own book
        let result = engine.submit(&order(1, 1, Side::Buy, 5, 1000));
        assert!(!result.accepted);
        assert_eq!(result.reject_code, reject::DUPLICATE_ORDER_ID);
        assert!(result.fills.is_empty());
        assert_eq!(engine.resting_order(MarketId(1), oid(1).encode()), Some((5, 5)));
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_cancel_unknown_order() {
        let mut engine = engine();
        let result = engine.cancel(&CancelRequest { id: oid(404) });
        assert!(!result.cancelled);
        assert_eq!(result.reject_code, reject::ORDER_NOT_FOUND);
    }

    #[test]
    fn test_cancel_unknown_market() {
        let mut engine = MatchingEngine::new(MatcherConfig::default());
        let result = engine.cancel(&CancelRequest { id: oid(1) });
        assert_eq!(result.reject_code, reject::UNKNOWN_MARKET);
    }

    #[test]
    fn test_hidden_matches_in_fifo_but_not_visible() {
        let mut engine = engine();
        engine.submit(&OrderRequest {
            flags: flags::HIDDEN,
            ..order(10, 2001, Side::Sell, 100, 1000)
        });
        engine.submit(&order(11, 2002, Side::Sell, 50, 1000));

        let depth = engine.book_depth(MarketId(1), Side::Sell, 8);
        assert_eq!(depth.len(), 1);
        assert_eq!(depth[0].total_qty, 150);
        assert_eq!(depth[0].visible_qty, 50);

        let result = engine.submit(&OrderRequest {
            tif: TimeInForce::Ioc,
            ..order(12, 2003, Side::Buy, 120, 1000)
        });
        assert_eq!(result.fills.len(), 2);
        assert_eq!(result.fills[0].maker_order, oid(10));
        assert_eq!(result.fills[0].quantity, 100);
        assert_eq!(result.fills[1].maker_order, oid(11));
        assert_eq!(result.fills[1].quantity, 20);
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_iceberg_validation() {
        let mut engine = engine();
        let result = engine.submit(&OrderRequest {
            flags: flags::ICEBERG,
            display_quantity: 0,
            ..order(30, 4001, Side::Sell, 100, 1000)
        });
        assert!(!result.accepted);
        assert_eq!(result.reject_code, reject::INVALID_QUANTITY);

        let result = engine.submit(&OrderRequest {
            flags: flags::ICEBERG,
            display_quantity: 150,
            ..order(31, 4002, Side::Sell, 100, 1000)
        });
        assert!(!result.accepted);
        assert_eq!(result.reject_code, reject::INVALID_QUANTITY);
    }

    #[test]
    fn test_iceberg_refresh_across_fills() {
        let mut engine = engine();
        engine.submit(&OrderRequest {
            flags: flags::ICEBERG,
            display_quantity: 25,
            ..order(20, 3001, Side::Sell, 100, 1000)
        });
        assert_eq!(
            engine.resting_order(MarketId(1), oid(20).encode()),
            Some((100, 25))
        );

        // 30 lots: full visible slice consumed and the next re-arms
        let r1 = engine.submit(&OrderRequest {
            tif: TimeInForce::Ioc,
            ..order(21, 3002, Side::Buy, 30, 1000)
        });
        assert_eq!(r1.fills.len(), 1);
        assert_eq!(r1.fills[0].quantity, 30);
        assert_eq!(
            engine.resting_order(MarketId(1), oid(20).encode()),
            Some((70, 25))
        );

        let r2 = engine.submit(&OrderRequest {
            tif: TimeInForce::Ioc,
            ..order(22, 3003, Side::Buy, 50, 1000)
        });
        assert_eq!(r2.fills[0].quantity, 50);
        assert_eq!(
            engine.resting_order(MarketId(1), oid(20).encode()),
            Some((20, 20))
        );

        let r3 = engine.submit(&OrderRequest {
            tif: TimeInForce::Ioc,
            ..order(23, 3004, Side::Buy, 30, 1000)
        });
        assert_eq!(r3.fills[0].quantity, 20);
        assert_eq!(engine.resting_order(MarketId(1), oid(20).encode()), None);
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_iceberg_keeps_fifo_position_after_refresh() {
        let mut engine = engine();
        engine.submit(&OrderRequest {
            flags: flags::ICEBERG,
            display_quantity: 10,
            ..order(1, 1, Side::Sell, 100, 1000)
        });
        engine.submit(&order(2, 2, Side::Sell, 50, 1000));

        // Consumes the iceberg's visible slice and more; the iceberg stays
        // at the level head and keeps filling before the later order.
        let result = engine.submit(&OrderRequest {
            tif: TimeInForce::Ioc,
            ..order(3, 3, Side::Buy, 60, 1000)
        });
        assert_eq!(result.fills.len(), 1);
        assert_eq!(result.fills[0].maker_order, oid(1));
        assert_eq!(result.fills[0].quantity, 60);
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_replace_preserves_account_and_side() {
        let mut engine = engine();
        engine.submit(&order(1, 1001, Side::Sell, 5, 1000));

        let result = engine.replace(&ReplaceRequest {
            id: oid(1),
            new_quantity: 8,
            new_price: 1005,
            new_tif: TimeInForce::Gtc,
            new_flags: flags::NONE,
        });
        assert!(result.accepted);
        assert!(result.resting);
        assert_eq!(engine.best_ask(MarketId(1)), Some(1005));
        assert_eq!(engine.resting_order(MarketId(1), oid(1).encode()), Some((8, 8)));
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_replace_loses_time_priority() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 5, 1000));
        engine.submit(&order(2, 2, Side::Sell, 5, 1000));

        engine.replace(&ReplaceRequest {
            id: oid(1),
            new_quantity: 5,
            new_price: 1000,
            new_tif: TimeInForce::Gtc,
            new_flags: flags::NONE,
        });

        let result = engine.submit(&OrderRequest {
            tif: TimeInForce::Ioc,
            ..order(3, 3, Side::Buy, 5, 1000)
        });
        // Order 2 is now ahead of the replaced order 1
        assert_eq!(result.fills[0].maker_order, oid(2));
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_replace_not_found() {
        let mut engine = engine();
        engine.add_market(MarketId(1));
        let result = engine.replace(&ReplaceRequest {
            id: oid(404),
            new_quantity: 5,
            new_price: 1000,
            new_tif: TimeInForce::Gtc,
            new_flags: flags::NONE,
        });
        assert!(!result.accepted);
        assert_eq!(result.reject_code, reject::ORDER_NOT_FOUND);
    }

    #[test]
    fn test_replace_reject_leaves_old_order() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 5, 1000));
        let result = engine.replace(&ReplaceRequest {
            id: oid(1),
            new_quantity: 0,
            new_price: 1000,
            new_tif: TimeInForce::Gtc,
            new_flags: flags::NONE,
        });
        assert!(!result.accepted);
        assert_eq!(result.reject_code, reject::INVALID_QUANTITY);
        assert_eq!(engine.resting_order(MarketId(1), oid(1).encode()), Some((5, 5)));
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_replace_can_cross() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 5, 1010));
        engine.submit(&order(2, 2, Side::Buy, 5, 1000));

        let result = engine.replace(&ReplaceRequest {
            id: oid(2),
            new_quantity: 5,
            new_price: 1010,
            new_tif: TimeInForce::Gtc,
            new_flags: flags::NONE,
        });
        assert!(result.accepted);
        assert!(!result.resting);
        assert_eq!(result.fills.len(), 1);
        assert_eq!(result.fills[0].price, 1010);
        assert_eq!(result.fills[0].maker_order, oid(1));
        engine.check_invariants(MarketId(1));
    }

    #[test]
    fn test_clear_market() {
        let mut engine = engine();
        engine.submit(&order(1, 1, Side::Sell, 5, 1000));
        engine.clear_market(MarketId(1));
        assert_eq!(engine.open_order_count(MarketId(1)), 0);
        assert_eq!(engine.best_ask(MarketId(1)), None);
    }
}
