//! Book interior: arena-backed order records and FIFO price levels
//!
//! All resting `OrderRecord`s live in a per-shard arena and are addressed
//! by stable `OrderHandle` indices, so price levels can keep doubly-linked
//! FIFO chains without shared ownership. Clearing a market resets the
//! arena in one step.

use crate::events::OrderRequest;
use std::collections::{BTreeMap, HashMap};
use types::order::{flags, has_flag};

/// Stable index into a shard's arena.
pub type OrderHandle = u32;

#[derive(Debug)]
pub struct OrderRecord {
    pub request: OrderRequest,
    pub remaining: i64,
    /// Visible remainder per the display policy.
    pub display_remaining: i64,
    /// Iceberg slice size (0 for non-iceberg orders).
    pub display_size: i64,
    pub prev: Option<OrderHandle>,
    pub next: Option<OrderHandle>,
    pub fifo_seq: u64,
}

impl OrderRecord {
    pub fn new(request: OrderRequest, fifo_seq: u64) -> Self {
        let display_size = if has_flag(request.flags, flags::ICEBERG) {
            request.display_quantity
        } else {
            0
        };
        let mut record = Self {
            request,
            remaining: request.quantity,
            display_remaining: 0,
            display_size,
            prev: None,
            next: None,
            fifo_seq,
        };
        record.refresh_display();
        record
    }

    /// Recompute `display_remaining` from the display policy:
    /// hidden → 0, iceberg → `min(display_size, remaining)`, else `remaining`.
    pub fn refresh_display(&mut self) {
        self.display_remaining = if has_flag(self.request.flags, flags::HIDDEN) {
            0
        } else if has_flag(self.request.flags, flags::ICEBERG) {
            self.display_size.min(self.remaining)
        } else {
            self.remaining
        };
    }
}

/// Slab arena holding order records with a free list.
pub struct Arena {
    slots: Vec<Option<OrderRecord>>,
    free: Vec<OrderHandle>,
    len: usize,
}

impl Arena {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, record: OrderRecord) -> OrderHandle {
        self.len += 1;
        if let Some(handle) = self.free.pop() {
            self.slots[handle as usize] = Some(record);
            handle
        } else {
            self.slots.push(Some(record));
            (self.slots.len() - 1) as OrderHandle
        }
    }

    pub fn remove(&mut self, handle: OrderHandle) -> OrderRecord {
        let record = self.slots[handle as usize]
            .take()
            .expect("arena slot already vacant");
        self.free.push(handle);
        self.len -= 1;
        record
    }

    pub fn get(&self, handle: OrderHandle) -> &OrderRecord {
        self.slots[handle as usize]
            .as_ref()
            .expect("arena slot vacant")
    }

    pub fn get_mut(&mut self, handle: OrderHandle) -> &mut OrderRecord {
        self.slots[handle as usize]
            .as_mut()
            .expect("arena slot vacant")
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.len = 0;
    }
}

/// One price level: doubly-linked FIFO queue plus quantity totals.
#[derive(Debug, Default)]
pub struct PriceLevel {
    pub head: Option<OrderHandle>,
    pub tail: Option<OrderHandle>,
    /// Sum of member `remaining`.
    pub total_qty: i64,
    /// Sum of member `display_remaining`.
    pub visible_qty: i64,
}

impl PriceLevel {
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Append a record at the tail, keeping totals in sync.
    pub fn push_back(&mut self, arena: &mut Arena, handle: OrderHandle) {
        let old_tail = self.tail;
        {
            let record = arena.get_mut(handle);
            record.prev = old_tail;
            record.next = None;
            self.total_qty += record.remaining;
            self.visible_qty += record.display_remaining;
        }
        match old_tail {
            Some(tail) => arena.get_mut(tail).next = Some(handle),
            None => self.head = Some(handle),
        }
        self.tail = Some(handle);
    }

    /// Unlink a record, keeping totals in sync.
    pub fn unlink(&mut self, arena: &mut Arena, handle: OrderHandle) {
        let (prev, next, remaining, display_remaining) = {
            let record = arena.get(handle);
            (
                record.prev,
                record.next,
                record.remaining,
                record.display_remaining,
            )
        };
        self.total_qty -= remaining;
        self.visible_qty -= display_remaining;

        match prev {
            Some(p) => arena.get_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => arena.get_mut(n).prev = prev,
            None => self.tail = prev,
        }

        let record = arena.get_mut(handle);
        record.prev = None;
        record.next = None;
    }
}

/// Per-market book state.
pub struct MarketShard {
    pub arena: Arena,
    /// Encoded `OrderId` → arena handle, resting orders only.
    pub orders: HashMap<u64, OrderHandle>,
    /// Bid levels; best bid is the highest key.
    pub bids: BTreeMap<i64, PriceLevel>,
    /// Ask levels; best ask is the lowest key.
    pub asks: BTreeMap<i64, PriceLevel>,
    pub next_sequence: u64,
}

impl MarketShard {
    pub fn new(arena_capacity: usize) -> Self {
        Self {
            arena: Arena::with_capacity(arena_capacity),
            orders: HashMap::new(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            next_sequence: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::ids::{MarketId, OrderId, SequenceId, SessionId};
    use types::order::Side;

    fn request(qty: i64, flags: u16, display: i64) -> OrderRequest {
        OrderRequest {
            id: OrderId::new(MarketId(1), SessionId(1), SequenceId(1)),
            side: Side::Sell,
            quantity: qty,
            price: 100,
            display_quantity: display,
            flags,
            ..OrderRequest::default()
        }
    }

    #[test]
    fn test_display_policy_plain() {
        let record = OrderRecord::new(request(10, flags::NONE, 0), 1);
        assert_eq!(record.display_remaining, 10);
    }

    #[test]
    fn test_display_policy_hidden() {
        let record = OrderRecord::new(request(10, flags::HIDDEN, 0), 1);
        assert_eq!(record.display_remaining, 0);
    }

    #[test]
    fn test_display_policy_iceberg() {
        let mut record = OrderRecord::new(request(100, flags::ICEBERG, 25), 1);
        assert_eq!(record.display_remaining, 25);
        record.remaining = 10;
        record.refresh_display();
        assert_eq!(record.display_remaining, 10);
    }

    #[test]
    fn test_level_fifo_linking() {
        let mut arena = Arena::with_capacity(16);
        let mut level = PriceLevel::default();

        let a = arena.insert(OrderRecord::new(request(5, flags::NONE, 0), 1));
        let b = arena.insert(OrderRecord::new(request(7, flags::NONE, 0), 2));
        let c = arena.insert(OrderRecord::new(request(3, flags::NONE, 0), 3));
        level.push_back(&mut arena, a);
        level.push_back(&mut arena, b);
        level.push_back(&mut arena, c);

        assert_eq!(level.head, Some(a));
        assert_eq!(level.tail, Some(c));
        assert_eq!(level.total_qty, 15);
        assert_eq!(level.visible_qty, 15);

        // Unlink the middle record; neighbours join up
        level.unlink(&mut arena, b);
        arena.remove(b);
        assert_eq!(arena.get(a).next, Some(c));
        assert_eq!(arena.get(c).prev, Some(a));
        assert_eq!(level.total_qty, 8);

        level.unlink(&mut arena, a);
        arena.remove(a);
        assert_eq!(level.head, Some(c));
        level.unlink(&mut arena, c);
        arena.remove(c);
        assert!(level.is_empty());
        assert_eq!(level.total_qty, 0);
        assert!(arena.is_empty());
    }

    #[test]
    fn test_arena_reuses_slots() {
        let mut arena = Arena::with_capacity(4);
        let a = arena.insert(OrderRecord::new(request(1, flags::NONE, 0), 1));
        arena.remove(a);
        let b = arena.insert(OrderRecord::new(request(2, flags::NONE, 0), 2));
        assert_eq!(a, b);
        assert_eq!(arena.len(), 1);
    }
}
