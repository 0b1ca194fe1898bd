//! The deterministic event pipeline
//!
//! One turn drains new orders, then cancels, then replaces; that drain
//! order is the tie-break for frames sharing a `received_time_ns`. Every
//! frame gets exactly one WAL sequence before any state change, so the WAL
//! is the canonical total order: replaying it through an identically
//! configured coordinator reproduces the same state. Liquidation checks
//! run per frame, right after its fills, so live execution and replay
//! agree on when an account was closed out.
//!
//! Per-frame logical failures (bad payload, risk reject, matcher reject)
//! are logged and skipped. WAL or snapshot I/O failures abort the loop:
//! the engine must not keep accepting events once durability is broken.

use api::{ApiRouter, ExpressFeedFrame, TradeMetadata};
use funding::{apply_funding, FundingEngine, FundingPayment, FundingSnapshot, MarketFundingConfig};
use ingest::codec;
use ingest::frame::{FrameHeader, MessageKind, OwnedFrame};
use ingest::pipeline::IngressReceiver;
use ingest::wire;
use matcher::{FillEvent, MatcherConfig, MatchingEngine, OrderRequest};
use parking_lot::RwLock;
use persistence::replay::Driver;
use persistence::snapshot::{SnapshotError, Store};
use persistence::wal::{Record, WalError, Writer};
use risk::{FillContext, LiquidationExecutor, MarketRiskConfig, OrderIntent, RiskEngine};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use types::ids::{AccountId, MarketId, OrderId, SequenceId, SessionId, TimestampNs};
use types::order::{flags, has_flag, Side, TimeInForce};

/// Envelope prefix: kind u8, account u64, nonce u64, received_time_ns i64.
const ENVELOPE_PREFIX_SIZE: usize = 1 + 8 + 8 + 8;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Wal(#[from] WalError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Replay(#[from] persistence::ReplayError),

    #[error("snapshot state serialization failed: {0}")]
    SnapshotEncode(#[from] bincode::Error),
}

#[derive(Debug, Clone, Copy)]
pub struct CoordinatorConfig {
    /// Market new wire orders are routed to (the wire payload carries no
    /// market id; the order id derives it).
    pub default_market: MarketId,
    /// Applied events between snapshots.
    pub snapshot_interval: u64,
    /// Signed transport: payloads start with a 64-byte signature that the
    /// codec must skip. The WAL envelope keeps the raw payload either way.
    pub signed_payloads: bool,
    pub matcher: MatcherConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_market: MarketId(1),
            snapshot_interval: 256,
            signed_payloads: false,
            matcher: MatcherConfig::default(),
        }
    }
}

/// Engine state persisted on the snapshot cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshotState {
    pub chain_id: u64,
    pub block_number: u64,
}

/// Maker context for fill application, keyed by encoded order id.
#[derive(Debug, Clone, Copy)]
pub struct RestingOrderContext {
    pub account: AccountId,
    pub market: MarketId,
    pub side: Side,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    receiver: IngressReceiver,
    matching: MatchingEngine,
    risk: RiskEngine,
    funding: FundingEngine,
    liquidator: LiquidationExecutor,
    wal: Writer,
    snapshot: Store,
    api: Arc<ApiRouter>,
    resting_orders: Arc<RwLock<HashMap<u64, RestingOrderContext>>>,
    chain_id: Arc<AtomicU64>,
    block_number: Arc<AtomicU64>,
    last_snapshot_block: u64,
    markets: Vec<MarketId>,
}

impl Coordinator {
    pub fn new(
        config: CoordinatorConfig,
        receiver: IngressReceiver,
        wal: Writer,
        snapshot: Store,
        api: Arc<ApiRouter>,
    ) -> Self {
        let matching = MatchingEngine::new(config.matcher);
        Self {
            config,
            receiver,
            matching,
            risk: RiskEngine::new(),
            funding: FundingEngine::new(),
            liquidator: LiquidationExecutor::new(),
            wal,
            snapshot,
            api,
            resting_orders: Arc::new(RwLock::new(HashMap::new())),
            chain_id: Arc::new(AtomicU64::new(1)),
            block_number: Arc::new(AtomicU64::new(0)),
            last_snapshot_block: 0,
            markets: Vec::new(),
        }
    }

    /// Register one market across the matcher, risk, and funding engines.
    pub fn configure_market(
        &mut self,
        market: MarketId,
        risk_config: MarketRiskConfig,
        initial_mark_price: i64,
        funding_config: MarketFundingConfig,
    ) {
        self.matching.add_market(market);
        self.risk.configure_market(market, risk_config);
        self.risk.set_mark_price(market, initial_mark_price);
        self.funding.configure_market(market, funding_config);
        if !self.markets.contains(&market) {
            self.markets.push(market);
        }
    }

    pub fn risk(&self) -> &RiskEngine {
        &self.risk
    }

    pub fn risk_mut(&mut self) -> &mut RiskEngine {
        &mut self.risk
    }

    pub fn matching(&self) -> &MatchingEngine {
        &self.matching
    }

    pub fn api(&self) -> Arc<ApiRouter> {
        Arc::clone(&self.api)
    }

    pub fn resting_orders(&self) -> Arc<RwLock<HashMap<u64, RestingOrderContext>>> {
        Arc::clone(&self.resting_orders)
    }

    pub fn chain_id_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.chain_id)
    }

    pub fn block_number_handle(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.block_number)
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.chain_id.store(chain_id, Ordering::Relaxed);
    }

    pub fn wal_next_sequence(&self) -> u64 {
        self.wal.next_sequence()
    }

    // ── Recovery ────────────────────────────────────────────────────

    /// Rebuild engine state from the latest snapshot plus the WAL tail.
    /// Returns the number of replayed events.
    pub fn recover(&mut self, snapshot_dir: &Path, wal_path: &Path) -> Result<u64, EngineError> {
        let restored: Rc<RefCell<Option<EngineSnapshotState>>> = Rc::new(RefCell::new(None));
        let records: Rc<RefCell<Vec<Record>>> = Rc::new(RefCell::new(Vec::new()));

        let mut driver = Driver::new();
        driver.configure(snapshot_dir, wal_path);
        let restored_sink = Rc::clone(&restored);
        driver.set_snapshot_handler(Box::new(move |sequence, payload| {
            match bincode::deserialize::<EngineSnapshotState>(payload) {
                Ok(state) => *restored_sink.borrow_mut() = Some(state),
                Err(e) => warn!(sequence, error = %e, "unreadable snapshot state"),
            }
        }));
        let record_sink = Rc::clone(&records);
        driver.set_event_handler(Box::new(move |record| {
            record_sink.borrow_mut().push(record.clone());
        }));
        driver.execute()?;

        if let Some(state) = restored.borrow().as_ref() {
            self.chain_id.store(state.chain_id, Ordering::Relaxed);
            self.block_number.store(state.block_number, Ordering::Relaxed);
            self.last_snapshot_block = state.block_number;
        }

        let records = records.take();
        let applied = records.len() as u64;
        for record in &records {
            self.apply_envelope(record);
        }
        self.block_number.fetch_add(applied, Ordering::Relaxed);

        info!(
            applied,
            block_number = self.block_number.load(Ordering::Relaxed),
            "recovery complete"
        );
        Ok(applied)
    }

    /// Apply one WAL envelope during replay: same per-frame path as live
    /// processing, minus the WAL append.
    fn apply_envelope(&mut self, record: &Record) {
        let payload = &record.payload;
        if payload.len() < ENVELOPE_PREFIX_SIZE {
            warn!(sequence = record.header.sequence, "short WAL envelope");
            return;
        }

        let Some(kind) = MessageKind::from_u8(payload[0]) else {
            warn!(sequence = record.header.sequence, kind = payload[0], "unknown envelope kind");
            return;
        };
        let frame = OwnedFrame {
            header: FrameHeader {
                account: AccountId(u64::from_le_bytes(payload[1..9].try_into().unwrap())),
                nonce: u64::from_le_bytes(payload[9..17].try_into().unwrap()),
                received_time_ns: i64::from_le_bytes(payload[17..25].try_into().unwrap()),
                priority: 0,
                kind,
            },
            payload: payload[ENVELOPE_PREFIX_SIZE..].to_vec(),
        };
        let wal_offset = record.header.sequence;

        match kind {
            MessageKind::NewOrder => match codec::decode_new_order(self.business_payload(&frame.payload)) {
                Ok(order) => self.handle_new_order(&frame, order, wal_offset),
                Err(e) => warn!(error = %e, "failed to decode new order"),
            },
            MessageKind::Cancel => match codec::decode_cancel(self.business_payload(&frame.payload)) {
                Ok(cancel) => self.handle_cancel(cancel),
                Err(e) => warn!(error = %e, "failed to decode cancel"),
            },
            MessageKind::Replace => match codec::decode_replace(self.business_payload(&frame.payload)) {
                Ok(replace) => self.handle_replace(&frame, replace, wal_offset),
                Err(e) => warn!(error = %e, "failed to decode replace"),
            },
            MessageKind::Heartbeat => {}
        }
    }

    /// Strip the signature prefix on signed transport; the codec layouts
    /// start after it.
    fn business_payload<'a>(&self, payload: &'a [u8]) -> &'a [u8] {
        if self.config.signed_payloads {
            payload.get(wire::SIGNATURE_PREFIX_SIZE..).unwrap_or(&[])
        } else {
            payload
        }
    }

    // ── Funding ─────────────────────────────────────────────────────

    /// Update one market's funding view and propagate the clamped mark
    /// price into margin calculations.
    pub fn update_funding(
        &mut self,
        market: MarketId,
        index_price: i64,
        mid_price: i64,
        elapsed_seconds: i64,
    ) -> FundingSnapshot {
        let snapshot = self
            .funding
            .update_market(market, index_price, mid_price, elapsed_seconds);
        if snapshot.mark_price != 0 {
            self.risk.set_mark_price(market, snapshot.mark_price);
        }
        snapshot
    }

    /// Settle accrued funding for every configured market.
    pub fn settle_funding(&mut self) -> Vec<FundingPayment> {
        apply_funding(&mut self.risk, &mut self.funding, &self.markets)
    }

    // ── Event loop ──────────────────────────────────────────────────

    /// Run the cooperative loop until the shutdown flag flips. Frames
    /// already dequeued complete; queued frames are dropped unacknowledged.
    pub fn run(&mut self, shutdown: &AtomicBool, idle_sleep: Duration) -> Result<(), EngineError> {
        while !shutdown.load(Ordering::Relaxed) {
            let processed = self.run_turn()?;
            if processed == 0 {
                std::thread::sleep(idle_sleep);
            }
        }
        info!("shutdown requested, flushing WAL");
        self.wal.sync()?;
        Ok(())
    }

    /// One cooperative turn. Returns the number of frames applied.
    pub fn run_turn(&mut self) -> Result<u64, EngineError> {
        let mut processed = 0u64;
        processed += self.process_new_orders()?;
        processed += self.process_cancels()?;
        processed += self.process_replaces()?;

        if processed > 0 {
            let new_block = self.block_number.fetch_add(processed, Ordering::Relaxed) + processed;
            if new_block - self.last_snapshot_block >= self.config.snapshot_interval {
                self.persist_snapshot(new_block)?;
            }
        }

        Ok(processed)
    }

    /// Force flush + fsync (shutdown path, tests).
    pub fn sync(&mut self) -> Result<(), EngineError> {
        self.wal.sync()?;
        Ok(())
    }

    // ── Frame processing ────────────────────────────────────────────

    fn process_new_orders(&mut self) -> Result<u64, EngineError> {
        let mut processed = 0u64;
        while let Some(frame) = self.receiver.next_new_order() {
            processed += 1;
            let wal_offset = self.append_ingress_record(&frame)?;

            match codec::decode_new_order(self.business_payload(&frame.payload)) {
                Ok(order) => self.handle_new_order(&frame, order, wal_offset),
                Err(e) => warn!(error = %e, "failed to decode new order"),
            }
        }
        Ok(processed)
    }

    fn process_cancels(&mut self) -> Result<u64, EngineError> {
        let mut processed = 0u64;
        while let Some(frame) = self.receiver.next_cancel() {
            processed += 1;
            self.append_ingress_record(&frame)?;

            match codec::decode_cancel(self.business_payload(&frame.payload)) {
                Ok(cancel) => self.handle_cancel(cancel),
                Err(e) => warn!(error = %e, "failed to decode cancel"),
            }
        }
        Ok(processed)
    }

    fn process_replaces(&mut self) -> Result<u64, EngineError> {
        let mut processed = 0u64;
        while let Some(frame) = self.receiver.next_replace() {
            processed += 1;
            let wal_offset = self.append_ingress_record(&frame)?;

            match codec::decode_replace(self.business_payload(&frame.payload)) {
                Ok(replace) => self.handle_replace(&frame, replace, wal_offset),
                Err(e) => warn!(error = %e, "failed to decode replace"),
            }
        }
        Ok(processed)
    }

    fn handle_new_order(&mut self, frame: &OwnedFrame, order: codec::NewOrder, wal_offset: u64) {
        let market = self.config.default_market;
        let order_id = OrderId::new(
            market,
            SessionId((frame.header.account.0 & 0xffff) as u16),
            SequenceId((frame.header.nonce & 0xffff_ffff) as u32),
        );

        let risk_result = self.risk.evaluate_order(&OrderIntent {
            account: frame.header.account,
            market,
            side: order.side,
            quantity: order.quantity,
            limit_price: order.price,
            reduce_only: has_flag(order.flags, flags::REDUCE_ONLY),
        });
        if risk_result.decision != risk::Decision::Accepted {
            debug!(
                account = %frame.header.account,
                code = risk_result.reject_code,
                "order rejected by risk"
            );
            return;
        }

        let result = self.matching.submit(&OrderRequest {
            id: order_id,
            account: frame.header.account,
            side: order.side,
            quantity: order.quantity,
            price: order.price,
            display_quantity: 0,
            tif: TimeInForce::Gtc,
            flags: order.flags,
        });
        if !result.accepted {
            debug!(
                account = %frame.header.account,
                code = result.reject_code,
                "order rejected by matcher"
            );
            return;
        }

        let taker = RestingOrderContext {
            account: frame.header.account,
            market,
            side: order.side,
        };
        let touched = self.process_fills(
            &result.fills,
            taker,
            wal_offset,
            frame.header.received_time_ns,
        );

        {
            let mut table = self.resting_orders.write();
            if result.resting {
                table.insert(order_id.encode(), taker);
            } else {
                table.remove(&order_id.encode());
            }
        }

        self.sweep_liquidations(touched);
    }

    fn handle_cancel(&mut self, cancel: codec::Cancel) {
        let order_id = OrderId::decode(cancel.order_id);
        let result = self.matching.cancel(&matcher::CancelRequest { id: order_id });
        if result.cancelled {
            self.resting_orders.write().remove(&cancel.order_id);
        } else {
            debug!(code = result.reject_code, "cancel rejected");
        }
    }

    fn handle_replace(&mut self, frame: &OwnedFrame, replace: codec::Replace, wal_offset: u64) {
        let order_id = OrderId::decode(replace.order_id);

        let taker = self
            .resting_orders
            .read()
            .get(&replace.order_id)
            .copied()
            .unwrap_or(RestingOrderContext {
                account: frame.header.account,
                market: order_id.market,
                side: Side::Buy,
            });

        let result = self.matching.replace(&matcher::ReplaceRequest {
            id: order_id,
            new_quantity: replace.new_quantity,
            new_price: replace.new_price,
            new_tif: TimeInForce::Gtc,
            new_flags: replace.new_flags,
        });
        if !result.accepted {
            debug!(code = result.reject_code, "replace rejected");
            return;
        }

        let touched = self.process_fills(
            &result.fills,
            taker,
            wal_offset,
            frame.header.received_time_ns,
        );

        {
            let mut table = self.resting_orders.write();
            if result.resting {
                table.insert(replace.order_id, taker);
            } else {
                table.remove(&replace.order_id);
            }
        }

        self.sweep_liquidations(touched);
    }

    /// Apply fills to the taker and, via the side table, each maker; feed
    /// trade metadata keyed by the taker frame's WAL offset. Returns the
    /// accounts whose margin the fills affected.
    fn process_fills(
        &mut self,
        fills: &[FillEvent],
        taker: RestingOrderContext,
        wal_offset: u64,
        timestamp_ns: TimestampNs,
    ) -> Vec<AccountId> {
        let mut touched = Vec::new();
        for fill in fills {
            self.risk.apply_fill(&FillContext {
                account: taker.account,
                market: taker.market,
                side: taker.side,
                quantity: fill.quantity,
                price: fill.price,
            });
            touched.push(taker.account);

            self.apply_maker_fill(fill, &mut touched);

            self.api.push_trade_metadata(TradeMetadata {
                wal_offset,
                order_id: fill.taker_order,
                account: taker.account,
                market: taker.market,
                price: fill.price,
                quantity: fill.quantity,
                timestamp_ns,
            });
        }
        touched
    }

    /// Maker leg of one fill, looked up in the side table. Fully-filled
    /// makers leave the book, so their context is dropped.
    fn apply_maker_fill(&mut self, fill: &FillEvent, touched: &mut Vec<AccountId>) {
        let maker_key = fill.maker_order.encode();
        let maker = self.resting_orders.read().get(&maker_key).copied();
        let Some(maker) = maker else {
            return;
        };

        self.risk.apply_fill(&FillContext {
            account: maker.account,
            market: maker.market,
            side: maker.side,
            quantity: fill.quantity,
            price: fill.price,
        });
        touched.push(maker.account);

        if self.matching.resting_order(maker.market, maker_key).is_none() {
            self.resting_orders.write().remove(&maker_key);
        }
    }

    // ── Liquidation ─────────────────────────────────────────────────

    /// Timer entry point: margin-check every known account. Mark-price
    /// moves can sink accounts that no fill touches.
    pub fn sweep_all_liquidations(&mut self) {
        let accounts = self.risk.account_ids();
        self.liquidate(accounts);
    }

    fn sweep_liquidations(&mut self, touched: Vec<AccountId>) {
        if touched.is_empty() {
            return;
        }
        self.liquidate(touched);
    }

    /// Maker legs of liquidation fills go through the same side-table path
    /// as normal fills.
    fn liquidate(&mut self, mut accounts: Vec<AccountId>) {
        accounts.sort_unstable();
        accounts.dedup();

        let orders =
            self.liquidator
                .check_and_liquidate(&mut self.risk, &mut self.matching, &accounts);

        for order in &orders {
            for fill in &order.fills {
                let mut touched = Vec::new();
                self.apply_maker_fill(fill, &mut touched);
            }
        }
    }

    // ── Persistence ─────────────────────────────────────────────────

    /// Envelope: `kind u8, account u64, nonce u64, received_time_ns i64,
    /// payload`. Exactly one WAL sequence per frame.
    fn append_ingress_record(&mut self, frame: &OwnedFrame) -> Result<u64, EngineError> {
        let mut payload = Vec::with_capacity(ENVELOPE_PREFIX_SIZE + frame.payload.len());
        payload.push(frame.header.kind as u8);
        payload.extend_from_slice(&frame.header.account.0.to_le_bytes());
        payload.extend_from_slice(&frame.header.nonce.to_le_bytes());
        payload.extend_from_slice(&frame.header.received_time_ns.to_le_bytes());
        payload.extend_from_slice(&frame.payload);

        let wal_offset = self.wal.append(&payload)?;
        self.api.push_express_feed_frame(ExpressFeedFrame {
            wal_offset,
            payload: frame.payload.clone(),
        });
        Ok(wal_offset)
    }

    fn persist_snapshot(&mut self, block_number: u64) -> Result<(), EngineError> {
        let state = EngineSnapshotState {
            chain_id: self.chain_id.load(Ordering::Relaxed),
            block_number,
        };
        let payload = bincode::serialize(&state)?;
        self.snapshot.persist(block_number, &payload)?;
        self.last_snapshot_block = block_number;
        debug!(block_number, "snapshot persisted");
        Ok(())
    }
}
