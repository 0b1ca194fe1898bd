//! Outbound API surface: feed buffers, endpoint registry, RPC results
//!
//! The router is the only engine structure read by non-engine threads
//! besides the resting-order table; every access goes through a
//! reader-writer lock. Feed buffers are bounded FIFO deques keyed by
//! `wal_offset`, evicting the oldest entries on overflow.

use parking_lot::RwLock;
use serde_json::json;
use std::collections::{HashSet, VecDeque};
use types::ids::{AccountId, MarketId, OrderId, TimestampNs};

pub const DEFAULT_BUFFER_CAPACITY: usize = 4096;

/// Raw frame payload as ordered by the WAL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpressFeedFrame {
    pub wal_offset: u64,
    pub payload: Vec<u8>,
}

/// Per-fill metadata for the trade feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TradeMetadata {
    pub wal_offset: u64,
    pub order_id: OrderId,
    pub account: AccountId,
    pub market: MarketId,
    pub price: i64,
    pub quantity: i64,
    pub timestamp_ns: TimestampNs,
}

#[derive(Debug, Clone, Copy)]
pub struct NodeStatus {
    pub chain_id: u64,
    pub block_number: u64,
    pub peer_connections: u64,
    pub healthy: bool,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            chain_id: 1,
            block_number: 0,
            peer_connections: 0,
            healthy: true,
        }
    }
}

/// Callbacks that surface live node state to the RPC methods.
#[derive(Default)]
pub struct NodeStateProvider {
    pub chain_id: Option<Box<dyn Fn() -> u64 + Send + Sync>>,
    pub block_number: Option<Box<dyn Fn() -> u64 + Send + Sync>>,
    pub peer_connections: Option<Box<dyn Fn() -> u64 + Send + Sync>>,
    pub healthy: Option<Box<dyn Fn() -> bool + Send + Sync>>,
}

#[derive(Default)]
struct Inner {
    endpoints: HashSet<String>,
    express_feed_frames: VecDeque<ExpressFeedFrame>,
    trade_metadata: VecDeque<TradeMetadata>,
    node_state_provider: NodeStateProvider,
}

pub struct ApiRouter {
    inner: RwLock<Inner>,
    express_feed_capacity: usize,
    trade_metadata_capacity: usize,
}

impl Default for ApiRouter {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_CAPACITY, DEFAULT_BUFFER_CAPACITY)
    }
}

impl ApiRouter {
    pub fn new(express_feed_capacity: usize, trade_metadata_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            express_feed_capacity: express_feed_capacity.max(1),
            trade_metadata_capacity: trade_metadata_capacity.max(1),
        }
    }

    // ── Endpoints ───────────────────────────────────────────────────

    pub fn register_endpoint(&self, name: impl Into<String>) {
        let name = name.into();
        if name.is_empty() {
            return;
        }
        self.inner.write().endpoints.insert(name);
    }

    pub fn has_endpoint(&self, name: &str) -> bool {
        self.inner.read().endpoints.contains(name)
    }

    pub fn endpoint_count(&self) -> usize {
        self.inner.read().endpoints.len()
    }

    // ── Node state / RPC ────────────────────────────────────────────

    pub fn set_node_state_provider(&self, provider: NodeStateProvider) {
        self.inner.write().node_state_provider = provider;
    }

    pub fn node_status(&self) -> NodeStatus {
        let inner = self.inner.read();
        let provider = &inner.node_state_provider;
        let mut status = NodeStatus::default();
        if let Some(chain_id) = &provider.chain_id {
            status.chain_id = chain_id();
        }
        if let Some(block_number) = &provider.block_number {
            status.block_number = block_number();
        }
        if let Some(peer_connections) = &provider.peer_connections {
            status.peer_connections = peer_connections();
        }
        if let Some(healthy) = &provider.healthy {
            status.healthy = healthy();
        }
        status
    }

    pub fn eth_chain_id(&self) -> String {
        to_hex(self.node_status().chain_id)
    }

    pub fn eth_block_number(&self) -> String {
        to_hex(self.node_status().block_number)
    }

    pub fn monmouth_node_status(&self) -> String {
        let status = self.node_status();
        json!({
            "healthy": status.healthy,
            "chainId": to_hex(status.chain_id),
            "blockNumber": to_hex(status.block_number),
            "peerConnections": status.peer_connections,
        })
        .to_string()
    }

    pub fn rpc_result(&self, method: &str) -> String {
        match method {
            "eth_chainId" => self.eth_chain_id(),
            "eth_blockNumber" => self.eth_block_number(),
            "monmouth_nodeStatus" => self.monmouth_node_status(),
            _ => json!({"error": "method not found"}).to_string(),
        }
    }

    // ── Feed buffers ────────────────────────────────────────────────

    pub fn push_express_feed_frame(&self, frame: ExpressFeedFrame) {
        let mut inner = self.inner.write();
        push_with_fifo_eviction(
            &mut inner.express_feed_frames,
            self.express_feed_capacity,
            frame,
        );
    }

    pub fn get_express_feed_frames(&self, min_wal_offset: u64) -> Vec<ExpressFeedFrame> {
        self.inner
            .read()
            .express_feed_frames
            .iter()
            .filter(|frame| frame.wal_offset >= min_wal_offset)
            .cloned()
            .collect()
    }

    pub fn express_feed_frame_count(&self) -> usize {
        self.inner.read().express_feed_frames.len()
    }

    pub fn push_trade_metadata(&self, metadata: TradeMetadata) {
        let mut inner = self.inner.write();
        push_with_fifo_eviction(
            &mut inner.trade_metadata,
            self.trade_metadata_capacity,
            metadata,
        );
    }

    pub fn get_trade_metadata(&self, min_wal_offset: u64) -> Vec<TradeMetadata> {
        self.inner
            .read()
            .trade_metadata
            .iter()
            .filter(|metadata| metadata.wal_offset >= min_wal_offset)
            .copied()
            .collect()
    }

    pub fn trade_metadata_count(&self) -> usize {
        self.inner.read().trade_metadata.len()
    }
}

fn to_hex(value: u64) -> String {
    format!("{value:#x}")
}

fn push_with_fifo_eviction<T>(buffer: &mut VecDeque<T>, max_size: usize, value: T) {
    while buffer.len() >= max_size {
        buffer.pop_front();
    }
    buffer.push_back(value);
}
