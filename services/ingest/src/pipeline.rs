//! Ingress admission pipeline
//!
//! Runs on the transport thread. Each submitted frame passes through a
//! short state machine: heartbeat accounting, optional signature
//! verification, per-account rolling 1-second rate windows, then a copy
//! into the per-kind SPSC queue. The consumer half lives on the engine
//! thread. Rejections only bump counters; the client sees no ack.

use crate::frame::{Frame, FrameHeader, MessageKind, OwnedFrame};
use crate::spsc::{self, Consumer, Producer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;
use types::ids::{AccountId, TimestampNs};

const ONE_SECOND_NS: TimestampNs = 1_000_000_000;

/// Signature verifier callback; returns `true` when the frame is authentic.
pub type AuthVerifier = Box<dyn Fn(&FrameHeader, &[u8]) -> bool + Send + Sync>;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub new_order_queue_depth: usize,
    pub cancel_queue_depth: usize,
    pub replace_queue_depth: usize,
    pub max_new_orders_per_second: u32,
    pub max_cancels_per_second: u32,
    pub max_replaces_per_second: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            new_order_queue_depth: 4096,
            cancel_queue_depth: 4096,
            replace_queue_depth: 4096,
            max_new_orders_per_second: 10_000,
            max_cancels_per_second: 20_000,
            max_replaces_per_second: 20_000,
        }
    }
}

#[derive(Default)]
struct StatsInner {
    accepted: AtomicU64,
    dropped_heartbeats: AtomicU64,
    rejected_auth: AtomicU64,
    rejected_rate_limit: AtomicU64,
    rejected_queue_full: AtomicU64,
}

/// Monotonic pipeline counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub accepted: u64,
    pub dropped_heartbeats: u64,
    pub rejected_auth: u64,
    pub rejected_rate_limit: u64,
    pub rejected_queue_full: u64,
}

#[derive(Default, Clone, Copy)]
struct AccountWindow {
    window_start: TimestampNs,
    new_orders: u32,
    cancels: u32,
    replaces: u32,
}

/// Producer half: lives on the transport thread.
pub struct IngressPipeline {
    config: PipelineConfig,
    verifier: Option<AuthVerifier>,
    rate_windows: HashMap<AccountId, AccountWindow>,
    new_orders: Producer<OwnedFrame>,
    cancels: Producer<OwnedFrame>,
    replaces: Producer<OwnedFrame>,
    stats: Arc<StatsInner>,
}

/// Consumer half: lives on the engine thread.
pub struct IngressReceiver {
    new_orders: Consumer<OwnedFrame>,
    cancels: Consumer<OwnedFrame>,
    replaces: Consumer<OwnedFrame>,
    stats: Arc<StatsInner>,
}

impl IngressPipeline {
    /// Build the pipeline, returning the producer and consumer halves.
    pub fn new(config: PipelineConfig, verifier: Option<AuthVerifier>) -> (Self, IngressReceiver) {
        let (new_tx, new_rx) = spsc::channel(config.new_order_queue_depth.next_power_of_two());
        let (cancel_tx, cancel_rx) = spsc::channel(config.cancel_queue_depth.next_power_of_two());
        let (replace_tx, replace_rx) = spsc::channel(config.replace_queue_depth.next_power_of_two());
        let stats = Arc::new(StatsInner::default());

        let pipeline = Self {
            config,
            verifier,
            rate_windows: HashMap::new(),
            new_orders: new_tx,
            cancels: cancel_tx,
            replaces: replace_tx,
            stats: Arc::clone(&stats),
        };
        let receiver = IngressReceiver {
            new_orders: new_rx,
            cancels: cancel_rx,
            replaces: replace_rx,
            stats,
        };
        (pipeline, receiver)
    }

    /// Admit one frame. Returns `true` if it was accepted (heartbeats are
    /// observed and counted as success without being forwarded).
    pub fn submit(&mut self, frame: Frame<'_>) -> bool {
        if frame.header.kind == MessageKind::Heartbeat {
            self.stats.dropped_heartbeats.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        if let Some(verifier) = &self.verifier {
            if !verifier(&frame.header, frame.payload) {
                self.stats.rejected_auth.fetch_add(1, Ordering::Relaxed);
                trace!(account = %frame.header.account, "frame failed auth");
                return false;
            }
        }

        let window = self
            .rate_windows
            .entry(frame.header.account)
            .or_default();
        if Self::rate_limited(window, &self.config, frame.header.kind, frame.header.received_time_ns)
        {
            self.stats.rejected_rate_limit.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let owned = frame.to_owned();
        let pushed = match frame.header.kind {
            MessageKind::NewOrder => self.new_orders.push(owned).is_ok(),
            MessageKind::Cancel => self.cancels.push(owned).is_ok(),
            MessageKind::Replace => self.replaces.push(owned).is_ok(),
            MessageKind::Heartbeat => unreachable!("handled above"),
        };

        if !pushed {
            self.stats.rejected_queue_full.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.stats.accepted.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn stats(&self) -> PipelineStats {
        snapshot_stats(&self.stats)
    }

    pub fn reset_stats(&self) {
        self.stats.accepted.store(0, Ordering::Relaxed);
        self.stats.dropped_heartbeats.store(0, Ordering::Relaxed);
        self.stats.rejected_auth.store(0, Ordering::Relaxed);
        self.stats.rejected_rate_limit.store(0, Ordering::Relaxed);
        self.stats.rejected_queue_full.store(0, Ordering::Relaxed);
    }

    /// Returns `true` when the frame exceeds its per-kind cap. The window
    /// rolls from `received_time_ns`, not wall-clock.
    fn rate_limited(
        window: &mut AccountWindow,
        config: &PipelineConfig,
        kind: MessageKind,
        timestamp: TimestampNs,
    ) -> bool {
        if timestamp - window.window_start >= ONE_SECOND_NS {
            window.window_start = timestamp;
            window.new_orders = 0;
            window.cancels = 0;
            window.replaces = 0;
        }

        match kind {
            MessageKind::NewOrder => {
                if window.new_orders >= config.max_new_orders_per_second {
                    return true;
                }
                window.new_orders += 1;
            }
            MessageKind::Cancel => {
                if window.cancels >= config.max_cancels_per_second {
                    return true;
                }
                window.cancels += 1;
            }
            MessageKind::Replace => {
                if window.replaces >= config.max_replaces_per_second {
                    return true;
                }
                window.replaces += 1;
            }
            MessageKind::Heartbeat => {}
        }

        false
    }
}

impl IngressReceiver {
    pub fn next_new_order(&mut self) -> Option<OwnedFrame> {
        self.new_orders.pop()
    }

    pub fn next_cancel(&mut self) -> Option<OwnedFrame> {
        self.cancels.pop()
    }

    pub fn next_replace(&mut self) -> Option<OwnedFrame> {
        self.replaces.pop()
    }

    pub fn is_empty(&self) -> bool {
        self.new_orders.is_empty() && self.cancels.is_empty() && self.replaces.is_empty()
    }

    pub fn stats(&self) -> PipelineStats {
        snapshot_stats(&self.stats)
    }
}

fn snapshot_stats(stats: &StatsInner) -> PipelineStats {
    PipelineStats {
        accepted: stats.accepted.load(Ordering::Relaxed),
        dropped_heartbeats: stats.dropped_heartbeats.load(Ordering::Relaxed),
        rejected_auth: stats.rejected_auth.load(Ordering::Relaxed),
        rejected_rate_limit: stats.rejected_rate_limit.load(Ordering::Relaxed),
        rejected_queue_full: stats.rejected_queue_full.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use types::order::Side;

    fn frame(kind: MessageKind, account: u64, nonce: u64, ts: i64, payload: &[u8]) -> OwnedFrame {
        OwnedFrame {
            header: FrameHeader {
                account: AccountId(account),
                nonce,
                received_time_ns: ts,
                priority: 0,
                kind,
            },
            payload: payload.to_vec(),
        }
    }

    fn submit(pipeline: &mut IngressPipeline, owned: &OwnedFrame) -> bool {
        pipeline.submit(Frame {
            header: owned.header,
            payload: &owned.payload,
        })
    }

    fn new_order_payload() -> Vec<u8> {
        codec::encode_new_order(&codec::NewOrder {
            side: Side::Buy,
            quantity: 5,
            price: 1_000,
            flags: 0,
        })
    }

    #[test]
    fn test_new_order_queued_and_decoded() {
        let (mut pipeline, mut receiver) = IngressPipeline::new(PipelineConfig::default(), None);
        let payload = new_order_payload();
        assert!(submit(
            &mut pipeline,
            &frame(MessageKind::NewOrder, 9, 1, 0, &payload)
        ));

        let dequeued = receiver.next_new_order().unwrap();
        let decoded = codec::decode_new_order(&dequeued.payload).unwrap();
        assert_eq!(decoded.quantity, 5);
        assert_eq!(receiver.stats().accepted, 1);
    }

    #[test]
    fn test_cancel_routed_to_cancel_queue() {
        let (mut pipeline, mut receiver) = IngressPipeline::new(PipelineConfig::default(), None);
        let payload = codec::encode_cancel(&codec::Cancel { order_id: 42 });
        assert!(submit(
            &mut pipeline,
            &frame(MessageKind::Cancel, 9, 2, 0, &payload)
        ));

        assert!(receiver.next_new_order().is_none());
        let dequeued = receiver.next_cancel().unwrap();
        assert_eq!(codec::decode_cancel(&dequeued.payload).unwrap().order_id, 42);
    }

    #[test]
    fn test_heartbeat_observed_not_forwarded() {
        let (mut pipeline, mut receiver) = IngressPipeline::new(PipelineConfig::default(), None);
        assert!(submit(&mut pipeline, &frame(MessageKind::Heartbeat, 9, 3, 0, &[])));
        assert_eq!(pipeline.stats().dropped_heartbeats, 1);
        assert_eq!(pipeline.stats().accepted, 0);
        assert!(receiver.is_empty());
    }

    #[test]
    fn test_rate_limit_third_order_in_window() {
        let config = PipelineConfig {
            max_new_orders_per_second: 2,
            ..PipelineConfig::default()
        };
        let (mut pipeline, _receiver) = IngressPipeline::new(config, None);
        let payload = new_order_payload();

        assert!(submit(&mut pipeline, &frame(MessageKind::NewOrder, 9, 1, 0, &payload)));
        assert!(submit(&mut pipeline, &frame(MessageKind::NewOrder, 9, 2, 0, &payload)));
        assert!(!submit(&mut pipeline, &frame(MessageKind::NewOrder, 9, 3, 0, &payload)));
        assert_eq!(pipeline.stats().rejected_rate_limit, 1);
        assert_eq!(pipeline.stats().accepted, 2);
    }

    #[test]
    fn test_rate_window_rolls_after_one_second() {
        let config = PipelineConfig {
            max_new_orders_per_second: 1,
            ..PipelineConfig::default()
        };
        let (mut pipeline, _receiver) = IngressPipeline::new(config, None);
        let payload = new_order_payload();

        assert!(submit(&mut pipeline, &frame(MessageKind::NewOrder, 9, 1, 0, &payload)));
        assert!(!submit(&mut pipeline, &frame(MessageKind::NewOrder, 9, 2, 999_999_999, &payload)));
        // Window boundary: counters reset exactly once
        assert!(submit(&mut pipeline, &frame(MessageKind::NewOrder, 9, 3, ONE_SECOND_NS, &payload)));
        assert!(!submit(&mut pipeline, &frame(MessageKind::NewOrder, 9, 4, ONE_SECOND_NS + 1, &payload)));
    }

    #[test]
    fn test_rate_windows_are_per_account() {
        let config = PipelineConfig {
            max_new_orders_per_second: 1,
            ..PipelineConfig::default()
        };
        let (mut pipeline, _receiver) = IngressPipeline::new(config, None);
        let payload = new_order_payload();

        assert!(submit(&mut pipeline, &frame(MessageKind::NewOrder, 9, 1, 0, &payload)));
        assert!(submit(&mut pipeline, &frame(MessageKind::NewOrder, 10, 1, 0, &payload)));
        assert!(!submit(&mut pipeline, &frame(MessageKind::NewOrder, 9, 2, 0, &payload)));
    }

    #[test]
    fn test_auth_verifier_rejects() {
        let verifier: AuthVerifier = Box::new(|header, _payload| header.account == AccountId(1));
        let (mut pipeline, _receiver) =
            IngressPipeline::new(PipelineConfig::default(), Some(verifier));
        let payload = new_order_payload();

        assert!(submit(&mut pipeline, &frame(MessageKind::NewOrder, 1, 1, 0, &payload)));
        assert!(!submit(&mut pipeline, &frame(MessageKind::NewOrder, 2, 1, 0, &payload)));
        assert_eq!(pipeline.stats().rejected_auth, 1);
    }

    #[test]
    fn test_queue_full_rejects() {
        let config = PipelineConfig {
            cancel_queue_depth: 2, // ring holds depth-1 frames
            max_cancels_per_second: 100,
            ..PipelineConfig::default()
        };
        let (mut pipeline, _receiver) = IngressPipeline::new(config, None);
        let payload = codec::encode_cancel(&codec::Cancel { order_id: 1 });

        assert!(submit(&mut pipeline, &frame(MessageKind::Cancel, 9, 1, 0, &payload)));
        assert!(!submit(&mut pipeline, &frame(MessageKind::Cancel, 9, 2, 0, &payload)));
        assert_eq!(pipeline.stats().rejected_queue_full, 1);
    }

    #[test]
    fn test_stats_reset() {
        let (mut pipeline, _receiver) = IngressPipeline::new(PipelineConfig::default(), None);
        let payload = new_order_payload();
        submit(&mut pipeline, &frame(MessageKind::NewOrder, 9, 1, 0, &payload));
        assert_eq!(pipeline.stats().accepted, 1);
        pipeline.reset_stats();
        assert_eq!(pipeline.stats(), PipelineStats::default());
    }
}
