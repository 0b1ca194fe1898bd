//! Order ingress: transport framing, codecs, and the admission pipeline
//!
//! # Modules
//! - `spsc`: bounded single-producer/single-consumer ring
//! - `frame`: decoded frame types handed over by the transport
//! - `wire`: packed 36-byte datagram header codec
//! - `codec`: fixed-layout order message codec
//! - `transport`: datagram listener feeding the pipeline
//! - `pipeline`: auth, rate limiting, per-kind queues

pub mod codec;
pub mod frame;
pub mod pipeline;
pub mod spsc;
pub mod transport;
pub mod wire;

pub use frame::{Frame, FrameHeader, MessageKind, OwnedFrame};
pub use pipeline::{AuthVerifier, IngressPipeline, IngressReceiver, PipelineConfig};
pub use transport::{Transport, TransportStats, UdpTransport};
