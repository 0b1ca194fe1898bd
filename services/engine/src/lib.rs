//! Event loop coordinator
//!
//! Single-threaded deterministic pipeline: drain ingress queues in kind
//! order, write the WAL envelope, gate through risk, match, apply fills,
//! publish to the outbound feed, snapshot on cadence.

pub mod coordinator;

pub use coordinator::{
    Coordinator, CoordinatorConfig, EngineError, EngineSnapshotState, RestingOrderContext,
};
