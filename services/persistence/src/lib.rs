//! Durability: write-ahead log, snapshot store, replay driver
//!
//! # Modules
//! - `checksum`: FNV-1a 32-bit payload checksums
//! - `wal`: framed append-only event log with crash recovery
//! - `snapshot`: append-only snapshot records with compaction
//! - `replay`: snapshot load + WAL forward-apply

pub mod checksum;
pub mod replay;
pub mod snapshot;
pub mod wal;

pub use replay::{Driver, ReplayError};
pub use snapshot::{SnapshotError, SnapshotRecord, Store, StoreConfig};
pub use wal::{Reader, Record, RecordHeader, WalError, Writer};
