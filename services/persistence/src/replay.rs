//! Replay driver: snapshot load + WAL forward-apply
//!
//! Recovery entry point after a restart. The latest snapshot (if any) is
//! handed to the snapshot handler and sets the resume point; every WAL
//! record at or past that point goes through the event handler in file
//! order. Two executions over the same files produce the same handler
//! call sequence.

use crate::snapshot::{SnapshotError, Store};
use crate::wal::{Reader, Record, WalError};
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("replay driver not configured")]
    NotConfigured,

    #[error("event handler not set for replay")]
    MissingEventHandler,

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Wal(#[from] WalError),
}

pub type SnapshotHandler = Box<dyn FnMut(u64, &[u8])>;
pub type EventHandler = Box<dyn FnMut(&Record)>;

#[derive(Default)]
pub struct Driver {
    snapshot_dir: Option<PathBuf>,
    wal_path: Option<PathBuf>,
    snapshot_handler: Option<SnapshotHandler>,
    event_handler: Option<EventHandler>,
}

impl Driver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn configure(&mut self, snapshot_dir: impl Into<PathBuf>, wal_path: impl Into<PathBuf>) {
        self.snapshot_dir = Some(snapshot_dir.into());
        self.wal_path = Some(wal_path.into());
    }

    pub fn set_snapshot_handler(&mut self, handler: SnapshotHandler) {
        self.snapshot_handler = Some(handler);
    }

    pub fn set_event_handler(&mut self, handler: EventHandler) {
        self.event_handler = Some(handler);
    }

    pub fn execute(&mut self) -> Result<(), ReplayError> {
        let snapshot_dir = self.snapshot_dir.clone().ok_or(ReplayError::NotConfigured)?;
        let wal_path = self.wal_path.clone().ok_or(ReplayError::NotConfigured)?;
        if self.event_handler.is_none() {
            return Err(ReplayError::MissingEventHandler);
        }

        let mut resume_from = 1u64;

        let store = Store::new(&snapshot_dir)?;
        if let Some(snapshot) = store.latest()? {
            resume_from = snapshot.sequence + 1;
            info!(
                sequence = snapshot.sequence,
                bytes = snapshot.payload.len(),
                "replaying from snapshot"
            );
            if let Some(handler) = self.snapshot_handler.as_mut() {
                handler(snapshot.sequence, &snapshot.payload);
            }
        }

        if !wal_path.exists() {
            return Ok(());
        }

        let handler = self.event_handler.as_mut().expect("checked above");
        let mut reader = Reader::open(&wal_path)?;
        let mut applied = 0u64;
        while let Some(record) = reader.next()? {
            if record.header.sequence < resume_from {
                continue;
            }
            handler(&record);
            applied += 1;
        }
        info!(applied, resume_from, "replay complete");

        Ok(())
    }
}
