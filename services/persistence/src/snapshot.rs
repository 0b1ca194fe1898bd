//! Snapshot store
//!
//! Append-only `snapshot.tc` file of records, little-endian:
//!
//! ```text
//! magic        u32  = 0x5443534E ("TCSN")
//! version      u16  = 2
//! reserved     u16
//! sequence     u64
//! payload_size u32
//! payload      [payload_size]
//! checksum     u32  FNV-1a 32 over payload (version >= 2 only)
//! ```
//!
//! Version-1 records lack the trailing checksum and are still accepted on
//! read. `latest()` returns the last record in file order. After every
//! persist the store compacts when either configured limit is exceeded,
//! rewriting a temporary file with the newest suffix that fits both limits
//! and atomically renaming it into place.

use crate::checksum::fnv1a32;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

pub const SNAPSHOT_MAGIC: u32 = 0x5443_534E;
pub const SNAPSHOT_VERSION: u16 = 2;
pub const SNAPSHOT_FILE_NAME: &str = "snapshot.tc";
const HEADER_SIZE: usize = 20;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid snapshot magic: {0:#010x}")]
    InvalidMagic(u32),

    #[error("unsupported snapshot version: {0}")]
    UnsupportedVersion(u16),

    #[error("truncated snapshot record at sequence {0}")]
    TruncatedRecord(u64),

    #[error("snapshot checksum mismatch at sequence {0}")]
    ChecksumMismatch(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub sequence: u64,
    pub payload: Vec<u8>,
}

/// Compaction limits; zero means unlimited.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreConfig {
    pub max_records: usize,
    pub max_file_bytes: u64,
}

pub struct Store {
    directory: PathBuf,
    file_path: PathBuf,
    config: StoreConfig,
    record_count: usize,
}

impl Store {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        Self::with_config(directory, StoreConfig::default())
    }

    pub fn with_config(
        directory: impl Into<PathBuf>,
        config: StoreConfig,
    ) -> Result<Self, SnapshotError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        let file_path = directory.join(SNAPSHOT_FILE_NAME);

        let record_count = if file_path.exists() {
            read_records(&file_path)?.len()
        } else {
            0
        };

        Ok(Self {
            directory,
            file_path,
            config,
            record_count,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Append one snapshot record, then compact if a limit is exceeded.
    pub fn persist(&mut self, sequence: u64, payload: &[u8]) -> Result<(), SnapshotError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)?;
        file.write_all(&encode_record(sequence, payload))?;
        file.flush()?;
        self.record_count += 1;

        self.compact_if_needed()?;
        Ok(())
    }

    /// The last record in file order, checksum-verified.
    pub fn latest(&self) -> Result<Option<SnapshotRecord>, SnapshotError> {
        if !self.file_path.exists() {
            return Ok(None);
        }
        Ok(read_records(&self.file_path)?.into_iter().next_back())
    }

    /// Rewrite the file with the newest suffix that fits both limits.
    /// Record order is preserved; the latest record is always kept.
    pub fn compact_if_needed(&mut self) -> Result<bool, SnapshotError> {
        let file_size = fs::metadata(&self.file_path).map(|m| m.len()).unwrap_or(0);
        let over_records =
            self.config.max_records > 0 && self.record_count > self.config.max_records;
        let over_bytes = self.config.max_file_bytes > 0 && file_size > self.config.max_file_bytes;
        if !over_records && !over_bytes {
            return Ok(false);
        }

        let records = read_records(&self.file_path)?;

        // Walk back from the newest record, accepting while both limits hold
        let mut kept = 0usize;
        let mut kept_bytes = 0u64;
        for record in records.iter().rev() {
            let encoded_len = (HEADER_SIZE + record.payload.len() + 4) as u64;
            let fits_records = self.config.max_records == 0 || kept + 1 <= self.config.max_records;
            let fits_bytes =
                self.config.max_file_bytes == 0 || kept_bytes + encoded_len <= self.config.max_file_bytes;
            if kept > 0 && !(fits_records && fits_bytes) {
                break;
            }
            kept += 1;
            kept_bytes += encoded_len;
        }

        let suffix = &records[records.len() - kept..];
        let tmp_path = self.directory.join(format!("{SNAPSHOT_FILE_NAME}.tmp"));
        {
            let mut tmp = File::create(&tmp_path)?;
            for record in suffix {
                tmp.write_all(&encode_record(record.sequence, &record.payload))?;
            }
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.file_path)?;

        debug!(
            dropped = records.len() - kept,
            kept,
            "snapshot file compacted"
        );
        self.record_count = kept;
        Ok(true)
    }
}

fn encode_record(sequence: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len() + 4);
    out.extend_from_slice(&SNAPSHOT_MAGIC.to_le_bytes());
    out.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&fnv1a32(payload).to_le_bytes());
    out
}

fn read_records(path: &Path) -> Result<Vec<SnapshotRecord>, SnapshotError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    loop {
        let mut header = [0u8; HEADER_SIZE];
        match read_full(&mut reader, &mut header)? {
            0 => break,
            n if n < HEADER_SIZE => return Err(SnapshotError::TruncatedRecord(0)),
            _ => {}
        }

        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if magic != SNAPSHOT_MAGIC {
            return Err(SnapshotError::InvalidMagic(magic));
        }
        let version = u16::from_le_bytes(header[4..6].try_into().unwrap());
        if version == 0 || version > SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }
        let sequence = u64::from_le_bytes(header[8..16].try_into().unwrap());
        let payload_size = u32::from_le_bytes(header[16..20].try_into().unwrap()) as usize;

        let mut payload = vec![0u8; payload_size];
        if read_full(&mut reader, &mut payload)? < payload_size {
            return Err(SnapshotError::TruncatedRecord(sequence));
        }

        // Version 1 predates the trailing checksum
        if version >= 2 {
            let mut checksum_bytes = [0u8; 4];
            if read_full(&mut reader, &mut checksum_bytes)? < 4 {
                return Err(SnapshotError::TruncatedRecord(sequence));
            }
            let checksum = u32::from_le_bytes(checksum_bytes);
            if fnv1a32(&payload) != checksum {
                return Err(SnapshotError::ChecksumMismatch(sequence));
            }
        }

        records.push(SnapshotRecord { sequence, payload });
    }

    Ok(records)
}

fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
