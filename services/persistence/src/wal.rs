//! Write-ahead log
//!
//! A WAL file is a pure concatenation of records. Each record is a fixed
//! 24-byte little-endian header followed by the payload:
//!
//! ```text
//! magic        u32  = 0x5443574C ("TCWL")
//! version      u16  = 1
//! reserved     u16
//! sequence     u64
//! payload_size u32
//! checksum     u32  FNV-1a 32 over payload bytes
//! ```
//!
//! The sequence assigned at append time is the canonical total order of
//! state-changing events. On open the writer scans the existing file and
//! resumes from `last_sequence + 1`. Clean EOF at a record boundary is end
//! of log; a partial header or payload is a truncation error, and a magic
//! or checksum mismatch is fatal.

use crate::checksum::fnv1a32;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Write};
use std::path::Path;
use thiserror::Error;

pub const WAL_MAGIC: u32 = 0x5443_574C;
pub const WAL_VERSION: u16 = 1;
pub const RECORD_HEADER_SIZE: usize = 24;

#[derive(Error, Debug)]
pub enum WalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid WAL magic: {0:#010x}")]
    InvalidMagic(u32),

    #[error("unsupported WAL version: {0}")]
    UnsupportedVersion(u16),

    #[error("truncated WAL record at sequence {0}")]
    TruncatedRecord(u64),

    #[error("WAL checksum mismatch at sequence {0}")]
    ChecksumMismatch(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordHeader {
    pub magic: u32,
    pub version: u16,
    pub reserved: u16,
    pub sequence: u64,
    pub payload_size: u32,
    pub checksum: u32,
}

impl RecordHeader {
    pub fn encode(&self) -> [u8; RECORD_HEADER_SIZE] {
        let mut out = [0u8; RECORD_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.reserved.to_le_bytes());
        out[8..16].copy_from_slice(&self.sequence.to_le_bytes());
        out[16..20].copy_from_slice(&self.payload_size.to_le_bytes());
        out[20..24].copy_from_slice(&self.checksum.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8; RECORD_HEADER_SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            version: u16::from_le_bytes(data[4..6].try_into().unwrap()),
            reserved: u16::from_le_bytes(data[6..8].try_into().unwrap()),
            sequence: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            payload_size: u32::from_le_bytes(data[16..20].try_into().unwrap()),
            checksum: u32::from_le_bytes(data[20..24].try_into().unwrap()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub header: RecordHeader,
    pub payload: Vec<u8>,
}

/// Buffered appender. Flushes to the file once the internal buffer reaches
/// the flush threshold; `sync` adds an fsync for durability.
pub struct Writer {
    file: File,
    buffer: Vec<u8>,
    flush_threshold: usize,
    next_sequence: u64,
}

impl Writer {
    pub fn open(path: &Path, flush_threshold: usize) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        // Recover the sequence from any existing records.
        let mut next_sequence = 1;
        let mut reader = Reader::open(path)?;
        while let Some(record) = reader.next()? {
            next_sequence = record.header.sequence + 1;
        }

        Ok(Self {
            file,
            buffer: Vec::with_capacity(flush_threshold),
            flush_threshold,
            next_sequence,
        })
    }

    /// Append one payload, returning the sequence it was assigned.
    pub fn append(&mut self, payload: &[u8]) -> Result<u64, WalError> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let header = RecordHeader {
            magic: WAL_MAGIC,
            version: WAL_VERSION,
            reserved: 0,
            sequence,
            payload_size: payload.len() as u32,
            checksum: fnv1a32(payload),
        };
        self.buffer.extend_from_slice(&header.encode());
        self.buffer.extend_from_slice(payload);

        if self.buffer.len() >= self.flush_threshold {
            self.flush()?;
        }
        Ok(sequence)
    }

    pub fn flush(&mut self) -> Result<(), WalError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.file.write_all(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }

    /// Flush and call the OS durability primitive.
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

/// Streams records sequentially from a WAL file.
pub struct Reader {
    file: BufReader<File>,
}

impl Reader {
    pub fn open(path: &Path) -> Result<Self, WalError> {
        Ok(Self {
            file: BufReader::new(File::open(path)?),
        })
    }

    /// Read the next record, or `None` at a clean end of log.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> Result<Option<Record>, WalError> {
        let mut header_bytes = [0u8; RECORD_HEADER_SIZE];
        match read_full(&mut self.file, &mut header_bytes)? {
            0 => return Ok(None),
            n if n < RECORD_HEADER_SIZE => return Err(WalError::TruncatedRecord(0)),
            _ => {}
        }

        let header = RecordHeader::decode(&header_bytes);
        if header.magic != WAL_MAGIC {
            return Err(WalError::InvalidMagic(header.magic));
        }
        if header.version != WAL_VERSION {
            return Err(WalError::UnsupportedVersion(header.version));
        }

        let mut payload = vec![0u8; header.payload_size as usize];
        if read_full(&mut self.file, &mut payload)? < payload.len() {
            return Err(WalError::TruncatedRecord(header.sequence));
        }
        if fnv1a32(&payload) != header.checksum {
            return Err(WalError::ChecksumMismatch(header.sequence));
        }

        Ok(Some(Record { header, payload }))
    }
}

/// Read until `buf` is full or EOF; returns the number of bytes read.
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
