//! Packed datagram header codec
//!
//! Layout, little-endian, 36 bytes total:
//! `magic u32 | version u16 | flags u16 | account u64 | nonce u64 |
//! timestamp_ns u64 | priority u8 | kind u8 | payload_len u16`
//!
//! When signed transport is in use the first 64 bytes of the payload carry
//! an Ed25519 signature over `header ∥ payload[64..]`.

use crate::frame::{Frame, FrameHeader, MessageKind};
use thiserror::Error;
use types::ids::AccountId;

pub const WIRE_MAGIC: u32 = 0x5452_4443; // "TRDC"
pub const WIRE_VERSION: u16 = 1;
pub const WIRE_HEADER_SIZE: usize = 36;
/// Leading payload bytes holding the Ed25519 signature on signed transport.
pub const SIGNATURE_PREFIX_SIZE: usize = 64;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    #[error("datagram too short: {0} bytes")]
    TooShort(usize),

    #[error("invalid magic: {0:#010x}")]
    InvalidMagic(u32),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("unknown message kind: {0}")]
    UnknownKind(u8),

    #[error("payload truncated: declared {declared}, available {available}")]
    TruncatedPayload { declared: usize, available: usize },
}

/// The raw header fields as laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireHeader {
    pub magic: u32,
    pub version: u16,
    pub flags: u16,
    pub account: u64,
    pub nonce: u64,
    pub timestamp_ns: u64,
    pub priority: u8,
    pub kind: u8,
    pub payload_len: u16,
}

impl WireHeader {
    pub fn encode(&self) -> [u8; WIRE_HEADER_SIZE] {
        let mut out = [0u8; WIRE_HEADER_SIZE];
        out[0..4].copy_from_slice(&self.magic.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..16].copy_from_slice(&self.account.to_le_bytes());
        out[16..24].copy_from_slice(&self.nonce.to_le_bytes());
        out[24..32].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out[32] = self.priority;
        out[33] = self.kind;
        out[34..36].copy_from_slice(&self.payload_len.to_le_bytes());
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self, WireError> {
        if data.len() < WIRE_HEADER_SIZE {
            return Err(WireError::TooShort(data.len()));
        }
        Ok(Self {
            magic: u32::from_le_bytes(data[0..4].try_into().unwrap()),
            version: u16::from_le_bytes(data[4..6].try_into().unwrap()),
            flags: u16::from_le_bytes(data[6..8].try_into().unwrap()),
            account: u64::from_le_bytes(data[8..16].try_into().unwrap()),
            nonce: u64::from_le_bytes(data[16..24].try_into().unwrap()),
            timestamp_ns: u64::from_le_bytes(data[24..32].try_into().unwrap()),
            priority: data[32],
            kind: data[33],
            payload_len: u16::from_le_bytes(data[34..36].try_into().unwrap()),
        })
    }
}

/// Parse a full datagram into a frame borrowing the input buffer.
pub fn parse_frame(data: &[u8]) -> Result<Frame<'_>, WireError> {
    let header = WireHeader::decode(data)?;

    if header.magic != WIRE_MAGIC {
        return Err(WireError::InvalidMagic(header.magic));
    }
    if header.version != WIRE_VERSION {
        return Err(WireError::UnsupportedVersion(header.version));
    }

    let declared = header.payload_len as usize;
    let available = data.len() - WIRE_HEADER_SIZE;
    if available < declared {
        return Err(WireError::TruncatedPayload { declared, available });
    }

    let kind = MessageKind::from_u8(header.kind).ok_or(WireError::UnknownKind(header.kind))?;

    Ok(Frame {
        header: FrameHeader {
            account: AccountId(header.account),
            nonce: header.nonce,
            received_time_ns: header.timestamp_ns as i64,
            priority: header.priority,
            kind,
        },
        payload: &data[WIRE_HEADER_SIZE..WIRE_HEADER_SIZE + declared],
    })
}

/// Build a datagram from header fields and payload (client/test side).
pub fn build_datagram(
    account: AccountId,
    nonce: u64,
    timestamp_ns: i64,
    priority: u8,
    kind: MessageKind,
    payload: &[u8],
) -> Vec<u8> {
    let header = WireHeader {
        magic: WIRE_MAGIC,
        version: WIRE_VERSION,
        flags: 0,
        account: account.0,
        nonce,
        timestamp_ns: timestamp_ns as u64,
        priority,
        kind: kind as u8,
        payload_len: payload.len() as u16,
    };
    let mut out = Vec::with_capacity(WIRE_HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}
