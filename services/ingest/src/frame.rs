//! Decoded frame types produced by the transport

use types::ids::{AccountId, TimestampNs};

/// Message kind discriminator carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    NewOrder = 0,
    Cancel = 1,
    Replace = 2,
    Heartbeat = 3,
}

impl MessageKind {
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(MessageKind::NewOrder),
            1 => Some(MessageKind::Cancel),
            2 => Some(MessageKind::Replace),
            3 => Some(MessageKind::Heartbeat),
            _ => None,
        }
    }
}

/// Frame metadata extracted from the wire header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub account: AccountId,
    pub nonce: u64,
    pub received_time_ns: TimestampNs,
    pub priority: u8,
    pub kind: MessageKind,
}

/// A frame whose payload still borrows the receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
}

/// A frame with an owned copy of its payload, as queued by the pipeline.
#[derive(Debug, Clone)]
pub struct OwnedFrame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame<'_> {
    pub fn to_owned(&self) -> OwnedFrame {
        OwnedFrame {
            header: self.header,
            payload: self.payload.to_vec(),
        }
    }
}
