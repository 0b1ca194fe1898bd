//! Fixed-layout order message codec
//!
//! Every message kind has a fixed little-endian layout. Decoding a buffer
//! shorter than the declared layout fails with [`CodecError::OutOfBounds`].

use thiserror::Error;
use types::order::Side;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("decode out of bounds: needed {needed} bytes, had {available}")]
    OutOfBounds { needed: usize, available: usize },
}

pub const NEW_ORDER_ENCODED_SIZE: usize = 1 + 8 + 8 + 2;
pub const CANCEL_ENCODED_SIZE: usize = 8;
pub const REPLACE_ENCODED_SIZE: usize = 8 + 8 + 8 + 2;

/// `side u8, quantity i64, price i64, flags u16`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewOrder {
    pub side: Side,
    pub quantity: i64,
    pub price: i64,
    pub flags: u16,
}

/// `order_id u64`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancel {
    pub order_id: u64,
}

/// `order_id u64, new_quantity i64, new_price i64, new_flags u16`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Replace {
    pub order_id: u64,
    pub new_quantity: i64,
    pub new_price: i64,
    pub new_flags: u16,
}

struct Cursor<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let end = self.offset + N;
        if end > self.data.len() {
            return Err(CodecError::OutOfBounds {
                needed: end,
                available: self.data.len(),
            });
        }
        let bytes = self.data[self.offset..end].try_into().unwrap();
        self.offset = end;
        Ok(bytes)
    }

    fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_le_bytes(self.take::<2>()?))
    }

    fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_le_bytes(self.take::<8>()?))
    }

    fn read_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take::<8>()?))
    }
}

pub fn encode_new_order(msg: &NewOrder) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(NEW_ORDER_ENCODED_SIZE);
    buffer.push(msg.side.to_u8());
    buffer.extend_from_slice(&msg.quantity.to_le_bytes());
    buffer.extend_from_slice(&msg.price.to_le_bytes());
    buffer.extend_from_slice(&msg.flags.to_le_bytes());
    buffer
}

pub fn decode_new_order(data: &[u8]) -> Result<NewOrder, CodecError> {
    let mut cursor = Cursor::new(data);
    Ok(NewOrder {
        side: Side::from_u8(cursor.read_u8()?),
        quantity: cursor.read_i64()?,
        price: cursor.read_i64()?,
        flags: cursor.read_u16()?,
    })
}

pub fn encode_cancel(msg: &Cancel) -> Vec<u8> {
    msg.order_id.to_le_bytes().to_vec()
}

pub fn decode_cancel(data: &[u8]) -> Result<Cancel, CodecError> {
    let mut cursor = Cursor::new(data);
    Ok(Cancel {
        order_id: cursor.read_u64()?,
    })
}

pub fn encode_replace(msg: &Replace) -> Vec<u8> {
    let mut buffer = Vec::with_capacity(REPLACE_ENCODED_SIZE);
    buffer.extend_from_slice(&msg.order_id.to_le_bytes());
    buffer.extend_from_slice(&msg.new_quantity.to_le_bytes());
    buffer.extend_from_slice(&msg.new_price.to_le_bytes());
    buffer.extend_from_slice(&msg.new_flags.to_le_bytes());
    buffer
}

pub fn decode_replace(data: &[u8]) -> Result<Replace, CodecError> {
    let mut cursor = Cursor::new(data);
    Ok(Replace {
        order_id: cursor.read_u64()?,
        new_quantity: cursor.read_i64()?,
        new_price: cursor.read_i64()?,
        new_flags: cursor.read_u16()?,
    })
}
