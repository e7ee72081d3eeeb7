//! Binary record layout: 8 bytes per slot, `expiry` as LE u32 then `amount`
//! as LE i32, slots in stored order.
//!
//! There is no type tag. The length decides: 4 bytes is the legacy short form
//! (expiry only, amount 1), 8 is a `Single`, any larger multiple of 8 is a
//! `Multi`.

use crate::error::CodecError;
use crate::record::{Record, Slot, Slots};

/// Bytes per encoded slot.
pub const SLOT_BYTES: usize = 8;

const LEGACY_BYTES: usize = 4;

#[inline]
fn read_u32(buf: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

#[inline]
fn read_slot(buf: &[u8], off: usize) -> Slot {
    Slot::new(read_u32(buf, off), read_u32(buf, off + 4) as i32)
}

/// Append the encoding of `record` to `buf`.
pub fn encode_into(record: &Record, buf: &mut Vec<u8>) {
    let slots = record.slots();
    buf.reserve(slots.len() * SLOT_BYTES);
    for slot in slots {
        buf.extend_from_slice(&slot.expiry.to_le_bytes());
        buf.extend_from_slice(&slot.amount.to_le_bytes());
    }
}

pub fn encode(record: &Record) -> Vec<u8> {
    let mut buf = Vec::with_capacity(record.len() * SLOT_BYTES);
    encode_into(record, &mut buf);
    buf
}

pub fn decode(bytes: &[u8]) -> Result<Record, CodecError> {
    match bytes.len() {
        LEGACY_BYTES => Ok(Record::single(read_u32(bytes, 0), 1)),
        SLOT_BYTES => Ok(Record::Single(read_slot(bytes, 0))),
        n if n > SLOT_BYTES && n % SLOT_BYTES == 0 => {
            let slots: Slots = (0..n)
                .step_by(SLOT_BYTES)
                .map(|off| read_slot(bytes, off))
                .collect();
            Ok(Record::Multi(slots))
        }
        n => Err(CodecError::InvalidLength(n)),
    }
}
