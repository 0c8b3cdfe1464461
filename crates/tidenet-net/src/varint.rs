//! LEB128 variable-length integers.
//!
//! Seven payload bits per byte, least-significant group first, high bit set
//! on every byte except the last. Packet IDs below 128 cost a single byte.

use crate::buffer::BufferError;

/// Longest encoding of a `u64`.
pub const MAX_LEN: usize = 10;

/// Number of bytes [`encode`] produces for `value`.
pub fn encoded_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Append the minimal encoding of `value` to `out`.
pub fn encode(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Decode a varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed, or `Ok(None)` if
/// `data` ends before the final byte.
pub fn decode(data: &[u8]) -> Result<Option<(u64, usize)>, BufferError> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().enumerate() {
        if i == MAX_LEN {
            return Err(BufferError::VarintOverflow);
        }
        let group = u64::from(byte & 0x7F);
        let shift = 7 * i as u32;
        // Tenth byte may only carry the single remaining bit.
        if i == MAX_LEN - 1 && group > 1 {
            return Err(BufferError::VarintOverflow);
        }
        value |= group << shift;
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if data.len() >= MAX_LEN {
        return Err(BufferError::VarintOverflow);
    }
    Ok(None)
}
