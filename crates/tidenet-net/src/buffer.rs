//! Growable in-memory byte buffer with a read cursor.
//!
//! [`ByteBuffer`] is the scratch stream used for both directions of the
//! transport: each connection owns one as its receive buffer, and outbound
//! packets are assembled in one before being framed.
//!
//! ```text
//! 0            position                len           capacity
//! +---------------+---------------------+----------------+
//! |   consumed    |   unread (remaining) |    spare       |
//! +---------------+---------------------+----------------+
//! ```
//!
//! Writes always append at `len`; reads advance `position`. All fixed-width
//! values are little-endian.

use crate::varint;

/// Errors produced while decoding values out of a [`ByteBuffer`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferError {
    /// Fewer unread bytes than the value requires.
    #[error("unexpected end of buffer: needed {needed} bytes, {available} available")]
    UnexpectedEnd {
        /// Bytes the read required.
        needed: usize,
        /// Bytes that were left.
        available: usize,
    },

    /// A string field was not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidUtf8,

    /// A varint ran past 10 bytes or overflowed 64 bits.
    #[error("varint is too long or overflows 64 bits")]
    VarintOverflow,
}

/// Minimum capacity allocated on the first write into an empty buffer.
const MIN_CAPACITY: usize = 64;

/// Byte buffer tracking a logical length separately from its allocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
    len: usize,
    position: usize,
}

impl ByteBuffer {
    /// Create an empty buffer without allocating.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer with room for `capacity` bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            len: 0,
            position: 0,
        }
    }

    /// Wrap existing bytes for reading. The cursor starts at 0.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            data: bytes.to_vec(),
            len: bytes.len(),
            position: 0,
        }
    }

    /// Number of valid bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer holds no valid bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocated size in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Current read cursor.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Bytes between the cursor and the end of the valid data.
    pub fn remaining(&self) -> usize {
        self.len - self.position
    }

    /// Move the read cursor. Positions past `len` are clamped.
    pub fn seek(&mut self, position: usize) {
        self.position = position.min(self.len);
    }

    /// Reset length and cursor to zero, keeping the allocation.
    pub fn clear(&mut self) {
        self.len = 0;
        self.position = 0;
    }

    /// Set the logical length. Growing zero-fills; shrinking clamps the cursor.
    pub fn set_length(&mut self, len: usize) {
        if len > self.len {
            self.reserve(len - self.len);
            self.data[self.len..len].fill(0);
        }
        self.len = len;
        self.position = self.position.min(len);
    }

    /// Discard the bytes before the cursor, moving unread data to the front.
    pub fn compact(&mut self) {
        if self.position == 0 {
            return;
        }
        self.data.copy_within(self.position..self.len, 0);
        self.len -= self.position;
        self.position = 0;
    }

    /// All valid bytes, including those already read.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// Bytes not yet read.
    pub fn unread(&self) -> &[u8] {
        &self.data[self.position..self.len]
    }

    /// Make room for `additional` more bytes, doubling the allocation as needed.
    fn reserve(&mut self, additional: usize) {
        let required = self.len + additional;
        if required <= self.data.len() {
            return;
        }
        let mut capacity = self.data.len().max(MIN_CAPACITY);
        while capacity < required {
            capacity *= 2;
        }
        self.data.resize(capacity, 0);
    }

    // --- writing ---

    /// Append one byte.
    pub fn write_byte(&mut self, byte: u8) {
        self.reserve(1);
        self.data[self.len] = byte;
        self.len += 1;
    }

    /// Append a byte slice.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.data[self.len..self.len + bytes.len()].copy_from_slice(bytes);
        self.len += bytes.len();
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_byte(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.write_byte(value as u8);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_byte(u8::from(value));
    }

    pub fn write_u16(&mut self, value: u16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i16(&mut self, value: i16) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_i64(&mut self, value: i64) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_bytes(&value.to_le_bytes());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_bytes(&value.to_le_bytes());
    }

    /// Append a LEB128 varint.
    pub fn write_varint(&mut self, value: u64) {
        let mut encoded = Vec::with_capacity(varint::encoded_len(value));
        varint::encode(value, &mut encoded);
        self.write_bytes(&encoded);
    }

    /// Append a string as a varint byte length followed by its UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) {
        self.write_varint(value.len() as u64);
        self.write_bytes(value.as_bytes());
    }

    // --- reading ---

    /// Read the next byte, or `None` at the end of the valid data.
    pub fn read_byte(&mut self) -> Option<u8> {
        if self.position >= self.len {
            return None;
        }
        let byte = self.data[self.position];
        self.position += 1;
        Some(byte)
    }

    /// Read up to `count` bytes. The returned slice is shorter than `count`
    /// when fewer bytes remain.
    pub fn read_bytes(&mut self, count: usize) -> &[u8] {
        let count = count.min(self.remaining());
        let start = self.position;
        self.position += count;
        &self.data[start..start + count]
    }

    /// Read exactly `count` bytes or fail without moving the cursor.
    pub fn read_exact(&mut self, count: usize) -> Result<&[u8], BufferError> {
        let available = self.remaining();
        if available < count {
            return Err(BufferError::UnexpectedEnd {
                needed: count,
                available,
            });
        }
        Ok(self.read_bytes(count))
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_exact(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, BufferError> {
        self.read_byte().ok_or(BufferError::UnexpectedEnd {
            needed: 1,
            available: 0,
        })
    }

    pub fn read_i8(&mut self) -> Result<i8, BufferError> {
        self.read_u8().map(|b| b as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool, BufferError> {
        self.read_u8().map(|b| b != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, BufferError> {
        self.read_array().map(u16::from_le_bytes)
    }

    pub fn read_i16(&mut self) -> Result<i16, BufferError> {
        self.read_array().map(i16::from_le_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        self.read_array().map(u32::from_le_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32, BufferError> {
        self.read_array().map(i32::from_le_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, BufferError> {
        self.read_array().map(u64::from_le_bytes)
    }

    pub fn read_i64(&mut self) -> Result<i64, BufferError> {
        self.read_array().map(i64::from_le_bytes)
    }

    pub fn read_f32(&mut self) -> Result<f32, BufferError> {
        self.read_array().map(f32::from_le_bytes)
    }

    pub fn read_f64(&mut self) -> Result<f64, BufferError> {
        self.read_array().map(f64::from_le_bytes)
    }

    /// Read a LEB128 varint. The cursor does not move on failure.
    pub fn read_varint(&mut self) -> Result<u64, BufferError> {
        match varint::decode(self.unread())? {
            Some((value, used)) => {
                self.position += used;
                Ok(value)
            }
            None => Err(BufferError::UnexpectedEnd {
                needed: self.remaining() + 1,
                available: self.remaining(),
            }),
        }
    }

    /// Read a string written by [`write_string`](Self::write_string).
    pub fn read_string(&mut self) -> Result<String, BufferError> {
        let start = self.position;
        let len = self.read_varint()? as usize;
        let bytes = match self.read_exact(len) {
            Ok(bytes) => bytes.to_vec(),
            Err(e) => {
                self.position = start;
                return Err(e);
            }
        };
        String::from_utf8(bytes).map_err(|_| {
            self.position = start;
            BufferError::InvalidUtf8
        })
    }
}
