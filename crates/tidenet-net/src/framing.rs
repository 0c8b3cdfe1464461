//! Length-prefixed framing for the body phase of a connection.
//!
//! After the handshake every message on the wire is a frame:
//!
//! ```text
//! +-------------------+----------------+-------------------------+
//! | length (4 bytes)  | packet id      | payload                 |
//! | i32 little-endian | varint         | (length - id bytes)     |
//! +-------------------+----------------+-------------------------+
//! ```
//!
//! The length counts everything after the 4 prefix bytes, the packet ID
//! included. A frame therefore has a length of at least 1.

use crate::buffer::{BufferError, ByteBuffer};
use crate::registry::PacketId;
use crate::varint;

/// Size of the length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Once this many consumed bytes sit in front of a partial frame, the read
/// buffer is compacted.
pub const COMPACT_THRESHOLD: usize = 64 * 1024;

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Packet type.
    pub id: PacketId,
    /// Bytes following the packet ID.
    pub payload: Vec<u8>,
}

/// Errors that can occur while extracting frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The length prefix is too small to hold a packet ID.
    #[error("invalid frame length {0}")]
    InvalidLength(i32),

    /// The frame is larger than the configured maximum.
    #[error("frame size {size} exceeds maximum {max}")]
    FrameTooLarge {
        /// Declared frame length.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Buffered but unparsed bytes exceed the configured maximum.
    #[error("{pending} pending bytes exceed maximum {max}")]
    PendingTooLarge {
        /// Unread bytes in the buffer.
        pending: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The packet ID at the start of the frame was truncated or overlong.
    #[error("malformed packet id")]
    MalformedPacketId,

    /// Packet ID does not fit in 32 bits.
    #[error("packet id {0} out of range")]
    PacketIdOutOfRange(u64),

    /// The buffer could not be read.
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

/// Build a complete frame for `id` and `payload`.
///
/// Fails when the body does not fit the signed 32-bit length prefix.
pub fn encode_frame(id: PacketId, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let length = frame_length(id, payload.len())?;
    let mut out = Vec::with_capacity(LENGTH_PREFIX + length as usize);
    out.extend_from_slice(&length.to_le_bytes());
    varint::encode(u64::from(id.0), &mut out);
    out.extend_from_slice(payload);
    Ok(out)
}

/// Value of the length prefix for a frame carrying `payload_len` bytes.
fn frame_length(id: PacketId, payload_len: usize) -> Result<i32, FrameError> {
    let size = varint::encoded_len(u64::from(id.0)).saturating_add(payload_len);
    i32::try_from(size).map_err(|_| FrameError::FrameTooLarge {
        size,
        max: i32::MAX as usize,
    })
}

/// Extract the next complete frame from `buf`.
///
/// Returns `Ok(None)` and leaves the cursor untouched when the buffer does
/// not yet hold a whole frame. When the buffer is fully drained its cursor
/// and length are reset to zero so the allocation is reused.
pub fn take_frame(buf: &mut ByteBuffer, max_frame: usize) -> Result<Option<Frame>, FrameError> {
    if buf.remaining() <= LENGTH_PREFIX {
        return Ok(None);
    }

    let start = buf.position();
    let declared = buf.read_i32()?;
    if declared < 1 {
        return Err(FrameError::InvalidLength(declared));
    }
    let size = declared as usize;
    if size > max_frame {
        return Err(FrameError::FrameTooLarge {
            size,
            max: max_frame,
        });
    }
    if buf.remaining() < size {
        buf.seek(start);
        return Ok(None);
    }

    let body = buf.read_bytes(size);
    let (raw_id, id_len) = match varint::decode(body) {
        Ok(Some(decoded)) => decoded,
        Ok(None) | Err(_) => return Err(FrameError::MalformedPacketId),
    };
    let id = u32::try_from(raw_id).map_err(|_| FrameError::PacketIdOutOfRange(raw_id))?;
    let frame = Frame {
        id: PacketId(id),
        payload: body[id_len..].to_vec(),
    };

    if buf.remaining() == 0 {
        buf.clear();
    } else if buf.position() >= COMPACT_THRESHOLD {
        buf.compact();
    }

    Ok(Some(frame))
}

/// Reject a buffer whose unread bytes exceed `max_pending`.
pub fn check_pending(buf: &ByteBuffer, max_pending: usize) -> Result<(), FrameError> {
    let pending = buf.remaining();
    if pending > max_pending {
        return Err(FrameError::PendingTooLarge {
            pending,
            max: max_pending,
        });
    }
    Ok(())
}
