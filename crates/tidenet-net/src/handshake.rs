//! Opening handshake sent by a peer before any framed traffic.
//!
//! ```text
//! TIDENET/1\n<channel>:<opening info>\n\0
//! ```
//!
//! The header literal doubles as a protocol version marker. The channel is
//! an ASCII decimal number; the opening info is free-form UTF-8 up to the
//! first newline. A single `0x00` byte ends the handshake.

use crate::error::ConnectionError;

/// Literal every handshake must start with.
pub const HANDSHAKE_HEADER: &str = "TIDENET/1\n";

/// Byte that terminates the handshake.
pub const TERMINATOR: u8 = 0;

/// Parsed handshake fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Channel the peer asked for.
    pub channel: u32,
    /// Client-supplied metadata following the channel.
    pub opening_info: String,
}

/// Build the handshake bytes for `channel`, terminator included.
pub fn encode_handshake(channel: u32, opening_info: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(HANDSHAKE_HEADER.len() + opening_info.len() + 16);
    out.extend_from_slice(HANDSHAKE_HEADER.as_bytes());
    out.extend_from_slice(format!("{channel}:{opening_info}\n").as_bytes());
    out.push(TERMINATOR);
    out
}

/// Parse the bytes received before the terminator.
pub fn parse_handshake(bytes: &[u8]) -> Result<Handshake, ConnectionError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ConnectionError::HandshakeNotUtf8)?;
    let rest = text
        .strip_prefix(HANDSHAKE_HEADER)
        .ok_or(ConnectionError::BadHeader)?;
    let line = rest.split('\n').next().unwrap_or_default();
    let (channel, opening_info) = line
        .split_once(':')
        .ok_or_else(|| ConnectionError::MalformedHandshake(line.to_string()))?;
    let channel = channel
        .trim()
        .parse::<u32>()
        .map_err(|_| ConnectionError::MalformedHandshake(line.to_string()))?;

    Ok(Handshake {
        channel,
        opening_info: opening_info.trim_end_matches('\r').to_string(),
    })
}
