//! Error types shared across the transport.

use std::net::SocketAddr;

use crate::buffer::BufferError;
use crate::connection::ConnectionId;
use crate::framing::FrameError;
use crate::registry::PacketId;

/// Reasons a single connection is closed.
///
/// Every variant is fatal for the connection that produced it and for
/// nothing else.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Handshake text did not start with the protocol header.
    #[error("handshake does not begin with the protocol header")]
    BadHeader,

    /// Handshake bytes were not UTF-8.
    #[error("handshake is not valid UTF-8")]
    HandshakeNotUtf8,

    /// Handshake line was not `<channel>:<info>`.
    #[error("malformed handshake line: {0}")]
    MalformedHandshake(String),

    /// The requested channel was never registered.
    #[error("channel {0} is not registered")]
    UnknownChannel(u32),

    /// The accept policy refused the peer.
    #[error("rejected by accept policy")]
    Rejected,

    /// Too many handshake bytes arrived without a terminator.
    #[error("handshake exceeded {limit} bytes without a terminator")]
    HeaderTooLarge {
        /// Configured ceiling.
        limit: usize,
    },

    /// Body framing failed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// No handler is registered for the received packet ID.
    #[error("unknown packet id {0}")]
    UnknownPacket(PacketId),

    /// A packet handler returned an error.
    #[error("handler for packet {packet} failed: {source}")]
    Handler {
        /// Packet being handled.
        packet: PacketId,
        /// What the handler reported.
        #[source]
        source: PacketError,
    },

    /// The peer closed its side of the stream.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The background writer reported a failed send.
    #[error("send failed")]
    SendFailed,

    /// The connection is already closed.
    #[error("connection is closed")]
    Closed,

    /// Explicit disconnect requested by the application.
    #[error("disconnected by server")]
    Disconnected,

    /// Socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while decoding or handling a packet payload.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    /// Payload could not be encoded or decoded.
    #[error("payload codec error: {0}")]
    Codec(#[from] postcard::Error),

    /// Payload could not be read from a buffer.
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// Handler-defined failure.
    #[error("{0}")]
    Invalid(String),

    /// Sending a reply failed.
    #[error("reply failed: {0}")]
    Reply(Box<ConnectionError>),
}

impl From<ConnectionError> for PacketError {
    fn from(e: ConnectionError) -> Self {
        Self::Reply(Box::new(e))
    }
}

/// Errors from packet and channel registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A packet type with this name already exists.
    #[error("packet {0:?} is already registered")]
    DuplicatePacket(String),

    /// This channel is already registered.
    #[error("channel {0} is already registered")]
    DuplicateChannel(u32),

    /// Packet IDs are exhausted.
    #[error("packet registry is full")]
    Full,
}

/// Engine-level errors returned to the caller.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The host is big-endian.
    #[error("big-endian hosts are not supported")]
    UnsupportedHost,

    /// `start` was called on a running engine.
    #[error("engine is already listening")]
    AlreadyStarted,

    /// Binding the listening socket failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that failed.
        addr: SocketAddr,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// No live connection has this ID.
    #[error("no connection with id {0}")]
    UnknownConnection(ConnectionId),

    /// Registration failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Operation on a connection failed.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from [`NetClient`](crate::client::NetClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No complete frame arrived in time.
    #[error("timed out waiting for a frame")]
    Timeout,

    /// The server closed the stream.
    #[error("server closed the connection")]
    Closed,

    /// A received frame was malformed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Payload could not be encoded.
    #[error("payload codec error: {0}")]
    Codec(#[from] postcard::Error),

    /// Socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
