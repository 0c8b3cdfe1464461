//! TCP transport for game servers: handshake, length-prefixed framing,
//! packet dispatch and coalesced non-blocking sends, driven by a server tick.

pub mod buffer;
pub mod client;
pub mod coalesce;
pub mod connection;
pub mod engine;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod platform;
pub mod registry;
pub mod varint;
pub mod writer;

#[cfg(test)]
mod test_support;

pub use buffer::{BufferError, ByteBuffer};
pub use client::NetClient;
pub use coalesce::{CoalescingSender, OutboundSink};
pub use connection::{AcceptPolicy, Connection, ConnectionId, ConnectionLimits, ConnectionState};
pub use engine::{EngineConfig, NetworkEngine, TickSummary};
pub use error::{ClientError, ConnectionError, NetError, PacketError, RegistryError};
pub use framing::{Frame, FrameError};
pub use handshake::{HANDSHAKE_HEADER, Handshake};
pub use platform::SocketConfig;
pub use registry::{ChannelSet, PacketHandler, PacketId, PacketRegistry};
