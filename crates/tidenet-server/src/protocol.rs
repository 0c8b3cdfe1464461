//! Packets every tidenet server understands.
//!
//! Payloads are postcard-encoded serde structs, except `echo` which carries
//! raw bytes.

use serde::{Deserialize, Serialize};
use tidenet_net::{Connection, NetworkEngine, PacketError, PacketId, RegistryError};

/// Liveness check. Answered with a [`Pong`] carrying the same nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub nonce: u64,
}

/// Reply to a [`Ping`]. Clients may also answer server pings with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub nonce: u64,
}

/// Peer is leaving. The server flushes anything queued, then closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    pub reason: String,
}

/// IDs assigned to the built-in packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Protocol {
    pub pong: PacketId,
    pub ping: PacketId,
    pub echo: PacketId,
    pub goodbye: PacketId,
}

impl Protocol {
    /// Register the built-in packets on `engine`.
    pub fn register(engine: &mut NetworkEngine) -> Result<Self, RegistryError> {
        let pong = engine.register_typed_packet("pong", |conn, pong: Pong| {
            tracing::debug!("Connection {} answered ping {}", conn.id(), pong.nonce);
            Ok(())
        })?;

        let ping = engine.register_typed_packet("ping", move |conn, ping: Ping| {
            conn.send(pong, &Pong { nonce: ping.nonce })
        })?;

        let echo = engine.register_packet_with_id("echo", |echo| {
            move |conn: &mut Connection, payload: &[u8]| -> Result<(), PacketError> {
                conn.send_packet(echo, payload)?;
                Ok(())
            }
        })?;

        let goodbye = engine.register_typed_packet("goodbye", |conn, goodbye: Goodbye| {
            tracing::info!("Connection {} said goodbye: {:?}", conn.id(), goodbye.reason);
            conn.disconnect();
            Ok(())
        })?;

        Ok(Self {
            pong,
            ping,
            echo,
            goodbye,
        })
    }
}
