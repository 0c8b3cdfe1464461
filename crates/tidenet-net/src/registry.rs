//! Packet-type and channel registries owned by a [`NetworkEngine`](crate::NetworkEngine).
//!
//! Both are append-only: IDs handed out at startup stay valid for the life
//! of the engine.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::de::DeserializeOwned;

use crate::connection::Connection;
use crate::error::{PacketError, RegistryError};

/// Numeric packet type, assigned in registration order starting at 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PacketId(pub u32);

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Callback invoked with the receiving connection and the frame payload.
pub type PacketHandler =
    Box<dyn Fn(&mut Connection, &[u8]) -> Result<(), PacketError> + Send + Sync>;

struct PacketType {
    name: String,
    handler: PacketHandler,
}

/// Name → ID → handler table.
#[derive(Default)]
pub struct PacketRegistry {
    types: Vec<PacketType>,
    by_name: HashMap<String, PacketId>,
}

impl PacketRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a raw handler under `name` and return its ID.
    pub fn register<F>(&mut self, name: &str, handler: F) -> Result<PacketId, RegistryError>
    where
        F: Fn(&mut Connection, &[u8]) -> Result<(), PacketError> + Send + Sync + 'static,
    {
        self.register_with_id(name, |_| handler)
    }

    /// Register a raw handler built from the ID it is about to receive, for
    /// packets that answer on their own type.
    pub fn register_with_id<F>(
        &mut self,
        name: &str,
        make: impl FnOnce(PacketId) -> F,
    ) -> Result<PacketId, RegistryError>
    where
        F: Fn(&mut Connection, &[u8]) -> Result<(), PacketError> + Send + Sync + 'static,
    {
        if self.by_name.contains_key(name) {
            return Err(RegistryError::DuplicatePacket(name.to_string()));
        }
        let id = u32::try_from(self.types.len()).map_err(|_| RegistryError::Full)?;
        let id = PacketId(id);
        self.types.push(PacketType {
            name: name.to_string(),
            handler: Box::new(make(id)),
        });
        self.by_name.insert(name.to_string(), id);
        Ok(id)
    }

    /// Register a handler that receives the payload decoded as `P` (postcard).
    pub fn register_typed<P, F>(&mut self, name: &str, handler: F) -> Result<PacketId, RegistryError>
    where
        P: DeserializeOwned + 'static,
        F: Fn(&mut Connection, P) -> Result<(), PacketError> + Send + Sync + 'static,
    {
        self.register(name, move |conn, payload| {
            let packet: P = postcard::from_bytes(payload)?;
            handler(conn, packet)
        })
    }

    /// Handler for `id`, if registered.
    pub fn handler(&self, id: PacketId) -> Option<&PacketHandler> {
        self.types.get(id.0 as usize).map(|t| &t.handler)
    }

    /// ID assigned to `name`.
    pub fn id_of(&self, name: &str) -> Option<PacketId> {
        self.by_name.get(name).copied()
    }

    /// Name registered for `id`.
    pub fn name_of(&self, id: PacketId) -> Option<&str> {
        self.types.get(id.0 as usize).map(|t| t.name.as_str())
    }

    /// Number of registered packet types.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether no packet types are registered.
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Channels a peer may select during the handshake.
#[derive(Debug, Default, Clone)]
pub struct ChannelSet {
    channels: HashSet<u32>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow peers to select `channel`.
    pub fn register(&mut self, channel: u32) -> Result<(), RegistryError> {
        if !self.channels.insert(channel) {
            return Err(RegistryError::DuplicateChannel(channel));
        }
        Ok(())
    }

    pub fn contains(&self, channel: u32) -> bool {
        self.channels.contains(&channel)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}
