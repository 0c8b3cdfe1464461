//! Listening socket, connection list and registries driven by a server tick.
//!
//! [`NetworkEngine`] is single-threaded: [`tick`](NetworkEngine::tick) is
//! called once per server tick from the game loop and never blocks. Only
//! socket writes run elsewhere, on the tokio runtime handed to
//! [`NetworkEngine::new`].

use std::net::{IpAddr, SocketAddr, TcpListener};

use serde::de::DeserializeOwned;
use tokio::runtime::Handle;

use crate::connection::{
    AcceptPolicy, Connection, ConnectionId, ConnectionLimits, ConnectionState, IdGenerator,
    TickContext,
};
use crate::error::{NetError, PacketError, RegistryError};
use crate::platform::{self, SocketConfig};
use crate::registry::{ChannelSet, PacketId, PacketRegistry};

/// Configuration for [`NetworkEngine`]. Changes after `start` are ignored.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Listening port. Default: 28010.
    pub port: u16,
    /// Exact address to bind. `None` binds dual-stack `[::]`, falling back
    /// to `0.0.0.0` when IPv6 is unavailable.
    pub bind_ip: Option<IpAddr>,
    /// Try a dual-stack socket before IPv4 when `bind_ip` is unset. Default: true.
    pub dual_stack: bool,
    /// Listen backlog. Default: 100.
    pub backlog: i32,
    /// Per-connection ceilings.
    pub limits: ConnectionLimits,
    /// Options applied to every accepted socket.
    pub socket: SocketConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            port: 28010,
            bind_ip: None,
            dual_stack: true,
            backlog: 100,
            limits: ConnectionLimits::default(),
            socket: SocketConfig::default(),
        }
    }
}

/// What one call to [`NetworkEngine::tick`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Connections accepted this tick.
    pub accepted: usize,
    /// Connections removed this tick.
    pub removed: usize,
    /// Connections alive after the tick.
    pub live: usize,
}

/// TCP game-network engine.
pub struct NetworkEngine {
    config: EngineConfig,
    runtime: Handle,
    listener: Option<TcpListener>,
    connections: Vec<Connection>,
    channels: ChannelSet,
    packets: PacketRegistry,
    accept_policy: Option<AcceptPolicy>,
    id_gen: IdGenerator,
}

impl NetworkEngine {
    /// Create an engine. Sends run as tasks on `runtime`.
    pub fn new(config: EngineConfig, runtime: Handle) -> Self {
        Self {
            config,
            runtime,
            listener: None,
            connections: Vec::new(),
            channels: ChannelSet::new(),
            packets: PacketRegistry::new(),
            accept_policy: None,
            id_gen: IdGenerator::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Open the listening socket and return the bound address.
    pub fn start(&mut self) -> Result<SocketAddr, NetError> {
        if cfg!(target_endian = "big") {
            return Err(NetError::UnsupportedHost);
        }
        if self.listener.is_some() {
            return Err(NetError::AlreadyStarted);
        }

        let listener = self.bind()?;
        let addr = listener.local_addr()?;
        tracing::info!("Server listening on {addr}");
        self.listener = Some(listener);
        Ok(addr)
    }

    fn bind(&self) -> Result<TcpListener, NetError> {
        let port = self.config.port;
        let backlog = self.config.backlog;
        let socket = &self.config.socket;
        let open = |addr: SocketAddr| {
            platform::create_listener(addr, backlog, socket)
                .map_err(|source| NetError::Bind { addr, source })
        };

        if let Some(ip) = self.config.bind_ip {
            return open(SocketAddr::new(ip, port));
        }
        if self.config.dual_stack {
            match open(platform::default_bind_address(port)) {
                Ok(listener) => return Ok(listener),
                Err(e) => tracing::warn!("Dual-stack bind failed ({e}), falling back to IPv4"),
            }
        }
        open(platform::ipv4_bind_address(port))
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref()?.local_addr().ok()
    }

    /// Allow peers to select `channel` in their handshake.
    pub fn register_channel(&mut self, channel: u32) -> Result<(), RegistryError> {
        self.channels.register(channel)
    }

    /// Register a packet type and return its ID.
    pub fn register_packet<F>(&mut self, name: &str, handler: F) -> Result<PacketId, RegistryError>
    where
        F: Fn(&mut Connection, &[u8]) -> Result<(), PacketError> + Send + Sync + 'static,
    {
        let id = self.packets.register(name, handler)?;
        tracing::debug!("Registered packet {name:?} as {id}");
        Ok(id)
    }

    /// Register a raw packet type whose handler is built from its own ID.
    pub fn register_packet_with_id<F>(
        &mut self,
        name: &str,
        make: impl FnOnce(PacketId) -> F,
    ) -> Result<PacketId, RegistryError>
    where
        F: Fn(&mut Connection, &[u8]) -> Result<(), PacketError> + Send + Sync + 'static,
    {
        let id = self.packets.register_with_id(name, make)?;
        tracing::debug!("Registered packet {name:?} as {id}");
        Ok(id)
    }

    /// Register a packet type whose payload is decoded as `P`.
    pub fn register_typed_packet<P, F>(
        &mut self,
        name: &str,
        handler: F,
    ) -> Result<PacketId, RegistryError>
    where
        P: DeserializeOwned + 'static,
        F: Fn(&mut Connection, P) -> Result<(), PacketError> + Send + Sync + 'static,
    {
        let id = self.packets.register_typed(name, handler)?;
        tracing::debug!("Registered packet {name:?} as {id}");
        Ok(id)
    }

    /// ID registered for `name`.
    pub fn packet_id(&self, name: &str) -> Option<PacketId> {
        self.packets.id_of(name)
    }

    /// Set the predicate consulted after each valid handshake.
    pub fn set_accept_policy<F>(&mut self, policy: F)
    where
        F: Fn(&mut Connection) -> bool + Send + Sync + 'static,
    {
        self.accept_policy = Some(Box::new(policy));
    }

    /// Accept pending peers, tick every connection, flush their sends and
    /// drop the ones that closed.
    pub fn tick(&mut self) -> TickSummary {
        let accepted = self.accept_pending();

        let ctx = TickContext {
            channels: &self.channels,
            packets: &self.packets,
            accept_policy: self.accept_policy.as_ref(),
            limits: &self.config.limits,
        };
        for conn in &mut self.connections {
            conn.tick(&ctx);
            conn.end_tick();
        }

        let removed = self.remove_closed();
        TickSummary {
            accepted,
            removed,
            live: self.connections.len(),
        }
    }

    fn accept_pending(&mut self) -> usize {
        let Some(listener) = self.listener.as_ref() else {
            return 0;
        };

        let mut accepted = 0;
        loop {
            let (stream, peer_addr) = match listener.accept() {
                Ok(pair) => pair,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Accept failed: {e}");
                    break;
                }
            };

            if let Err(e) = platform::configure_stream(&stream, &self.config.socket) {
                tracing::warn!("Failed to configure socket from {peer_addr}: {e}");
            }
            let id = self.id_gen.next_id();
            match Connection::new(id, stream, peer_addr, &self.runtime, &self.config.limits) {
                Ok(conn) => {
                    tracing::info!("Accepted connection {id} from {peer_addr}");
                    self.connections.push(conn);
                    accepted += 1;
                }
                Err(e) => tracing::warn!("Dropping connection from {peer_addr}: {e}"),
            }
        }
        accepted
    }

    fn remove_closed(&mut self) -> usize {
        let before = self.connections.len();
        self.connections.retain(|conn| {
            let open = conn.is_open();
            if !open {
                tracing::info!(
                    "Connection {} removed ({})",
                    conn.id(),
                    conn.close_reason().unwrap_or("closed")
                );
            }
            open
        });
        before - self.connections.len()
    }

    /// Queue a frame to one connection.
    pub fn send_packet(
        &mut self,
        conn: ConnectionId,
        id: PacketId,
        payload: &[u8],
    ) -> Result<(), NetError> {
        let conn = self
            .connection_mut(conn)
            .ok_or(NetError::UnknownConnection(conn))?;
        conn.send_packet(id, payload)?;
        Ok(())
    }

    /// Queue a frame to every ready connection on `channel`. Returns how
    /// many connections it was queued to; connections whose send fails are
    /// closed.
    pub fn broadcast(&mut self, channel: u32, id: PacketId, payload: &[u8]) -> usize {
        let mut sent = 0;
        for conn in &mut self.connections {
            if conn.state() != ConnectionState::Ready || conn.channel() != Some(channel) {
                continue;
            }
            match conn.send_packet(id, payload) {
                Ok(()) => sent += 1,
                Err(e) => conn.close(&e),
            }
        }
        sent
    }

    /// Close a connection gracefully. It is removed on the next tick.
    pub fn disconnect(&mut self, conn: ConnectionId) -> Result<(), NetError> {
        self.connection_mut(conn)
            .ok_or(NetError::UnknownConnection(conn))?
            .disconnect();
        Ok(())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id() == id)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.id() == id)
    }

    /// Live connections in accept order.
    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Sum of in-flight bytes across live connections. Diagnostic only.
    pub fn total_in_flight(&self) -> usize {
        self.connections.iter().map(Connection::in_flight_bytes).sum()
    }
}
