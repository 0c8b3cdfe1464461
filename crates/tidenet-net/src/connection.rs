//! Per-peer connection state machine.
//!
//! A [`Connection`] wraps one accepted socket and is driven by the engine's
//! tick. Each tick drains whatever the socket has buffered without blocking
//! and feeds it through two phases:
//!
//! - **Handshaking**: bytes accumulate until a `0x00` terminator, then the
//!   handshake is parsed, the channel checked and the accept policy asked.
//! - **Ready**: bytes accumulate into length-prefixed frames, each of which
//!   is dispatched to the handler registered for its packet ID.
//!
//! Any error closes the connection at the tick boundary. Nothing propagates
//! to the engine or to other connections.

use std::any::Any;
use std::fmt;
use std::io::{ErrorKind, Read};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use serde::Serialize;
use tokio::runtime::Handle;

use crate::buffer::ByteBuffer;
use crate::coalesce::{CoalescingSender, OutboundSink};
use crate::error::{ConnectionError, PacketError};
use crate::framing::{self, Frame};
use crate::handshake::{self, TERMINATOR};
use crate::registry::{ChannelSet, PacketId, PacketRegistry};
use crate::writer::AsyncWriter;

/// Bytes requested from the socket per read call.
pub const READ_CHUNK: usize = 1024;

/// Unique identifier for a connection within one engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Atomic generator for monotonically increasing [`ConnectionId`]s.
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Create a new generator starting at 1.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return the next unique [`ConnectionId`].
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Lifecycle of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the handshake terminator.
    Handshaking,
    /// Handshake accepted; bytes are parsed as frames.
    Ready,
    /// Socket released; the engine removes the connection on its next pass.
    Closed,
}

/// Decides whether a peer that completed the handshake is admitted.
///
/// May attach a tag with [`Connection::set_tag`].
pub type AcceptPolicy = Box<dyn Fn(&mut Connection) -> bool + Send + Sync>;

/// Per-connection ceilings.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    /// Maximum handshake bytes before the terminator.
    pub header_byte_limit: usize,
    /// Maximum unparsed body bytes, and maximum single frame length.
    pub max_pending_packet: usize,
    /// Size of the coalescing send buffer.
    pub coalesce_buffer_size: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            header_byte_limit: 10 * 1024,
            max_pending_packet: 10 * 1024 * 1024,
            coalesce_buffer_size: crate::coalesce::DEFAULT_CAPACITY,
        }
    }
}

impl ConnectionLimits {
    /// Bytes read from one socket in a single tick.
    pub fn read_budget(&self) -> usize {
        self.max_pending_packet.max(READ_CHUNK)
    }
}

/// Engine state a connection reads while ticking.
pub(crate) struct TickContext<'a> {
    pub channels: &'a ChannelSet,
    pub packets: &'a PacketRegistry,
    pub accept_policy: Option<&'a AcceptPolicy>,
    pub limits: &'a ConnectionLimits,
}

/// Open socket plus its send path. Absent once the connection is closed.
struct Link {
    stream: TcpStream,
    sender: CoalescingSender<AsyncWriter>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Handshaking,
    Ready,
}

/// One accepted peer.
pub struct Connection {
    id: ConnectionId,
    peer_addr: SocketAddr,
    phase: Phase,
    link: Option<Link>,
    channel: Option<u32>,
    opening_info: String,
    read_buf: ByteBuffer,
    bytes_sent: u64,
    bytes_received: u64,
    in_flight: Arc<AtomicUsize>,
    tag: Option<Box<dyn Any + Send>>,
    close_reason: Option<String>,
}

impl Connection {
    /// Wrap an accepted socket. The socket is switched to non-blocking mode
    /// and a write task is spawned on `runtime`.
    pub fn new(
        id: ConnectionId,
        stream: TcpStream,
        peer_addr: SocketAddr,
        runtime: &Handle,
        limits: &ConnectionLimits,
    ) -> std::io::Result<Self> {
        stream.set_nonblocking(true)?;
        let writer = AsyncWriter::spawn(id, &stream, runtime)?;
        let in_flight = writer.in_flight_counter();

        Ok(Self {
            id,
            peer_addr,
            phase: Phase::Handshaking,
            link: Some(Link {
                stream,
                sender: CoalescingSender::new(writer, limits.coalesce_buffer_size),
            }),
            channel: None,
            opening_info: String::new(),
            read_buf: ByteBuffer::with_capacity(READ_CHUNK),
            bytes_sent: 0,
            bytes_received: 0,
            in_flight,
            tag: None,
            close_reason: None,
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        match (&self.link, self.phase) {
            (None, _) => ConnectionState::Closed,
            (Some(_), Phase::Handshaking) => ConnectionState::Handshaking,
            (Some(_), Phase::Ready) => ConnectionState::Ready,
        }
    }

    pub fn is_open(&self) -> bool {
        self.link.is_some()
    }

    /// Channel chosen in the handshake. Set once the channel is validated.
    pub fn channel(&self) -> Option<u32> {
        self.channel
    }

    /// Metadata the peer sent after the channel number.
    pub fn opening_info(&self) -> &str {
        &self.opening_info
    }

    /// Total frame bytes queued for sending.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    /// Total bytes read from the socket.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Bytes handed to the writer task and not yet written. Diagnostic only.
    pub fn in_flight_bytes(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Why the connection closed, once it has.
    pub fn close_reason(&self) -> Option<&str> {
        self.close_reason.as_deref()
    }

    /// Attach an application value, replacing any previous one.
    pub fn set_tag<T: Any + Send>(&mut self, tag: T) {
        self.tag = Some(Box::new(tag));
    }

    /// The attached value, if one of type `T` is set.
    pub fn tag<T: Any>(&self) -> Option<&T> {
        self.tag.as_deref()?.downcast_ref()
    }

    /// Queue one frame. It reaches the socket at the next flush, or sooner
    /// if the coalescing buffer fills.
    pub fn send_packet(&mut self, id: PacketId, payload: &[u8]) -> Result<(), ConnectionError> {
        let link = self.link.as_mut().ok_or(ConnectionError::Closed)?;
        let frame = framing::encode_frame(id, payload)?;
        link.sender.send(&frame)?;
        self.bytes_sent += frame.len() as u64;
        Ok(())
    }

    /// Queue one frame whose payload is `packet` encoded with postcard.
    pub fn send<P: Serialize>(&mut self, id: PacketId, packet: &P) -> Result<(), PacketError> {
        let payload = postcard::to_allocvec(packet)?;
        self.send_packet(id, &payload)?;
        Ok(())
    }

    /// Hand everything queued to the writer task.
    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        match self.link.as_mut() {
            Some(link) => link.sender.flush(),
            None => Ok(()),
        }
    }

    /// Close gracefully: queued frames are still delivered before the peer
    /// sees end-of-stream.
    pub fn disconnect(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        let Link { stream, mut sender } = link;
        if let Err(e) = sender.flush() {
            tracing::debug!("Connection {} final flush failed: {e}", self.id);
        }
        sender.into_sink().finish();
        let _ = stream.shutdown(Shutdown::Read);
        self.close_reason = Some(ConnectionError::Disconnected.to_string());
        tracing::info!("Connection {} disconnected", self.id);
    }

    /// Close immediately in both directions, discarding unsent data.
    pub(crate) fn close(&mut self, error: &ConnectionError) {
        let Some(link) = self.link.take() else {
            return;
        };
        let _ = link.stream.shutdown(Shutdown::Both);
        self.close_reason = Some(error.to_string());
        match error {
            ConnectionError::PeerClosed => {
                tracing::info!("Connection {} from {} closed by peer", self.id, self.peer_addr);
            }
            _ => {
                tracing::warn!(
                    "Closing connection {} from {}: {error}",
                    self.id,
                    self.peer_addr
                );
            }
        }
    }

    /// Run one poll. Errors are converted into a closed connection here.
    pub(crate) fn tick(&mut self, ctx: &TickContext<'_>) {
        if !self.is_open() {
            return;
        }
        if let Err(e) = self.poll(ctx) {
            self.close(&e);
        }
    }

    /// Flush at the end of a tick, closing on failure.
    pub(crate) fn end_tick(&mut self) {
        if let Err(e) = self.flush() {
            self.close(&e);
        }
    }

    /// Read until the socket would block or this tick's byte budget is
    /// spent. Whatever is left stays in the kernel for the next tick.
    fn poll(&mut self, ctx: &TickContext<'_>) -> Result<(), ConnectionError> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut budget = ctx.limits.read_budget();
        while budget > 0 {
            let Some(link) = self.link.as_mut() else {
                return Ok(());
            };
            if link.sender.sink().has_failed() {
                return Err(ConnectionError::SendFailed);
            }
            let want = budget.min(READ_CHUNK);
            let n = match link.stream.read(&mut chunk[..want]) {
                Ok(0) => return Err(ConnectionError::PeerClosed),
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            budget -= n;
            self.bytes_received += n as u64;
            self.ingest(ctx, &chunk[..n])?;
        }
        Ok(())
    }

    /// Feed freshly read bytes through the state machine.
    fn ingest(&mut self, ctx: &TickContext<'_>, mut data: &[u8]) -> Result<(), ConnectionError> {
        if self.phase == Phase::Handshaking {
            let end = data.iter().position(|&b| b == TERMINATOR);
            let header = &data[..end.unwrap_or(data.len())];
            if self.read_buf.len() + header.len() > ctx.limits.header_byte_limit {
                return Err(ConnectionError::HeaderTooLarge {
                    limit: ctx.limits.header_byte_limit,
                });
            }
            self.read_buf.write_bytes(header);

            let Some(end) = end else {
                return Ok(());
            };
            self.complete_handshake(ctx)?;
            data = &data[end + 1..];
        }

        self.read_buf.write_bytes(data);
        framing::check_pending(&self.read_buf, ctx.limits.max_pending_packet)?;

        while self.is_open() {
            match framing::take_frame(&mut self.read_buf, ctx.limits.max_pending_packet)? {
                Some(frame) => self.dispatch(ctx, frame)?,
                None => break,
            }
        }
        Ok(())
    }

    fn complete_handshake(&mut self, ctx: &TickContext<'_>) -> Result<(), ConnectionError> {
        let parsed = handshake::parse_handshake(self.read_buf.as_slice());
        self.read_buf.clear();
        let handshake = parsed?;

        if !ctx.channels.contains(handshake.channel) {
            return Err(ConnectionError::UnknownChannel(handshake.channel));
        }
        self.channel = Some(handshake.channel);
        self.opening_info = handshake.opening_info;

        let accepted = ctx.accept_policy.is_none_or(|policy| policy(self));
        if !accepted {
            return Err(ConnectionError::Rejected);
        }

        self.phase = Phase::Ready;
        tracing::info!(
            "Connection {} ready on channel {} ({:?})",
            self.id,
            handshake.channel,
            self.opening_info
        );
        Ok(())
    }

    fn dispatch(&mut self, ctx: &TickContext<'_>, frame: Frame) -> Result<(), ConnectionError> {
        let handler = ctx
            .packets
            .handler(frame.id)
            .ok_or(ConnectionError::UnknownPacket(frame.id))?;
        tracing::trace!(
            "Connection {} received packet {} ({} bytes)",
            self.id,
            frame.id,
            frame.payload.len()
        );
        handler(self, &frame.payload).map_err(|source| ConnectionError::Handler {
            packet: frame.id,
            source,
        })
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .field("channel", &self.channel)
            .field("opening_info", &self.opening_info)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::time::Duration;

    use super::*;
    use crate::test_support::{loopback_pair, runtime, wait_until};

    struct Fixture {
        channels: ChannelSet,
        packets: PacketRegistry,
        policy: Option<AcceptPolicy>,
        limits: ConnectionLimits,
        received: Arc<AtomicUsize>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut channels = ChannelSet::new();
            channels.register(1).unwrap();
            let received = Arc::new(AtomicUsize::new(0));
            let mut packets = PacketRegistry::new();
            let counter = Arc::clone(&received);
            packets
                .register("count", move |_, payload| {
                    counter.fetch_add(payload.len(), Ordering::SeqCst);
                    Ok(())
                })
                .unwrap();
            packets
                .register("echo", |conn, payload| {
                    conn.send_packet(PacketId(1), payload)?;
                    Ok(())
                })
                .unwrap();
            packets
                .register("fail", |_, _| Err(PacketError::Invalid("nope".into())))
                .unwrap();
            Self {
                channels,
                packets,
                policy: None,
                limits: ConnectionLimits::default(),
                received,
            }
        }

        fn ctx(&self) -> TickContext<'_> {
            TickContext {
                channels: &self.channels,
                packets: &self.packets,
                accept_policy: self.policy.as_ref(),
                limits: &self.limits,
            }
        }
    }

    fn open(rt: &tokio::runtime::Runtime, fixture: &Fixture) -> (Connection, TcpStream) {
        let (server, client) = loopback_pair();
        let peer = client.local_addr().unwrap();
        let conn = Connection::new(ConnectionId(1), server, peer, rt.handle(), &fixture.limits)
            .unwrap();
        (conn, client)
    }

    fn tick_until(
        conn: &mut Connection,
        fixture: &Fixture,
        mut cond: impl FnMut(&Connection) -> bool,
    ) -> bool {
        wait_until(|| {
            conn.tick(&fixture.ctx());
            conn.end_tick();
            cond(conn)
        })
    }

    fn tick_until_state(conn: &mut Connection, fixture: &Fixture, state: ConnectionState) -> bool {
        tick_until(conn, fixture, |c| c.state() == state)
    }

    fn received(fixture: &Fixture) -> usize {
        fixture.received.load(Ordering::SeqCst)
    }

    #[test]
    fn test_valid_handshake_reaches_ready() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, mut client) = open(&rt, &fixture);
        assert_eq!(conn.state(), ConnectionState::Handshaking);

        client
            .write_all(&handshake::encode_handshake(1, "name=alice"))
            .unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Ready));
        assert_eq!(conn.channel(), Some(1));
        assert_eq!(conn.opening_info(), "name=alice");
    }

    #[test]
    fn test_handshake_split_across_ticks() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, mut client) = open(&rt, &fixture);
        let bytes = handshake::encode_handshake(1, "slow");

        for byte in &bytes[..bytes.len() - 1] {
            client.write_all(&[*byte]).unwrap();
            conn.tick(&fixture.ctx());
        }
        let header_len = bytes.len() as u64 - 1;
        assert!(tick_until(&mut conn, &fixture, |c| c.bytes_received() == header_len));
        assert_eq!(conn.state(), ConnectionState::Handshaking);

        client.write_all(&[TERMINATOR]).unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Ready));
    }

    #[test]
    fn test_frames_after_terminator_in_same_read() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, mut client) = open(&rt, &fixture);

        let mut bytes = handshake::encode_handshake(1, "");
        bytes.extend(framing::encode_frame(PacketId(0), b"12345").unwrap());
        client.write_all(&bytes).unwrap();

        assert!(tick_until(&mut conn, &fixture, |_| received(&fixture) == 5));
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_bad_header_closes() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, mut client) = open(&rt, &fixture);

        client.write_all(b"HELLO/9\n1:info\n\0").unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Closed));
        assert!(conn.channel().is_none());
    }

    #[test]
    fn test_unregistered_channel_closes() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, mut client) = open(&rt, &fixture);

        client
            .write_all(&handshake::encode_handshake(99, "info"))
            .unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Closed));
        assert_eq!(conn.close_reason(), Some("channel 99 is not registered"));
    }

    #[test]
    fn test_header_overflow_closes_before_ready() {
        let rt = runtime();
        let mut fixture = Fixture::new();
        fixture.limits.header_byte_limit = 64;
        let (mut conn, mut client) = open(&rt, &fixture);

        client.write_all(&[b'A'; 65]).unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Closed));
        assert!(conn.channel().is_none());
    }

    #[test]
    fn test_header_at_limit_is_accepted() {
        let rt = runtime();
        let mut fixture = Fixture::new();
        let bytes = handshake::encode_handshake(1, "padding");
        fixture.limits.header_byte_limit = bytes.len() - 1;
        let (mut conn, mut client) = open(&rt, &fixture);

        client.write_all(&bytes).unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Ready));
    }

    #[test]
    fn test_accept_policy_rejects() {
        let rt = runtime();
        let mut fixture = Fixture::new();
        fixture.policy = Some(Box::new(|conn: &mut Connection| {
            conn.opening_info() != "banned"
        }));
        let (mut conn, mut client) = open(&rt, &fixture);

        client
            .write_all(&handshake::encode_handshake(1, "banned"))
            .unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Closed));
        assert_eq!(conn.close_reason(), Some("rejected by accept policy"));
    }

    #[test]
    fn test_accept_policy_attaches_tag() {
        let rt = runtime();
        let mut fixture = Fixture::new();
        fixture.policy = Some(Box::new(|conn: &mut Connection| {
            let name = conn.opening_info().to_string();
            conn.set_tag(name);
            true
        }));
        let (mut conn, mut client) = open(&rt, &fixture);

        client
            .write_all(&handshake::encode_handshake(1, "bob"))
            .unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Ready));
        assert_eq!(conn.tag::<String>().map(String::as_str), Some("bob"));
        assert!(conn.tag::<u32>().is_none());
    }

    #[test]
    fn test_frame_dribbled_byte_by_byte() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, mut client) = open(&rt, &fixture);

        client
            .write_all(&handshake::encode_handshake(1, ""))
            .unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Ready));

        let frame = framing::encode_frame(PacketId(0), &[7u8; 300]).unwrap();
        for byte in &frame {
            client.write_all(&[*byte]).unwrap();
            conn.tick(&fixture.ctx());
        }
        assert!(tick_until(&mut conn, &fixture, |_| received(&fixture) == 300));
    }

    #[test]
    fn test_oversized_pending_closes() {
        let rt = runtime();
        let mut fixture = Fixture::new();
        fixture.limits.max_pending_packet = 2048;
        let (mut conn, mut client) = open(&rt, &fixture);

        client
            .write_all(&handshake::encode_handshake(1, ""))
            .unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Ready));

        // Claims a frame far larger than the ceiling.
        client.write_all(&i32::MAX.to_le_bytes()).unwrap();
        client.write_all(&[0u8; 16]).unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Closed));
    }

    #[test]
    fn test_pending_bytes_without_complete_frame_close() {
        let rt = runtime();
        let mut fixture = Fixture::new();
        fixture.limits.max_pending_packet = 2048;
        let (mut conn, mut client) = open(&rt, &fixture);

        let hello = handshake::encode_handshake(1, "");
        client.write_all(&hello).unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Ready));

        // A frame of exactly the ceiling can never be fully buffered, since
        // its prefix counts toward the pending bytes too.
        client.write_all(&2048i32.to_le_bytes()).unwrap();
        client.write_all(&[0u8; 1990]).unwrap();
        let expected = (hello.len() + 4 + 1990) as u64;
        assert!(tick_until(&mut conn, &fixture, |c| c.bytes_received() == expected));
        assert_eq!(conn.state(), ConnectionState::Ready);

        client.write_all(&[0u8; 100]).unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Closed));
    }

    #[test]
    fn test_reads_per_tick_are_bounded() {
        let rt = runtime();
        let mut fixture = Fixture::new();
        fixture.limits.max_pending_packet = 4096;
        let budget = fixture.limits.read_budget() as u64;
        let (mut conn, mut client) = open(&rt, &fixture);

        client
            .write_all(&handshake::encode_handshake(1, ""))
            .unwrap();
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Ready));

        // 40 frames of 1024 wire bytes each, far more than one tick may read.
        let mut flood = Vec::new();
        for _ in 0..40 {
            flood.extend(framing::encode_frame(PacketId(0), &[1u8; 1019]).unwrap());
        }
        client.write_all(&flood).unwrap();

        let mut ticks = 0;
        let mut max_step = 0;
        let mut last = conn.bytes_received();
        assert!(tick_until(&mut conn, &fixture, |c| {
            ticks += 1;
            max_step = max_step.max(c.bytes_received() - last);
            last = c.bytes_received();
            received(&fixture) == 40 * 1019
        }));
        assert!(max_step <= budget);
        assert!(ticks >= flood.len() as u64 / budget);
        assert_eq!(conn.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_unknown_packet_closes() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, mut client) = open(&rt, &fixture);

        let mut bytes = handshake::encode_handshake(1, "");
        bytes.extend(framing::encode_frame(PacketId(42), b"?").unwrap());
        client.write_all(&bytes).unwrap();

        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Closed));
        assert_eq!(conn.close_reason(), Some("unknown packet id 42"));
    }

    #[test]
    fn test_handler_error_closes() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, mut client) = open(&rt, &fixture);

        let mut bytes = handshake::encode_handshake(1, "");
        bytes.extend(framing::encode_frame(PacketId(2), b"").unwrap());
        client.write_all(&bytes).unwrap();

        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Closed));
    }

    #[test]
    fn test_reply_reaches_peer() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, mut client) = open(&rt, &fixture);

        let mut bytes = handshake::encode_handshake(1, "");
        bytes.extend(framing::encode_frame(PacketId(1), b"ping").unwrap());
        client.write_all(&bytes).unwrap();

        let expected = framing::encode_frame(PacketId(1), b"ping").unwrap();
        let expected_len = expected.len() as u64;
        assert!(tick_until(&mut conn, &fixture, |c| c.bytes_sent() == expected_len));
        conn.end_tick();

        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reply = vec![0u8; expected.len()];
        client.read_exact(&mut reply).unwrap();
        assert_eq!(reply, expected);
    }

    #[test]
    fn test_peer_close_closes() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, client) = open(&rt, &fixture);

        drop(client);
        assert!(tick_until_state(&mut conn, &fixture, ConnectionState::Closed));
        assert_eq!(conn.close_reason(), Some("peer closed the connection"));
    }

    #[test]
    fn test_send_after_close_fails() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, _client) = open(&rt, &fixture);

        conn.close(&ConnectionError::Rejected);
        assert!(matches!(
            conn.send_packet(PacketId(0), b"x"),
            Err(ConnectionError::Closed)
        ));
    }

    #[test]
    fn test_disconnect_delivers_queued_frames() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, mut client) = open(&rt, &fixture);

        conn.send_packet(PacketId(3), b"farewell").unwrap();
        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Closed);

        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut received = Vec::new();
        client.read_to_end(&mut received).unwrap();
        assert_eq!(received, framing::encode_frame(PacketId(3), b"farewell").unwrap());
    }

    #[test]
    fn test_in_flight_drains() {
        let rt = runtime();
        let fixture = Fixture::new();
        let (mut conn, mut client) = open(&rt, &fixture);

        conn.send_packet(PacketId(0), &[1u8; 5000]).unwrap();
        client
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut sink = vec![0u8; 5000 + 4 + 1];
        client.read_exact(&mut sink).unwrap();
        assert!(wait_until(|| conn.in_flight_bytes() == 0));
    }
}
