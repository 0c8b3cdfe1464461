//! Blocking client for the tidenet wire protocol.
//!
//! Used by tests, tools and bots. Game clients are expected to bring their
//! own transport; this one keeps things simple with a std socket.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::buffer::ByteBuffer;
use crate::connection::READ_CHUNK;
use crate::error::ClientError;
use crate::framing::{self, Frame};
use crate::handshake;
use crate::registry::PacketId;

/// Largest frame the client will accept from a server.
const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Connected client that has already sent its handshake.
pub struct NetClient {
    stream: TcpStream,
    read_buf: ByteBuffer,
    peer_closed: bool,
}

impl NetClient {
    /// Connect to `addr` and send the handshake for `channel`.
    pub fn connect(addr: SocketAddr, channel: u32, opening_info: &str) -> Result<Self, ClientError> {
        let mut stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.write_all(&handshake::encode_handshake(channel, opening_info))?;
        tracing::debug!("Connected to {addr} on channel {channel}");
        Ok(Self {
            stream,
            read_buf: ByteBuffer::with_capacity(READ_CHUNK),
            peer_closed: false,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ClientError> {
        Ok(self.stream.local_addr()?)
    }

    /// Send one raw frame.
    pub fn send_packet(&mut self, id: PacketId, payload: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(&framing::encode_frame(id, payload)?)?;
        Ok(())
    }

    /// Send one frame whose payload is `packet` encoded with postcard.
    pub fn send<P: Serialize>(&mut self, id: PacketId, packet: &P) -> Result<(), ClientError> {
        let payload = postcard::to_allocvec(packet)?;
        self.send_packet(id, &payload)
    }

    /// Write arbitrary bytes, bypassing framing.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ClientError> {
        self.stream.write_all(bytes)?;
        Ok(())
    }

    /// Block until a frame arrives or `timeout` elapses.
    pub fn recv_frame(&mut self, timeout: Duration) -> Result<Frame, ClientError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = framing::take_frame(&mut self.read_buf, MAX_FRAME)? {
                return Ok(frame);
            }
            if self.peer_closed {
                return Err(ClientError::Closed);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(ClientError::Timeout);
            }
            self.stream.set_read_timeout(Some(deadline - now))?;
            self.fill()?;
        }
    }

    /// Return a frame if one is already available, without waiting.
    pub fn try_recv_frame(&mut self) -> Result<Option<Frame>, ClientError> {
        if let Some(frame) = framing::take_frame(&mut self.read_buf, MAX_FRAME)? {
            return Ok(Some(frame));
        }
        if self.peer_closed {
            return Ok(None);
        }
        self.stream.set_nonblocking(true)?;
        let filled = self.fill();
        self.stream.set_nonblocking(false)?;
        filled?;
        Ok(framing::take_frame(&mut self.read_buf, MAX_FRAME)?)
    }

    /// Wait until the server closes the stream, discarding any frames still
    /// in transit. Returns false if it stays open past `timeout`.
    ///
    /// A failed read counts as closed, whatever the error.
    pub fn wait_for_close(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.peer_closed {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let read = self
                .stream
                .set_read_timeout(Some(deadline - now))
                .map_err(ClientError::from)
                .and_then(|()| self.fill());
            if let Err(e) = read {
                tracing::debug!("Stream ended with an error: {e}");
                self.peer_closed = true;
            }
            self.read_buf.clear();
        }
        true
    }

    /// Read whatever is available into the buffer. Timeouts and would-block
    /// are not errors.
    fn fill(&mut self) -> Result<(), ClientError> {
        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => self.peer_closed = true,
            Ok(n) => self.read_buf.write_bytes(&chunk[..n]),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }
}
