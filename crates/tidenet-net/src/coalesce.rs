//! Send-side coalescing.
//!
//! Many small application writes are gathered into one pending buffer and
//! handed to the transport as a single send, so a tick's worth of tiny
//! packets does not turn into a burst of tiny TCP segments.

use crate::error::ConnectionError;

/// Default pending-buffer size, chosen to stay under a typical segment.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Destination for coalesced bytes.
///
/// `submit` must not block: it hands the bytes off and returns. Completion
/// is observed through [`in_flight`](Self::in_flight), failure through
/// [`has_failed`](Self::has_failed).
pub trait OutboundSink {
    /// Queue `data` for transmission.
    fn submit(&mut self, data: Vec<u8>) -> Result<(), ConnectionError>;

    /// Bytes submitted but not yet confirmed written.
    fn in_flight(&self) -> usize;

    /// Whether an earlier submission failed.
    fn has_failed(&self) -> bool;
}

/// Buffers outbound bytes and flushes them through an [`OutboundSink`].
///
/// Not internally synchronized; owned by exactly one connection.
pub struct CoalescingSender<S> {
    sink: S,
    pending: Box<[u8]>,
    pending_len: usize,
}

impl<S: OutboundSink> CoalescingSender<S> {
    /// Create a sender with a `capacity`-byte pending buffer.
    pub fn new(sink: S, capacity: usize) -> Self {
        Self {
            sink,
            pending: vec![0; capacity.max(1)].into_boxed_slice(),
            pending_len: 0,
        }
    }

    /// Pending-buffer size.
    pub fn capacity(&self) -> usize {
        self.pending.len()
    }

    /// Bytes waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending_len
    }

    /// The wrapped sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Consume the sender, discarding anything not yet flushed.
    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Queue `bytes`, flushing first if they would not fit.
    ///
    /// Writes at least as large as the buffer bypass it and go straight to
    /// the sink, after anything already pending.
    pub fn send(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let capacity = self.capacity();
        if bytes.len() + self.pending_len >= capacity {
            self.flush()?;
        }
        if bytes.len() >= capacity {
            return self.sink.submit(bytes.to_vec());
        }
        self.pending[self.pending_len..self.pending_len + bytes.len()].copy_from_slice(bytes);
        self.pending_len += bytes.len();
        Ok(())
    }

    /// Submit everything pending as one send. No-op when nothing is queued.
    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        if self.pending_len == 0 {
            return Ok(());
        }
        let data = self.pending[..self.pending_len].to_vec();
        self.pending_len = 0;
        self.sink.submit(data)
    }
}
