//! Background writer that performs a connection's socket sends.
//!
//! Each accepted socket gets one tokio task that owns a duplicate of the
//! socket handle and writes whatever the connection submits, in order. The
//! tick loop never waits on a send.

use std::net::TcpStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::coalesce::OutboundSink;
use crate::connection::ConnectionId;
use crate::error::ConnectionError;

/// [`OutboundSink`] backed by a per-connection tokio write task.
///
/// The in-flight counter is diagnostic only. The task drains its queue on
/// failure so the counter normally returns to zero, but nothing blocks on it.
pub struct AsyncWriter {
    tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    in_flight: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
}

impl AsyncWriter {
    /// Spawn a write task on `runtime` for a duplicate of `stream`.
    pub fn spawn(id: ConnectionId, stream: &TcpStream, runtime: &Handle) -> std::io::Result<Self> {
        let std_stream = stream.try_clone()?;
        std_stream.set_nonblocking(true)?;
        let stream = {
            let _guard = runtime.enter();
            tokio::net::TcpStream::from_std(std_stream)?
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicBool::new(false));

        runtime.spawn(write_loop(
            id,
            stream,
            rx,
            Arc::clone(&in_flight),
            Arc::clone(&failed),
        ));

        Ok(Self {
            tx: Some(tx),
            in_flight,
            failed,
        })
    }

    /// Shared handle to the in-flight byte counter.
    pub fn in_flight_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.in_flight)
    }

    /// Stop accepting submissions. Queued bytes are still written, then the
    /// write half is shut down.
    pub fn finish(&mut self) {
        self.tx = None;
    }
}

impl OutboundSink for AsyncWriter {
    fn submit(&mut self, data: Vec<u8>) -> Result<(), ConnectionError> {
        if self.failed.load(Ordering::Acquire) {
            return Err(ConnectionError::SendFailed);
        }
        let tx = self.tx.as_ref().ok_or(ConnectionError::Closed)?;
        let len = data.len();
        self.in_flight.fetch_add(len, Ordering::AcqRel);
        if tx.send(data).is_err() {
            self.in_flight.fetch_sub(len, Ordering::AcqRel);
            return Err(ConnectionError::SendFailed);
        }
        Ok(())
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

async fn write_loop(
    id: ConnectionId,
    mut stream: tokio::net::TcpStream,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    in_flight: Arc<AtomicUsize>,
    failed: Arc<AtomicBool>,
) {
    while let Some(data) = rx.recv().await {
        let len = data.len();
        let result = stream.write_all(&data).await;
        in_flight.fetch_sub(len, Ordering::AcqRel);

        if let Err(e) = result {
            tracing::debug!("Connection {id} send failed: {e}");
            failed.store(true, Ordering::Release);
            rx.close();
            while let Ok(dropped) = rx.try_recv() {
                in_flight.fetch_sub(dropped.len(), Ordering::AcqRel);
            }
            return;
        }
        tracing::trace!("Connection {id} wrote {len} bytes");
    }

    let _ = stream.shutdown().await;
}
