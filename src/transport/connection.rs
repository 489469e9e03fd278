//! WebSocket connection and background IO tasks.
//!
//! A [`Transport`] owns the socket through two spawned tasks: a reader that
//! queues every inbound text/binary frame, and a writer that drains an
//! outbound queue while accounting buffered-but-unsent bytes. The byte
//! counter is what upload backpressure polls against.
//!
//! Disconnection at any point marks the transport closed; every queued and
//! future operation then fails with a connection-lost error.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, trace};

use crate::error::{Error, Result};

use super::endpoint::WsStream;

// ============================================================================
// Types
// ============================================================================

/// An inbound frame, already stripped to its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    /// A text frame (JSON control message).
    Text(String),
    /// A binary frame (raw data).
    Binary(Vec<u8>),
}

/// Outbound queue entries for the writer task.
enum Outbound {
    /// A frame to send; the `usize` is the payload length to release from
    /// the buffered-byte counter once the socket write completes.
    Frame(Message, usize),
    /// Send a close frame and stop writing.
    Close,
}

// ============================================================================
// TransportStatus
// ============================================================================

/// Shared view of a transport's health, usable without the exchange lock.
///
/// Watchers, backpressure loops and the console's state accessor all read
/// this; the shutdown path writes it.
#[derive(Clone)]
pub(crate) struct TransportStatus {
    closed: Arc<AtomicBool>,
    buffered: Arc<AtomicUsize>,
    outbound_tx: mpsc::UnboundedSender<Outbound>,
}

impl TransportStatus {
    /// Returns `true` once either IO task has stopped.
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Returns the number of bytes queued but not yet written to the
    /// socket.
    #[inline]
    pub(crate) fn buffered_bytes(&self) -> usize {
        self.buffered.load(Ordering::Acquire)
    }

    /// Requests a graceful close. Idempotent.
    pub(crate) fn shutdown(&self) {
        let _ = self.outbound_tx.send(Outbound::Close);
    }
}

// ============================================================================
// Transport
// ============================================================================

/// A connected WebSocket transport.
///
/// Sends are non-blocking enqueues; receives pop the inbound frame queue
/// with a per-call timeout. The exchange discipline on top of this lives
/// in [`super::RequestChannel`].
pub struct Transport {
    outbound_tx: mpsc::UnboundedSender<Outbound>,
    inbound_rx: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<AtomicBool>,
    buffered: Arc<AtomicUsize>,
}

impl Transport {
    /// Wraps an established WebSocket stream, spawning the IO tasks.
    pub(crate) fn new(ws: WsStream) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let buffered = Arc::new(AtomicUsize::new(0));

        let (ws_write, ws_read) = ws.split();

        tokio::spawn(run_writer(
            ws_write,
            outbound_rx,
            Arc::clone(&closed),
            Arc::clone(&buffered),
        ));
        tokio::spawn(run_reader(ws_read, inbound_tx, Arc::clone(&closed)));

        Self {
            outbound_tx,
            inbound_rx,
            closed,
            buffered,
        }
    }

    /// Returns a shareable status handle.
    pub(crate) fn status(&self) -> TransportStatus {
        TransportStatus {
            closed: Arc::clone(&self.closed),
            buffered: Arc::clone(&self.buffered),
            outbound_tx: self.outbound_tx.clone(),
        }
    }

    /// Returns `true` once the connection is gone.
    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueues a text frame.
    pub(crate) fn send_text(&self, text: String) -> Result<()> {
        let len = text.len();
        self.enqueue(Outbound::Frame(Message::Text(text.into()), len), len)
    }

    /// Enqueues a binary frame.
    pub(crate) fn send_binary(&self, data: Vec<u8>) -> Result<()> {
        let len = data.len();
        self.enqueue(Outbound::Frame(Message::Binary(data.into()), len), len)
    }

    fn enqueue(&self, frame: Outbound, len: usize) -> Result<()> {
        if self.is_closed() {
            return Err(Error::connection_lost("transport is closed"));
        }
        self.buffered.fetch_add(len, Ordering::AcqRel);
        self.outbound_tx.send(frame).map_err(|_| {
            self.buffered.fetch_sub(len, Ordering::AcqRel);
            Error::connection_lost("transport writer stopped")
        })
    }

    /// Pops the next inbound frame, waiting up to `wait`.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if no frame arrives in time (`operation` labels
    ///   the wait in the error)
    /// - [`Error::ConnectionLost`] if the connection ends first
    pub(crate) async fn recv(&mut self, wait: Duration, operation: &str) -> Result<Frame> {
        match timeout(wait, self.inbound_rx.recv()).await {
            Ok(Some(frame)) => Ok(frame),
            Ok(None) => Err(Error::connection_lost("connection closed by server")),
            Err(_) => Err(Error::timeout(operation, wait.as_millis() as u64)),
        }
    }
}

// ============================================================================
// IO Tasks
// ============================================================================

/// Writer task: drains the outbound queue onto the socket.
async fn run_writer(
    mut ws_write: futures_util::stream::SplitSink<WsStream, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<Outbound>,
    closed: Arc<AtomicBool>,
    buffered: Arc<AtomicUsize>,
) {
    while let Some(entry) = outbound_rx.recv().await {
        match entry {
            Outbound::Frame(message, len) => {
                let result = ws_write.send(message).await;
                buffered.fetch_sub(len, Ordering::AcqRel);

                if let Err(e) = result {
                    error!(error = %e, "websocket write failed");
                    break;
                }
                trace!(len, "frame written");
            }

            Outbound::Close => {
                debug!("closing websocket");
                let _ = ws_write.send(Message::Close(None)).await;
                break;
            }
        }
    }

    closed.store(true, Ordering::Release);
    debug!("writer task stopped");
}

/// Reader task: queues inbound frames until the socket ends.
async fn run_reader(
    mut ws_read: futures_util::stream::SplitStream<WsStream>,
    inbound_tx: mpsc::UnboundedSender<Frame>,
    closed: Arc<AtomicBool>,
) {
    loop {
        match ws_read.next().await {
            Some(Ok(Message::Text(text))) => {
                if inbound_tx.send(Frame::Text(text.to_string())).is_err() {
                    break;
                }
            }

            Some(Ok(Message::Binary(data))) => {
                if inbound_tx.send(Frame::Binary(data.to_vec())).is_err() {
                    break;
                }
            }

            Some(Ok(Message::Close(_))) => {
                debug!("websocket closed by remote");
                break;
            }

            Some(Err(e)) => {
                error!(error = %e, "websocket read failed");
                break;
            }

            None => {
                debug!("websocket stream ended");
                break;
            }

            // Ping/Pong and raw frames are transport noise.
            Some(Ok(_)) => {}
        }
    }

    closed.store(true, Ordering::Release);
    debug!("reader task stopped");
}

// ============================================================================
// Tests
// ============================================================================
