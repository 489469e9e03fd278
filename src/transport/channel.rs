//! Exclusive FIFO request/reply channel.
//!
//! [`RequestChannel`] wraps the [`Transport`] behind a FIFO-fair async
//! mutex. Every caller that wants to talk to the device — a one-shot read,
//! a transfer chunk, a watcher poll tick — acquires the lease, performs its
//! exchange, and releases it. Because replies carry no correlation ids,
//! this exclusivity is what makes reply matching correct at all.
//!
//! A reply that never starts is a timeout and leaves the connection
//! usable. A reply that starts and stops short, or arrives with the wrong
//! frame type, means the stream has desynchronized: the transport is shut
//! down and the error reports a protocol mismatch.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{sleep, Instant};
use tracing::{trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{Reply, Request};

use super::connection::{Frame, Transport, TransportStatus};

// ============================================================================
// Constants
// ============================================================================

/// Sleep between backpressure polls while waiting for the outbound buffer
/// to drain.
const DRAIN_POLL: Duration = Duration::from_millis(5);

// ============================================================================
// RequestChannel
// ============================================================================

/// Serializes all protocol exchanges into one-at-a-time request/reply
/// pairs.
///
/// # Thread Safety
///
/// `RequestChannel` is `Send + Sync`; callers queue on the internal lock
/// in FIFO order.
pub struct RequestChannel {
    guts: Mutex<Transport>,
    status: TransportStatus,
}

impl RequestChannel {
    /// Wraps a connected transport.
    pub(crate) fn new(transport: Transport) -> Self {
        let status = transport.status();
        Self {
            guts: Mutex::new(transport),
            status,
        }
    }

    /// Acquires the exclusive channel lease, waiting in FIFO order.
    pub async fn lease(&self) -> ChannelLease<'_> {
        ChannelLease {
            transport: self.guts.lock().await,
            status: &self.status,
        }
    }

    /// Returns `true` once the underlying connection is gone.
    #[inline]
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status.is_closed()
    }

    /// Returns the outbound buffered-byte count.
    #[inline]
    #[must_use]
    pub fn buffered_bytes(&self) -> usize {
        self.status.buffered_bytes()
    }

    /// Closes the connection. Idempotent; safe to call from any task.
    pub fn shutdown(&self) {
        self.status.shutdown();
    }

    /// One full JSON exchange: send `request`, wait for its structured
    /// reply.
    pub(crate) async fn round_trip(&self, request: &Request, wait: Duration) -> Result<Reply> {
        let mut lease = self.lease().await;
        lease.send_request(request)?;
        lease.recv_reply(wait, &request.opcode.to_string()).await
    }

    /// Sends a fire-and-forget request (an opcode with no reply).
    pub(crate) async fn command(&self, request: &Request) -> Result<()> {
        let mut lease = self.lease().await;
        lease.send_request(request)
    }
}

// ============================================================================
// ChannelLease
// ============================================================================

/// Exclusive access to the transport for one protocol exchange (or one
/// indivisible multi-frame sequence such as a file transfer's binary
/// phase).
///
/// Dropping the lease releases the channel to the next FIFO waiter.
pub struct ChannelLease<'a> {
    transport: MutexGuard<'a, Transport>,
    status: &'a TransportStatus,
}

impl ChannelLease<'_> {
    /// Serializes and sends a request as one text frame.
    pub(crate) fn send_request(&mut self, request: &Request) -> Result<()> {
        let json = serde_json::to_string(request)?;
        trace!(opcode = %request.opcode, "sending request");
        self.transport.send_text(json)
    }

    /// Sends one binary frame.
    pub(crate) fn send_binary(&mut self, data: Vec<u8>) -> Result<()> {
        self.transport.send_binary(data)
    }

    /// Receives one JSON reply.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if nothing arrives within `wait`
    /// - [`Error::ProtocolMismatch`] if a binary frame or malformed JSON
    ///   arrives instead (the transport is shut down)
    pub(crate) async fn recv_reply(&mut self, wait: Duration, operation: &str) -> Result<Reply> {
        match self.transport.recv(wait, operation).await? {
            Frame::Text(text) => serde_json::from_str(&text).map_err(|e| {
                self.desync(format!("unparseable reply to {operation}: {e}"))
            }),
            Frame::Binary(data) => {
                Err(self.desync(format!(
                    "binary frame ({} bytes) where a JSON reply to {operation} was expected",
                    data.len()
                )))
            }
        }
    }

    /// Receives binary frames until exactly `expected` bytes have
    /// accumulated.
    ///
    /// Each frame wait is bounded by `frame_wait`. A timeout before any
    /// byte arrives leaves the connection usable; a timeout mid-payload,
    /// a text frame mid-payload, or an overrun shuts the transport down.
    pub(crate) async fn recv_binary_exact(
        &mut self,
        expected: usize,
        frame_wait: Duration,
        operation: &str,
    ) -> Result<Vec<u8>> {
        let mut data: Vec<u8> = Vec::with_capacity(expected);

        while data.len() < expected {
            match self.transport.recv(frame_wait, operation).await {
                Ok(Frame::Binary(chunk)) => data.extend_from_slice(&chunk),

                Ok(Frame::Text(_)) => {
                    return Err(self.desync(format!(
                        "text frame inside binary reply to {operation} ({}/{expected} bytes)",
                        data.len()
                    )));
                }

                Err(e) if e.is_timeout() && data.is_empty() => return Err(e),

                Err(e) if e.is_timeout() => {
                    return Err(self.desync(format!(
                        "binary reply to {operation} stopped short: {}/{expected} bytes",
                        data.len()
                    )));
                }

                Err(e) => return Err(e),
            }
        }

        if data.len() != expected {
            return Err(self.desync(format!(
                "binary reply to {operation} overran: {}/{expected} bytes",
                data.len()
            )));
        }

        Ok(data)
    }

    /// Receives one binary frame of whatever size the server chose.
    ///
    /// Used by downloads, where the far end picks the framing.
    pub(crate) async fn recv_binary_frame(
        &mut self,
        wait: Duration,
        operation: &str,
    ) -> Result<Vec<u8>> {
        match self.transport.recv(wait, operation).await? {
            Frame::Binary(data) => Ok(data),
            Frame::Text(_) => {
                Err(self.desync(format!("text frame inside binary stream for {operation}")))
            }
        }
    }

    /// Waits until the outbound buffer drops to `limit` bytes or less.
    ///
    /// `deadline`, when given, bounds the wait.
    pub(crate) async fn wait_for_drain(
        &mut self,
        limit: usize,
        deadline: Option<Instant>,
        operation: &str,
    ) -> Result<()> {
        drain_below(self.status, limit, deadline, operation).await
    }

    /// Marks the stream desynchronized: shuts the transport down and
    /// builds the mismatch error.
    fn desync(&self, message: String) -> Error {
        warn!(message = %message, "request/reply stream desynchronized; closing connection");
        self.status.shutdown();
        Error::protocol_mismatch(message)
    }
}

// ============================================================================
// Backpressure
// ============================================================================

/// Polls the buffered-byte counter until it drops to `limit` or less.
pub(crate) async fn drain_below(
    status: &TransportStatus,
    limit: usize,
    deadline: Option<Instant>,
    operation: &str,
) -> Result<()> {
    while status.buffered_bytes() > limit {
        if status.is_closed() {
            return Err(Error::connection_lost("connection closed while draining"));
        }
        if let Some(deadline) = deadline
            && Instant::now() >= deadline
        {
            return Err(Error::timeout(operation, 0));
        }
        sleep(DRAIN_POLL).await;
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    use crate::protocol::{AddressSpace, Opcode};
    use crate::testutil::{connect_channel, spawn_scripted_server};

    #[tokio::test]
    async fn test_round_trip() {
        let (url, _server) = spawn_scripted_server(|mut ws| async move {
            let msg = ws.next().await.expect("request").expect("frame");
            let text = match msg {
                Message::Text(t) => t.to_string(),
                other => panic!("expected text frame, got {other:?}"),
            };
            assert!(text.contains("\"Opcode\":\"DeviceList\""));
            ws.send(Message::Text(
                r#"{"Results":["SD2SNES COM3"]}"#.to_string().into(),
            ))
            .await
            .expect("reply");
        })
        .await;

        let channel = connect_channel(&url).await;
        let request = Request::new(Opcode::DeviceList, AddressSpace::Snes);
        let reply = channel
            .round_trip(&request, Duration::from_secs(2))
            .await
            .expect("round trip");

        assert_eq!(reply.first(), Some("SD2SNES COM3"));
    }

    #[tokio::test]
    async fn test_binary_reply_accumulates_frames() {
        let (url, _server) = spawn_scripted_server(|mut ws| async move {
            let _ = ws.next().await;
            // Three frames for one 6-byte reply.
            for chunk in [[1u8, 2].as_slice(), &[3, 4], &[5, 6]] {
                ws.send(Message::Binary(chunk.to_vec().into()))
                    .await
                    .expect("frame");
            }
        })
        .await;

        let channel = connect_channel(&url).await;
        let request = Request::with_operands(
            Opcode::GetAddress,
            AddressSpace::Snes,
            vec!["f50000".into(), "6".into()],
        );

        let mut lease = channel.lease().await;
        lease.send_request(&request).expect("send");
        let data = lease
            .recv_binary_exact(6, Duration::from_secs(2), "GetAddress")
            .await
            .expect("binary reply");

        assert_eq!(data, vec![1, 2, 3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn test_short_binary_reply_is_protocol_mismatch() {
        let (url, _server) = spawn_scripted_server(|mut ws| async move {
            let _ = ws.next().await;
            ws.send(Message::Binary(vec![1, 2].into()))
                .await
                .expect("frame");
            // Stall; never send the rest.
            let _ = ws.next().await;
        })
        .await;

        let channel = connect_channel(&url).await;
        let request = Request::with_operands(
            Opcode::GetAddress,
            AddressSpace::Snes,
            vec!["f50000".into(), "6".into()],
        );

        let mut lease = channel.lease().await;
        lease.send_request(&request).expect("send");
        let err = lease
            .recv_binary_exact(6, Duration::from_millis(150), "GetAddress")
            .await
            .expect_err("must fail");
        drop(lease);

        assert!(matches!(err, Error::ProtocolMismatch { .. }));
        // Desync closes the connection.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(channel.is_closed());
    }

    #[tokio::test]
    async fn test_text_frame_inside_binary_reply_is_mismatch() {
        let (url, _server) = spawn_scripted_server(|mut ws| async move {
            let _ = ws.next().await;
            ws.send(Message::Text(r#"{"Results":[]}"#.to_string().into()))
                .await
                .expect("frame");
        })
        .await;

        let channel = connect_channel(&url).await;
        let request = Request::with_operands(
            Opcode::GetAddress,
            AddressSpace::Snes,
            vec!["f50000".into(), "4".into()],
        );

        let mut lease = channel.lease().await;
        lease.send_request(&request).expect("send");
        let err = lease
            .recv_binary_exact(4, Duration::from_secs(1), "GetAddress")
            .await
            .expect_err("must fail");

        assert!(matches!(err, Error::ProtocolMismatch { .. }));
    }

    #[tokio::test]
    async fn test_single_flight_under_contention() {
        // The server answers each request after a delay, and fails the test
        // if a second request frame arrives while one is still unanswered.
        let (url, _server) = spawn_scripted_server(|mut ws| async move {
            loop {
                let Some(Ok(Message::Text(_))) = ws.next().await else {
                    break;
                };

                // While "working", no further request may arrive.
                let premature = tokio::time::timeout(Duration::from_millis(40), ws.next()).await;
                assert!(
                    premature.is_err(),
                    "second request arrived while one was in flight"
                );

                ws.send(Message::Binary(vec![0xAB].into()))
                    .await
                    .expect("reply");
            }
        })
        .await;

        let channel = std::sync::Arc::new(connect_channel(&url).await);

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let channel = std::sync::Arc::clone(&channel);
            tasks.push(tokio::spawn(async move {
                let request = Request::with_operands(
                    Opcode::GetAddress,
                    AddressSpace::Snes,
                    vec!["f50000".into(), "1".into()],
                );
                let mut lease = channel.lease().await;
                lease.send_request(&request).expect("send");
                lease
                    .recv_binary_exact(1, Duration::from_secs(2), "GetAddress")
                    .await
                    .expect("reply")
            }));
        }

        for task in tasks {
            assert_eq!(task.await.expect("join"), vec![0xAB]);
        }
    }

    #[tokio::test]
    async fn test_drain_below_waits_for_counter() {
        let (url, _server) = spawn_scripted_server(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let channel = connect_channel(&url).await;
        let mut lease = channel.lease().await;

        // Queue enough that the counter is visibly nonzero, then require a
        // full drain. The writer task empties the queue quickly; the drain
        // must observe it hit zero rather than spin forever.
        for _ in 0..64 {
            lease.send_binary(vec![0u8; 4096]).expect("send");
        }
        lease
            .wait_for_drain(0, Some(Instant::now() + Duration::from_secs(2)), "drain")
            .await
            .expect("drain");
        drop(lease);
        assert_eq!(channel.buffered_bytes(), 0);
    }
}
