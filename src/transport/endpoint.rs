//! Endpoint addressing modes and socket dialing.
//!
//! The server can be reached three ways: a direct WebSocket URL, the same
//! URL through a SOCKS5 proxy, or a locally forwarded port standing in for
//! a remote server. In the forwarded case the `Host` handshake header is
//! overridden to `localhost:<remotePort>`, because the far server rejects
//! handshakes whose Host header does not look local.
//!
//! Connection attempts are bounded by a timeout and fail fast; they never
//! hang indefinitely.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::HOST;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{client_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// The WebSocket stream type used by all addressing modes.
pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ============================================================================
// Endpoint
// ============================================================================

/// How to reach the usb2snes server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// Plain WebSocket URL, e.g. `ws://localhost:8080`.
    Direct {
        /// WebSocket URL of the server.
        url: String,
    },

    /// WebSocket URL reached through a SOCKS5 proxy.
    Socks {
        /// WebSocket URL of the server as seen from the proxy.
        url: String,
        /// Proxy address, e.g. `127.0.0.1:1080`.
        proxy: String,
        /// Optional username/password pair.
        credentials: Option<(String, String)>,
    },

    /// WebSocket URL of a local port that forwards to a remote server.
    ///
    /// The handshake `Host` header is overridden to
    /// `localhost:<remote_port>`.
    Forwarded {
        /// Local WebSocket URL, e.g. `ws://127.0.0.1:9090`.
        url: String,
        /// Port the server listens on at the far end of the tunnel.
        remote_port: u16,
    },
}

impl Endpoint {
    /// Creates a direct endpoint.
    #[inline]
    #[must_use]
    pub fn direct(url: impl Into<String>) -> Self {
        Self::Direct { url: url.into() }
    }

    /// Creates a SOCKS5 endpoint without authentication.
    #[inline]
    #[must_use]
    pub fn socks(url: impl Into<String>, proxy: impl Into<String>) -> Self {
        Self::Socks {
            url: url.into(),
            proxy: proxy.into(),
            credentials: None,
        }
    }

    /// Creates a SOCKS5 endpoint with username/password authentication.
    #[inline]
    #[must_use]
    pub fn socks_with_auth(
        url: impl Into<String>,
        proxy: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::Socks {
            url: url.into(),
            proxy: proxy.into(),
            credentials: Some((username.into(), password.into())),
        }
    }

    /// Creates a forwarded-port endpoint.
    #[inline]
    #[must_use]
    pub fn forwarded(url: impl Into<String>, remote_port: u16) -> Self {
        Self::Forwarded {
            url: url.into(),
            remote_port,
        }
    }

    /// Returns the WebSocket URL this endpoint dials.
    #[inline]
    #[must_use]
    pub fn url(&self) -> &str {
        match self {
            Self::Direct { url }
            | Self::Socks { url, .. }
            | Self::Forwarded { url, .. } => url,
        }
    }

    /// Parses and validates the endpoint URL.
    ///
    /// Only `ws://` URLs are accepted; the transports this crate layers on
    /// (SOCKS hop, local forward, localhost server) all carry plaintext
    /// WebSocket.
    pub(crate) fn parse_url(&self) -> Result<Url> {
        let url = Url::parse(self.url())
            .map_err(|e| Error::config(format!("invalid endpoint url {:?}: {e}", self.url())))?;

        if url.scheme() != "ws" {
            return Err(Error::config(format!(
                "unsupported url scheme {:?} (only ws:// is supported)",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(Error::config(format!(
                "endpoint url {:?} has no host",
                self.url()
            )));
        }

        Ok(url)
    }
}

// ============================================================================
// Dialing
// ============================================================================

/// Opens the WebSocket connection described by `endpoint`.
///
/// The whole attempt (TCP dial, optional SOCKS handshake, WebSocket
/// upgrade) is bounded by `connect_timeout`.
///
/// # Errors
///
/// - [`Error::Config`] if the URL is malformed
/// - [`Error::ConnectionTimeout`] if the bound elapses
/// - [`Error::ConnectionLost`] if any hop refuses the connection
pub(crate) async fn open_stream(endpoint: &Endpoint, connect_timeout: Duration) -> Result<WsStream> {
    let url = endpoint.parse_url()?;

    match timeout(connect_timeout, dial(endpoint, &url)).await {
        Ok(result) => result,
        Err(_) => Err(Error::connection_timeout(connect_timeout.as_millis() as u64)),
    }
}

/// Dials the TCP (and SOCKS) hops and performs the WebSocket upgrade.
async fn dial(endpoint: &Endpoint, url: &Url) -> Result<WsStream> {
    let host = url.host_str().unwrap_or_default().to_string();
    let port = url.port_or_known_default().unwrap_or(80);

    let tcp = match endpoint {
        Endpoint::Direct { .. } | Endpoint::Forwarded { .. } => {
            TcpStream::connect((host.as_str(), port))
                .await
                .map_err(|e| Error::connection_lost(format!("tcp connect to {host}:{port}: {e}")))?
        }

        Endpoint::Socks {
            proxy, credentials, ..
        } => {
            let target = (host.as_str(), port);
            let stream = match credentials {
                Some((user, pass)) => {
                    Socks5Stream::connect_with_password(proxy.as_str(), target, user, pass).await
                }
                None => Socks5Stream::connect(proxy.as_str(), target).await,
            }
            .map_err(|e| {
                Error::connection_lost(format!("socks connect via {proxy} to {host}:{port}: {e}"))
            })?;

            // The SOCKS handshake is complete; the rest of the connection
            // is a plain byte stream to the target.
            stream.into_inner()
        }
    };

    tcp.set_nodelay(true)?;

    let mut request = url.as_str().into_client_request()?;
    if let Endpoint::Forwarded { remote_port, .. } = endpoint {
        let value = HeaderValue::from_str(&format!("localhost:{remote_port}"))
            .map_err(|e| Error::config(format!("bad forwarded Host header: {e}")))?;
        request.headers_mut().insert(HOST, value);
        debug!(remote_port, "overriding handshake Host header");
    }

    let (ws, _response) = client_async(request, MaybeTlsStream::Plain(tcp))
        .await
        .map_err(|e| Error::connection_lost(format!("websocket handshake: {e}")))?;

    debug!(url = %url, "websocket connection established");
    Ok(ws)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_accessor() {
        let direct = Endpoint::direct("ws://localhost:8080");
        let socks = Endpoint::socks("ws://10.0.0.2:8080", "127.0.0.1:1080");
        let forwarded = Endpoint::forwarded("ws://127.0.0.1:9090", 8080);

        assert_eq!(direct.url(), "ws://localhost:8080");
        assert_eq!(socks.url(), "ws://10.0.0.2:8080");
        assert_eq!(forwarded.url(), "ws://127.0.0.1:9090");
    }

    #[test]
    fn test_parse_url_rejects_non_ws() {
        let https = Endpoint::direct("https://localhost:8080");
        assert!(matches!(https.parse_url(), Err(Error::Config { .. })));

        let wss = Endpoint::direct("wss://localhost:8080");
        assert!(matches!(wss.parse_url(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_parse_url_rejects_garbage() {
        let bad = Endpoint::direct("not a url");
        assert!(matches!(bad.parse_url(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_parse_url_default_port() {
        let endpoint = Endpoint::direct("ws://example.local");
        let url = endpoint.parse_url().expect("parse");
        assert_eq!(url.port_or_known_default(), Some(80));
    }

    #[tokio::test]
    async fn test_connect_fails_fast_on_stalled_handshake() {
        // A listener that never accepts: the TCP dial succeeds (backlog),
        // the WebSocket upgrade stalls, and the bound must fire.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();

        let endpoint = Endpoint::direct(format!("ws://127.0.0.1:{port}"));
        let started = std::time::Instant::now();
        let result = open_stream(&endpoint, Duration::from_millis(200)).await;

        assert!(matches!(result, Err(Error::ConnectionTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
        drop(listener);
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_lost() {
        // Bind then drop to find a port with nothing listening.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);

        let endpoint = Endpoint::direct(format!("ws://127.0.0.1:{port}"));
        let result = open_stream(&endpoint, Duration::from_secs(2)).await;

        assert!(matches!(result, Err(Error::ConnectionLost { .. })));
    }
}
