//! Console configuration builder.
//!
//! Collects the endpoint addressing mode and option overrides, then dials
//! the server.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::Endpoint;

use super::core::Console;
use super::options::ConsoleOptions;
use super::DEFAULT_URL;

// ============================================================================
// ConsoleBuilder
// ============================================================================

/// Builder for [`Console`].
///
/// # Example
///
/// ```no_run
/// use usb2snes_client::Console;
///
/// # async fn example() -> usb2snes_client::Result<()> {
/// let console = Console::builder()
///     .url("ws://127.0.0.1:23074")
///     .chunk_size(4096)
///     .connect()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConsoleBuilder {
    url: String,
    socks_proxy: Option<String>,
    socks_auth: Option<(String, String)>,
    forwarded_port: Option<u16>,
    options: ConsoleOptions,
}

impl Default for ConsoleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsoleBuilder {
    /// Creates a builder with environment-derived defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            socks_proxy: None,
            socks_auth: None,
            forwarded_port: None,
            options: ConsoleOptions::from_env(),
        }
    }

    /// Sets the server URL (default `ws://localhost:8080`).
    #[must_use]
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Routes the connection through a SOCKS5 proxy.
    #[must_use]
    pub fn socks_proxy(mut self, proxy: impl Into<String>) -> Self {
        self.socks_proxy = Some(proxy.into());
        self
    }

    /// Sets SOCKS5 credentials.
    #[must_use]
    pub fn socks_auth(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.socks_auth = Some((username.into(), password.into()));
        self
    }

    /// Marks the URL as a locally forwarded port for a server listening on
    /// `remote_port` at the far end; the handshake `Host` header is
    /// overridden accordingly.
    #[must_use]
    pub fn forwarded_port(mut self, remote_port: u16) -> Self {
        self.forwarded_port = Some(remote_port);
        self
    }

    /// Replaces the whole option set.
    #[must_use]
    pub fn options(mut self, options: ConsoleOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the upload chunk size.
    #[must_use]
    pub fn chunk_size(mut self, bytes: usize) -> Self {
        self.options.chunk_size = bytes;
        self
    }

    /// Sets the buffered-byte ceiling for upload backpressure.
    #[must_use]
    pub fn backpressure_limit(mut self, bytes: usize) -> Self {
        self.options.backpressure_limit = bytes;
        self
    }

    /// Enables or disables destination-directory pre-creation.
    #[must_use]
    pub fn preemptive_dir_create(mut self, enabled: bool) -> Self {
        self.options.preemptive_dir_create = enabled;
        self
    }

    /// Enables or disables post-upload verification.
    #[must_use]
    pub fn verify_after_upload(mut self, enabled: bool) -> Self {
        self.options.verify_after_upload = enabled;
        self
    }

    /// Sets the per-MiB budget for blocking uploads.
    #[must_use]
    pub fn blocking_timeout_per_mib(mut self, budget: Duration) -> Self {
        self.options.blocking_timeout_per_mib = budget;
        self
    }

    /// Sets the connection-attempt bound.
    #[must_use]
    pub fn connect_timeout(mut self, bound: Duration) -> Self {
        self.options.connect_timeout = bound;
        self
    }

    /// Builds the endpoint and dials the server.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] for contradictory addressing or a bad URL
    /// - [`Error::ConnectionTimeout`] / [`Error::ConnectionLost`] if the
    ///   dial fails
    pub async fn connect(self) -> Result<Console> {
        if self.options.chunk_size == 0 {
            return Err(Error::config("chunk_size must be nonzero"));
        }

        let endpoint = match (self.socks_proxy, self.forwarded_port) {
            (Some(_), Some(_)) => {
                return Err(Error::config(
                    "socks_proxy and forwarded_port are mutually exclusive",
                ));
            }
            (Some(proxy), None) => match self.socks_auth {
                Some((user, pass)) => Endpoint::socks_with_auth(self.url, proxy, user, pass),
                None => Endpoint::socks(self.url, proxy),
            },
            (None, Some(remote_port)) => Endpoint::forwarded(self.url, remote_port),
            (None, None) => Endpoint::direct(self.url),
        };

        Console::open(endpoint, self.options).await
    }
}

// ============================================================================
// Tests
// ============================================================================
