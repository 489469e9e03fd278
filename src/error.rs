//! Error types for the usb2snes client.
//!
//! This module defines all error types used throughout the crate.
//!
//! # Usage
//!
//! All fallible operations return [`Result<T>`] which uses [`Error`]:
//!
//! ```ignore
//! use usb2snes_client::{Result, Error};
//!
//! async fn example(console: &Console) -> Result<()> {
//!     let bytes = console.memory().read_memory(0xF5_0010, 2).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidArgument`] |
//! | Lifecycle | [`Error::NotConnected`], [`Error::NotAttached`] |
//! | Connection | [`Error::ConnectionLost`], [`Error::ConnectionTimeout`] |
//! | Exchange | [`Error::Timeout`], [`Error::ProtocolMismatch`] |
//! | Transfer | [`Error::IncompleteTransfer`], [`Error::PreconditionFailed`] |
//! | External | [`Error::Io`], [`Error::Json`], [`Error::WebSocket`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
///
/// All fallible operations in this crate return this type.
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
///
/// Each variant includes relevant context for debugging.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when client configuration is invalid (bad endpoint URL,
    /// zero chunk size, and so on).
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Invalid argument to a public operation.
    ///
    /// Returned for malformed addresses, zero-size regions, oversized
    /// batch entries or CMD-space targets outside WRAM.
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Operation requires an open connection.
    #[error("Not connected to a usb2snes server")]
    NotConnected,

    /// Operation requires an attached device.
    #[error("No device attached")]
    NotAttached,

    // ========================================================================
    // Connection Errors
    // ========================================================================
    /// Transport closed, never opened, or failed mid-operation.
    ///
    /// Fatal to all in-flight and queued operations on the connection.
    #[error("Connection lost: {message}")]
    ConnectionLost {
        /// Description of how the connection was lost.
        message: String,
    },

    /// Connection attempt did not complete within the bound.
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Exchange Errors
    // ========================================================================
    /// Bounded wait exceeded.
    ///
    /// Operation-scoped; the connection remains usable.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout {
        /// Description of the operation that timed out.
        operation: String,
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    /// Reply shape or size inconsistent with the request.
    ///
    /// Indicates the request/reply stream has desynchronized; the transport
    /// is shut down and the caller must reconnect.
    #[error("Protocol mismatch: {message}")]
    ProtocolMismatch {
        /// Description of the inconsistency.
        message: String,
    },

    // ========================================================================
    // Transfer Errors
    // ========================================================================
    /// Byte-count verification failed after a file operation.
    ///
    /// Recoverable by retrying the whole transfer; the protocol offers
    /// nothing to resume from.
    #[error("Incomplete transfer: {transferred}/{total} bytes")]
    IncompleteTransfer {
        /// Bytes actually moved.
        transferred: u64,
        /// Bytes expected.
        total: u64,
    },

    /// A required precondition does not hold.
    ///
    /// For example the destination directory is absent before an upload.
    /// The caller must remediate before retrying.
    #[error("Precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the failed precondition.
        message: String,
    },

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    #[inline]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a connection lost error.
    #[inline]
    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            message: message.into(),
        }
    }

    /// Creates a connection timeout error.
    #[inline]
    pub fn connection_timeout(timeout_ms: u64) -> Self {
        Self::ConnectionTimeout { timeout_ms }
    }

    /// Creates a timeout error.
    #[inline]
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Creates a protocol mismatch error.
    #[inline]
    pub fn protocol_mismatch(message: impl Into<String>) -> Self {
        Self::ProtocolMismatch {
            message: message.into(),
        }
    }

    /// Creates an incomplete transfer error.
    #[inline]
    pub fn incomplete_transfer(transferred: u64, total: u64) -> Self {
        Self::IncompleteTransfer { transferred, total }
    }

    /// Creates a precondition failed error.
    #[inline]
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ConnectionTimeout { .. } | Self::Timeout { .. }
        )
    }

    /// Returns `true` if this is a connection error.
    ///
    /// Connection errors are fatal to every operation sharing the
    /// connection; watchers stop themselves when they observe one.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::ConnectionLost { .. }
                | Self::ConnectionTimeout { .. }
                | Self::NotConnected
                | Self::WebSocket(_)
        )
    }

    /// Returns `true` if the connection must be re-established before
    /// further use.
    #[inline]
    #[must_use]
    pub fn requires_reconnect(&self) -> bool {
        self.is_connection_error() || matches!(self, Self::ProtocolMismatch { .. })
    }

    /// Returns `true` if this error is recoverable on the same connection.
    ///
    /// Recoverable errors may succeed on retry without reconnecting.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::IncompleteTransfer { .. }
                | Self::PreconditionFailed { .. }
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::connection_lost("socket closed");
        assert_eq!(err.to_string(), "Connection lost: socket closed");
    }

    #[test]
    fn test_config_error() {
        let err = Error::config("missing endpoint url");
        assert_eq!(err.to_string(), "Configuration error: missing endpoint url");
    }

    #[test]
    fn test_incomplete_transfer_display() {
        let err = Error::incomplete_transfer(512, 1024);
        assert_eq!(err.to_string(), "Incomplete transfer: 512/1024 bytes");
    }

    #[test]
    fn test_is_timeout() {
        let timeout_err = Error::timeout("GetAddress reply", 5000);
        let other_err = Error::connection_lost("test");

        assert!(timeout_err.is_timeout());
        assert!(!other_err.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        let lost_err = Error::connection_lost("test");
        let timeout_err = Error::ConnectionTimeout { timeout_ms: 1000 };
        let state_err = Error::NotConnected;
        let other_err = Error::config("test");

        assert!(lost_err.is_connection_error());
        assert!(timeout_err.is_connection_error());
        assert!(state_err.is_connection_error());
        assert!(!other_err.is_connection_error());
    }

    #[test]
    fn test_requires_reconnect() {
        assert!(Error::protocol_mismatch("short reply").requires_reconnect());
        assert!(Error::connection_lost("test").requires_reconnect());
        assert!(!Error::timeout("Info reply", 5000).requires_reconnect());
    }

    #[test]
    fn test_is_recoverable() {
        assert!(Error::timeout("test", 1000).is_recoverable());
        assert!(Error::incomplete_transfer(0, 10).is_recoverable());
        assert!(Error::precondition_failed("no such dir").is_recoverable());
        assert!(!Error::connection_lost("test").is_recoverable());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<String>("invalid").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
    }
}
