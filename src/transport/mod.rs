//! WebSocket transport layer.
//!
//! This module owns the single bidirectional connection to the usb2snes
//! server and enforces the protocol's hard concurrency rule: at most one
//! request is ever unresolved at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐                        ┌──────────────────┐
//! │  Console (Rust)  │        WebSocket       │  usb2snes server │
//! │                  │◄──────────────────────►│  (QUsb2Snes /    │
//! │  RequestChannel  │   direct / SOCKS /     │   usb2snes)      │
//! │  → Transport     │   forwarded port       │                  │
//! └──────────────────┘                        └──────────────────┘
//! ```
//!
//! # Reply Matching
//!
//! The protocol carries no request ids. Replies arrive in request order,
//! so whatever frame arrives next *is* the reply to the most recent
//! request. [`RequestChannel`] therefore serializes every exchange behind
//! one FIFO lock; the lock is safety-critical, not a performance knob.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `endpoint` | Endpoint addressing modes and socket dialing |
//! | `connection` | Socket reader/writer tasks and frame queues |
//! | `channel` | Exclusive FIFO request/reply channel |

// ============================================================================
// Submodules
// ============================================================================

/// Endpoint addressing modes and socket dialing.
pub mod endpoint;

/// WebSocket connection and background IO tasks.
pub mod connection;

/// Exclusive FIFO request/reply channel.
pub mod channel;

// ============================================================================
// Re-exports
// ============================================================================

pub use channel::{ChannelLease, RequestChannel};
pub use connection::Transport;
pub use endpoint::Endpoint;
