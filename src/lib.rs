//! usb2snes client - async engine for the SNES console WebSocket protocol.
//!
//! This library talks to a usb2snes-compatible server (QUsb2Snes,
//! usb2snes, emulator bridges) over its narrow, synchronous WebSocket
//! protocol: JSON control messages on text frames, raw payloads on binary
//! frames, no acknowledgements, no correlation ids, and at most one
//! outstanding request per connection.
//!
//! # Architecture
//!
//! All reliability is synthesized client-side:
//!
//! - Every exchange goes through one FIFO exclusive channel; replies are
//!   matched purely by order, so single-flight discipline is correctness,
//!   not tuning.
//! - File transfers chunk their data, pause against the transport's
//!   outbound buffer, pre-create destination directories, and verify
//!   results themselves — the protocol confirms nothing.
//! - Every wait is bounded; no operation can hang forever.
//!
//! # Quick Start
//!
//! ```no_run
//! use usb2snes_client::{Console, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let console = Console::connect("ws://localhost:8080").await?;
//!
//!     let devices = console.device_list().await?;
//!     let info = console.attach(&devices[0]).await?;
//!     println!("attached: firmware {}", info.firmware_version);
//!
//!     // Read two bytes of WRAM.
//!     let bytes = console.memory().read_memory(0xF5_0010, 2).await?;
//!     println!("game state: {bytes:02x?}");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`console`] | Connection lifecycle, device control, file system |
//! | [`memory`] | Reads, batched reads, hardware-aware writes |
//! | [`transfer`] | Chunked file upload/download |
//! | [`savestate`] | 320 KiB state capture/restore |
//! | [`watch`] | Continuous watchers and conditional waits |
//! | [`protocol`] | Wire message types (internal shape, public types) |
//! | [`transport`] | Endpoint dialing and the exclusive request channel |
//! | [`error`] | Error types and [`Result`] alias |

// ============================================================================
// Modules
// ============================================================================

/// Connection lifecycle, device control and file-system operations.
pub mod console;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Console memory access.
pub mod memory;

/// Wire protocol message types.
pub mod protocol;

/// Savestate capture and restore.
pub mod savestate;

/// Chunked file transfer.
pub mod transfer;

/// WebSocket transport layer.
pub mod transport;

/// Continuous memory observation.
pub mod watch;

#[cfg(test)]
pub(crate) mod testutil;

// ============================================================================
// Re-exports
// ============================================================================

// Console types
pub use console::{
    Console, ConsoleBuilder, ConsoleOptions, ConnectionState, DeviceInfo, DirEntry, EntryKind,
    DEFAULT_URL,
};

// Error types
pub use error::{Error, Result};

// Memory types
pub use memory::{MemoryIo, MemoryRegion, MemoryWrite};

// Transfer types
pub use transfer::{ProgressFn, TransferEngine};

// Savestate types
pub use savestate::{SavestateBlob, SavestateController};

// Transport types
pub use transport::Endpoint;

// Watch types
pub use watch::{ChangeHandler, Condition, MemoryChange, MemoryWatcher, Target, WatchBuilder};
