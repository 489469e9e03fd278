//! Console connection and control surface.
//!
//! A [`Console`] owns exactly one connection to a usb2snes server and is
//! the entry point for everything else: device discovery and attachment,
//! console control (boot/menu/reset), the file-system opcodes, and the
//! accessors handing out [`crate::memory::MemoryIo`],
//! [`crate::transfer::TransferEngine`] and
//! [`crate::savestate::SavestateController`].
//!
//! # Example
//!
//! ```no_run
//! use usb2snes_client::{Console, Result};
//!
//! # async fn example() -> Result<()> {
//! let console = Console::builder()
//!     .url("ws://localhost:8080")
//!     .connect()
//!     .await?;
//!
//! let devices = console.device_list().await?;
//! let info = console.attach(&devices[0]).await?;
//! println!("attached to firmware {}", info.firmware_version);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `core` | [`Console`] and shared connection state |
//! | `builder` | [`ConsoleBuilder`] |
//! | `options` | [`ConsoleOptions`] and env overrides |

// ============================================================================
// Submodules
// ============================================================================

/// Console coordinator and shared state.
pub mod core;

/// Console configuration builder.
pub mod builder;

/// Client configuration.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::ConsoleBuilder;
pub use options::ConsoleOptions;
pub use self::core::{Console, ConnectionState, DeviceInfo, DirEntry, EntryKind};

/// Default server URL.
pub const DEFAULT_URL: &str = "ws://localhost:8080";
