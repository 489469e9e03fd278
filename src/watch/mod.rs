//! Continuous memory observation.
//!
//! Both capabilities poll through [`crate::memory::MemoryIo`]'s batched
//! read, so a cycle over any number of regions costs one round trip:
//!
//! - **Continuous watch** ([`MemoryWatcher`]): a cooperative polling task
//!   that diffs every region each cycle and reports changes until
//!   stopped. One bad poll is logged and skipped; a lost connection stops
//!   the watcher.
//! - **Conditional wait** ([`wait`]): polls until a predicate holds (or
//!   every condition in a set holds), with an explicit timeout.
//!
//! Watchers interleave politely with every other caller: each poll cycle
//! is one acquisition of the console's exclusive request channel, so a
//! file transfer and a watcher never overlap on the wire.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `watcher` | [`MemoryWatcher`] and [`WatchBuilder`] |
//! | `wait` | Conditional waits and the [`Target`] predicate model |

// ============================================================================
// Submodules
// ============================================================================

/// Continuous polling watcher.
pub mod watcher;

/// Conditional waits.
pub mod wait;

// ============================================================================
// Re-exports
// ============================================================================

pub use wait::{Condition, Target};
pub use watcher::{ChangeHandler, MemoryChange, MemoryWatcher, WatchBuilder};
