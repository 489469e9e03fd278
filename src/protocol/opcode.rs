//! Protocol opcodes and address spaces.
//!
//! Every request names an [`Opcode`] and an [`AddressSpace`]. The opcode
//! also determines the shape of the reply ([`ReplyShape`]): the protocol
//! carries no framing metadata, so the client must know in advance whether
//! to expect a JSON message, binary frames, or nothing at all.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};

// ============================================================================
// Opcode
// ============================================================================

/// Named protocol operation.
///
/// Variant names serialize verbatim as the `Opcode` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    /// Enumerate devices known to the server.
    DeviceList,
    /// Attach this connection to a named device.
    Attach,
    /// Query firmware/version/ROM information for the attached device.
    Info,
    /// Register a client name with the server.
    Name,
    /// Boot a ROM by path.
    Boot,
    /// Return the device to its menu.
    Menu,
    /// Reset the running ROM.
    Reset,
    /// Read one or more memory regions.
    GetAddress,
    /// Write a memory region (announce; data follows as binary frames).
    PutAddress,
    /// Upload a file (announce; data follows as binary frames).
    PutFile,
    /// Download a file (size reply; data follows as binary frames).
    GetFile,
    /// List a directory.
    List,
    /// Create a directory.
    MakeDir,
    /// Remove a file or directory.
    Remove,
}

impl Opcode {
    /// Returns the reply shape this opcode produces on the wire.
    #[must_use]
    pub const fn reply_shape(self) -> ReplyShape {
        match self {
            Self::DeviceList | Self::Info | Self::List => ReplyShape::Json,
            Self::GetAddress => ReplyShape::Binary,
            Self::GetFile => ReplyShape::JsonThenBinary,
            Self::Attach
            | Self::Name
            | Self::Boot
            | Self::Menu
            | Self::Reset
            | Self::PutAddress
            | Self::PutFile
            | Self::MakeDir
            | Self::Remove => ReplyShape::None,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// ReplyShape
// ============================================================================

/// What a request expects back from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyShape {
    /// No reply at all; the request is fire-and-forget.
    None,
    /// One JSON text frame carrying `Results`.
    Json,
    /// One or more binary frames whose total length the caller knows.
    Binary,
    /// A JSON size reply followed by binary frames of that total length.
    JsonThenBinary,
}

// ============================================================================
// AddressSpace
// ============================================================================

/// Logical memory-space selector attached to every memory operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AddressSpace {
    /// Ordinary console address space (ROM/WRAM/SRAM mapping).
    Snes,
    /// Executable staging buffer used for indirect writes on hardware
    /// that cannot accept direct WRAM writes.
    Cmd,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Snes => f.write_str("SNES"),
            Self::Cmd => f.write_str("CMD"),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
