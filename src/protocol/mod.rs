//! Wire protocol message types.
//!
//! The console protocol is JSON over WebSocket text frames for control,
//! raw WebSocket binary frames for data. There are no request ids: the
//! server answers requests strictly in order, so whatever arrives next is
//! the reply to the most recent request. Reply matching is therefore a
//! property of the [`crate::transport::RequestChannel`], not of these types.
//!
//! # Message Shapes
//!
//! ```json
//! { "Opcode": "GetAddress", "Space": "SNES", "Operands": ["f50010", "2"] }
//! { "Results": ["1.11.0", "SD2SNES", "/rom/game.smc"] }
//! ```
//!
//! Addresses and sizes travel as lowercase hex strings without a `0x`
//! prefix.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `opcode` | [`Opcode`], [`AddressSpace`], reply-shape classification |
//! | `request` | [`Request`] / [`Reply`] wire structs |

// ============================================================================
// Submodules
// ============================================================================

/// Protocol opcodes and address spaces.
pub mod opcode;

/// Request and reply message structs.
pub mod request;

// ============================================================================
// Re-exports
// ============================================================================

pub use opcode::{AddressSpace, Opcode, ReplyShape};
pub use request::{Reply, Request};

// ============================================================================
// Hex Helpers
// ============================================================================

use crate::error::{Error, Result};

/// Encodes a value as a protocol hex operand (lowercase, no `0x` prefix).
#[inline]
#[must_use]
pub(crate) fn hex_operand(value: u64) -> String {
    format!("{value:x}")
}

/// Parses a protocol hex field.
///
/// Accepts an optional `0x`/`0X` prefix for robustness; the protocol itself
/// sends bare digits.
pub(crate) fn parse_hex(field: &str) -> Result<u64> {
    let digits = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
        .unwrap_or(field);

    u64::from_str_radix(digits, 16)
        .map_err(|_| Error::protocol_mismatch(format!("bad hex field: {field:?}")))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_operand_format() {
        assert_eq!(hex_operand(0xF5_0010), "f50010");
        assert_eq!(hex_operand(0), "0");
        assert_eq!(hex_operand(1024), "400");
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("f50010").unwrap(), 0xF5_0010);
        assert_eq!(parse_hex("0x400").unwrap(), 1024);
        assert_eq!(parse_hex("0").unwrap(), 0);
        assert!(parse_hex("").is_err());
        assert!(parse_hex("xyz").is_err());
    }

    #[test]
    fn test_hex_round_trip() {
        for value in [0u64, 1, 0x2C00, 0xF5_0000, 320 * 1024] {
            assert_eq!(parse_hex(&hex_operand(value)).unwrap(), value);
        }
    }
}
