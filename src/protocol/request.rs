//! Request and reply message structs.
//!
//! A [`Request`] serializes to one JSON text frame. A [`Reply`] is parsed
//! from one JSON text frame; binary payloads never pass through these
//! types.
//!
//! # Format
//!
//! ```json
//! {
//!   "Opcode": "List",
//!   "Space": "SNES",
//!   "Flags": null,
//!   "Operands": ["/roms"]
//! }
//! ```
//!
//! `Operands` is omitted when empty. `Flags` is carried for the file-system
//! opcodes that historically sent it and omitted otherwise.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::opcode::{AddressSpace, Opcode};
use super::parse_hex;

// ============================================================================
// Request
// ============================================================================

/// A protocol request.
///
/// Immutable once constructed; at most one request may be unresolved on a
/// connection at any time.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Operation to perform.
    #[serde(rename = "Opcode")]
    pub opcode: Opcode,

    /// Address space the operation targets.
    #[serde(rename = "Space")]
    pub space: AddressSpace,

    /// Flags field sent by the file-system opcodes.
    #[serde(rename = "Flags", skip_serializing_if = "Option::is_none")]
    pub flags: Option<Vec<String>>,

    /// Ordered operand strings (hex addresses/sizes, paths, names).
    #[serde(rename = "Operands", skip_serializing_if = "Vec::is_empty")]
    pub operands: Vec<String>,
}

impl Request {
    /// Creates a request with no operands.
    #[inline]
    #[must_use]
    pub fn new(opcode: Opcode, space: AddressSpace) -> Self {
        Self {
            opcode,
            space,
            flags: None,
            operands: Vec::new(),
        }
    }

    /// Creates a request with operands.
    #[inline]
    #[must_use]
    pub fn with_operands(opcode: Opcode, space: AddressSpace, operands: Vec<String>) -> Self {
        Self {
            opcode,
            space,
            flags: None,
            operands,
        }
    }

    /// Creates a file-system request carrying an explicit null `Flags`
    /// field, matching what servers historically expect from `List`,
    /// `MakeDir` and `Remove`.
    #[inline]
    #[must_use]
    pub fn filesystem(opcode: Opcode, operands: Vec<String>) -> Self {
        Self {
            opcode,
            space: AddressSpace::Snes,
            // serde_json serializes Some(vec![]) as [] -- the servers accept
            // both null and []; send [] to keep the field present.
            flags: Some(Vec::new()),
            operands,
        }
    }
}

// ============================================================================
// Reply
// ============================================================================

/// A structured protocol reply.
///
/// Ephemeral; consumed by the single outstanding request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Reply {
    /// Ordered result strings.
    #[serde(rename = "Results", default)]
    pub results: Vec<String>,
}

impl Reply {
    /// Returns the result at `index`, if present.
    #[inline]
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&str> {
        self.results.get(index).map(String::as_str)
    }

    /// Returns the first result, if present.
    #[inline]
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.get(0)
    }

    /// Parses the result at `index` as a hex-encoded integer.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ProtocolMismatch`] if the field is absent
    /// or not valid hex.
    pub fn hex_field(&self, index: usize) -> Result<u64> {
        let field = self.get(index).ok_or_else(|| {
            crate::error::Error::protocol_mismatch(format!(
                "reply missing result field {index} (got {} fields)",
                self.results.len()
            ))
        })?;
        parse_hex(field)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let request = Request::with_operands(
            Opcode::GetAddress,
            AddressSpace::Snes,
            vec!["f50010".into(), "2".into()],
        );
        let json = serde_json::to_string(&request).expect("serialize");

        assert_eq!(
            json,
            r#"{"Opcode":"GetAddress","Space":"SNES","Operands":["f50010","2"]}"#
        );
    }

    #[test]
    fn test_request_without_operands_omits_field() {
        let request = Request::new(Opcode::Menu, AddressSpace::Snes);
        let json = serde_json::to_string(&request).expect("serialize");

        assert_eq!(json, r#"{"Opcode":"Menu","Space":"SNES"}"#);
    }

    #[test]
    fn test_filesystem_request_carries_flags() {
        let request = Request::filesystem(Opcode::List, vec!["/roms".into()]);
        let json = serde_json::to_string(&request).expect("serialize");

        assert!(json.contains(r#""Flags":[]"#));
        assert!(json.contains(r#""Space":"SNES""#));
    }

    #[test]
    fn test_reply_parse() {
        let reply: Reply =
            serde_json::from_str(r#"{"Results":["1.11.0","SD2SNES","/rom/game.smc"]}"#)
                .expect("parse");

        assert_eq!(reply.first(), Some("1.11.0"));
        assert_eq!(reply.get(2), Some("/rom/game.smc"));
        assert_eq!(reply.get(3), None);
    }

    #[test]
    fn test_reply_missing_results_defaults_empty() {
        let reply: Reply = serde_json::from_str("{}").expect("parse");
        assert!(reply.results.is_empty());
        assert_eq!(reply.first(), None);
    }

    #[test]
    fn test_reply_hex_field() {
        let reply: Reply = serde_json::from_str(r#"{"Results":["a00000"]}"#).expect("parse");
        assert_eq!(reply.hex_field(0).unwrap(), 0xA0_0000);
        assert!(reply.hex_field(1).is_err());
    }
}
