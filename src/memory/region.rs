//! Validated memory region and write descriptors.
//!
//! Constructors reject what the protocol cannot express: addresses beyond
//! the 24-bit space, zero-size regions, and ranges that wrap past the end
//! of the space. Overlap between regions is the caller's business.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};
use crate::protocol::hex_operand;

use super::map::ADDRESS_LIMIT;

// ============================================================================
// MemoryRegion
// ============================================================================

/// A readable/watchable span of console memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryRegion {
    /// Start address (24-bit).
    pub address: u32,
    /// Length in bytes.
    pub size: u32,
}

impl MemoryRegion {
    /// Creates a region, validating address range and size.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for zero sizes, addresses beyond
    /// the 24-bit space, or ranges running past its end.
    pub fn new(address: u32, size: u32) -> Result<Self> {
        if size == 0 {
            return Err(Error::invalid_argument(format!(
                "zero-size region at {address:#08x}"
            )));
        }
        if address >= ADDRESS_LIMIT {
            return Err(Error::invalid_argument(format!(
                "address {address:#x} outside the 24-bit space"
            )));
        }
        if u64::from(address) + u64::from(size) > u64::from(ADDRESS_LIMIT) {
            return Err(Error::invalid_argument(format!(
                "region {address:#08x}+{size:#x} runs past the end of the address space"
            )));
        }

        Ok(Self { address, size })
    }

    /// Exclusive end address.
    #[inline]
    #[must_use]
    pub const fn end(&self) -> u32 {
        self.address + self.size
    }

    /// Appends this region's `(address, size)` operand pair.
    pub(crate) fn push_operands(&self, operands: &mut Vec<String>) {
        operands.push(hex_operand(u64::from(self.address)));
        operands.push(hex_operand(u64::from(self.size)));
    }
}

// ============================================================================
// MemoryWrite
// ============================================================================

/// A write to one span of console memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryWrite {
    /// Destination address (24-bit).
    pub address: u32,
    /// Bytes to write.
    pub data: Vec<u8>,
}

impl MemoryWrite {
    /// Creates a write, validating the destination range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for empty data or ranges outside
    /// the 24-bit space.
    pub fn new(address: u32, data: Vec<u8>) -> Result<Self> {
        // Reuse the region checks; a write is a region with bytes attached.
        MemoryRegion::new(address, u32::try_from(data.len()).map_err(|_| {
            Error::invalid_argument(format!("write of {} bytes is too large", data.len()))
        })?)?;

        Ok(Self { address, data })
    }

    /// The region this write covers.
    #[inline]
    #[must_use]
    pub fn region(&self) -> MemoryRegion {
        MemoryRegion {
            address: self.address,
            size: self.data.len() as u32,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::memory::map::WRAM_START;

    #[test]
    fn test_region_valid() {
        let region = MemoryRegion::new(WRAM_START, 0x100).expect("valid");
        assert_eq!(region.end(), WRAM_START + 0x100);
    }

    #[test]
    fn test_region_rejects_zero_size() {
        assert!(MemoryRegion::new(WRAM_START, 0).is_err());
    }

    #[test]
    fn test_region_rejects_out_of_range_address() {
        assert!(MemoryRegion::new(ADDRESS_LIMIT, 1).is_err());
        assert!(MemoryRegion::new(u32::MAX, 1).is_err());
    }

    #[test]
    fn test_region_rejects_overrun() {
        assert!(MemoryRegion::new(ADDRESS_LIMIT - 4, 8).is_err());
        // Right up to the boundary is fine.
        assert!(MemoryRegion::new(ADDRESS_LIMIT - 4, 4).is_ok());
    }

    #[test]
    fn test_region_operands() {
        let region = MemoryRegion::new(0xF5_0010, 2).expect("valid");
        let mut operands = Vec::new();
        region.push_operands(&mut operands);
        assert_eq!(operands, vec!["f50010".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_write_validation() {
        assert!(MemoryWrite::new(WRAM_START, vec![1, 2, 3]).is_ok());
        assert!(MemoryWrite::new(WRAM_START, Vec::new()).is_err());
        assert!(MemoryWrite::new(ADDRESS_LIMIT, vec![1]).is_err());
    }

    #[test]
    fn test_write_region() {
        let write = MemoryWrite::new(0xF5_0000, vec![0; 16]).expect("valid");
        assert_eq!(
            write.region(),
            MemoryRegion {
                address: 0xF5_0000,
                size: 16
            }
        );
    }
}
