//! SNES address-map constants as exposed by the usb2snes protocol.
//!
//! The protocol projects the console onto a flat 24-bit space: ROM at the
//! bottom, SRAM at `0xE0_0000`, WRAM at `0xF5_0000`. The savestate
//! interface lives above WRAM and moves with the firmware major version.

/// Start of ROM in the flat protocol space.
pub const ROM_START: u32 = 0x00_0000;

/// Start of cartridge SRAM.
pub const SRAM_START: u32 = 0xE0_0000;

/// Start of console WRAM.
pub const WRAM_START: u32 = 0xF5_0000;

/// Size of console WRAM.
pub const WRAM_SIZE: u32 = 0x2_0000;

/// Exclusive upper bound of the 24-bit protocol address space.
pub const ADDRESS_LIMIT: u32 = 0x100_0000;

/// WRAM bank base in the console's own address space; CMD-space staged
/// writes target this mapping rather than the protocol's flat one.
pub(crate) const CONSOLE_WRAM_BASE: u32 = 0x7E_0000;

/// Address of the executable staging buffer used for CMD-space writes.
pub(crate) const CMD_STAGING_ADDRESS: u32 = 0x2C00;

/// Largest single-region read the client will put in one operand pair.
/// Bigger reads are split into a batched request.
pub const MAX_READ_CHUNK: u32 = 0x1_0000;

/// Size of a savestate blob.
pub const SAVESTATE_SIZE: usize = 320 * 1024;

/// Address of the savestate staging buffer.
pub const SAVESTATE_DATA_ADDRESS: u32 = 0xF0_0000;

/// Savestate interface flags for firmware versions before 11.
pub const SAVESTATE_INTERFACE_LEGACY: u32 = 0xFC_2000;

/// Savestate interface flags for firmware version 11 and later.
pub const SAVESTATE_INTERFACE_MODERN: u32 = 0xFE_1000;
