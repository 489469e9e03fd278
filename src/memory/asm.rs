//! 65816 staging program builder for CMD-space writes.
//!
//! Hardware that cannot accept direct WRAM writes exposes a tiny
//! executable staging buffer instead: the client assembles a program of
//! load-immediate/store-long pairs, uploads it to the buffer, and the
//! console executes it on its next NMI. The caller-visible contract is
//! still "write these bytes at this address"; this module is the encoding
//! behind it.

// ============================================================================
// Imports
// ============================================================================

use crate::error::{Error, Result};

use super::map::{CONSOLE_WRAM_BASE, WRAM_SIZE, WRAM_START};
use super::region::MemoryWrite;

// ============================================================================
// Opcode Constants
// ============================================================================

/// `LDA #imm` (8-bit accumulator).
const OP_LDA_IMM: u8 = 0xA9;

/// `STA long` (24-bit absolute).
const OP_STA_LONG: u8 = 0x8F;

/// Program prologue: BRK pad, SEP #$20, PHA, XBA, PHA — set 8-bit
/// accumulator and save registers.
const PROLOGUE: [u8; 6] = [0x00, 0xE2, 0x20, 0x48, 0xEB, 0x48];

/// Program epilogue: clear the staging trigger byte, restore registers,
/// return through the NMI vector.
const EPILOGUE: [u8; 14] = [
    0xA9, 0x00, 0x8F, 0x00, 0x2C, 0x00, 0x68, 0xEB, 0x68, 0x28, 0x6C, 0xEA, 0xFF, 0x08,
];

/// Bytes of program emitted per byte written.
const BYTES_PER_STORE: usize = 6;

// ============================================================================
// Program Builder
// ============================================================================

/// Assembles the staging program that performs `writes`.
///
/// Only WRAM targets are expressible: the store instructions address the
/// console's own `0x7E` bank, so each write range must fall inside
/// `[WRAM_START, WRAM_START + WRAM_SIZE)`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] for any range outside WRAM.
pub(crate) fn staging_program(writes: &[MemoryWrite]) -> Result<Vec<u8>> {
    let stores: usize = writes.iter().map(|w| w.data.len()).sum();
    let mut program = Vec::with_capacity(PROLOGUE.len() + stores * BYTES_PER_STORE + EPILOGUE.len());

    program.extend_from_slice(&PROLOGUE);

    for write in writes {
        let end = u64::from(write.address) + write.data.len() as u64;
        if write.address < WRAM_START || end > u64::from(WRAM_START + WRAM_SIZE) {
            return Err(Error::invalid_argument(format!(
                "staged write {:#08x}+{:#x} is outside WRAM",
                write.address,
                write.data.len()
            )));
        }

        let base = write.address - WRAM_START + CONSOLE_WRAM_BASE;
        for (offset, byte) in write.data.iter().enumerate() {
            let target = base + offset as u32;
            program.push(OP_LDA_IMM);
            program.push(*byte);
            program.push(OP_STA_LONG);
            program.push(target as u8);
            program.push((target >> 8) as u8);
            program.push((target >> 16) as u8);
        }
    }

    program.extend_from_slice(&EPILOGUE);
    Ok(program)
}

// ============================================================================
// Tests
// ============================================================================
