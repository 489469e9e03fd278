//! Memory read/write operations.
//!
//! Reads are one request/reply exchange each; the batched variant packs
//! many `(address, size)` pairs into a single exchange and is the
//! primitive every watcher polls through. Writes pick their wire encoding
//! from the attached hardware: ordinary devices take the bytes directly,
//! staged-write hardware takes an assembled program through the CMD
//! space. The public contract is identical either way.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tracing::{debug, trace};

use crate::console::core::Shared;
use crate::error::{Error, Result};
use crate::protocol::{hex_operand, AddressSpace, Opcode, Request};
use crate::transport::ChannelLease;

use super::asm::staging_program;
use super::map::{CMD_STAGING_ADDRESS, MAX_READ_CHUNK};
use super::region::{MemoryRegion, MemoryWrite};

// ============================================================================
// MemoryIo
// ============================================================================

/// Read/write access to the attached console's address space.
///
/// Cheap to clone; all clones share the console's exclusive request
/// channel.
#[derive(Clone)]
pub struct MemoryIo {
    shared: Arc<Shared>,
}

impl MemoryIo {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Reads `size` bytes starting at `address`.
    ///
    /// Reads larger than [`MAX_READ_CHUNK`] are transparently split into
    /// one batched request; the result is still a single buffer.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for a zero size or out-of-range span
    /// - [`Error::ProtocolMismatch`] if the reply length disagrees
    pub async fn read_memory(&self, address: u32, size: u32) -> Result<Vec<u8>> {
        let region = MemoryRegion::new(address, size)?;
        let pieces = self.read_memory_batch(&split_region(region)).await?;
        Ok(pieces.concat())
    }

    /// Reads every region in one request, returning results in request
    /// order.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if `regions` is empty or any region
    ///   exceeds [`MAX_READ_CHUNK`]
    /// - [`Error::ProtocolMismatch`] if the combined reply length
    ///   disagrees
    pub async fn read_memory_batch(&self, regions: &[MemoryRegion]) -> Result<Vec<Vec<u8>>> {
        self.shared.require_attached()?;
        let mut lease = self.shared.channel.lease().await;
        self.read_batch_on(&mut lease, regions).await
    }

    /// Batched read on an already-held lease.
    pub(crate) async fn read_batch_on(
        &self,
        lease: &mut ChannelLease<'_>,
        regions: &[MemoryRegion],
    ) -> Result<Vec<Vec<u8>>> {
        if regions.is_empty() {
            return Err(Error::invalid_argument("empty region batch"));
        }

        let mut operands = Vec::with_capacity(regions.len() * 2);
        let mut total = 0usize;
        for region in regions {
            if region.size > MAX_READ_CHUNK {
                return Err(Error::invalid_argument(format!(
                    "batch region {:#08x}+{:#x} exceeds the {MAX_READ_CHUNK:#x}-byte read limit",
                    region.address, region.size
                )));
            }
            region.push_operands(&mut operands);
            total += region.size as usize;
        }

        trace!(regions = regions.len(), total, "batched read");

        let request = Request::with_operands(Opcode::GetAddress, AddressSpace::Snes, operands);
        lease.send_request(&request)?;
        let data = lease
            .recv_binary_exact(total, self.shared.options.reply_timeout, "GetAddress")
            .await?;

        // Carve the combined stream back into per-region buffers.
        let mut results = Vec::with_capacity(regions.len());
        let mut consumed = 0usize;
        for region in regions {
            let next = consumed + region.size as usize;
            results.push(data[consumed..next].to_vec());
            consumed = next;
        }
        Ok(results)
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Writes each `(address, bytes)` span to console memory.
    ///
    /// On staged-write hardware the spans are assembled into one CMD-space
    /// program; targets must then lie inside WRAM.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for invalid spans (or, on staged-write
    ///   hardware, targets outside WRAM)
    pub async fn write_memory(&self, writes: &[MemoryWrite]) -> Result<()> {
        self.shared.require_attached()?;
        let mut lease = self.shared.channel.lease().await;
        self.write_on(&mut lease, writes).await
    }

    /// Write on an already-held lease.
    ///
    /// Staged-write hardware only needs the staging buffer for WRAM (the
    /// console's own RAM, which the cart cannot reach directly); targets
    /// in cart-addressable space still take the direct path.
    pub(crate) async fn write_on(
        &self,
        lease: &mut ChannelLease<'_>,
        writes: &[MemoryWrite],
    ) -> Result<()> {
        if writes.is_empty() {
            return Err(Error::invalid_argument("empty write list"));
        }

        if !self.shared.uses_cmd_staging() {
            return self.write_direct(lease, writes).await;
        }

        let (staged, direct): (Vec<_>, Vec<_>) = writes
            .iter()
            .cloned()
            .partition(|w| is_wram_span(w));

        if !direct.is_empty() {
            self.write_direct(lease, &direct).await?;
        }
        if !staged.is_empty() {
            self.write_staged(lease, &staged)?;
        }
        Ok(())
    }

    /// Direct path: one `PutAddress` announce plus data per span.
    async fn write_direct(
        &self,
        lease: &mut ChannelLease<'_>,
        writes: &[MemoryWrite],
    ) -> Result<()> {
        let chunk_size = self.shared.options.chunk_size;
        let limit = self.shared.options.backpressure_limit;

        for write in writes {
            let region = write.region();
            debug!(address = region.address, size = region.size, "direct write");

            let request = Request::with_operands(
                Opcode::PutAddress,
                AddressSpace::Snes,
                vec![
                    hex_operand(u64::from(write.address)),
                    hex_operand(write.data.len() as u64),
                ],
            );
            lease.send_request(&request)?;

            for chunk in write.data.chunks(chunk_size) {
                lease.wait_for_drain(limit, None, "PutAddress data").await?;
                lease.send_binary(chunk.to_vec())?;
            }
        }
        Ok(())
    }

    /// Staged path: assemble every span into one program and trigger it
    /// through the CMD staging buffer.
    fn write_staged(&self, lease: &mut ChannelLease<'_>, writes: &[MemoryWrite]) -> Result<()> {
        let program = staging_program(writes)?;
        debug!(spans = writes.len(), program_len = program.len(), "staged write");

        let staging = hex_operand(u64::from(CMD_STAGING_ADDRESS));
        // The body is written first; the final byte lands at the staging
        // address as its own range, which is what arms execution.
        let request = Request::with_operands(
            Opcode::PutAddress,
            AddressSpace::Cmd,
            vec![
                staging.clone(),
                hex_operand((program.len() - 1) as u64),
                staging,
                hex_operand(1),
            ],
        );
        lease.send_request(&request)?;
        lease.send_binary(program)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// `true` when the whole span lies inside WRAM.
fn is_wram_span(write: &MemoryWrite) -> bool {
    let end = u64::from(write.address) + write.data.len() as u64;
    write.address >= super::map::WRAM_START
        && end <= u64::from(super::map::WRAM_START + super::map::WRAM_SIZE)
}

/// Splits a validated region into [`MAX_READ_CHUNK`]-sized pieces.
fn split_region(region: MemoryRegion) -> Vec<MemoryRegion> {
    let mut pieces = Vec::new();
    let mut offset = 0u32;
    while offset < region.size {
        let size = (region.size - offset).min(MAX_READ_CHUNK);
        pieces.push(MemoryRegion {
            address: region.address + offset,
            size,
        });
        offset += size;
    }
    pieces
}

// ============================================================================
// Tests
// ============================================================================
