//! Savestate capture and restore.
//!
//! A ROM-side patch exposes a two-flag interface in console memory: byte 0
//! requests a save, byte 1 requests a load, and the firmware clears the
//! flag once the transition finishes. The state itself is a fixed 320 KiB
//! buffer at a fixed address. The interface address depends on the
//! firmware major version and is recorded at attach time.
//!
//! Both operations wait for a "safe state" (both flags zero) before
//! touching anything — triggering a capture while the device is
//! mid-transition corrupts it — and hold the exclusive request channel
//! end-to-end so no other memory traffic interleaves.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::console::core::Shared;
use crate::error::{Error, Result};
use crate::memory::map::{SAVESTATE_DATA_ADDRESS, SAVESTATE_SIZE};
use crate::memory::{MemoryIo, MemoryRegion, MemoryWrite};
use crate::transport::ChannelLease;

// ============================================================================
// Constants
// ============================================================================

/// Poll interval while waiting for the flag interface.
const SAFE_STATE_POLL: Duration = Duration::from_millis(30);

/// Bound on the initial safe-state wait.
const SAFE_STATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on waiting for a triggered save/load to finish.
const COMPLETION_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay after setting a trigger flag before polling for completion.
const TRIGGER_SETTLE: Duration = Duration::from_millis(100);

/// Slice size for the batched read of the state buffer.
const READ_SLICE: u32 = 0x1_0000;

// ============================================================================
// SavestateBlob
// ============================================================================

/// A captured 320 KiB savestate plus capture metadata.
#[derive(Debug, Clone)]
pub struct SavestateBlob {
    data: Vec<u8>,
    captured_at: SystemTime,
    interface_address: Option<u32>,
}

impl SavestateBlob {
    /// Wraps previously captured bytes (for example read back from disk).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] unless `data` is exactly
    /// 320 KiB.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        if data.len() != SAVESTATE_SIZE {
            return Err(Error::invalid_argument(format!(
                "savestate must be {SAVESTATE_SIZE} bytes, got {}",
                data.len()
            )));
        }
        Ok(Self {
            data,
            captured_at: SystemTime::now(),
            interface_address: None,
        })
    }

    /// The state bytes.
    #[inline]
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the blob, returning the state bytes.
    #[inline]
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// When the state was captured.
    #[inline]
    #[must_use]
    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Interface address in effect at capture time, when captured by this
    /// client.
    #[inline]
    #[must_use]
    pub fn interface_address(&self) -> Option<u32> {
        self.interface_address
    }
}

// ============================================================================
// SavestateController
// ============================================================================

/// Captures and restores savestates through the RAM-resident flag
/// interface.
///
/// Cheap to clone; all clones share the console's exclusive request
/// channel.
#[derive(Clone)]
pub struct SavestateController {
    shared: Arc<Shared>,
    memory: MemoryIo,
}

impl SavestateController {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let memory = MemoryIo::new(Arc::clone(&shared));
        Self { shared, memory }
    }

    /// Probes whether the running ROM exposes the savestate interface.
    ///
    /// A readable interface means support *may* be present; an error
    /// (or no attached device) means it is not.
    pub async fn is_supported(&self) -> bool {
        let Ok(interface) = self.shared.savestate_interface() else {
            return false;
        };
        self.memory.read_memory(interface, 2).await.is_ok()
    }

    /// Captures the current state into a fresh blob.
    ///
    /// Waits for a safe state, sets the save flag, waits for the firmware
    /// to clear it, then reads the 320 KiB buffer in one batched read.
    pub async fn save_state(&self) -> Result<SavestateBlob> {
        self.shared.require_attached()?;
        let interface = self.shared.savestate_interface()?;
        info!(interface, "capturing savestate");

        let mut lease = self.shared.channel.lease().await;
        self.wait_safe_state(&mut lease, interface, SAFE_STATE_TIMEOUT)
            .await?;

        // Trigger the save; the firmware clears the flag when done.
        let trigger = MemoryWrite::new(interface, vec![1, 0])?;
        self.memory.write_on(&mut lease, &[trigger]).await?;
        sleep(TRIGGER_SETTLE).await;
        self.wait_safe_state(&mut lease, interface, COMPLETION_TIMEOUT)
            .await?;

        let regions = buffer_slices()?;
        let pieces = self.memory.read_batch_on(&mut lease, &regions).await?;
        drop(lease);

        let data = pieces.concat();
        debug!(bytes = data.len(), "savestate captured");

        Ok(SavestateBlob {
            data,
            captured_at: SystemTime::now(),
            interface_address: Some(interface),
        })
    }

    /// Restores `blob` onto the device.
    ///
    /// Waits for a safe state, writes the 320 KiB buffer, sets the load
    /// flag and waits for the firmware to clear it.
    pub async fn load_state(&self, blob: &SavestateBlob) -> Result<()> {
        self.shared.require_attached()?;
        if blob.data.len() != SAVESTATE_SIZE {
            return Err(Error::invalid_argument(format!(
                "savestate must be {SAVESTATE_SIZE} bytes, got {}",
                blob.data.len()
            )));
        }
        let interface = self.shared.savestate_interface()?;
        info!(interface, "restoring savestate");

        let mut lease = self.shared.channel.lease().await;
        self.wait_safe_state(&mut lease, interface, SAFE_STATE_TIMEOUT)
            .await?;

        let payload = MemoryWrite::new(SAVESTATE_DATA_ADDRESS, blob.data.clone())?;
        self.memory.write_on(&mut lease, &[payload]).await?;

        // Trigger the load through the second interface byte.
        let trigger = MemoryWrite::new(interface + 1, vec![1])?;
        self.memory.write_on(&mut lease, &[trigger]).await?;
        sleep(TRIGGER_SETTLE).await;
        self.wait_safe_state(&mut lease, interface, COMPLETION_TIMEOUT)
            .await?;

        debug!("savestate restored");
        Ok(())
    }

    /// Polls the flag pair until both read zero.
    async fn wait_safe_state(
        &self,
        lease: &mut ChannelLease<'_>,
        interface: u32,
        bound: Duration,
    ) -> Result<()> {
        let deadline = Instant::now() + bound;
        let region = MemoryRegion::new(interface, 2)?;

        loop {
            let flags = self.memory.read_batch_on(lease, &[region]).await?;
            let flags = &flags[0];
            if flags[0] == 0 && flags[1] == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::timeout(
                    "savestate safe-state wait",
                    bound.as_millis() as u64,
                ));
            }
            sleep(SAFE_STATE_POLL).await;
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// The state buffer as batch-read slices.
fn buffer_slices() -> Result<Vec<MemoryRegion>> {
    let mut regions = Vec::new();
    let mut offset = 0u32;
    while (offset as usize) < SAVESTATE_SIZE {
        let size = READ_SLICE.min(SAVESTATE_SIZE as u32 - offset);
        regions.push(MemoryRegion::new(SAVESTATE_DATA_ADDRESS + offset, size)?);
        offset += size;
    }
    Ok(regions)
}

// ============================================================================
// Tests
// ============================================================================
