//! Conditional waits.
//!
//! A [`Target`] is any boolean test of a region's raw bytes; exact-match
//! values are the common special case. Waits poll at a fixed interval and
//! reject with a timeout once the bound elapses — nothing here blocks
//! forever.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::error::{Error, Result};
use crate::memory::{MemoryIo, MemoryRegion};

// ============================================================================
// Target
// ============================================================================

/// What a watched region must look like for a wait to resolve.
pub enum Target {
    /// First byte equals this value.
    Byte(u8),
    /// All bytes equal this value.
    Bytes(Vec<u8>),
    /// Arbitrary test of the raw bytes.
    Predicate(Box<dyn Fn(&[u8]) -> bool + Send + Sync>),
}

impl Target {
    /// Wraps a predicate function.
    #[must_use]
    pub fn predicate(f: impl Fn(&[u8]) -> bool + Send + Sync + 'static) -> Self {
        Self::Predicate(Box::new(f))
    }

    /// Tests `bytes` against this target.
    pub(crate) fn matches(&self, bytes: &[u8]) -> bool {
        match self {
            Self::Byte(value) => bytes.first() == Some(value),
            Self::Bytes(value) => bytes == value,
            Self::Predicate(f) => f(bytes),
        }
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte(value) => f.debug_tuple("Byte").field(value).finish(),
            Self::Bytes(value) => f.debug_tuple("Bytes").field(value).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<u8> for Target {
    fn from(value: u8) -> Self {
        Self::Byte(value)
    }
}

impl From<Vec<u8>> for Target {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

// ============================================================================
// Condition
// ============================================================================

/// One region/target pair for a multi-condition wait.
#[derive(Debug)]
pub struct Condition {
    /// Region to poll.
    pub region: MemoryRegion,
    /// Test the region must satisfy.
    pub target: Target,
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(region: MemoryRegion, target: impl Into<Target>) -> Self {
        Self {
            region,
            target: target.into(),
        }
    }
}

// ============================================================================
// Waits
// ============================================================================

/// Polls `region` until `target` matches, returning the matching bytes.
pub(crate) async fn wait_for_value(
    memory: &MemoryIo,
    region: MemoryRegion,
    target: &Target,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Vec<u8>> {
    let deadline = Instant::now() + timeout;

    loop {
        let bytes = memory.read_memory(region.address, region.size).await?;
        if target.matches(&bytes) {
            return Ok(bytes);
        }
        if Instant::now() >= deadline {
            return Err(Error::timeout(
                format!("watch for value at {:#08x}", region.address),
                timeout.as_millis() as u64,
            ));
        }
        sleep(poll_interval).await;
    }
}

/// Polls until every condition holds in the same cycle, returning that
/// cycle's bytes for all regions in condition order.
pub(crate) async fn wait_for_conditions(
    memory: &MemoryIo,
    conditions: &[Condition],
    timeout: Duration,
    poll_interval: Duration,
) -> Result<Vec<Vec<u8>>> {
    if conditions.is_empty() {
        return Err(Error::invalid_argument("empty condition list"));
    }

    let regions: Vec<MemoryRegion> = conditions.iter().map(|c| c.region).collect();
    let deadline = Instant::now() + timeout;

    loop {
        let values = memory.read_memory_batch(&regions).await?;
        let all_met = conditions
            .iter()
            .zip(&values)
            .all(|(condition, bytes)| condition.target.matches(bytes));
        if all_met {
            return Ok(values);
        }
        if Instant::now() >= deadline {
            return Err(Error::timeout(
                "watch for conditions",
                timeout.as_millis() as u64,
            ));
        }
        sleep(poll_interval).await;
    }
}

// ============================================================================
// Tests
// ============================================================================
