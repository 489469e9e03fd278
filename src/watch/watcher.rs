//! Continuous polling watcher.
//!
//! A watcher batch-reads its regions on a fixed interval, compares
//! against the previous cycle, and hands every changed region to the
//! change handler. The loop is cooperative: the stop flag is checked
//! between cycles, never mid-request, and cancellation means "stop
//! issuing polls", not "interrupt the one in flight".
//!
//! Poll errors are logged and the loop continues — one bad cycle must not
//! kill long-running monitoring. Errors that require a reconnect stop the
//! watcher for good.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::memory::{MemoryIo, MemoryRegion};

// ============================================================================
// Constants
// ============================================================================

/// Default poll interval (10 Hz).
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// Types
// ============================================================================

/// One region's transition within a poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryChange {
    /// Index of the region in the watcher's region set.
    pub index: usize,
    /// The watched region.
    pub region: MemoryRegion,
    /// Bytes from the previous cycle.
    pub old_value: Vec<u8>,
    /// Bytes from this cycle.
    pub new_value: Vec<u8>,
}

/// Callback invoked with every changed region of a poll cycle.
pub type ChangeHandler = Box<dyn Fn(&[MemoryChange]) + Send + Sync>;

// ============================================================================
// WatchBuilder
// ============================================================================

/// Builder for [`MemoryWatcher`].
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use usb2snes_client::{Console, MemoryRegion};
///
/// # async fn example(console: &Console) -> usb2snes_client::Result<()> {
/// let watcher = console
///     .watch()
///     .region(MemoryRegion::new(0xF5_0010, 2)?)
///     .poll_interval(Duration::from_millis(50))
///     .on_change(|changes| {
///         for change in changes {
///             println!("{:#08x} changed", change.region.address);
///         }
///     })
///     .build()?;
/// watcher.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct WatchBuilder {
    memory: MemoryIo,
    regions: Vec<MemoryRegion>,
    poll_interval: Duration,
    handler: Option<ChangeHandler>,
}

impl WatchBuilder {
    pub(crate) fn new(memory: MemoryIo) -> Self {
        Self {
            memory,
            regions: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            handler: None,
        }
    }

    /// Adds one region to watch.
    #[must_use]
    pub fn region(mut self, region: MemoryRegion) -> Self {
        self.regions.push(region);
        self
    }

    /// Replaces the watched region set.
    #[must_use]
    pub fn regions(mut self, regions: Vec<MemoryRegion>) -> Self {
        self.regions = regions;
        self
    }

    /// Sets the poll interval (default 100 ms).
    #[must_use]
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the change handler.
    #[must_use]
    pub fn on_change(mut self, handler: impl Fn(&[MemoryChange]) + Send + Sync + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    /// Builds the watcher (not yet running).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no regions were given.
    pub fn build(self) -> Result<MemoryWatcher> {
        if self.regions.is_empty() {
            return Err(Error::invalid_argument("watcher needs at least one region"));
        }
        Ok(MemoryWatcher {
            inner: Arc::new(WatcherInner {
                memory: self.memory,
                regions: self.regions,
                poll_interval: self.poll_interval,
                handler: self.handler,
                running: AtomicBool::new(false),
                last_values: Mutex::new(None),
                task: Mutex::new(None),
            }),
        })
    }
}

// ============================================================================
// MemoryWatcher
// ============================================================================

struct WatcherInner {
    memory: MemoryIo,
    regions: Vec<MemoryRegion>,
    poll_interval: Duration,
    handler: Option<ChangeHandler>,
    running: AtomicBool,
    last_values: Mutex<Option<Vec<Vec<u8>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// A running (or stoppable) continuous watcher handle.
///
/// Cheap to clone; clones control the same watcher.
#[derive(Clone)]
pub struct MemoryWatcher {
    inner: Arc<WatcherInner>,
}

impl MemoryWatcher {
    /// Performs the initial read and starts the polling task.
    ///
    /// Starting an already-running watcher is a no-op.
    pub async fn start(&self) -> Result<()> {
        if self.inner.running.swap(true, Ordering::AcqRel) {
            warn!("watcher already running");
            return Ok(());
        }

        info!(
            regions = self.inner.regions.len(),
            interval_ms = self.inner.poll_interval.as_millis() as u64,
            "starting watcher"
        );

        let initial = match self.inner.memory.read_memory_batch(&self.inner.regions).await {
            Ok(values) => values,
            Err(e) => {
                self.inner.running.store(false, Ordering::Release);
                return Err(e);
            }
        };
        *self.inner.last_values.lock() = Some(initial);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(poll_loop(inner));
        *self.inner.task.lock() = Some(handle);
        Ok(())
    }

    /// Requests a stop; the loop exits after its current cycle.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::AcqRel) {
            info!("stopping watcher");
        }
    }

    /// Returns `true` while the polling task runs.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Last-observed values, in region order.
    #[must_use]
    pub fn values(&self) -> Option<Vec<Vec<u8>>> {
        self.inner.last_values.lock().clone()
    }
}

// ============================================================================
// Poll Loop
// ============================================================================

async fn poll_loop(inner: Arc<WatcherInner>) {
    loop {
        sleep(inner.poll_interval).await;
        if !inner.running.load(Ordering::Acquire) {
            break;
        }

        let current = match inner.memory.read_memory_batch(&inner.regions).await {
            Ok(values) => values,
            Err(e) if e.requires_reconnect() => {
                warn!(error = %e, "connection gone; watcher stopping");
                break;
            }
            Err(e) => {
                warn!(error = %e, "watch poll failed; continuing");
                continue;
            }
        };

        let changes = {
            let mut guard = inner.last_values.lock();
            let changes = match guard.as_ref() {
                Some(previous) => diff_cycle(&inner.regions, previous, &current),
                None => Vec::new(),
            };
            *guard = Some(current);
            changes
        };

        if !changes.is_empty() {
            debug!(changed = changes.len(), "watch cycle detected changes");
            if let Some(handler) = &inner.handler {
                handler(&changes);
            }
        }
    }

    inner.running.store(false, Ordering::Release);
    debug!("watcher loop ended");
}

/// Collects every region whose bytes differ between two cycles.
fn diff_cycle(
    regions: &[MemoryRegion],
    previous: &[Vec<u8>],
    current: &[Vec<u8>],
) -> Vec<MemoryChange> {
    regions
        .iter()
        .enumerate()
        .filter(|(i, _)| previous[*i] != current[*i])
        .map(|(i, region)| MemoryChange {
            index: i,
            region: *region,
            old_value: previous[i].clone(),
            new_value: current[i].clone(),
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
