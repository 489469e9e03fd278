//! Client configuration.
//!
//! Every knob has a default tuned for real hardware behind QUsb2Snes and
//! an environment override, so deployments can adjust flow control
//! without code changes.
//!
//! | Env var | Field | Default |
//! |---------|-------|---------|
//! | `USB2SNES_CHUNK_SIZE` | `chunk_size` | 1024 |
//! | `USB2SNES_BACKPRESSURE_LIMIT` | `backpressure_limit` | 1 MiB |
//! | `USB2SNES_PREEMPTIVE_DIR` | `preemptive_dir_create` | true |
//! | `USB2SNES_VERIFY_UPLOAD` | `verify_after_upload` | true |
//! | `USB2SNES_TIMEOUT_PER_MB` | `blocking_timeout_per_mib` | 10 s |

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tracing::warn;

// ============================================================================
// Defaults
// ============================================================================

/// Default upload chunk size.
///
/// Small on purpose: large chunks have been observed to overrun the
/// transport's send buffer and desynchronize real hardware. 4096 works on
/// stable connections; 1024 is the safe default.
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Default ceiling on buffered-but-unsent outbound bytes.
pub const DEFAULT_BACKPRESSURE_LIMIT: usize = 1024 * 1024;

/// Default per-MiB budget for blocking uploads.
pub const DEFAULT_TIMEOUT_PER_MIB: Duration = Duration::from_secs(10);

/// Floor for any blocking-upload timeout.
pub const MIN_BLOCKING_TIMEOUT: Duration = Duration::from_secs(30);

/// Default overall bound for blocking downloads.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// ConsoleOptions
// ============================================================================

/// Tunables consumed by the transport and transfer engine.
#[derive(Debug, Clone)]
pub struct ConsoleOptions {
    /// Upload chunk size in bytes.
    pub chunk_size: usize,

    /// Buffered-byte ceiling; uploads pause until the outbound buffer
    /// drains below this.
    pub backpressure_limit: usize,

    /// Create the destination directory before uploading. When disabled
    /// the directory is still checked and a missing one fails the upload
    /// before any byte is sent.
    pub preemptive_dir_create: bool,

    /// Verify presence of the uploaded file afterwards.
    pub verify_after_upload: bool,

    /// Per-MiB budget used to derive blocking-upload timeouts.
    pub blocking_timeout_per_mib: Duration,

    /// Overall bound for blocking downloads.
    pub download_timeout: Duration,

    /// Bound on a connection attempt.
    pub connect_timeout: Duration,

    /// Wait for a JSON reply (also each data frame of a memory read).
    pub reply_timeout: Duration,

    /// Wait for each data frame of a download.
    pub download_frame_timeout: Duration,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            backpressure_limit: DEFAULT_BACKPRESSURE_LIMIT,
            preemptive_dir_create: true,
            verify_after_upload: true,
            blocking_timeout_per_mib: DEFAULT_TIMEOUT_PER_MIB,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            connect_timeout: Duration::from_secs(10),
            reply_timeout: Duration::from_secs(5),
            download_frame_timeout: Duration::from_secs(10),
        }
    }
}

impl ConsoleOptions {
    /// Defaults with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        let mut options = Self::default();
        options.apply_env();
        options
    }

    /// Applies environment overrides to this instance.
    pub fn apply_env(&mut self) {
        if let Some(value) = env_parse::<usize>("USB2SNES_CHUNK_SIZE") {
            if value > 0 {
                self.chunk_size = value;
            } else {
                warn!("ignoring USB2SNES_CHUNK_SIZE=0");
            }
        }
        if let Some(value) = env_parse::<usize>("USB2SNES_BACKPRESSURE_LIMIT") {
            self.backpressure_limit = value;
        }
        if let Some(value) = env_flag("USB2SNES_PREEMPTIVE_DIR") {
            self.preemptive_dir_create = value;
        }
        if let Some(value) = env_flag("USB2SNES_VERIFY_UPLOAD") {
            self.verify_after_upload = value;
        }
        if let Some(value) = env_parse::<u64>("USB2SNES_TIMEOUT_PER_MB") {
            self.blocking_timeout_per_mib = Duration::from_secs(value);
        }
    }

    /// Derives the overall timeout for a blocking upload of `size` bytes.
    #[must_use]
    pub fn blocking_upload_timeout(&self, size: u64) -> Duration {
        let mib = size.div_ceil(1024 * 1024);
        (self.blocking_timeout_per_mib * mib as u32).max(MIN_BLOCKING_TIMEOUT)
    }
}

// ============================================================================
// Env Helpers
// ============================================================================

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(name, raw = %raw, "ignoring unparseable environment override");
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    Some(!raw.eq_ignore_ascii_case("false"))
}

// ============================================================================
// Tests
// ============================================================================
