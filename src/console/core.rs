//! Console coordinator and shared connection state.
//!
//! [`Console`] owns the connection through an `Arc`'d shared block that
//! every component handle (memory, transfers, savestates, watchers)
//! clones. The shared block is the only mutable state in the crate:
//! connection lifecycle, the attached-device profile, and the exclusive
//! request channel.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::Mutex;
use regex::Regex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::memory::map::{SAVESTATE_INTERFACE_LEGACY, SAVESTATE_INTERFACE_MODERN};
use crate::memory::{MemoryIo, MemoryRegion};
use crate::protocol::{AddressSpace, Opcode, Request};
use crate::savestate::SavestateController;
use crate::transfer::TransferEngine;
use crate::transport::{connection::Transport, endpoint, Endpoint, RequestChannel};
use crate::watch::{wait, Condition, MemoryWatcher, Target, WatchBuilder};

use super::options::ConsoleOptions;

// ============================================================================
// ConnectionState
// ============================================================================

/// Liveness of a console connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection (initial, after disconnect, or after transport
    /// failure).
    Disconnected,
    /// Socket open, no device attached yet.
    Connected,
    /// Attached to a device; all operations available.
    Attached,
}

// ============================================================================
// DeviceProfile
// ============================================================================

/// Everything learned about the attached device.
pub(crate) struct DeviceProfile {
    /// Device name as given to `attach`.
    pub(crate) name: String,
    /// Writes must go through the CMD staging buffer.
    pub(crate) uses_cmd_staging: bool,
    /// Firmware version string from `Info`.
    pub(crate) firmware_version: Option<String>,
    /// Firmware-dependent savestate interface address.
    pub(crate) savestate_interface: u32,
}

// ============================================================================
// DeviceInfo
// ============================================================================

/// Structured `Info` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Firmware version string.
    pub firmware_version: String,
    /// Human-readable version string.
    pub version_string: String,
    /// Path of the currently running ROM.
    pub rom_running: String,
    /// Remaining feature flags.
    pub flags: Vec<String>,
}

impl DeviceInfo {
    fn from_reply(reply: &crate::protocol::Reply) -> Self {
        Self {
            firmware_version: reply.get(0).unwrap_or_default().to_string(),
            version_string: reply.get(1).unwrap_or_default().to_string(),
            rom_running: reply.get(2).unwrap_or_default().to_string(),
            flags: reply.results.iter().skip(3).cloned().collect(),
        }
    }
}

// ============================================================================
// DirEntry
// ============================================================================

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    /// A directory.
    Directory,
    /// A file.
    File,
}

impl EntryKind {
    fn from_wire(kind: &str) -> Self {
        if kind == "0" {
            Self::Directory
        } else {
            Self::File
        }
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Entry kind.
    pub kind: EntryKind,
    /// Entry name (no path).
    pub name: String,
}

impl DirEntry {
    /// Returns `true` for directories.
    #[inline]
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

// ============================================================================
// Shared
// ============================================================================

/// Connection state shared by the console and its component handles.
pub(crate) struct Shared {
    pub(crate) channel: RequestChannel,
    pub(crate) options: ConsoleOptions,
    pub(crate) state: Mutex<ConnectionState>,
    pub(crate) device: Mutex<Option<DeviceProfile>>,
}

impl Shared {
    /// Current liveness; a closed transport reads as disconnected no
    /// matter what the stored state says.
    pub(crate) fn state(&self) -> ConnectionState {
        if self.channel.is_closed() {
            return ConnectionState::Disconnected;
        }
        *self.state.lock()
    }

    /// Errors unless the socket is open.
    pub(crate) fn require_connected(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Disconnected => Err(Error::NotConnected),
            ConnectionState::Connected | ConnectionState::Attached => Ok(()),
        }
    }

    /// Errors unless a device is attached.
    pub(crate) fn require_attached(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Disconnected => Err(Error::NotConnected),
            ConnectionState::Connected => Err(Error::NotAttached),
            ConnectionState::Attached => Ok(()),
        }
    }

    /// Returns `true` if writes go through the CMD staging buffer.
    pub(crate) fn uses_cmd_staging(&self) -> bool {
        self.device
            .lock()
            .as_ref()
            .map(|d| d.uses_cmd_staging)
            .unwrap_or(false)
    }

    /// The firmware-dependent savestate interface address.
    pub(crate) fn savestate_interface(&self) -> Result<u32> {
        self.device
            .lock()
            .as_ref()
            .map(|d| d.savestate_interface)
            .ok_or(Error::NotAttached)
    }
}

// ============================================================================
// Console
// ============================================================================

/// A connection to a usb2snes server.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Console {
    pub(crate) shared: Arc<Shared>,
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console")
            .field("state", &self.shared.state())
            .field("device", &self.device_name())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Console - Lifecycle
// ============================================================================

impl Console {
    /// Creates a configuration builder.
    #[inline]
    #[must_use]
    pub fn builder() -> super::ConsoleBuilder {
        super::ConsoleBuilder::new()
    }

    /// Connects to `url` with default options.
    pub async fn connect(url: impl Into<String>) -> Result<Self> {
        Self::builder().url(url).connect().await
    }

    /// Dials `endpoint` and wraps the connection.
    pub(crate) async fn open(endpoint: Endpoint, options: ConsoleOptions) -> Result<Self> {
        info!(url = endpoint.url(), "connecting");
        let stream = endpoint::open_stream(&endpoint, options.connect_timeout).await?;
        let channel = RequestChannel::new(Transport::new(stream));

        Ok(Self {
            shared: Arc::new(Shared {
                channel,
                options,
                state: Mutex::new(ConnectionState::Connected),
                device: Mutex::new(None),
            }),
        })
    }

    /// Closes the connection. Every in-flight and queued operation fails
    /// with a connection-lost error.
    pub fn disconnect(&self) {
        info!("disconnecting");
        self.shared.channel.shutdown();
        *self.shared.state.lock() = ConnectionState::Disconnected;
        *self.shared.device.lock() = None;
    }

    /// Current liveness state.
    #[inline]
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Name of the attached device, if any.
    #[must_use]
    pub fn device_name(&self) -> Option<String> {
        self.shared.device.lock().as_ref().map(|d| d.name.clone())
    }

    /// Firmware version recorded from the last `Info` round trip.
    #[must_use]
    pub fn firmware_version(&self) -> Option<String> {
        self.shared
            .device
            .lock()
            .as_ref()
            .and_then(|d| d.firmware_version.clone())
    }
}

// ============================================================================
// Console - Discovery & Attachment
// ============================================================================

impl Console {
    /// Lists devices known to the server.
    pub async fn device_list(&self) -> Result<Vec<String>> {
        self.shared.require_connected()?;
        let request = Request::new(Opcode::DeviceList, AddressSpace::Snes);
        let reply = self.round_trip(&request).await?;
        Ok(reply.results)
    }

    /// Attaches to `device` and returns its `Info`.
    ///
    /// Attachment itself is fire-and-forget on the wire; the `Info` round
    /// trip that follows both confirms it and records the firmware
    /// version.
    pub async fn attach(&self, device: &str) -> Result<DeviceInfo> {
        match self.shared.state() {
            ConnectionState::Disconnected => return Err(Error::NotConnected),
            ConnectionState::Attached => {
                return Err(Error::precondition_failed("already attached to a device"));
            }
            ConnectionState::Connected => {}
        }

        let request = Request::with_operands(
            Opcode::Attach,
            AddressSpace::Snes,
            vec![device.to_string()],
        );
        self.shared.channel.command(&request).await?;

        let uses_cmd_staging = device.to_lowercase().contains("sd2snes")
            || (device.len() == 4
                && device.get(..3).is_some_and(|p| p.eq_ignore_ascii_case("COM")));

        *self.shared.device.lock() = Some(DeviceProfile {
            name: device.to_string(),
            uses_cmd_staging,
            firmware_version: None,
            savestate_interface: SAVESTATE_INTERFACE_LEGACY,
        });
        *self.shared.state.lock() = ConnectionState::Attached;
        info!(device, uses_cmd_staging, "attached");

        self.info().await
    }

    /// Queries device information, refreshing the stored firmware
    /// version.
    pub async fn info(&self) -> Result<DeviceInfo> {
        self.shared.require_attached()?;
        let device = self.device_name().ok_or(Error::NotAttached)?;

        let request = Request::with_operands(Opcode::Info, AddressSpace::Snes, vec![device]);
        let reply = self.round_trip(&request).await?;
        let device_info = DeviceInfo::from_reply(&reply);

        let mut guard = self.shared.device.lock();
        if let Some(profile) = guard.as_mut() {
            profile.firmware_version = Some(device_info.firmware_version.clone());
            if let Some(major) = parse_major_version(&device_info.firmware_version) {
                profile.savestate_interface = if major >= 11 {
                    SAVESTATE_INTERFACE_MODERN
                } else {
                    SAVESTATE_INTERFACE_LEGACY
                };
                debug!(major, interface = profile.savestate_interface, "firmware recorded");
            }
        }

        Ok(device_info)
    }
}

// ============================================================================
// Console - Control
// ============================================================================

impl Console {
    /// Registers a client name with the server.
    pub async fn set_name(&self, name: &str) -> Result<()> {
        self.shared.require_attached()?;
        let request =
            Request::with_operands(Opcode::Name, AddressSpace::Snes, vec![name.to_string()]);
        self.shared.channel.command(&request).await
    }

    /// Boots the ROM at `path`.
    pub async fn boot(&self, path: &str) -> Result<()> {
        self.shared.require_attached()?;
        let request =
            Request::with_operands(Opcode::Boot, AddressSpace::Snes, vec![path.to_string()]);
        self.shared.channel.command(&request).await
    }

    /// Returns the device to its menu.
    pub async fn menu(&self) -> Result<()> {
        self.shared.require_attached()?;
        let request = Request::new(Opcode::Menu, AddressSpace::Snes);
        self.shared.channel.command(&request).await
    }

    /// Resets the running ROM.
    pub async fn reset(&self) -> Result<()> {
        self.shared.require_attached()?;
        let request = Request::new(Opcode::Reset, AddressSpace::Snes);
        self.shared.channel.command(&request).await
    }
}

// ============================================================================
// Console - File System
// ============================================================================

impl Console {
    /// Lists the directory at `path`.
    ///
    /// Walks the path component by component first: the device answers a
    /// listing request for a missing directory with silence (or worse),
    /// so absence is detected from the parent listing and reported as
    /// [`Error::PreconditionFailed`].
    pub async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        self.shared.require_attached()?;
        validate_dir_path(path)?;

        if !is_root(path) {
            let mut parent = String::new();
            for component in path.split('/').filter(|c| !c.is_empty()) {
                let entries = self.list_raw(&parent).await?;
                if !entries
                    .iter()
                    .any(|e| e.name.eq_ignore_ascii_case(component))
                {
                    return Err(Error::precondition_failed(format!(
                        "directory {path} does not exist on the device"
                    )));
                }
                parent.push('/');
                parent.push_str(component);
            }
        }

        self.list_raw(path).await
    }

    /// Creates the directory at `path`.
    ///
    /// The parent must exist; an already-existing directory is a no-op.
    pub async fn make_dir(&self, path: &str) -> Result<()> {
        self.shared.require_attached()?;
        if is_root(path) {
            return Err(Error::invalid_argument(
                "make_dir path cannot be blank or \"/\"",
            ));
        }
        validate_dir_path(path)?;

        // The parent listing doubles as the existence precondition.
        let parent = match path.rfind('/') {
            Some(0) | None => "/".to_string(),
            Some(idx) => path[..idx].to_string(),
        };
        self.list_dir(&parent).await?;

        match self.list_dir(path).await {
            Ok(_) => Ok(()),
            Err(Error::PreconditionFailed { .. }) => {
                debug!(path, "creating directory");
                let request = Request::filesystem(Opcode::MakeDir, vec![path.to_string()]);
                self.shared.channel.command(&request).await
            }
            Err(e) => Err(e),
        }
    }

    /// Removes the file or directory at `path`.
    pub async fn remove(&self, path: &str) -> Result<()> {
        self.shared.require_attached()?;
        validate_dir_path(path)?;
        let request = Request::filesystem(Opcode::Remove, vec![path.to_string()]);
        self.shared.channel.command(&request).await
    }

    /// One raw `List` exchange, entries filtered of `.`/`..`.
    pub(crate) async fn list_raw(&self, path: &str) -> Result<Vec<DirEntry>> {
        let request = Request::filesystem(Opcode::List, vec![path.to_string()]);
        let reply = self.round_trip(&request).await?;

        let mut entries = Vec::with_capacity(reply.results.len() / 2);
        for pair in reply.results.chunks_exact(2) {
            let name = pair[1].clone();
            if name == "." || name == ".." {
                continue;
            }
            entries.push(DirEntry {
                kind: EntryKind::from_wire(&pair[0]),
                name,
            });
        }
        Ok(entries)
    }

    async fn round_trip(&self, request: &Request) -> Result<crate::protocol::Reply> {
        self.shared
            .channel
            .round_trip(request, self.shared.options.reply_timeout)
            .await
    }
}

// ============================================================================
// Console - Components
// ============================================================================

impl Console {
    /// Memory read/write access.
    #[inline]
    #[must_use]
    pub fn memory(&self) -> MemoryIo {
        MemoryIo::new(Arc::clone(&self.shared))
    }

    /// Chunked file transfer.
    #[inline]
    #[must_use]
    pub fn files(&self) -> TransferEngine {
        TransferEngine::new(Arc::clone(&self.shared))
    }

    /// Savestate capture/restore.
    #[inline]
    #[must_use]
    pub fn savestates(&self) -> SavestateController {
        SavestateController::new(Arc::clone(&self.shared))
    }

    /// Starts building a continuous memory watcher.
    #[inline]
    #[must_use]
    pub fn watch(&self) -> WatchBuilder {
        WatchBuilder::new(self.memory())
    }

    /// Polls `region` until `target` matches, returning the matching
    /// bytes.
    ///
    /// # Errors
    ///
    /// Rejects with [`Error::Timeout`] if `timeout` elapses first.
    pub async fn watch_for_value(
        &self,
        region: MemoryRegion,
        target: Target,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Vec<u8>> {
        wait::wait_for_value(&self.memory(), region, &target, timeout, poll_interval).await
    }

    /// Polls until every condition holds at once, returning all region
    /// bytes from the matching cycle.
    ///
    /// # Errors
    ///
    /// Rejects with [`Error::Timeout`] if `timeout` elapses first.
    pub async fn watch_for_conditions(
        &self,
        conditions: &[Condition],
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<Vec<Vec<u8>>> {
        wait::wait_for_conditions(&self.memory(), conditions, timeout, poll_interval).await
    }

    /// Convenience constructor for a watcher over `regions`.
    pub fn create_watcher(
        &self,
        regions: Vec<MemoryRegion>,
        poll_interval: Duration,
    ) -> Result<MemoryWatcher> {
        self.watch().regions(regions).poll_interval(poll_interval).build()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Extracts the major firmware version from strings like `"11.0"` or
/// `"usb2snes v11"`.
fn parse_major_version(version: &str) -> Option<u32> {
    static DIGITS: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\d+").expect("static pattern"));
    DIGITS
        .find(version)
        .and_then(|m| m.as_str().parse().ok())
}

/// `true` for the two spellings of the root directory.
fn is_root(path: &str) -> bool {
    path.is_empty() || path == "/"
}

/// Device paths must be absolute and must not end with a slash.
fn validate_dir_path(path: &str) -> Result<()> {
    if is_root(path) {
        return Ok(());
    }
    if !path.starts_with('/') {
        return Err(Error::invalid_argument(format!(
            "path {path:?} should start with \"/\""
        )));
    }
    if path.ends_with('/') {
        return Err(Error::invalid_argument(format!(
            "path {path:?} should not end with \"/\""
        )));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
