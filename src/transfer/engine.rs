//! Transfer operations.
//!
//! Both directions hold the exclusive request channel for their whole
//! binary phase: replies are matched by order alone, so a request slipped
//! between data frames would consume file bytes as its reply. Deadlines
//! and backpressure are checked between chunks inside the lease; nothing
//! aborts a frame already sent.

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::console::core::{Console, Shared};
use crate::error::{Error, Result};
use crate::protocol::{hex_operand, AddressSpace, Opcode, Request};

use super::job::{Direction, JobState, TransferJob};

// ============================================================================
// Constants
// ============================================================================

/// Settle delay before post-upload verification; the device finishes its
/// own writeback after the last frame arrives.
const VERIFY_SETTLE_DELAY: Duration = Duration::from_secs(1);

// ============================================================================
// Types
// ============================================================================

/// Progress observer: called with `(transferred, total)` at start and
/// after every chunk/frame. Purely observational.
pub type ProgressFn = dyn Fn(u64, u64) + Send + Sync;

// ============================================================================
// TransferEngine
// ============================================================================

/// Chunked upload/download of files on the console's storage.
///
/// Cheap to clone; all clones share the console's exclusive request
/// channel.
#[derive(Clone)]
pub struct TransferEngine {
    shared: Arc<Shared>,
}

impl TransferEngine {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    // ========================================================================
    // Upload
    // ========================================================================

    /// Uploads a local file to `remote`.
    pub async fn put_file(&self, local: impl AsRef<Path>, remote: &str) -> Result<u64> {
        let data = tokio::fs::read(local).await?;
        self.upload(&data, remote, None, None).await
    }

    /// Uploads a local file, reporting progress.
    pub async fn put_file_with_progress(
        &self,
        local: impl AsRef<Path>,
        remote: &str,
        progress: &ProgressFn,
    ) -> Result<u64> {
        let data = tokio::fs::read(local).await?;
        self.upload(&data, remote, Some(progress), None).await
    }

    /// Uploads an in-memory buffer to `remote`.
    pub async fn put_bytes(&self, data: &[u8], remote: &str) -> Result<u64> {
        self.upload(data, remote, None, None).await
    }

    /// Uploads an in-memory buffer, reporting progress.
    pub async fn put_bytes_with_progress(
        &self,
        data: &[u8],
        remote: &str,
        progress: &ProgressFn,
    ) -> Result<u64> {
        self.upload(data, remote, Some(progress), None).await
    }

    /// Uploads a local file under an overall deadline.
    ///
    /// `bound` defaults to a per-MiB budget derived from the file size
    /// (minimum 30 s). The deadline is checked between chunks; expiring
    /// mid-stream closes the connection, because the device still expects
    /// the remaining bytes.
    pub async fn put_file_blocking(
        &self,
        local: impl AsRef<Path>,
        remote: &str,
        bound: Option<Duration>,
        progress: Option<&ProgressFn>,
    ) -> Result<u64> {
        let data = tokio::fs::read(local).await?;
        let bound =
            bound.unwrap_or_else(|| self.shared.options.blocking_upload_timeout(data.len() as u64));
        info!(remote, size = data.len(), bound_secs = bound.as_secs(), "blocking upload");
        self.upload(&data, remote, progress, Some(Instant::now() + bound))
            .await
    }

    // ========================================================================
    // Download
    // ========================================================================

    /// Downloads `remote`, returning its bytes.
    pub async fn get_file(&self, remote: &str) -> Result<Vec<u8>> {
        self.download(remote, None, None).await
    }

    /// Downloads `remote`, reporting progress.
    pub async fn get_file_with_progress(
        &self,
        remote: &str,
        progress: &ProgressFn,
    ) -> Result<Vec<u8>> {
        self.download(remote, Some(progress), None).await
    }

    /// Downloads `remote` under an overall deadline (default 5 minutes).
    pub async fn get_file_blocking(
        &self,
        remote: &str,
        bound: Option<Duration>,
        progress: Option<&ProgressFn>,
    ) -> Result<Vec<u8>> {
        let bound = bound.unwrap_or(self.shared.options.download_timeout);
        info!(remote, bound_secs = bound.as_secs(), "blocking download");
        self.download(remote, progress, Some(Instant::now() + bound))
            .await
    }

    // ========================================================================
    // Upload Internals
    // ========================================================================

    async fn upload(
        &self,
        data: &[u8],
        remote: &str,
        progress: Option<&ProgressFn>,
        deadline: Option<Instant>,
    ) -> Result<u64> {
        self.shared.require_attached()?;

        let total = data.len() as u64;
        let mut job = TransferJob::new(remote, Direction::Upload, total);

        // Destination-directory precondition. The device reports nothing
        // for a missing directory; it silently drops the data and wedges.
        // So the directory is ensured (or the upload refused) before any
        // byte is sent.
        self.ensure_destination_dir(remote).await?;

        if let Some(progress) = progress {
            progress(0, total);
        }

        let chunk_size = self.shared.options.chunk_size;
        let limit = self.shared.options.backpressure_limit;

        let mut lease = self.shared.channel.lease().await;
        job.advance(JobState::Announced);
        let request = Request::with_operands(
            Opcode::PutFile,
            AddressSpace::Snes,
            vec![remote.to_string(), hex_operand(total)],
        );
        lease.send_request(&request)?;

        job.advance(JobState::Transferring);
        for chunk in data.chunks(chunk_size) {
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                job.advance(JobState::Failed);
                return Err(self.abort_mid_stream(&job));
            }

            // A drain timeout is the deadline expiring mid-stream too: the
            // device is still owed bytes, so the connection must go.
            if let Err(e) = lease
                .wait_for_drain(limit, deadline, "upload backpressure")
                .await
            {
                job.advance(JobState::Failed);
                if e.is_timeout() {
                    return Err(self.abort_mid_stream(&job));
                }
                return Err(e);
            }
            lease.send_binary(chunk.to_vec())?;
            job.record(chunk.len() as u64);

            if let Some(progress) = progress {
                progress(job.transferred, total);
            }
        }

        // Everything queued; make sure it actually left the client before
        // calling the transfer done.
        if let Err(e) = lease.wait_for_drain(0, deadline, "upload flush").await {
            job.advance(JobState::Failed);
            if e.is_timeout() {
                return Err(self.abort_mid_stream(&job));
            }
            return Err(e);
        }
        drop(lease);

        if job.remaining() != 0 {
            job.advance(JobState::Failed);
            return Err(Error::incomplete_transfer(job.transferred, total));
        }

        if self.shared.options.verify_after_upload {
            job.advance(JobState::Verifying);
            self.verify_upload(remote, &mut job).await?;
        }

        job.advance(JobState::Complete);
        info!(remote, total, "upload complete");
        Ok(total)
    }

    /// Ensures the destination directory exists, creating it when
    /// pre-creation is enabled.
    async fn ensure_destination_dir(&self, remote: &str) -> Result<()> {
        let parent = match remote.rfind('/') {
            Some(0) | None => return Ok(()),
            Some(idx) => &remote[..idx],
        };

        let console = self.console();
        match console.list_dir(parent).await {
            Ok(_) => Ok(()),
            Err(Error::PreconditionFailed { .. }) if self.shared.options.preemptive_dir_create => {
                debug!(parent, "destination directory missing; creating");
                console.make_dir(parent).await
            }
            Err(e) => Err(e),
        }
    }

    /// Confirms the uploaded file is visible in its directory.
    ///
    /// The protocol's listing carries no sizes, so presence plus the
    /// engine's own byte accounting is the strongest check available.
    async fn verify_upload(&self, remote: &str, job: &mut TransferJob) -> Result<()> {
        sleep(VERIFY_SETTLE_DELAY).await;

        let (parent, name) = match remote.rfind('/') {
            Some(idx) => (&remote[..idx.max(1)], &remote[idx + 1..]),
            None => ("/", remote),
        };

        let entries = self.console().list_dir(parent).await?;
        if !entries.iter().any(|e| e.name.eq_ignore_ascii_case(name)) {
            warn!(remote, "uploaded file absent from destination listing");
            job.advance(JobState::Failed);
            return Err(Error::incomplete_transfer(job.transferred, job.total));
        }

        debug!(remote, "upload verified");
        Ok(())
    }

    // ========================================================================
    // Download Internals
    // ========================================================================

    async fn download(
        &self,
        remote: &str,
        progress: Option<&ProgressFn>,
        deadline: Option<Instant>,
    ) -> Result<Vec<u8>> {
        self.shared.require_attached()?;

        let mut lease = self.shared.channel.lease().await;

        let mut job = TransferJob::new(remote, Direction::Download, 0);
        job.advance(JobState::Announced);
        let request = Request::with_operands(
            Opcode::GetFile,
            AddressSpace::Snes,
            vec![remote.to_string()],
        );
        lease.send_request(&request)?;

        let reply = lease
            .recv_reply(self.shared.options.reply_timeout, "GetFile")
            .await?;
        let total = reply.hex_field(0)?;
        job.total = total;
        debug!(remote, total, "download announced");

        if let Some(progress) = progress {
            progress(0, total);
        }

        job.advance(JobState::Transferring);
        let frame_wait = self.shared.options.download_frame_timeout;
        let mut data: Vec<u8> = Vec::with_capacity(total as usize);

        while (data.len() as u64) < total {
            if let Some(deadline) = deadline
                && Instant::now() >= deadline
            {
                job.advance(JobState::Failed);
                return Err(self.abort_mid_stream(&job));
            }

            let frame = match lease.recv_binary_frame(frame_wait, "GetFile data").await {
                Ok(frame) => frame,
                Err(e) if e.is_timeout() && data.is_empty() => {
                    // Nothing ever arrived; the exchange is cleanly dead.
                    job.advance(JobState::Failed);
                    return Err(e);
                }
                Err(e) if e.is_timeout() => {
                    // Stalled mid-file. The stream position is lost; the
                    // only recovery is reconnect and a fresh transfer.
                    job.advance(JobState::Failed);
                    self.shared.channel.shutdown();
                    return Err(Error::incomplete_transfer(data.len() as u64, total));
                }
                Err(e) => {
                    job.advance(JobState::Failed);
                    return Err(e);
                }
            };

            data.extend_from_slice(&frame);
            if data.len() as u64 > total {
                job.advance(JobState::Failed);
                self.shared.channel.shutdown();
                return Err(Error::protocol_mismatch(format!(
                    "download of {remote} overran: {}/{total} bytes",
                    data.len()
                )));
            }

            job.record(frame.len() as u64);
            if let Some(progress) = progress {
                progress(job.transferred, total);
            }
        }
        drop(lease);

        job.advance(JobState::Verifying);
        if data.len() as u64 != total {
            job.advance(JobState::Failed);
            return Err(Error::incomplete_transfer(data.len() as u64, total));
        }

        job.advance(JobState::Complete);
        info!(remote, total, "download complete");
        Ok(data)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// A deadline expired while binary frames were owed; the connection is
    /// unrecoverable at this stream position.
    fn abort_mid_stream(&self, job: &TransferJob) -> Error {
        warn!(
            path = %job.remote_path,
            transferred = job.transferred,
            total = job.total,
            "transfer deadline expired mid-stream; closing connection"
        );
        self.shared.channel.shutdown();
        Error::timeout(
            format!("{:?} of {}", job.direction, job.remote_path),
            0,
        )
    }

    fn console(&self) -> Console {
        Console {
            shared: Arc::clone(&self.shared),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
