//! Per-transfer state machine and progress bookkeeping.
//!
//! A job lives for exactly one transfer call: created at call time,
//! advanced as chunks move, dropped on completion or failure. Nothing is
//! persisted.

// ============================================================================
// Imports
// ============================================================================

use tracing::debug;

// ============================================================================
// Direction
// ============================================================================

/// Which way a transfer moves bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Local to console.
    Upload,
    /// Console to local.
    Download,
}

// ============================================================================
// JobState
// ============================================================================

/// Transfer lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum JobState {
    /// Created, nothing announced yet.
    Created,
    /// The announce request is on the wire.
    Announced,
    /// Data frames are moving.
    Transferring,
    /// Data complete, confirming success.
    Verifying,
    /// Done.
    Complete,
    /// Failed; the job is abandoned.
    Failed,
}

// ============================================================================
// TransferJob
// ============================================================================

/// Bookkeeping for one in-flight transfer.
pub(crate) struct TransferJob {
    pub(crate) remote_path: String,
    pub(crate) direction: Direction,
    pub(crate) total: u64,
    pub(crate) transferred: u64,
    pub(crate) state: JobState,
}

impl TransferJob {
    pub(crate) fn new(remote_path: impl Into<String>, direction: Direction, total: u64) -> Self {
        Self {
            remote_path: remote_path.into(),
            direction,
            total,
            transferred: 0,
            state: JobState::Created,
        }
    }

    /// Moves to `state`, logging the transition.
    pub(crate) fn advance(&mut self, state: JobState) {
        debug!(
            path = %self.remote_path,
            direction = ?self.direction,
            from = ?self.state,
            to = ?state,
            transferred = self.transferred,
            total = self.total,
            "transfer state"
        );
        self.state = state;
    }

    /// Accounts `n` more bytes moved.
    ///
    /// Transferred bytes never exceed the announced total; the engine
    /// checks overruns before recording.
    pub(crate) fn record(&mut self, n: u64) {
        self.transferred += n;
        debug_assert!(self.transferred <= self.total);
    }

    /// Remaining byte count.
    #[inline]
    pub(crate) fn remaining(&self) -> u64 {
        self.total - self.transferred
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_lifecycle() {
        let mut job = TransferJob::new("/roms/game.smc", Direction::Upload, 2048);
        assert_eq!(job.state, JobState::Created);
        assert_eq!(job.remaining(), 2048);

        job.advance(JobState::Announced);
        job.advance(JobState::Transferring);
        job.record(1024);
        assert_eq!(job.transferred, 1024);
        assert_eq!(job.remaining(), 1024);

        job.record(1024);
        job.advance(JobState::Verifying);
        job.advance(JobState::Complete);
        assert_eq!(job.remaining(), 0);
        assert_eq!(job.state, JobState::Complete);
    }
}
