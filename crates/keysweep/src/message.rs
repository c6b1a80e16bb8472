//! Messages exchanged between worker engines and the dispatcher.
//!
//! Only the shape is fixed here. Byte layouts belong to the transport.

use crate::{KeyId, Range};

/// Identifies one worker engine within a run.
pub type WorkerId = u32;

/// Worker → dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum ToDispatcher {
    /// First message of every worker. Answered with [`ToWorker::Seed`].
    Join { worker: WorkerId },
    /// The worker's local queue is empty.
    WorkRequest { from_worker: WorkerId },
    /// The worker's pipeline matched `key`.
    Found { from_worker: WorkerId, key: KeyId },
    /// Last message of every worker, sent once it reached done.
    Finished {
        worker: WorkerId,
        summary: WorkerSummary,
    },
}

impl ToDispatcher {
    pub const fn sender(&self) -> WorkerId {
        match self {
            Self::Join { worker } | Self::Finished { worker, .. } => *worker,
            Self::WorkRequest { from_worker } | Self::Found { from_worker, .. } => *from_worker,
        }
    }
}

/// Dispatcher (or peer) → worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ToWorker {
    /// The worker's initial slice of the key space. May be empty.
    Seed { ranges: Vec<Range> },
    /// Answer to a work request. An empty range means "no more work".
    WorkReply { range: Range },
    /// A key was found. Adopt it if it is smaller than what is known.
    Found { key: KeyId },
    /// Every range was searched without a match.
    Exhausted,
    /// The run was aborted by the coordinating process.
    Abort { reason: String },
}

impl ToWorker {
    /// The reply telling a worker there is no more work.
    pub const fn no_more_work() -> Self {
        Self::WorkReply {
            range: Range::empty(),
        }
    }
}

/// What a worker reports about its own work when it finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    /// Ranges scanned to the end without a match.
    pub ranges_scanned: u64,
    /// Candidates evaluated by the verify stage.
    pub keys_verified: u64,
    /// Candidates whose key the cipher refused.
    pub keys_rejected: u64,
}

impl core::ops::AddAssign for WorkerSummary {
    fn add_assign(&mut self, rhs: Self) {
        self.ranges_scanned += rhs.ranges_scanned;
        self.keys_verified += rhs.keys_verified;
        self.keys_rejected += rhs.keys_rejected;
    }
}
