use crate::{error::WorkerFault, partition::WorkRange};

/// How a worker's run ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerStatus {
    /// The whole range was evaluated.
    Completed,
    /// The job's cancellation token fired before the range was done.
    Cancelled,
    /// The drain went away, so there was nobody left to publish to.
    Disconnected,
    /// The predicate failed or panicked.
    Faulted,
}

/// Per-worker accounting returned by the pool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub range: WorkRange,
    /// Number of values the predicate was evaluated on successfully.
    pub evaluated: u64,
    /// Number of values published to the result channel.
    pub accepted: u64,
    pub status: WorkerStatus,
}

impl WorkerReport {
    pub(crate) const fn new(worker_id: usize, range: WorkRange) -> Self {
        Self {
            worker_id,
            range,
            evaluated: 0,
            accepted: 0,
            status: WorkerStatus::Completed,
        }
    }
}

/// Everything the pool learned while running a job.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolReport {
    /// One report per worker, ordered by worker id.
    pub workers: Vec<WorkerReport>,
    /// Faults in the order the pool collected them.
    pub faults: Vec<WorkerFault>,
}

impl PoolReport {
    /// Total number of values published across all workers.
    pub fn accepted(&self) -> u64 {
        self.workers.iter().map(|w| w.accepted).sum()
    }

    pub fn evaluated(&self) -> u64 {
        self.workers.iter().map(|w| w.evaluated).sum()
    }

    /// Whether any worker stopped because the job was cancelled.
    pub fn was_cancelled(&self) -> bool {
        self.workers
            .iter()
            .any(|w| w.status == WorkerStatus::Cancelled)
    }

    pub fn is_complete(&self) -> bool {
        self.workers
            .iter()
            .all(|w| w.status == WorkerStatus::Completed)
    }
}
