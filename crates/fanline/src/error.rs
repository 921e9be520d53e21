//! Error types for the filter pipeline.
//!
//! This module defines the central `Error` enum. Argument validation errors
//! are raised before any worker is spawned; worker faults are collected while
//! the pipeline runs and re-raised only after the drain has completed, so the
//! caller always gets the partial results alongside them.
//!
//! ## Error Cases
//! - `InvalidArgument`: A job or configuration value is out of range.
//! - `OrderingViolation`: The result channel closed before every worker
//!   finished. This indicates a bug in the pool, never a caller mistake.
//! - `WorkerFaults`: One or more predicate evaluations failed or panicked.
//! - `Cancelled`: The job was cancelled before it completed.
//! - `Runtime`: The Tokio runtime backing a blocking call could not start.
//! - `ChannelError`: A worker task could not be joined.

use crate::partition::WorkRange;
use core::fmt;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the pipeline.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// A job or configuration value was rejected up front.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The result channel was observed closed while writers could still be
    /// active.
    #[error("Ordering violation: {context}")]
    OrderingViolation { context: String },

    /// At least one worker faulted. `partial` holds every value that was
    /// drained before and after the faults.
    #[error("{} worker fault(s); first: {}", .faults.len(), first_fault(.faults))]
    WorkerFaults {
        faults: Vec<WorkerFault>,
        partial: Vec<u64>,
    },

    /// The job was cancelled before all workers finished their ranges.
    #[error("Job cancelled")]
    Cancelled,

    /// The runtime used by a blocking entry point failed to build.
    #[error("Runtime error: {context}")]
    Runtime { context: String },

    /// A worker task ended without producing a report.
    #[error("Channel error: {context}")]
    ChannelError { context: String },
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            reason: reason.into(),
        }
    }
}

fn first_fault(faults: &[WorkerFault]) -> String {
    faults
        .first()
        .map_or_else(|| "none".to_string(), ToString::to_string)
}

/// A single predicate failure inside a worker.
///
/// `value` is the input that was being evaluated when the fault happened. It
/// is `None` when the worker panicked, since the panic payload does not carry
/// the input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerFault {
    pub worker_id: usize,
    pub range: WorkRange,
    pub value: Option<u64>,
    pub reason: String,
}

impl fmt::Display for WorkerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) => write!(
                f,
                "worker {} on {} failed at {}: {}",
                self.worker_id, self.range, value, self.reason
            ),
            None => write!(
                f,
                "worker {} on {} failed: {}",
                self.worker_id, self.range, self.reason
            ),
        }
    }
}
