//! Splitting a unit-of-work count into per-worker ranges.
//!
//! The default [`PartitionStrategy::Truncate`] hands every worker
//! `total / worker_count` units and drops the remainder, so the ranges cover
//! `[0, worker_count * chunk)`. Use [`PartitionStrategy::Balanced`] when the
//! whole of `[0, total)` must be covered.

use crate::{
    error::{Error, Result},
    job::check_worker_count,
};
use core::{fmt, ops::Range};

/// A half-open range `[start, end)` of work units assigned to one worker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkRange {
    start: u64,
    end: u64,
}

impl WorkRange {
    /// Creates a new range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `start > end`.
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if start > end {
            return Err(Error::invalid(format!(
                "range start {start} is past its end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub const fn start(&self) -> u64 {
        self.start
    }

    pub const fn end(&self) -> u64 {
        self.end
    }

    pub const fn len(&self) -> u64 {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub const fn contains(&self, value: u64) -> bool {
        self.start <= value && value < self.end
    }

    /// Returns the values of this range in ascending order.
    pub const fn values(&self) -> Range<u64> {
        self.start..self.end
    }
}

impl fmt::Display for WorkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

impl IntoIterator for WorkRange {
    type Item = u64;
    type IntoIter = Range<u64>;

    fn into_iter(self) -> Self::IntoIter {
        self.values()
    }
}

/// How the remainder of `total / worker_count` is handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PartitionStrategy {
    /// Every worker gets exactly `total / worker_count` units and the
    /// remainder is dropped.
    #[default]
    Truncate,
    /// The remainder is spread one unit at a time over the first ranges, so
    /// the union is exactly `[0, total)`.
    Balanced,
}

/// Splits `total` into `worker_count` contiguous, disjoint ranges, dropping
/// the remainder.
///
/// Worker `i` (1-indexed) is assigned `[(i - 1) * chunk, i * chunk)` where
/// `chunk = total / worker_count`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `worker_count` is zero or above
/// [`MAX_WORKERS`](crate::MAX_WORKERS).
pub fn partition(total: u64, worker_count: usize) -> Result<Vec<WorkRange>> {
    partition_with(PartitionStrategy::Truncate, total, worker_count)
}

/// Splits `total` into `worker_count` ranges using `strategy`.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `worker_count` is zero or above
/// [`MAX_WORKERS`](crate::MAX_WORKERS).
pub fn partition_with(
    strategy: PartitionStrategy,
    total: u64,
    worker_count: usize,
) -> Result<Vec<WorkRange>> {
    check_worker_count(worker_count)?;

    let workers = worker_count as u64;
    let chunk = total / workers;
    let remainder = match strategy {
        PartitionStrategy::Truncate => 0,
        PartitionStrategy::Balanced => total % workers,
    };

    let mut ranges = Vec::with_capacity(worker_count);
    let mut start = 0;
    for i in 0..workers {
        let len = chunk + u64::from(i < remainder);
        ranges.push(WorkRange {
            start,
            end: start + len,
        });
        start += len;
    }

    Ok(ranges)
}

/// Number of units covered by a set of ranges.
pub fn covered(ranges: &[WorkRange]) -> u64 {
    ranges.iter().map(WorkRange::len).sum()
}
