use crate::{
    error::{Error, Result},
    partition::PartitionStrategy,
};
use core::time::Duration;

/// Depth of the shared result channel when none is configured.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

/// Largest worker count a job, partition or result channel accepts.
///
/// Each worker costs a task, a range and a barrier ticket, so the count is
/// bounded before anything is allocated.
pub const MAX_WORKERS: usize = 1 << 16;

/// Number of predicate evaluations between cooperative yields.
pub const DEFAULT_YIELD_EVERY: usize = 1024;

/// Pause taken by the multiplexed drain before re-polling idle channels.
pub const DEFAULT_IDLE_TICK: Duration = Duration::from_micros(100);

/// Tuning knobs for a pipeline run.
///
/// The worker count belongs to the [`Job`](crate::Job) itself; everything here
/// applies to every job a [`Pipeline`](crate::Pipeline) runs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Capacity of the bounded result channel. Workers block once it is full.
    pub channel_capacity: usize,
    /// Cancel the remaining workers as soon as one of them faults.
    pub fail_fast: bool,
    /// How ranges are carved out of the job's total.
    pub strategy: PartitionStrategy,
    /// Each worker yields to the scheduler after this many evaluations.
    pub yield_every: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            fail_fast: false,
            strategy: PartitionStrategy::Truncate,
            yield_every: DEFAULT_YIELD_EVERY,
        }
    }
}

impl PipelineConfig {
    #[must_use]
    pub const fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
        self.channel_capacity = channel_capacity;
        self
    }

    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    #[must_use]
    pub const fn with_strategy(mut self, strategy: PartitionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub const fn with_yield_every(mut self, yield_every: usize) -> Self {
        self.yield_every = yield_every;
        self
    }

    /// Checks the configuration before any worker is spawned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the channel capacity or the yield
    /// interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(Error::invalid("channel capacity must be greater than 0"));
        }
        if self.yield_every == 0 {
            return Err(Error::invalid("yield interval must be greater than 0"));
        }
        Ok(())
    }
}
