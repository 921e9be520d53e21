//! Partition, fan out, fan in.
//!
//! A [`Pipeline`] ties the pieces together for one or more jobs:
//!
//! 1. The job's total is split into one [`WorkRange`] per worker.
//! 2. A bounded result channel and its completion barrier are created.
//! 3. The [`WorkerPool`] spawns one task per range.
//! 4. The caller drains the channel until it closes.
//!
//! [`Pipeline::run`] does all of that and returns a [`FilterOutput`].
//! [`Pipeline::start`] stops after step 3 and hands back a [`RunningJob`] so
//! values can be consumed as a stream while workers are still producing them.
//! [`run_parallel_filter`] is the blocking entry point that builds its own
//! runtime.

use crate::{
    channel::{drain, result_channel},
    config::PipelineConfig,
    drain::Drain,
    error::{Error, Result, WorkerFault},
    job::{Job, Predicate, default_worker_count},
    partition::{WorkRange, covered, partition_with},
    pool::{manager::WorkerPool, report::PoolReport},
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::{runtime::Handle, task::JoinHandle};
use tokio_util::sync::CancellationToken;

/// Runs filter jobs on the current Tokio runtime.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    pool: WorkerPool,
}

impl Pipeline {
    /// Creates a pipeline with its own shutdown token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the configuration is invalid.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        Self::with_shutdown_token(config, CancellationToken::new())
    }

    /// Creates a pipeline whose jobs are all cancelled when `shutdown_token`
    /// fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if the configuration is invalid.
    pub fn with_shutdown_token(
        config: PipelineConfig,
        shutdown_token: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(&config, shutdown_token);
        Ok(Self { config, pool })
    }

    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Cancels every job started by this pipeline.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }

    /// Spawns the workers for `job` and returns without waiting for them.
    ///
    /// The returned [`RunningJob`] must be drained, otherwise workers stall
    /// once the result channel is full.
    ///
    /// # Errors
    ///
    /// - [`Error::Runtime`] if called outside a Tokio runtime.
    /// - [`Error::InvalidArgument`] if the job cannot be partitioned.
    pub fn start<P>(&self, job: Job<P>) -> Result<RunningJob>
    where
        P: Predicate + 'static,
    {
        let runtime = Handle::try_current().map_err(|e| Error::Runtime {
            context: format!("no Tokio runtime to start workers on: {e}"),
        })?;

        let (total, worker_count, predicate) = job.into_parts();
        let ranges = partition_with(self.config.strategy, total, worker_count)?;
        let (sender, receiver) = result_channel(self.config.channel_capacity, ranges.len())?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Starting job over {} of {total} units on {worker_count} workers",
            covered(&ranges)
        );

        let cancel = self.pool.job_token();
        let task = {
            let pool = self.pool.clone();
            let ranges = ranges.clone();
            let cancel = cancel.clone();
            runtime.spawn(async move { pool.run(ranges, Arc::new(predicate), sender, cancel).await })
        };

        Ok(RunningJob {
            drain: drain(receiver),
            handle: JobHandle { task, cancel },
            ranges,
        })
    }

    /// Runs `job` to completion and returns everything it produced.
    ///
    /// Faults do not make this fail: they are part of the [`FilterOutput`].
    /// Use [`FilterOutput::into_result`] to turn them into an error.
    ///
    /// # Errors
    ///
    /// Fails for the reasons listed on [`Pipeline::start`] and
    /// [`RunningJob::finish`].
    #[cfg_attr(feature = "tracing", tracing::instrument(level = "debug", skip_all, fields(total = job.total(), workers = job.worker_count())))]
    pub async fn run<P>(&self, job: Job<P>) -> Result<FilterOutput>
    where
        P: Predicate + 'static,
    {
        self.start(job)?.finish().await
    }
}

/// Handle to the pool task of a started job.
#[derive(Debug)]
pub struct JobHandle {
    task: JoinHandle<Result<PoolReport>>,
    cancel: CancellationToken,
}

impl JobHandle {
    /// Asks every worker of this job to stop. Values already published are
    /// still delivered by the drain.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Waits for the pool to finish and returns its report.
    ///
    /// # Errors
    ///
    /// Returns the pool's error, or [`Error::ChannelError`] if the pool task
    /// itself could not be joined.
    pub async fn report(self) -> Result<PoolReport> {
        self.task.await.map_err(|e| Error::ChannelError {
            context: format!("pool task failed: {e}"),
        })?
    }
}

/// A job whose workers are running.
#[derive(Debug)]
pub struct RunningJob {
    drain: Drain,
    handle: JobHandle,
    ranges: Vec<WorkRange>,
}

impl RunningJob {
    /// The stream of accepted values.
    pub fn drain(&mut self) -> &mut Drain {
        &mut self.drain
    }

    pub fn ranges(&self) -> &[WorkRange] {
        &self.ranges
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Splits the job into its drain and the handle that yields the
    /// [`PoolReport`].
    pub fn into_parts(self) -> (Drain, JobHandle) {
        (self.drain, self.handle)
    }

    /// Drains every remaining value, then waits for the pool.
    ///
    /// Values already taken from [`RunningJob::drain`] are not repeated in
    /// the output.
    ///
    /// # Errors
    ///
    /// - [`Error::OrderingViolation`] if the channel closed before every
    ///   worker finished.
    /// - Any error returned by [`JobHandle::report`].
    pub async fn finish(self) -> Result<FilterOutput> {
        let Self {
            mut drain,
            handle,
            ranges,
        } = self;

        let mut values = Vec::new();
        let mut violation = None;
        while let Some(item) = drain.next().await {
            match item {
                Ok(value) => values.push(value),
                Err(e) => violation = Some(e),
            }
        }
        drop(drain);

        let report = handle.report().await?;
        if let Some(e) = violation {
            return Err(e);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Job finished with {} values and {} faults",
            values.len(),
            report.faults.len()
        );

        Ok(FilterOutput {
            values,
            report,
            ranges,
        })
    }
}

/// Everything a finished job produced.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterOutput {
    /// Accepted values in the order they were drained.
    pub values: Vec<u64>,
    pub report: PoolReport,
    /// The ranges the job was split into, one per worker.
    pub ranges: Vec<WorkRange>,
}

impl FilterOutput {
    pub fn faults(&self) -> &[WorkerFault] {
        &self.report.faults
    }

    /// Number of units the workers were assigned.
    pub fn covered(&self) -> u64 {
        covered(&self.ranges)
    }

    /// Returns the values, or the faults together with the partial values.
    ///
    /// # Errors
    ///
    /// - [`Error::WorkerFaults`] if any worker faulted.
    /// - [`Error::Cancelled`] if the job was cancelled before every range was
    ///   evaluated.
    pub fn into_result(self) -> Result<Vec<u64>> {
        if !self.report.faults.is_empty() {
            return Err(Error::WorkerFaults {
                faults: self.report.faults,
                partial: self.values,
            });
        }
        if self.report.was_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(self.values)
    }
}

/// Filters `[0, worker_count * (total / worker_count))` with `predicate` on a
/// freshly built multi-thread runtime and returns every accepted value.
///
/// Values from one worker arrive in ascending order; values from different
/// workers are interleaved in no particular order.
///
/// ```
/// let mut primes = fanline::run_parallel_filter(20, 4, fanline::is_prime).unwrap();
/// primes.sort_unstable();
/// assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19]);
/// ```
///
/// # Errors
///
/// - [`Error::InvalidArgument`] if `worker_count` is zero or above
///   [`MAX_WORKERS`](crate::MAX_WORKERS). No worker is started.
/// - [`Error::WorkerFaults`] if the predicate failed or panicked.
/// - [`Error::Runtime`] if the runtime cannot be built, or if this is called
///   from inside an async context.
pub fn run_parallel_filter<P>(total: u64, worker_count: usize, predicate: P) -> Result<Vec<u64>>
where
    P: Predicate + 'static,
{
    let job = Job::new(total, worker_count, predicate)?;
    run_parallel_filter_with(PipelineConfig::default(), job)
}

/// Blocking form of [`Pipeline::run`] with an explicit configuration.
///
/// # Errors
///
/// Same as [`run_parallel_filter`], plus [`Error::InvalidArgument`] for an
/// invalid `config`.
pub fn run_parallel_filter_with<P>(config: PipelineConfig, job: Job<P>) -> Result<Vec<u64>>
where
    P: Predicate + 'static,
{
    config.validate()?;
    if Handle::try_current().is_ok() {
        return Err(Error::Runtime {
            context: "cannot block inside an async runtime, use Pipeline::run instead".to_string(),
        });
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(job.worker_count().clamp(1, default_worker_count()))
        .thread_name("fanline-worker")
        .enable_all()
        .build()
        .map_err(|e| Error::Runtime {
            context: format!("failed to build runtime: {e}"),
        })?;

    runtime.block_on(async move { Pipeline::new(config)?.run(job).await?.into_result() })
}
