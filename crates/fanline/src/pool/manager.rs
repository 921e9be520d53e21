//! Fan-out over a fixed set of worker tasks.
//!
//! This module defines the [`WorkerPool`] struct, which runs one Tokio task per
//! [`WorkRange`] and funnels every accepted value into a single bounded result
//! channel. Workers are cooperative: they share a job-scoped
//! [`CancellationToken`] that is a child of the pool's shutdown token, so a
//! single job can be cancelled without touching other jobs, while
//! [`WorkerPool::shutdown`] stops all of them.
//!
//! The result channel is closed by a dedicated closer task that waits on the
//! job's [`CompletionBarrier`](crate::CompletionBarrier). Workers never close
//! the channel themselves.

use crate::{
    channel::ResultSender,
    config::PipelineConfig,
    error::{Error, Result},
    job::Predicate,
    partition::WorkRange,
    pool::{
        report::PoolReport,
        worker::{Publisher, WorkerContext, run_worker},
    },
};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// A pool that evaluates a predicate over partitioned ranges in parallel.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    shutdown_token: CancellationToken,
    yield_every: u64,
    fail_fast: bool,
}

impl WorkerPool {
    /// Constructs a new [`WorkerPool`] from a pipeline configuration and a
    /// shutdown token shared by every job it runs.
    pub fn new(config: &PipelineConfig, shutdown_token: CancellationToken) -> Self {
        Self {
            shutdown_token,
            yield_every: config.yield_every.max(1) as u64,
            fail_fast: config.fail_fast,
        }
    }

    /// Returns a fresh cancellation token for one job.
    ///
    /// Cancelling it stops that job only. Shutting the pool down cancels it
    /// as well.
    pub fn job_token(&self) -> CancellationToken {
        self.shutdown_token.child_token()
    }

    /// Cancels every job currently running on this pool.
    pub fn shutdown(&self) {
        #[cfg(feature = "tracing")]
        tracing::info!("Worker pool shutting down, cancelling in-flight jobs");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Runs one worker per range and waits for all of them to finish.
    ///
    /// Every worker receives its own clone of the result sender and one
    /// barrier ticket. The pool keeps the original sender and hands it to a
    /// closer task that drops it only once the barrier has seen every worker
    /// arrive, so the channel cannot close while any worker could still
    /// write.
    ///
    /// The caller must drain the receiving half concurrently, otherwise the
    /// workers stall on a full channel.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] if the number of ranges does not match the
    ///   number of workers the channel was created for. No worker is started
    ///   and the receiving half ends with no values.
    /// - [`Error::OrderingViolation`] if every worker task ended but the
    ///   barrier did not see all of them arrive.
    /// - [`Error::ChannelError`] if a worker task was aborted by the runtime.
    ///
    /// Predicate faults are not errors here: they are returned in the
    /// [`PoolReport`].
    pub async fn run<P>(
        &self,
        ranges: Vec<WorkRange>,
        predicate: Arc<P>,
        sender: ResultSender,
        cancel: CancellationToken,
    ) -> Result<PoolReport>
    where
        P: Predicate + 'static,
    {
        let ResultSender {
            tx,
            tickets,
            barrier,
        } = sender;

        if ranges.len() != tickets.len() {
            let ticket_count = tickets.len();
            // Same order as the closer: barrier first, then the channel.
            drop(tickets);
            drop(tx);
            return Err(Error::invalid(format!(
                "{} ranges for a channel sized for {} workers",
                ranges.len(),
                ticket_count
            )));
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Spawning {} workers", ranges.len());

        let mut tasks = JoinSet::new();
        for (worker_id, (range, ticket)) in ranges.into_iter().zip(tickets).enumerate() {
            tasks.spawn(run_worker(WorkerContext {
                worker_id,
                range,
                predicate: Arc::clone(&predicate),
                publisher: Publisher::new(tx.clone(), ticket),
                cancel: cancel.clone(),
                yield_every: self.yield_every,
                fail_fast: self.fail_fast,
            }));
        }

        let closer = {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                #[cfg(feature = "tracing")]
                tracing::debug!(
                    "All {} workers arrived, closing result channel",
                    barrier.expected()
                );
                drop(tx);
            })
        };

        let mut report = PoolReport::default();
        let mut aborted = 0_usize;

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    if let Some(fault) = outcome.fault {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("Collected fault: {fault}");
                        report.faults.push(fault);
                    }
                    report.workers.push(outcome.report);
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Worker task failed to join: {_e}");
                    aborted += 1;
                }
            }
        }

        if !barrier.is_complete() {
            // Dropping the closer's sender here is what lets the drain observe
            // the violation instead of hanging.
            closer.abort();
            return Err(Error::OrderingViolation {
                context: format!(
                    "all worker tasks ended but only {} of {} arrived",
                    barrier.arrived(),
                    barrier.expected()
                ),
            });
        }

        closer.await.map_err(|e| Error::ChannelError {
            context: format!("closer task failed: {e}"),
        })?;

        if aborted > 0 {
            return Err(Error::ChannelError {
                context: format!("{aborted} worker task(s) were aborted"),
            });
        }

        report.workers.sort_by_key(|w| w.worker_id);
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::{drain, result_channel},
        job::is_prime,
        partition::partition,
        pool::report::WorkerStatus,
    };
    use core::time::Duration;

    fn pool(config: &PipelineConfig) -> WorkerPool {
        WorkerPool::new(config, CancellationToken::new())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn runs_one_worker_per_range() {
        let pool = pool(&PipelineConfig::default());
        let ranges = partition(20, 4).unwrap();
        let (sender, receiver) = result_channel(2, 4).unwrap();

        let handle = {
            let pool = pool.clone();
            let cancel = pool.job_token();
            tokio::spawn(async move {
                pool.run(ranges, Arc::new(is_prime), sender, cancel).await
            })
        };

        let mut values = drain(receiver).collect_values().await.unwrap();
        let report = handle.await.unwrap().unwrap();

        values.sort_unstable();
        assert_eq!(values, vec![2, 3, 5, 7, 11, 13, 17, 19]);
        assert_eq!(report.workers.len(), 4);
        assert_eq!(report.accepted(), 8);
        assert_eq!(report.evaluated(), 20);
        assert!(report.is_complete());
        assert!(report.faults.is_empty());
        let ids: Vec<_> = report.workers.iter().map(|w| w.worker_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn rejects_mismatched_ranges() {
        let pool = pool(&PipelineConfig::default());
        let ranges = partition(20, 4).unwrap();
        let (sender, receiver) = result_channel(2, 3).unwrap();
        let drained = tokio::spawn(drain(receiver).collect_values());

        let err = pool
            .run(ranges, Arc::new(is_prime), sender, pool.job_token())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
        assert_eq!(drained.await.unwrap().unwrap(), Vec::<u64>::new());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn channel_stays_open_until_slow_workers_finish() {
        let pool = pool(&PipelineConfig::default().with_yield_every(1));
        let ranges = partition(40, 4).unwrap();
        let (sender, receiver) = result_channel(1, 4).unwrap();

        // Later workers take longer per value, so the fast ones finish well
        // before the channel may close.
        let slow = |v: u64| {
            std::thread::sleep(Duration::from_micros(50 * (v / 10 + 1)));
            true
        };

        let cancel = pool.job_token();
        let handle = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run(ranges, Arc::new(slow), sender, cancel).await })
        };

        let mut values = drain(receiver).collect_values().await.unwrap();
        let report = handle.await.unwrap().unwrap();

        values.sort_unstable();
        assert_eq!(values, (0..40).collect::<Vec<_>>());
        assert_eq!(report.accepted(), 40);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn shutdown_cancels_running_jobs() {
        let pool = pool(&PipelineConfig::default());
        let ranges = partition(1_000_000, 4).unwrap();
        let (sender, receiver) = result_channel(4, 4).unwrap();

        let cancel = pool.job_token();
        let handle = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.run(ranges, Arc::new(|_: u64| true), sender, cancel)
                    .await
            })
        };

        let mut drain = drain(receiver);
        for _ in 0..10 {
            drain.recv().await.unwrap().unwrap();
        }
        pool.shutdown();
        assert!(pool.is_shutdown());

        // Whatever was buffered still comes out, then the drain ends.
        while let Some(item) = drain.recv().await {
            item.unwrap();
        }

        let report = handle.await.unwrap().unwrap();
        assert!(report.was_cancelled());
        assert!(
            report
                .workers
                .iter()
                .all(|w| w.status == WorkerStatus::Cancelled
                    || w.status == WorkerStatus::Completed)
        );
        assert!(report.accepted() < 1_000_000);
    }
}
