use crate::{
    error::WorkerFault,
    job::Predicate,
    partition::WorkRange,
    pool::{
        barrier::Ticket,
        report::{WorkerReport, WorkerStatus},
    },
};
use futures::FutureExt;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

/// A worker's sending half of the result channel plus its barrier ticket.
///
/// Fields drop in declaration order: the sender goes first, then the ticket
/// arrives. A worker therefore never counts as finished while it still holds
/// a sender.
pub(crate) struct Publisher {
    tx: mpsc::Sender<u64>,
    _ticket: Ticket,
}

enum Published {
    Sent,
    Cancelled,
    Disconnected,
}

impl Publisher {
    pub(crate) const fn new(tx: mpsc::Sender<u64>, ticket: Ticket) -> Self {
        Self {
            tx,
            _ticket: ticket,
        }
    }

    /// Sends `value`, waiting for room if the channel is full.
    ///
    /// A pending send is raced against `cancel` so a cancelled job never
    /// stays parked on a full channel.
    async fn publish(&self, value: u64, cancel: &CancellationToken) -> Published {
        match self.tx.try_send(value) {
            Ok(()) => return Published::Sent,
            Err(TrySendError::Closed(_)) => return Published::Disconnected,
            Err(TrySendError::Full(_)) => {}
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Published::Cancelled,
            sent = self.tx.send(value) => match sent {
                Ok(()) => Published::Sent,
                Err(_) => Published::Disconnected,
            },
        }
    }
}

/// Everything a single worker needs to process its range.
pub(crate) struct WorkerContext<P> {
    pub worker_id: usize,
    pub range: WorkRange,
    pub predicate: Arc<P>,
    pub publisher: Publisher,
    pub cancel: CancellationToken,
    pub yield_every: u64,
    pub fail_fast: bool,
}

/// What a worker task hands back to the pool.
pub(crate) struct WorkerOutcome {
    pub report: WorkerReport,
    pub fault: Option<WorkerFault>,
}

/// Runs one worker to completion, converting a predicate panic into a fault.
///
/// The worker's publisher lives inside the caught future, so it is dropped
/// (closing its sender, then arriving at the barrier) before this function
/// returns, whether the worker finished or panicked. The report lives outside
/// it, so counts taken before a panic survive.
pub(crate) async fn run_worker<P: Predicate>(ctx: WorkerContext<P>) -> WorkerOutcome {
    let worker_id = ctx.worker_id;
    let range = ctx.range;
    let cancel = ctx.cancel.clone();
    let fail_fast = ctx.fail_fast;

    let mut report = WorkerReport::new(worker_id, range);
    let caught = AssertUnwindSafe(worker_loop(ctx, &mut report))
        .catch_unwind()
        .await;

    match caught {
        Ok(fault) => WorkerOutcome { report, fault },
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            #[cfg(feature = "tracing")]
            tracing::error!("Worker {worker_id} panicked on {range}: {reason}");

            if fail_fast {
                cancel.cancel();
            }

            report.status = WorkerStatus::Faulted;
            WorkerOutcome {
                report,
                fault: Some(WorkerFault {
                    worker_id,
                    range,
                    value: None,
                    reason: format!("panicked: {reason}"),
                }),
            }
        }
    }
}

/// Evaluates the predicate over the worker's range in ascending order and
/// publishes every accepted value.
///
/// # Behavior
///
/// - Checks the cancellation token before every evaluation.
/// - Yields to the scheduler every `yield_every` evaluations so long ranges
///   of CPU-bound work share runtime threads.
/// - Stops at the first predicate error and reports it as a fault,
///   cancelling the whole job when `fail_fast` is set.
/// - Stops quietly if the drain has gone away.
///
/// Counts and the final status are written to `report` as the loop goes.
async fn worker_loop<P: Predicate>(
    ctx: WorkerContext<P>,
    report: &mut WorkerReport,
) -> Option<WorkerFault> {
    let WorkerContext {
        worker_id,
        range,
        predicate,
        publisher,
        cancel,
        yield_every,
        fail_fast,
    } = ctx;

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {worker_id} started on {range}");

    let mut fault = None;

    for value in range {
        if cancel.is_cancelled() {
            report.status = WorkerStatus::Cancelled;
            break;
        }

        let accepted = match evaluate(predicate.as_ref(), value) {
            Ok(accepted) => accepted,
            Err(reason) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Worker {worker_id} predicate failed at {value}: {reason}");

                if fail_fast {
                    cancel.cancel();
                }
                report.status = WorkerStatus::Faulted;
                fault = Some(WorkerFault {
                    worker_id,
                    range,
                    value: Some(value),
                    reason,
                });
                break;
            }
        };
        report.evaluated += 1;

        if accepted {
            match publisher.publish(value, &cancel).await {
                Published::Sent => report.accepted += 1,
                Published::Cancelled => {
                    report.status = WorkerStatus::Cancelled;
                    break;
                }
                Published::Disconnected => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Worker {worker_id} exiting, drain disconnected");
                    report.status = WorkerStatus::Disconnected;
                    break;
                }
            }
        }

        if report.evaluated % yield_every == 0 {
            tokio::task::yield_now().await;
        }
    }

    #[cfg(feature = "tracing")]
    tracing::trace!(
        "Worker {worker_id} stopped: {:?}, {} evaluated, {} accepted",
        report.status,
        report.evaluated,
        report.accepted
    );

    fault
}

// Keeps the predicate's error type out of the worker future.
fn evaluate<P: Predicate>(predicate: &P, value: u64) -> Result<bool, String> {
    predicate.test(value).map_err(|e| e.to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Fallible, channel::result_channel, job::is_prime};

    fn context<P>(
        predicate: P,
        range: WorkRange,
        capacity: usize,
        fail_fast: bool,
    ) -> (WorkerContext<P>, mpsc::Receiver<u64>, CancellationToken) {
        let (sender, receiver) = result_channel(capacity, 1).unwrap();
        let mut tickets = sender.tickets;
        let cancel = CancellationToken::new();
        let ctx = WorkerContext {
            worker_id: 0,
            range,
            predicate: Arc::new(predicate),
            publisher: Publisher::new(sender.tx, tickets.pop().unwrap()),
            cancel: cancel.clone(),
            yield_every: 4,
            fail_fast,
        };
        (ctx, receiver.rx, cancel)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn publishes_accepted_values_in_order() {
        let (ctx, mut rx, _) = context(is_prime, WorkRange::new(0, 30).unwrap(), 64, false);

        let outcome = run_worker(ctx).await;
        assert_eq!(outcome.report.status, WorkerStatus::Completed);
        assert_eq!(outcome.report.evaluated, 30);
        assert_eq!(outcome.report.accepted, 10);
        assert!(outcome.fault.is_none());

        let mut values = Vec::new();
        while let Some(v) = rx.recv().await {
            values.push(v);
        }
        assert_eq!(values, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn predicate_error_becomes_a_fault() {
        let predicate = Fallible(|v: u64| if v == 6 { Err("six") } else { Ok(true) });
        let (ctx, mut rx, cancel) = context(predicate, WorkRange::new(4, 10).unwrap(), 64, true);

        let outcome = run_worker(ctx).await;
        assert_eq!(outcome.report.status, WorkerStatus::Faulted);
        let fault = outcome.fault.unwrap();
        assert_eq!(fault.value, Some(6));
        assert_eq!(fault.reason, "six");
        assert!(cancel.is_cancelled(), "fail-fast should cancel the job");

        let mut values = Vec::new();
        while let Some(v) = rx.recv().await {
            values.push(v);
        }
        assert_eq!(values, vec![4, 5]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn panic_becomes_a_fault() {
        let predicate = |v: u64| {
            assert!(v < 3, "value {v} too large");
            true
        };
        let (ctx, mut rx, cancel) = context(predicate, WorkRange::new(0, 10).unwrap(), 64, false);

        let outcome = run_worker(ctx).await;
        assert_eq!(outcome.report.status, WorkerStatus::Faulted);
        assert_eq!(outcome.report.evaluated, 3);
        assert_eq!(outcome.report.accepted, 3);
        let fault = outcome.fault.unwrap();
        assert_eq!(fault.value, None);
        assert!(fault.reason.contains("value 3 too large"), "{}", fault.reason);
        assert!(!cancel.is_cancelled());

        // The sender was released by the time the outcome came back.
        let mut values = Vec::new();
        while let Some(v) = rx.recv().await {
            values.push(v);
        }
        assert_eq!(values, vec![0, 1, 2]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn cancellation_unblocks_a_full_channel() {
        let (ctx, rx, cancel) = context(|_: u64| true, WorkRange::new(0, 1_000).unwrap(), 2, false);

        let handle = tokio::spawn(run_worker(ctx));
        tokio::time::sleep(core::time::Duration::from_millis(20)).await;
        cancel.cancel();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.report.status, WorkerStatus::Cancelled);
        assert!(outcome.report.accepted <= 3);
        drop(rx);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn dropped_drain_disconnects_the_worker() {
        let (ctx, rx, _) = context(|_: u64| true, WorkRange::new(0, 100).unwrap(), 1, false);
        drop(rx);

        let outcome = run_worker(ctx).await;
        assert_eq!(outcome.report.status, WorkerStatus::Disconnected);
        assert_eq!(outcome.report.accepted, 0);
        assert!(outcome.fault.is_none());
    }
}
