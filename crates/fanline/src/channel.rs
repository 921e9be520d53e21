//! The shared bounded result channel.
//!
//! [`result_channel`] pairs a Tokio MPSC channel with a job-scoped
//! [`CompletionBarrier`]. The sending half is handed to the
//! [`WorkerPool`](crate::WorkerPool), which gives every worker its own sender
//! plus a ticket and keeps one extra "closer" sender for itself. The channel
//! only closes when that closer sender is dropped, which the pool does after
//! the barrier has seen every worker arrive.

use crate::{
    drain::Drain,
    error::{Error, Result},
    job::check_worker_count,
    pool::barrier::{CompletionBarrier, Ticket},
};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Writing half of the result channel, consumed by the worker pool.
#[derive(Debug)]
pub struct ResultSender {
    pub(crate) tx: mpsc::Sender<u64>,
    pub(crate) tickets: Vec<Ticket>,
    pub(crate) barrier: Arc<CompletionBarrier>,
}

impl ResultSender {
    /// Number of workers this channel was sized for.
    pub fn workers(&self) -> usize {
        self.tickets.len()
    }
}

/// Reading half of the result channel. Turn it into a [`Drain`] to consume.
#[derive(Debug)]
pub struct ResultReceiver {
    pub(crate) rx: mpsc::Receiver<u64>,
    pub(crate) barrier: Arc<CompletionBarrier>,
}

/// Creates a bounded result channel for `workers` writers.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `capacity` or `workers` is zero, or
/// if `workers` is above [`MAX_WORKERS`](crate::MAX_WORKERS).
pub fn result_channel(capacity: usize, workers: usize) -> Result<(ResultSender, ResultReceiver)> {
    if capacity == 0 {
        return Err(Error::invalid("channel capacity must be greater than 0"));
    }
    check_worker_count(workers)?;

    let (tx, rx) = mpsc::channel(capacity);
    let (barrier, tickets) = CompletionBarrier::with_tickets(workers);

    Ok((
        ResultSender {
            tx,
            tickets,
            barrier: Arc::clone(&barrier),
        },
        ResultReceiver { rx, barrier },
    ))
}

/// Starts draining a result channel.
pub fn drain(receiver: ResultReceiver) -> Drain {
    Drain::new(receiver)
}
