//! Job-scoped completion barrier.
//!
//! A [`CompletionBarrier`] is created together with exactly one [`Ticket`] per
//! worker. Dropping a ticket counts as that worker's arrival, so a worker
//! arrives exactly once whether it finishes, stops early, or unwinds from a
//! panic. The barrier is created per job and never shared between jobs.

use portable_atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Counts worker arrivals and wakes waiters once all of them are in.
#[derive(Debug)]
pub struct CompletionBarrier {
    expected: usize,
    remaining: AtomicUsize,
    notify: Notify,
}

impl CompletionBarrier {
    /// Creates a barrier for `expected` workers along with their tickets.
    pub fn with_tickets(expected: usize) -> (Arc<Self>, Vec<Ticket>) {
        let barrier = Arc::new(Self {
            expected,
            remaining: AtomicUsize::new(expected),
            notify: Notify::new(),
        });
        let tickets = (0..expected)
            .map(|_| Ticket {
                barrier: Arc::clone(&barrier),
            })
            .collect();
        (barrier, tickets)
    }

    pub const fn expected(&self) -> usize {
        self.expected
    }

    pub fn arrived(&self) -> usize {
        self.expected - self.remaining.load(Ordering::Acquire)
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.load(Ordering::Acquire) == 0
    }

    /// Waits until every ticket has been dropped.
    pub async fn wait(&self) {
        loop {
            // Register before checking so an arrival between the check and the
            // await is not missed.
            let notified = self.notify.notified();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }

    fn arrive(&self) {
        let previous = self.remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "more arrivals than tickets");
        if previous == 1 {
            self.notify.notify_waiters();
        }
    }
}

/// A worker's claim on the barrier. Arrives when dropped.
#[derive(Debug)]
pub struct Ticket {
    barrier: Arc<CompletionBarrier>,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        self.barrier.arrive();
    }
}
