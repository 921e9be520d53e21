use crate::{
    channel::ResultReceiver,
    error::{Error, Result},
    pool::barrier::CompletionBarrier,
};
use core::{
    pin::Pin,
    task::{Context, Poll},
};
use futures::{
    Stream, TryStreamExt,
    stream::{FusedStream, StreamExt},
};
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

/// Single consumer of a result channel.
///
/// A `Drain` yields every value the workers published, in arrival order, and
/// ends only once the channel is both closed and empty. Values buffered before
/// the close are still delivered. A momentarily empty channel simply parks
/// the consumer until the next value or the close.
///
/// The drain is a one-shot stream: once it returns `None` it keeps returning
/// `None`.
///
/// If the channel closes while the completion barrier has not seen every
/// worker arrive, the drain yields a single [`Error::OrderingViolation`] before
/// ending.
#[derive(Debug)]
pub struct Drain {
    inner: ReceiverStream<u64>,
    barrier: Arc<CompletionBarrier>,
    received: u64,
    finished: bool,
}

impl Drain {
    pub(crate) fn new(receiver: ResultReceiver) -> Self {
        Self {
            inner: ReceiverStream::new(receiver.rx),
            barrier: receiver.barrier,
            received: 0,
            finished: false,
        }
    }

    /// Number of values delivered so far.
    pub const fn received(&self) -> u64 {
        self.received
    }

    /// Receives the next value, waiting while the channel is open but empty.
    pub async fn recv(&mut self) -> Option<Result<u64>> {
        self.next().await
    }

    /// Drains the channel to completion.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OrderingViolation`] if the channel closed before every
    /// worker arrived at the completion barrier.
    pub async fn collect_values(self) -> Result<Vec<u64>> {
        self.try_collect().await
    }
}

impl Stream for Drain {
    type Item = Result<u64>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(value)) => {
                self.received += 1;
                Poll::Ready(Some(Ok(value)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                if self.barrier.is_complete() {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Err(Error::OrderingViolation {
                        context: format!(
                            "result channel closed after {} of {} workers finished",
                            self.barrier.arrived(),
                            self.barrier.expected()
                        ),
                    })))
                }
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            self.inner.size_hint()
        }
    }
}

impl FusedStream for Drain {
    fn is_terminated(&self) -> bool {
        self.finished
    }
}
