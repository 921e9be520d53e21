//! Non-blocking reads across several independent channels.
//!
//! A [`Multiplexer`] owns two or more receivers, each fed by its own producer,
//! and polls them with `try_recv` in round-robin order starting after the
//! last channel that produced a value, so a busy channel cannot starve the
//! others. When no channel has data it pauses for one idle tick and then
//! consults its [`IdlePolicy`].
//!
//! Channels with different payload types are registered with a mapping into
//! one output type, typically an enum:
//!
//! ```
//! use fanline::{IdlePolicy, MultiplexConfig, Multiplexer};
//! use tokio::sync::mpsc;
//!
//! #[derive(Debug, PartialEq)]
//! enum Payload {
//!     Int(u64),
//!     Text(String),
//! }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
//! let (int_tx, int_rx) = mpsc::channel(4);
//! let (text_tx, text_rx) = mpsc::channel(4);
//! int_tx.send(7).await.unwrap();
//! text_tx.send("seven".to_string()).await.unwrap();
//!
//! let (items, stats) = Multiplexer::new(MultiplexConfig::default())
//!     .with_mapped_channel(int_rx, Payload::Int)
//!     .with_mapped_channel(text_rx, Payload::Text)
//!     .collect()
//!     .await
//!     .unwrap();
//!
//! assert_eq!(items.len(), 2);
//! assert_eq!(stats.idle_ticks, 1);
//! # });
//! ```

use crate::{
    config::DEFAULT_IDLE_TICK,
    error::{Error, Result},
};
use core::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio_util::sync::CancellationToken;

/// What the multiplexer does after an idle tick found no data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IdlePolicy {
    /// Stop after the first idle tick. A single-shot poll that favours fast
    /// shutdown over exhaustive draining.
    #[default]
    ExitOnFirstIdle,
    /// Re-poll after up to this many further consecutive idle ticks, then
    /// stop. Any received value resets the count.
    Retry(u32),
    /// Keep polling until every channel is closed or the multiplexer is
    /// cancelled.
    WaitForever,
}

/// Idle behaviour of a [`Multiplexer`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MultiplexConfig {
    /// Pause taken when no channel has data.
    pub idle_tick: Duration,
    pub policy: IdlePolicy,
}

impl Default for MultiplexConfig {
    fn default() -> Self {
        Self {
            idle_tick: DEFAULT_IDLE_TICK,
            policy: IdlePolicy::ExitOnFirstIdle,
        }
    }
}

impl MultiplexConfig {
    #[must_use]
    pub const fn with_idle_tick(mut self, idle_tick: Duration) -> Self {
        self.idle_tick = idle_tick;
        self
    }

    #[must_use]
    pub const fn with_policy(mut self, policy: IdlePolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// A value tagged with the index of the channel it came from.
///
/// Indices follow registration order, starting at zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Received<T> {
    pub source: usize,
    pub value: T,
}

/// Counters kept while multiplexing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MultiplexStats {
    pub received: u64,
    /// Values received per channel, indexed like [`Received::source`].
    pub per_source: Vec<u64>,
    pub idle_ticks: u64,
}

enum TryNext<T> {
    Item(T),
    Empty,
    Closed,
}

trait Source<T>: Send {
    fn try_next(&mut self) -> TryNext<T>;
}

struct Mapped<U, F> {
    rx: mpsc::Receiver<U>,
    map: F,
}

impl<U, T, F> Source<T> for Mapped<U, F>
where
    U: Send,
    F: FnMut(U) -> T + Send,
{
    fn try_next(&mut self) -> TryNext<T> {
        match self.rx.try_recv() {
            Ok(value) => TryNext::Item((self.map)(value)),
            Err(TryRecvError::Empty) => TryNext::Empty,
            Err(TryRecvError::Disconnected) => TryNext::Closed,
        }
    }
}

/// Drains several producer channels from a single loop without letting any
/// one of them starve the rest.
pub struct Multiplexer<T> {
    sources: Vec<Box<dyn Source<T>>>,
    closed: Vec<bool>,
    cursor: usize,
    config: MultiplexConfig,
    stats: MultiplexStats,
    cancel: Option<CancellationToken>,
}

impl<T> Multiplexer<T> {
    pub fn new(config: MultiplexConfig) -> Self {
        Self {
            sources: Vec::new(),
            closed: Vec::new(),
            cursor: 0,
            config,
            stats: MultiplexStats::default(),
            cancel: None,
        }
    }

    /// Registers a channel whose payload is already the output type.
    #[must_use]
    pub fn with_channel(self, rx: mpsc::Receiver<T>) -> Self
    where
        T: Send + 'static,
    {
        self.with_mapped_channel(rx, core::convert::identity)
    }

    /// Registers a channel of a different payload type, converting each value
    /// with `map` as it is received.
    #[must_use]
    pub fn with_mapped_channel<U, F>(mut self, rx: mpsc::Receiver<U>, map: F) -> Self
    where
        U: Send + 'static,
        F: FnMut(U) -> T + Send + 'static,
    {
        self.sources.push(Box::new(Mapped { rx, map }));
        self.closed.push(false);
        self.stats.per_source.push(0);
        self
    }

    /// Stops the loop as soon as `token` is cancelled, even mid-tick.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn channels(&self) -> usize {
        self.sources.len()
    }

    pub const fn stats(&self) -> &MultiplexStats {
        &self.stats
    }

    /// Whether every registered channel is closed and has nothing buffered.
    pub fn is_exhausted(&self) -> bool {
        self.closed.iter().all(|&closed| closed)
    }

    /// Returns the next value from any channel.
    ///
    /// Returns `None` once the idle policy gives up, once every channel is
    /// closed and empty, or once the multiplexer is cancelled. Calling it
    /// again after an idle exit polls again from scratch.
    pub async fn next(&mut self) -> Option<Received<T>> {
        let mut idle_ticks = 0_u32;

        loop {
            if let Some(received) = self.poll_once() {
                return Some(received);
            }
            if self.is_exhausted() || self.is_cancelled() {
                return None;
            }

            if !idle_tick(self.config.idle_tick, self.cancel.as_ref()).await {
                return None;
            }
            self.stats.idle_ticks += 1;

            #[cfg(feature = "tracing")]
            tracing::trace!("No data on {} channels, idle tick", self.sources.len());

            match self.config.policy {
                IdlePolicy::ExitOnFirstIdle => return None,
                IdlePolicy::Retry(max) => {
                    if idle_ticks >= max {
                        return None;
                    }
                    idle_ticks += 1;
                }
                IdlePolicy::WaitForever => {}
            }
        }
    }

    /// Runs the loop until idle, handing each value to `on_item`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no channel is registered.
    pub async fn run(mut self, mut on_item: impl FnMut(Received<T>)) -> Result<MultiplexStats> {
        if self.sources.is_empty() {
            return Err(Error::invalid("multiplexer has no channels"));
        }

        while let Some(received) = self.next().await {
            on_item(received);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Multiplexer stopped after {} values and {} idle ticks",
            self.stats.received,
            self.stats.idle_ticks
        );

        Ok(self.stats)
    }

    /// Runs the loop until idle and returns everything it received.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no channel is registered.
    pub async fn collect(self) -> Result<(Vec<Received<T>>, MultiplexStats)> {
        let mut items = Vec::new();
        let stats = self.run(|received| items.push(received)).await?;
        Ok((items, stats))
    }

    /// One non-blocking sweep over every open channel, starting at the cursor.
    fn poll_once(&mut self) -> Option<Received<T>> {
        let count = self.sources.len();
        for offset in 0..count {
            let source = (self.cursor + offset) % count;
            if self.closed[source] {
                continue;
            }
            match self.sources[source].try_next() {
                TryNext::Item(value) => {
                    self.cursor = (source + 1) % count;
                    self.stats.received += 1;
                    self.stats.per_source[source] += 1;
                    return Some(Received { source, value });
                }
                TryNext::Empty => {}
                TryNext::Closed => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Multiplexed channel {source} closed");
                    self.closed[source] = true;
                }
            }
        }
        None
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

/// Sleeps one idle tick. Returns `false` if cancelled while sleeping.
async fn idle_tick(tick: Duration, cancel: Option<&CancellationToken>) -> bool {
    let sleep = tokio::time::sleep(tick);
    match cancel {
        Some(token) => tokio::select! {
            () = token.cancelled() => false,
            () = sleep => true,
        },
        None => {
            sleep.await;
            true
        }
    }
}

/// Drains `channels` until the first idle tick, then returns everything
/// received in arrival order.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if `channels` is empty.
pub async fn select_loop<T>(
    channels: Vec<mpsc::Receiver<T>>,
    idle_tick: Duration,
) -> Result<Vec<Received<T>>>
where
    T: Send + 'static,
{
    let config = MultiplexConfig::default()
        .with_idle_tick(idle_tick)
        .with_policy(IdlePolicy::ExitOnFirstIdle);

    let multiplexer = channels
        .into_iter()
        .fold(Multiplexer::new(config), Multiplexer::with_channel);

    multiplexer.collect().await.map(|(items, _)| items)
}
