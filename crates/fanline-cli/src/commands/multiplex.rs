use crate::{config::MultiplexDemoConfig, telemetry};
use core::fmt;
use fanline::{MultiplexStats, Multiplexer, Received};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Output type shared by both demo producers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Int(u64),
    Text(String),
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "int {v}"),
            Self::Text(s) => write!(f, "text {s:?}"),
        }
    }
}

pub async fn run(demo: &MultiplexDemoConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let (items, stats) = execute(demo, shutdown).await?;

    for item in &items {
        println!("[channel {}] {}", item.source, item.value);
    }
    println!(
        "received {} values ({} ints, {} texts) after {} idle ticks",
        stats.received,
        stats.per_source.first().copied().unwrap_or_default(),
        stats.per_source.get(1).copied().unwrap_or_default(),
        stats.idle_ticks
    );

    Ok(())
}

/// Starts both producers and drains them with one multiplexer.
///
/// Producers yield between sends, so with a short idle policy the loop can
/// stop before everything was produced. Anything left behind is dropped.
pub async fn execute(
    demo: &MultiplexDemoConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<(Vec<Received<Payload>>, MultiplexStats)> {
    let (int_tx, int_rx) = mpsc::channel(demo.ints.clamp(1, 1024) as usize);
    let (text_tx, text_rx) = mpsc::channel(demo.texts.clamp(1, 1024));

    let ints = demo.ints;
    let int_producer = tokio::spawn(async move {
        for v in 0..ints {
            if int_tx.send(v).await.is_err() {
                break;
            }
            tokio::task::yield_now().await;
        }
    });

    let texts = demo.texts;
    let text_producer = tokio::spawn(async move {
        for i in 0..texts {
            if text_tx.send(format!("item-{i}")).await.is_err() {
                break;
            }
            tokio::task::yield_now().await;
        }
    });

    let (items, stats) = Multiplexer::new(demo.multiplex)
        .with_mapped_channel(int_rx, Payload::Int)
        .with_mapped_channel(text_rx, Payload::Text)
        .with_cancellation(shutdown)
        .collect()
        .await?;

    // The receivers are gone, so any producer still sending stops at once.
    int_producer.await?;
    text_producer.await?;

    #[cfg(feature = "tracing")]
    tracing::info!(
        "Multiplexer drained {} values with {} idle ticks",
        stats.received,
        stats.idle_ticks
    );

    telemetry::increment_multiplexed_items(stats.received);
    telemetry::increment_idle_ticks(stats.idle_ticks);

    Ok((items, stats))
}
