#![doc = include_str!("../README.md")]

mod commands;
mod config;
mod telemetry;

use clap::Parser;
use config::{AppConfig, CliArgs, CommandConfig};
use telemetry::init_telemetry;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = AppConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let shutdown = CancellationToken::new();
    tokio::spawn(commands::shutdown_signal(shutdown.clone()));

    let result = match &config.command {
        CommandConfig::Filter(filter) => commands::filter::run(&config, filter, shutdown).await,
        CommandConfig::Multiplex(demo) => commands::multiplex::run(demo, shutdown).await,
    };

    if let Err(_e) = &result {
        #[cfg(feature = "tracing")]
        tracing::error!("Command failed: {_e:#}");
    }

    providers.shutdown();
    result
}

fn log_startup_info(_config: &AppConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting fanline with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting fanline with {} workers, channel capacity {}",
            _config.workers,
            _config.pipeline.channel_capacity
        );
    }
}
