use crate::{
    config::{AppConfig, FilterConfig, PredicateKind},
    telemetry,
};
use anyhow::Context;
use core::time::Duration;
use fanline::{FilterOutput, Job, Pipeline};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// A finished filter job plus how long it took.
pub struct FilterRun {
    pub output: FilterOutput,
    pub elapsed: Duration,
    pub sequential: Option<SequentialRun>,
}

/// Result of the single-threaded baseline over the same covered range.
pub struct SequentialRun {
    pub accepted: usize,
    pub elapsed: Duration,
}

pub async fn run(
    config: &AppConfig,
    filter: &FilterConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let run = execute(config, filter, shutdown).await?;
    report(config, filter, &run);

    if let Some(sequential) = &run.sequential {
        let parallel = run.output.values.len();
        if run.output.faults().is_empty()
            && !run.output.report.was_cancelled()
            && sequential.accepted != parallel
        {
            anyhow::bail!(
                "pipeline accepted {parallel} values but the sequential loop accepted {}",
                sequential.accepted
            );
        }
    }

    run.output
        .into_result()
        .map(|_| ())
        .context("filter job did not complete")
}

/// Runs the job on the pipeline and, if asked, the sequential baseline.
pub async fn execute(
    config: &AppConfig,
    filter: &FilterConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<FilterRun> {
    let pipeline = Pipeline::with_shutdown_token(config.pipeline.clone(), shutdown)?;
    let predicate = filter.predicate;
    let job = Job::new(filter.total, config.workers, move |v: u64| predicate.matches(v))?;

    telemetry::increment_jobs();
    let started = Instant::now();
    let output = pipeline.run(job).await?;
    let elapsed = started.elapsed();

    telemetry::record_job_duration(elapsed.as_secs_f64() * 1000.0);
    telemetry::increment_values_accepted(output.values.len() as u64);
    telemetry::increment_worker_faults(output.faults().len() as u64);

    #[cfg(feature = "tracing")]
    for worker in &output.report.workers {
        tracing::debug!(
            "Worker {} on {}: {:?}, {} evaluated, {} accepted",
            worker.worker_id,
            worker.range,
            worker.status,
            worker.evaluated,
            worker.accepted
        );
    }

    let sequential = if filter.compare_sequential {
        Some(sequential(predicate, output.covered()).await?)
    } else {
        None
    };

    Ok(FilterRun {
        output,
        elapsed,
        sequential,
    })
}

async fn sequential(predicate: PredicateKind, covered: u64) -> anyhow::Result<SequentialRun> {
    tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let accepted = (0..covered).filter(|&v| predicate.matches(v)).count();
        SequentialRun {
            accepted,
            elapsed: started.elapsed(),
        }
    })
    .await
    .context("sequential baseline failed")
}

fn report(config: &AppConfig, filter: &FilterConfig, run: &FilterRun) {
    let output = &run.output;

    println!(
        "{} of {} values matched {:?} on {} workers in {:?}",
        output.values.len(),
        output.covered(),
        filter.predicate,
        config.workers,
        run.elapsed
    );
    if output.covered() < filter.total {
        println!(
            "{} trailing values were not assigned to any worker",
            filter.total - output.covered()
        );
    }

    for fault in output.faults() {
        println!("fault: {fault}");
    }

    if let Some(sequential) = &run.sequential {
        let speedup = sequential.elapsed.as_secs_f64() / run.elapsed.as_secs_f64().max(f64::EPSILON);
        println!(
            "sequential: {} values in {:?} ({speedup:.2}x)",
            sequential.accepted, sequential.elapsed
        );
    }

    if filter.print {
        let mut values = output.values.clone();
        values.sort_unstable();
        for value in values {
            println!("{value}");
        }
    }
}
