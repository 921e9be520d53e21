use core::hint::black_box;
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fanline::{
    IdlePolicy, Job, MultiplexConfig, Multiplexer, Pipeline, PipelineConfig, is_prime,
};
use std::time::Instant;
use tokio::{runtime::Builder, sync::mpsc};

// Work units per benchmark iteration.
const TOTAL: u64 = 200_000;

const WORKER_COUNTS: [usize; 4] = [1, 2, 4, 8];

/// Plain loop over the same range, the baseline the pipeline has to beat.
fn bench_sequential(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter/sequential");
    group.throughput(Throughput::Elements(TOTAL));

    group.bench_function(format!("elems/{TOTAL}"), |b| {
        b.iter(|| {
            let accepted: Vec<u64> = (0..TOTAL).filter(|&v| is_prime(v)).collect();
            black_box(accepted);
        });
    });

    group.finish();
}

/// Full partition, fan-out and drain on a runtime sized to the worker count.
fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter/pipeline");
    group.throughput(Throughput::Elements(TOTAL));

    for workers in WORKER_COUNTS {
        group.bench_with_input(BenchmarkId::new("workers", workers), &workers, |b, &workers| {
            let rt = Builder::new_multi_thread()
                .enable_all()
                .worker_threads(workers)
                .build()
                .unwrap();
            let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();

            b.to_async(&rt).iter_custom(|iters| {
                let pipeline = pipeline.clone();
                async move {
                    let start = Instant::now();
                    for _ in 0..iters {
                        let job = Job::new(TOTAL, workers, is_prime).unwrap();
                        let output = pipeline.run(job).await.unwrap();
                        black_box(output.values);
                    }
                    start.elapsed()
                }
            });
        });
    }

    group.finish();
}

/// Small result channels force workers to park on every send.
fn bench_pipeline_backpressure(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter/pipeline/capacity");
    group.throughput(Throughput::Elements(TOTAL));

    for capacity in [1, 16, 1000] {
        group.bench_with_input(BenchmarkId::new("capacity", capacity), &capacity, |b, &capacity| {
            let rt = Builder::new_multi_thread()
                .enable_all()
                .worker_threads(4)
                .build()
                .unwrap();
            let config = PipelineConfig::default().with_channel_capacity(capacity);
            let pipeline = Pipeline::new(config).unwrap();

            b.to_async(&rt).iter_custom(|iters| {
                let pipeline = pipeline.clone();
                async move {
                    let start = Instant::now();
                    for _ in 0..iters {
                        // Accept everything so every value crosses the channel.
                        let job = Job::new(TOTAL, 4, |_: u64| true).unwrap();
                        let output = pipeline.run(job).await.unwrap();
                        black_box(output.values);
                    }
                    start.elapsed()
                }
            });
        });
    }

    group.finish();
}

/// Two preloaded channels drained until the first idle tick.
fn bench_multiplexer(c: &mut Criterion) {
    const PER_CHANNEL: usize = 4096;

    let mut group = c.benchmark_group("multiplex");
    group.throughput(Throughput::Elements(2 * PER_CHANNEL as u64));

    group.bench_function(format!("elems/{}", 2 * PER_CHANNEL), |b| {
        let rt = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(1)
            .build()
            .unwrap();

        b.to_async(&rt).iter_custom(|iters| async move {
            let mut elapsed = core::time::Duration::ZERO;
            for _ in 0..iters {
                let (a_tx, a_rx) = mpsc::channel(PER_CHANNEL);
                let (b_tx, b_rx) = mpsc::channel(PER_CHANNEL);
                for v in 0..PER_CHANNEL as u64 {
                    a_tx.try_send(v).unwrap();
                    b_tx.try_send(v).unwrap();
                }
                drop((a_tx, b_tx));

                let start = Instant::now();
                let (items, _) = Multiplexer::new(
                    MultiplexConfig::default().with_policy(IdlePolicy::ExitOnFirstIdle),
                )
                .with_channel(a_rx)
                .with_channel(b_rx)
                .collect()
                .await
                .unwrap();
                elapsed += start.elapsed();
                black_box(items);
            }
            elapsed
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_sequential,
    bench_pipeline,
    bench_pipeline_backpressure,
    bench_multiplexer,
);
criterion_main!(benches);
