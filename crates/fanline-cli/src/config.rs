use anyhow::bail;
use clap::{Args, Parser, Subcommand, ValueEnum};
use core::time::Duration;
use fanline::{
    DEFAULT_CHANNEL_CAPACITY, IdlePolicy, MultiplexConfig, PartitionStrategy, PipelineConfig,
    default_worker_count, is_prime,
};

/// Command line arguments for the `fanline` binary.
///
/// Global options apply to every subcommand and may also be set through the
/// environment or a `.env` file.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "fanline",
    version,
    about = "Partitioned parallel filtering and multiplexed channel draining"
)]
pub struct CliArgs {
    /// Number of worker tasks. `0` uses one worker per available CPU.
    ///
    /// Environment variable: `FANLINE_WORKERS`
    #[arg(long, global = true, env = "FANLINE_WORKERS", default_value_t = 0)]
    pub workers: usize,

    /// Capacity of the shared result channel.
    ///
    /// Workers wait once this many accepted values are buffered and not yet
    /// drained. Lower values tighten backpressure; higher values let workers
    /// run further ahead of the drain.
    ///
    /// Environment variable: `FANLINE_CHANNEL_CAPACITY`
    #[arg(
        long,
        global = true,
        env = "FANLINE_CHANNEL_CAPACITY",
        default_value_t = DEFAULT_CHANNEL_CAPACITY
    )]
    pub channel_capacity: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Filter `[0, total)` with a built-in predicate on the worker pool.
    Filter(FilterArgs),
    /// Drain an integer and a text producer through one multiplexed loop.
    Multiplex(MultiplexArgs),
}

#[derive(Args, Debug, Clone)]
pub struct FilterArgs {
    /// Number of work units. Without `--balanced` the remainder of
    /// `total / workers` is not evaluated.
    #[arg(long, default_value_t = 1_000_000)]
    pub total: u64,

    #[arg(long, value_enum, default_value_t = PredicateKind::Prime)]
    pub predicate: PredicateKind,

    /// Spread the remainder over the workers so all of `[0, total)` is covered.
    #[arg(long, default_value_t = false)]
    pub balanced: bool,

    /// Cancel the remaining workers as soon as one faults.
    #[arg(long, default_value_t = false)]
    pub fail_fast: bool,

    /// Also run a single-threaded loop over the same range and compare timings.
    #[arg(long, default_value_t = false)]
    pub compare_sequential: bool,

    /// Print every accepted value in ascending order.
    #[arg(long, default_value_t = false)]
    pub print: bool,
}

#[derive(Args, Debug, Clone)]
pub struct MultiplexArgs {
    /// Number of integers sent by the first producer.
    #[arg(long, default_value_t = 10)]
    pub ints: u64,

    /// Number of strings sent by the second producer.
    #[arg(long, default_value_t = 5)]
    pub texts: usize,

    #[arg(long, value_enum, default_value_t = IdlePolicyKind::Exit)]
    pub idle_policy: IdlePolicyKind,

    /// Further idle ticks allowed with `--idle-policy retry`.
    #[arg(long, default_value_t = 3)]
    pub retries: u32,

    /// Length of one idle tick in microseconds.
    #[arg(long, default_value_t = 100)]
    pub idle_tick_us: u64,
}

/// Built-in predicates selectable from the command line.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredicateKind {
    Prime,
    Even,
    Odd,
    Square,
}

impl PredicateKind {
    pub fn matches(self, value: u64) -> bool {
        match self {
            Self::Prime => is_prime(value),
            Self::Even => value % 2 == 0,
            Self::Odd => value % 2 == 1,
            Self::Square => {
                let root = value.isqrt();
                root * root == value
            }
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdlePolicyKind {
    /// Stop after the first idle tick.
    Exit,
    /// Allow `--retries` further idle ticks.
    Retry,
    /// Poll until both producers are done.
    Forever,
}

/// Validated configuration for one invocation.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Resolved worker count, never zero.
    pub workers: usize,
    pub pipeline: PipelineConfig,
    pub command: CommandConfig,
}

#[derive(Debug, Clone)]
pub enum CommandConfig {
    Filter(FilterConfig),
    Multiplex(MultiplexDemoConfig),
}

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub total: u64,
    pub predicate: PredicateKind,
    pub compare_sequential: bool,
    pub print: bool,
}

#[derive(Debug, Clone)]
pub struct MultiplexDemoConfig {
    pub ints: u64,
    pub texts: usize,
    pub multiplex: MultiplexConfig,
}

impl TryFrom<CliArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        let workers = match args.workers {
            0 => default_worker_count(),
            n => n,
        };

        if args.channel_capacity == 0 {
            bail!("FANLINE_CHANNEL_CAPACITY must be greater than 0");
        }

        let mut pipeline = PipelineConfig::default().with_channel_capacity(args.channel_capacity);

        let command = match args.command {
            Command::Filter(filter) => {
                if filter.balanced {
                    pipeline = pipeline.with_strategy(PartitionStrategy::Balanced);
                }
                pipeline = pipeline.with_fail_fast(filter.fail_fast);

                CommandConfig::Filter(FilterConfig {
                    total: filter.total,
                    predicate: filter.predicate,
                    compare_sequential: filter.compare_sequential,
                    print: filter.print,
                })
            }
            Command::Multiplex(multiplex) => {
                if multiplex.idle_tick_us == 0 {
                    bail!("--idle-tick-us must be greater than 0");
                }

                let policy = match multiplex.idle_policy {
                    IdlePolicyKind::Exit => IdlePolicy::ExitOnFirstIdle,
                    IdlePolicyKind::Retry => IdlePolicy::Retry(multiplex.retries),
                    IdlePolicyKind::Forever => IdlePolicy::WaitForever,
                };

                CommandConfig::Multiplex(MultiplexDemoConfig {
                    ints: multiplex.ints,
                    texts: multiplex.texts,
                    multiplex: MultiplexConfig::default()
                        .with_idle_tick(Duration::from_micros(multiplex.idle_tick_us))
                        .with_policy(policy),
                })
            }
        };

        pipeline.validate()?;

        Ok(Self {
            workers,
            pipeline,
            command,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<AppConfig> {
        let args = CliArgs::try_parse_from(args)?;
        AppConfig::try_from(args)
    }

    #[test]
    fn filter_defaults() {
        let config = parse(&["fanline", "--workers", "4", "filter"]).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.pipeline, PipelineConfig::default());

        let CommandConfig::Filter(filter) = config.command else {
            panic!("expected the filter command");
        };
        assert_eq!(filter.total, 1_000_000);
        assert_eq!(filter.predicate, PredicateKind::Prime);
    }

    #[test]
    fn zero_workers_means_one_per_cpu() {
        let config = parse(&["fanline", "filter", "--workers", "0"]).unwrap();
        assert_eq!(config.workers, default_worker_count());
    }

    #[test]
    fn filter_flags_shape_the_pipeline() {
        let config = parse(&[
            "fanline",
            "filter",
            "--total",
            "50",
            "--predicate",
            "square",
            "--balanced",
            "--fail-fast",
            "--channel-capacity",
            "8",
        ])
        .unwrap();

        assert_eq!(config.pipeline.strategy, PartitionStrategy::Balanced);
        assert!(config.pipeline.fail_fast);
        assert_eq!(config.pipeline.channel_capacity, 8);
    }

    #[test]
    fn zero_channel_capacity_is_rejected() {
        let err = parse(&["fanline", "--channel-capacity", "0", "filter"]).unwrap_err();
        assert!(err.to_string().contains("FANLINE_CHANNEL_CAPACITY"));
    }

    #[test]
    fn idle_policies_map_onto_the_multiplexer() {
        let config = parse(&[
            "fanline",
            "multiplex",
            "--idle-policy",
            "retry",
            "--retries",
            "7",
            "--idle-tick-us",
            "250",
        ])
        .unwrap();

        let CommandConfig::Multiplex(demo) = config.command else {
            panic!("expected the multiplex command");
        };
        assert_eq!(demo.multiplex.policy, IdlePolicy::Retry(7));
        assert_eq!(demo.multiplex.idle_tick, Duration::from_micros(250));

        let config = parse(&["fanline", "multiplex"]).unwrap();
        let CommandConfig::Multiplex(demo) = config.command else {
            panic!("expected the multiplex command");
        };
        assert_eq!(demo.multiplex.policy, IdlePolicy::ExitOnFirstIdle);
    }

    #[test]
    fn zero_idle_tick_is_rejected() {
        assert!(parse(&["fanline", "multiplex", "--idle-tick-us", "0"]).is_err());
    }

    #[test]
    fn unknown_predicate_is_rejected() {
        assert!(CliArgs::try_parse_from(["fanline", "filter", "--predicate", "fib"]).is_err());
    }

    #[test]
    fn builtin_predicates() {
        let take = |kind: PredicateKind| (0..20).filter(|&v| kind.matches(v)).collect::<Vec<_>>();
        assert_eq!(take(PredicateKind::Prime), vec![2, 3, 5, 7, 11, 13, 17, 19]);
        assert_eq!(take(PredicateKind::Square), vec![0, 1, 4, 9, 16]);
        assert_eq!(take(PredicateKind::Even).len(), 10);
        assert!(take(PredicateKind::Odd).iter().all(|v| v % 2 == 1));
        assert!(PredicateKind::Square.matches(u64::from(u32::MAX).pow(2)));
    }
}
