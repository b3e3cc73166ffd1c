//! Command line interface of the `kvbench` binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use argh::FromArgs;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::harness::run_suite;
use crate::{observability, summary};

/// Load generator comparing key-value store backends under identical traffic.
#[derive(Debug, FromArgs)]
struct Args {
    /// path to the YAML configuration file
    #[argh(option, short = 'c')]
    pub config: Option<PathBuf>,

    #[argh(subcommand)]
    pub command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunCommand),
    Reset(ResetCommand),
    Version(VersionCommand),
}

/// run all configured backends side by side for the configured duration
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
struct RunCommand {}

/// delete the worker records of all configured backends
///
/// Use this after a run was killed before its workers could clean up. Otherwise the next run
/// finds the stale records and its workers abort.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "reset")]
struct ResetCommand {}

/// print the kvbench version
#[derive(Default, Debug, FromArgs)]
#[argh(subcommand, name = "version")]
struct VersionCommand {}

/// Bootstrap the runtime and execute the CLI command.
pub fn execute() -> Result<()> {
    let args: Args = argh::from_env();

    // Special switch to just print the version and exit.
    if let Command::Version(_) = args.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = Config::load(args.config.as_deref())?;

    // Sentry should be initialized before creating the async runtime.
    let _sentry_guard = observability::init_sentry(&config);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .thread_name("main-rt")
        .enable_all()
        .build()?;
    let _runtime_guard = runtime.enter();

    observability::init_tracing(&config);
    tracing::debug!(?config);

    runtime.block_on(async move {
        match args.command {
            Command::Run(RunCommand {}) => run(config).await,
            Command::Reset(ResetCommand {}) => reset(config).await,
            Command::Version(VersionCommand {}) => unreachable!(),
        }
    })
}

async fn run(config: Config) -> Result<()> {
    let run_config = config
        .run_config()
        .context("invalid run configuration")?;
    let benchmarks = config.benchmarks()?;

    let shutdown = CancellationToken::new();
    let suite = run_suite(&benchmarks, &run_config, shutdown.clone());
    tokio::pin!(suite);

    let reports = tokio::select! {
        reports = &mut suite => reports,
        _ = async { elegant_departure::tokio::depart().on_termination().on_sigint().await } => {
            tracing::info!("received shutdown signal, stopping workers");
            shutdown.cancel();
            suite.await
        }
    };

    summary::print(&reports);
    Ok(())
}

async fn reset(config: Config) -> Result<()> {
    for benchmark in config.benchmarks()? {
        benchmark
            .reset(config.workers)
            .await
            .with_context(|| format!("failed to reset backend {}", benchmark.label()))?;

        tracing::info!(
            backend = benchmark.label(),
            workers = config.workers,
            "deleted worker records"
        );
    }

    Ok(())
}
