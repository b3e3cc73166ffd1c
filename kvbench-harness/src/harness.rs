//! Fixed-duration benchmark runs across a number of concurrent workers.
//!
//! A [`Benchmark`] binds a backend label and table to a [`Store`] and a [`MetricsSink`]. Each run
//! spawns the configured number of [`Worker`]s, staggered so that their ticks are spread evenly
//! over one tick interval, and cancels all of them through a single token once the run duration
//! has elapsed. The run returns after every worker has finished its cleanup.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use kvbench_service::{BackendError, MetricsSink, Store};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::worker::{OperationCounts, Worker, WorkerExit, WorkerIdentity, WorkerReport};

/// The metric namespace used unless configured otherwise.
pub const DEFAULT_NAMESPACE: &str = "KvBenchmark";

/// Interval between two ticks of a worker.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// A worker writes on every tick that is a multiple of this.
pub const DEFAULT_WRITE_EVERY: u64 = 10;

/// Rejected [`RunConfig`] values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum InvalidRunConfig {
    /// The worker count was zero.
    #[error("worker count must be at least 1")]
    NoWorkers,
    /// The run duration was zero.
    #[error("run duration must be positive")]
    ZeroDuration,
    /// The tick interval was zero.
    #[error("tick interval must be positive")]
    ZeroTickInterval,
    /// The write interval was zero.
    #[error("writes must happen at least every tick")]
    ZeroWriteEvery,
}

/// Immutable configuration of a single run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunConfig {
    workers: usize,
    duration: Duration,
    tick_interval: Duration,
    write_every: u64,
}

impl RunConfig {
    /// Creates a configuration for `workers` workers running for `duration`.
    pub fn new(workers: usize, duration: Duration) -> Result<Self, InvalidRunConfig> {
        if workers == 0 {
            return Err(InvalidRunConfig::NoWorkers);
        }
        if duration.is_zero() {
            return Err(InvalidRunConfig::ZeroDuration);
        }

        Ok(Self {
            workers,
            duration,
            tick_interval: DEFAULT_TICK_INTERVAL,
            write_every: DEFAULT_WRITE_EVERY,
        })
    }

    /// Sets the interval between two ticks of a worker.
    pub fn with_tick_interval(mut self, interval: Duration) -> Result<Self, InvalidRunConfig> {
        if interval.is_zero() {
            return Err(InvalidRunConfig::ZeroTickInterval);
        }
        self.tick_interval = interval;
        Ok(self)
    }

    /// Sets how many ticks pass between two writes.
    pub fn with_write_every(mut self, ticks: u64) -> Result<Self, InvalidRunConfig> {
        if ticks == 0 {
            return Err(InvalidRunConfig::ZeroWriteEvery);
        }
        self.write_every = ticks;
        Ok(self)
    }

    /// The number of concurrent workers.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// The wall-clock duration of the run.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// The interval between two ticks of a worker.
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// How many ticks pass between two writes.
    pub fn write_every(&self) -> u64 {
        self.write_every
    }

    /// The delay between two consecutive worker launches.
    pub fn stagger(&self) -> Duration {
        let workers = u32::try_from(self.workers).unwrap_or(u32::MAX);
        self.tick_interval / workers
    }
}

/// A benchmark target: one labelled backend and table.
///
/// Cloning is cheap; the store and sink are shared between all clones and all workers.
#[derive(Clone)]
pub struct Benchmark {
    label: String,
    table: String,
    namespace: String,
    store: Arc<dyn Store>,
    sink: Arc<dyn MetricsSink>,
}

impl fmt::Debug for Benchmark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Benchmark")
            .field("label", &self.label)
            .field("table", &self.table)
            .field("namespace", &self.namespace)
            .field("store", &self.store.name())
            .finish_non_exhaustive()
    }
}

impl Benchmark {
    /// Creates a benchmark reporting into [`DEFAULT_NAMESPACE`].
    pub fn new(
        label: impl Into<String>,
        table: impl Into<String>,
        store: Arc<dyn Store>,
        sink: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            label: label.into(),
            table: table.into(),
            namespace: DEFAULT_NAMESPACE.to_owned(),
            store,
            sink,
        }
    }

    /// Sets the metric namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// The backend label, used as metric dimension and in worker identities.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The table all workers address.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The metric namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The store under test.
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// The sink receiving latency observations.
    pub fn sink(&self) -> &dyn MetricsSink {
        self.sink.as_ref()
    }

    /// Creates the worker with the given index.
    pub fn worker(&self, index: usize, config: &RunConfig) -> Worker {
        let identity = WorkerIdentity::new(&self.label, index);
        Worker::new(identity, self.clone(), config)
    }

    /// Runs the benchmark until the configured duration has elapsed.
    pub async fn run(&self, config: &RunConfig) -> RunReport {
        self.run_until(config, CancellationToken::new()).await
    }

    /// Runs the benchmark until the configured duration has elapsed or `shutdown` is cancelled,
    /// whichever happens first.
    ///
    /// Returns once every worker has terminated. Failures of individual operations are logged by
    /// the workers and never abort the run.
    pub async fn run_until(&self, config: &RunConfig, shutdown: CancellationToken) -> RunReport {
        let start = Instant::now();
        let scope = shutdown.child_token();

        let deadline = start + config.duration();
        let timer = tokio::spawn({
            let scope = scope.clone();
            async move {
                tokio::time::sleep_until(deadline).await;
                scope.cancel();
            }
        });

        tracing::info!(
            backend = %self.label,
            table = %self.table,
            store = self.store.name(),
            workers = config.workers(),
            duration = ?config.duration(),
            "starting benchmark"
        );

        let stagger = config.stagger();
        let mut identities = Vec::with_capacity(config.workers());
        let mut tasks = Vec::with_capacity(config.workers());
        for index in 0..config.workers() {
            if index > 0 {
                // Once cancelled, the remaining workers are launched without delay and stop
                // right after their existence check.
                tokio::select! {
                    _ = tokio::time::sleep(stagger) => {}
                    _ = scope.cancelled() => {}
                }
            }

            let worker = self.worker(index, config);
            identities.push(worker.identity().clone());
            tasks.push(tokio::spawn(worker.run(scope.clone())));
        }

        let finished_tasks = futures::future::join_all(tasks).await;
        timer.abort();

        let workers = identities
            .into_iter()
            .zip(finished_tasks)
            .map(|(identity, task)| match task {
                Ok(report) => report,
                Err(err) => {
                    tracing::error!(
                        worker = %identity,
                        error = &err as &dyn std::error::Error,
                        "worker task failed"
                    );
                    WorkerReport::panicked(identity)
                }
            })
            .collect();

        let report = RunReport {
            label: self.label.clone(),
            elapsed: start.elapsed(),
            workers,
        };

        tracing::info!(
            backend = %self.label,
            elapsed = ?report.elapsed,
            aborted = report.count(WorkerExit::Aborted),
            "benchmark finished"
        );

        report
    }

    /// Deletes the records of the first `workers` worker identities.
    ///
    /// A run that was killed before its workers could clean up leaves records behind, which makes
    /// later runs under the same identities abort. Every identity is attempted; the first error
    /// is returned.
    pub async fn reset(&self, workers: usize) -> Result<(), BackendError> {
        let mut first_error = None;

        for index in 0..workers {
            let identity = WorkerIdentity::new(&self.label, index);
            if let Err(err) = self
                .store
                .delete_record(&self.table, identity.as_str())
                .await
            {
                tracing::error!(
                    worker = %identity,
                    error = &err as &dyn std::error::Error,
                    "could not delete item"
                );
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// The outcome of a [`Benchmark`] run.
#[derive(Clone, Debug)]
pub struct RunReport {
    /// The label of the benchmark.
    pub label: String,
    /// Time from the start of the run until every worker terminated.
    pub elapsed: Duration,
    /// One report per spawned worker, in launch order.
    pub workers: Vec<WorkerReport>,
}

impl RunReport {
    /// Returns the number of workers that terminated with the given exit.
    pub fn count(&self, exit: WorkerExit) -> usize {
        self.workers
            .iter()
            .filter(|worker| worker.exit == exit)
            .count()
    }

    /// Returns the operation counts summed over all workers.
    pub fn totals(&self) -> OperationCounts {
        let mut totals = OperationCounts::default();
        for worker in &self.workers {
            totals += worker.counts;
        }
        totals
    }
}

/// Runs several benchmarks concurrently with the same configuration.
///
/// This is used to compare backends side by side under identical load. Returns one report per
/// benchmark, in the given order, once all of them have finished.
pub async fn run_suite(
    benchmarks: &[Benchmark],
    config: &RunConfig,
    shutdown: CancellationToken,
) -> Vec<RunReport> {
    let runs = benchmarks
        .iter()
        .map(|benchmark| benchmark.run_until(config, shutdown.clone()));

    futures::future::join_all(runs).await
}
