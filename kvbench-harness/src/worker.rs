//! A single lane of mixed read/write traffic against a [`Store`](kvbench_service::Store).
//!
//! A [`Worker`] first checks whether a record for its identity already exists. If one does,
//! another instance is assumed to be running under the same identity and the worker aborts
//! without touching the record. Otherwise it reads its record once per tick and writes it on
//! every n-th tick until the run scope is cancelled, then deletes the record.
//!
//! The existence check is a best-effort guard, not a lock: two instances starting at the same
//! time can both pass it.

use std::fmt;
use std::time::{Duration, SystemTime};

use kvbench_service::{Dimension, MetricDatum, Unit, WorkRecord};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::harness::{Benchmark, RunConfig};

/// The metric name under which latencies are reported.
pub const LATENCY_METRIC: &str = "Latency";

/// A timed store operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    /// A point read of the worker's record.
    GetItem,
    /// An overwrite of the worker's record.
    PutItem,
}

impl Operation {
    /// The value of the `Operation` metric dimension.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::GetItem => "GetItem",
            Operation::PutItem => "PutItem",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The name of a worker slot, `"<label> worker <index>"`.
///
/// The identity is the key of the worker's record and is deterministic, so that overlapping runs
/// against the same table derive the same identities and the existence check can detect them.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct WorkerIdentity(String);

impl WorkerIdentity {
    /// Derives the identity of worker `index` of the benchmark labelled `label`.
    pub fn new(label: &str, index: usize) -> Self {
        Self(format!("{label} worker {index}"))
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a worker terminated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerExit {
    /// A record for the identity already existed; the worker never entered its loop.
    Aborted,
    /// The worker ran until cancelled and cleaned up its record.
    Done,
    /// The worker task panicked.
    Panicked,
}

/// Number of timed operations performed by a worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OperationCounts {
    /// Reads issued, including failed ones.
    pub reads: u64,
    /// Writes issued, including failed ones.
    pub writes: u64,
    /// Reads that returned an error.
    pub failed_reads: u64,
    /// Writes that returned an error.
    pub failed_writes: u64,
}

impl std::ops::AddAssign for OperationCounts {
    fn add_assign(&mut self, other: Self) {
        self.reads += other.reads;
        self.writes += other.writes;
        self.failed_reads += other.failed_reads;
        self.failed_writes += other.failed_writes;
    }
}

/// The outcome of a single worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerReport {
    /// The identity the worker ran under.
    pub identity: WorkerIdentity,
    /// How the worker terminated.
    pub exit: WorkerExit,
    /// Operations performed before termination.
    pub counts: OperationCounts,
}

impl WorkerReport {
    pub(crate) fn panicked(identity: WorkerIdentity) -> Self {
        Self {
            identity,
            exit: WorkerExit::Panicked,
            counts: OperationCounts::default(),
        }
    }
}

/// One named execution lane of a [`Benchmark`].
///
/// Created by [`Benchmark::worker`].
#[derive(Debug)]
pub struct Worker {
    identity: WorkerIdentity,
    benchmark: Benchmark,
    tick_interval: Duration,
    write_every: u64,
    counts: OperationCounts,
}

impl Worker {
    pub(crate) fn new(identity: WorkerIdentity, benchmark: Benchmark, config: &RunConfig) -> Self {
        Self {
            identity,
            benchmark,
            tick_interval: config.tick_interval(),
            write_every: config.write_every(),
            counts: OperationCounts::default(),
        }
    }

    /// The identity of this worker.
    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    /// Runs the worker until `scope` is cancelled.
    ///
    /// Cancellation is only observed between ticks, an in-flight store call always completes.
    pub async fn run(mut self, scope: CancellationToken) -> WorkerReport {
        tracing::info!(worker = %self.identity, "starting worker");

        if self.item_exists().await {
            tracing::warn!(
                worker = %self.identity,
                "stopping worker, it looks like another one is active"
            );
            return self.finish(WorkerExit::Aborted);
        }

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut tick: u64 = 0;
        loop {
            tokio::select! {
                biased;

                _ = scope.cancelled() => break,
                _ = ticker.tick() => {
                    if tick % self.write_every == 0 {
                        self.write_access().await;
                    }
                    self.read_access().await;
                    tick += 1;
                }
            }
        }

        tracing::info!(worker = %self.identity, ticks = tick, "stopping worker");
        self.cleanup().await;
        self.finish(WorkerExit::Done)
    }

    fn finish(self, exit: WorkerExit) -> WorkerReport {
        WorkerReport {
            identity: self.identity,
            exit,
            counts: self.counts,
        }
    }

    async fn write_access(&mut self) {
        let record = WorkRecord::new(self.identity.as_str());

        let start = Instant::now();
        let result = self
            .benchmark
            .store()
            .put_record(self.benchmark.table(), &record)
            .await;
        let elapsed = start.elapsed();

        self.counts.writes += 1;
        if let Err(err) = result {
            self.counts.failed_writes += 1;
            tracing::error!(
                worker = %self.identity,
                error = &err as &dyn std::error::Error,
                "could not put item"
            );
        }

        self.report_latency(Operation::PutItem, elapsed).await;
    }

    async fn read_access(&mut self) {
        let start = Instant::now();
        let result = self
            .benchmark
            .store()
            .get_record(self.benchmark.table(), self.identity.as_str())
            .await;
        let elapsed = start.elapsed();

        self.counts.reads += 1;
        if let Err(err) = result {
            self.counts.failed_reads += 1;
            tracing::error!(
                worker = %self.identity,
                error = &err as &dyn std::error::Error,
                "could not get item"
            );
        }

        self.report_latency(Operation::GetItem, elapsed).await;
    }

    async fn item_exists(&self) -> bool {
        let result = self
            .benchmark
            .store()
            .get_record(self.benchmark.table(), self.identity.as_str())
            .await;

        match result {
            Ok(record) => record.is_some(),
            Err(err) => {
                tracing::error!(
                    worker = %self.identity,
                    error = &err as &dyn std::error::Error,
                    "could not check if item exists"
                );
                false
            }
        }
    }

    async fn cleanup(&self) {
        let result = self
            .benchmark
            .store()
            .delete_record(self.benchmark.table(), self.identity.as_str())
            .await;

        if let Err(err) = result {
            tracing::error!(
                worker = %self.identity,
                error = &err as &dyn std::error::Error,
                "could not delete item"
            );
        }
    }

    async fn report_latency(&self, operation: Operation, elapsed: Duration) {
        let datum = MetricDatum {
            namespace: self.benchmark.namespace().to_owned(),
            metric_name: LATENCY_METRIC.to_owned(),
            dimensions: vec![
                Dimension::new("Backend", self.benchmark.label()),
                Dimension::new("Operation", operation.as_str()),
            ],
            timestamp: SystemTime::now(),
            unit: Unit::Milliseconds,
            value: 1000.0 * elapsed.as_secs_f64(),
        };

        if let Err(err) = self.benchmark.sink().report(&datum).await {
            tracing::error!(
                worker = %self.identity,
                %operation,
                error = &err as &dyn std::error::Error,
                "could not write metric data"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kvbench_service::{MemorySink, WorkRecord};
    use kvbench_test::sink::FailingSink;
    use kvbench_test::store::{FaultyStore, StoreOp};

    use super::*;

    const TABLE: &str = "bench";

    fn setup(store: &FaultyStore, sink: Arc<dyn kvbench_service::MetricsSink>) -> Worker {
        kvbench_test::tracing::init();
        let benchmark = Benchmark::new("X", TABLE, Arc::new(store.clone()), sink);
        let config = RunConfig::new(1, Duration::from_secs(60)).unwrap();
        benchmark.worker(0, &config)
    }

    /// Runs the worker and cancels it after `duration` of virtual time.
    async fn run_for(worker: Worker, duration: Duration) -> WorkerReport {
        let scope = CancellationToken::new();
        let task = tokio::spawn(worker.run(scope.clone()));
        tokio::time::sleep(duration).await;
        scope.cancel();
        task.await.unwrap()
    }

    #[test]
    fn identity_format() {
        assert_eq!(WorkerIdentity::new("DAX", 3).as_str(), "DAX worker 3");
        assert_eq!(WorkerIdentity::new("X", 0).to_string(), "X worker 0");
    }

    #[tokio::test(start_paused = true)]
    async fn reads_every_tick_writes_every_tenth() {
        let store = FaultyStore::new();
        let sink = MemorySink::new();
        let worker = setup(&store, Arc::new(sink.clone()));

        // Ticks fire at 0s..=24s, cancellation at 24.5s.
        let report = run_for(worker, Duration::from_millis(24_500)).await;

        assert_eq!(report.exit, WorkerExit::Done);
        assert_eq!(report.counts.reads, 25);
        assert_eq!(report.counts.writes, 3);

        let ops: Vec<_> = store.calls().iter().map(|call| call.op).collect();
        // existence check, then put+get on tick 0, gets on ticks 1..=9, put+get on tick 10
        assert_eq!(ops[0], StoreOp::Get);
        assert_eq!(&ops[1..3], &[StoreOp::Put, StoreOp::Get]);
        assert!(ops[3..12].iter().all(|op| *op == StoreOp::Get));
        assert_eq!(&ops[12..14], &[StoreOp::Put, StoreOp::Get]);
        assert_eq!(ops.last(), Some(&StoreOp::Delete));

        assert_eq!(sink.for_operation("GetItem").len(), 25);
        assert_eq!(sink.for_operation("PutItem").len(), 3);
        assert!(sink.data().iter().all(|datum| {
            datum.value >= 0.0
                && datum.unit == Unit::Milliseconds
                && datum.metric_name == LATENCY_METRIC
                && datum.dimension("Backend") == Some("X")
        }));

        assert!(store.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn existing_record_aborts() {
        let store = FaultyStore::new();
        store.records().insert(TABLE, WorkRecord::new("X worker 0"));
        let sink = MemorySink::new();
        let worker = setup(&store, Arc::new(sink.clone()));

        let report = run_for(worker, Duration::from_secs(5)).await;

        assert_eq!(report.exit, WorkerExit::Aborted);
        assert_eq!(report.counts, OperationCounts::default());
        assert_eq!(store.count(StoreOp::Get), 1);
        assert_eq!(store.count(StoreOp::Put), 0);
        assert_eq!(store.count(StoreOp::Delete), 0);
        assert!(store.records().contains(TABLE, "X worker 0"));
        assert!(sink.data().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_existence_check_proceeds() {
        let store = FaultyStore::new();
        store.fail_call(StoreOp::Get, 0);
        let worker = setup(&store, Arc::new(MemorySink::new()));

        let report = run_for(worker, Duration::from_millis(2_500)).await;

        assert_eq!(report.exit, WorkerExit::Done);
        assert_eq!(report.counts.reads, 3);
        assert_eq!(report.counts.failed_reads, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_put_continues_with_read() {
        let store = FaultyStore::new();
        // the second put happens on tick 10
        store.fail_call(StoreOp::Put, 1);
        let sink = MemorySink::new();
        let worker = setup(&store, Arc::new(sink.clone()));

        let report = run_for(worker, Duration::from_millis(12_500)).await;

        assert_eq!(report.exit, WorkerExit::Done);
        assert_eq!(report.counts.writes, 2);
        assert_eq!(report.counts.failed_writes, 1);
        assert_eq!(report.counts.reads, 13);

        let calls = store.calls();
        let second_put = calls
            .iter()
            .enumerate()
            .filter(|(_, call)| call.op == StoreOp::Put)
            .nth(1)
            .map(|(index, _)| index)
            .unwrap();
        assert_eq!(calls[second_put + 1].op, StoreOp::Get);
        assert_eq!(store.count(StoreOp::Put), 2);

        // the failed call is still timed
        assert_eq!(sink.for_operation("PutItem").len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_reads_and_sink_do_not_stop_the_loop() {
        let store = FaultyStore::new();
        let sink = FailingSink::new();
        let worker = setup(&store, Arc::new(sink.clone()));
        store.fail_always(StoreOp::Get);

        let report = run_for(worker, Duration::from_millis(4_500)).await;

        assert_eq!(report.exit, WorkerExit::Done);
        assert_eq!(report.counts.reads, 5);
        assert_eq!(report.counts.failed_reads, 5);
        assert_eq!(sink.attempts(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_of_absent_record() {
        let store = FaultyStore::new();
        store.fail_always(StoreOp::Put);
        let worker = setup(&store, Arc::new(MemorySink::new()));

        let report = run_for(worker, Duration::from_millis(1_500)).await;

        assert_eq!(report.exit, WorkerExit::Done);
        assert_eq!(store.count(StoreOp::Delete), 1);
        assert!(store.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_cleanup_still_finishes() {
        let store = FaultyStore::new();
        store.fail_always(StoreOp::Delete);
        let worker = setup(&store, Arc::new(MemorySink::new()));

        let report = run_for(worker, Duration::from_millis(500)).await;

        assert_eq!(report.exit, WorkerExit::Done);
        assert!(store.records().contains(TABLE, "X worker 0"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_delay_ticks() {
        let store = FaultyStore::new();
        store.set_latency(Duration::from_secs(3));
        let sink = MemorySink::new();
        let worker = setup(&store, Arc::new(sink.clone()));

        // check: 0s..3s, tick 0: put 3s..6s + get 6s..9s, tick 1 (late): get 9s..12s.
        // Cancellation at 10s is observed once the in-flight read returns.
        let report = run_for(worker, Duration::from_secs(10)).await;

        assert_eq!(report.counts.reads, 2);
        assert_eq!(report.counts.writes, 1);

        let ops: Vec<_> = store.calls().iter().map(|call| call.op).collect();
        assert_eq!(
            ops,
            [
                StoreOp::Get,
                StoreOp::Put,
                StoreOp::Get,
                StoreOp::Get,
                StoreOp::Delete
            ]
        );
        assert!(sink.data().iter().all(|datum| (datum.value - 3000.0).abs() < 1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_first_tick() {
        let store = FaultyStore::new();
        let worker = setup(&store, Arc::new(MemorySink::new()));

        let scope = CancellationToken::new();
        scope.cancel();
        let report = worker.run(scope).await;

        assert_eq!(report.exit, WorkerExit::Done);
        assert_eq!(report.counts, OperationCounts::default());
        assert_eq!(store.count(StoreOp::Delete), 1);
    }
}
