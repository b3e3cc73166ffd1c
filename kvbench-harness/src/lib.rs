//! A load-generation harness comparing key-value store backends.
//!
//! A [`Benchmark`] drives a fixed number of concurrent [`Worker`]s against a
//! [`Store`](kvbench_service::Store). Every worker reads its own record once per tick and writes it
//! on every tenth tick, reporting the latency of each call to a
//! [`MetricsSink`](kvbench_service::MetricsSink). Running two benchmarks side by side with
//! [`run_suite`], for example a cache-fronted store and a direct store, yields comparable latency
//! series under an identical workload shape.
//!
//! Failures of individual store or sink calls are logged and never abort a run.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod config;
pub mod harness;
pub mod observability;
pub mod summary;
pub mod worker;

pub use crate::harness::{Benchmark, InvalidRunConfig, RunConfig, RunReport, run_suite};
pub use crate::worker::{OperationCounts, Worker, WorkerExit, WorkerIdentity, WorkerReport};
