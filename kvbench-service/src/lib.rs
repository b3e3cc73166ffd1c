//! The capabilities a benchmark run is driven against.
//!
//! A benchmark needs two collaborators: a [`Store`] holding one [`WorkRecord`] per worker, and a
//! [`MetricsSink`] receiving a [`MetricDatum`] for every timed store call. Both are expressed as
//! object-safe async traits so that the harness can hold them as `Arc<dyn _>` and share a single
//! instance across all of its workers.
//!
//! The crate ships the following implementations:
//!
//! - [`InMemoryStore`]: a `HashMap`, used for tests and dry runs.
//! - [`LocalFsStore`]: a direct store that keeps one JSON file per record.
//! - [`CachedStore`]: a read-through/write-through item cache in front of any other store.
//! - [`LogSink`], [`HttpSink`] and [`MemorySink`] for metrics.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod metrics;
pub mod store;

pub use metrics::{
    Dimension, HttpSink, LogSink, MemorySink, MetricDatum, MetricsSink, SinkError, SinkResult,
    Unit,
};
pub use store::{
    BackendError, BackendResult, CacheStats, CachedStore, DEFAULT_CACHE_TTL, InMemoryStore,
    LocalFsStore, Store, WorkRecord,
};
