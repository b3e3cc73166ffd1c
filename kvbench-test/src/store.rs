//! A scriptable [`Store`] for exercising failure paths.
//!
//! ```
//! use kvbench_test::store::{FaultyStore, StoreOp};
//!
//! let store = FaultyStore::new();
//! // The second put fails, all other calls are served from memory.
//! store.fail_call(StoreOp::Put, 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kvbench_service::{BackendError, BackendResult, InMemoryStore, Store, WorkRecord};
use tokio::time::Instant;

/// The kind of a store call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// [`Store::get_record`]
    Get,
    /// [`Store::put_record`]
    Put,
    /// [`Store::delete_record`]
    Delete,
}

/// A recorded call against a [`FaultyStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreCall {
    /// The kind of call.
    pub op: StoreOp,
    /// The table passed to the call.
    pub table: String,
    /// The key passed to the call.
    pub key: String,
    /// When the call was made.
    pub at: Instant,
}

#[derive(Debug)]
enum Failure {
    Always,
    Calls(HashSet<usize>),
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<StoreCall>,
    failures: HashMap<StoreOp, Failure>,
    latency: Duration,
}

/// An in-memory [`Store`] that records every call and fails calls on request.
///
/// The store is [`Clone`]; all clones share their records, call log and failure script.
#[derive(Debug, Clone, Default)]
pub struct FaultyStore {
    inner: InMemoryStore,
    state: Arc<Mutex<State>>,
}

impl FaultyStore {
    /// Creates an empty store that does not fail any calls.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the in-memory store holding the records.
    pub fn records(&self) -> &InMemoryStore {
        &self.inner
    }

    /// Makes every call of the given kind fail.
    pub fn fail_always(&self, op: StoreOp) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(op, Failure::Always);
    }

    /// Makes the `index`-th call (starting at 0) of the given kind fail.
    pub fn fail_call(&self, op: StoreOp, index: usize) {
        let mut state = self.state.lock().unwrap();
        match state
            .failures
            .entry(op)
            .or_insert_with(|| Failure::Calls(HashSet::new()))
        {
            Failure::Always => {}
            Failure::Calls(calls) => {
                calls.insert(index);
            }
        }
    }

    /// Delays every call by the given duration before it is served.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().unwrap().latency = latency;
    }

    /// Returns all calls made so far, in order.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Returns the number of calls of the given kind.
    pub fn count(&self, op: StoreOp) -> usize {
        self.calls().iter().filter(|call| call.op == op).count()
    }

    /// Returns the time of the first call for the given key.
    pub fn first_call(&self, key: &str) -> Option<Instant> {
        self.calls()
            .iter()
            .find(|call| call.key == key)
            .map(|call| call.at)
    }

    /// Returns the number of calls of the given kind for a single key.
    pub fn count_for(&self, op: StoreOp, key: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.op == op && call.key == key)
            .count()
    }

    /// Records the call and returns whether it should fail, along with the configured latency.
    fn begin(&self, op: StoreOp, table: &str, key: &str) -> (bool, Duration) {
        let mut state = self.state.lock().unwrap();
        let index = state.calls.iter().filter(|call| call.op == op).count();
        state.calls.push(StoreCall {
            op,
            table: table.to_owned(),
            key: key.to_owned(),
            at: Instant::now(),
        });

        let fail = match state.failures.get(&op) {
            Some(Failure::Always) => true,
            Some(Failure::Calls(calls)) => calls.contains(&index),
            None => false,
        };
        (fail, state.latency)
    }

    async fn enter(&self, op: StoreOp, table: &str, key: &str) -> BackendResult<()> {
        let (fail, latency) = self.begin(op, table, key);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        if fail {
            return Err(BackendError::Generic {
                context: format!("injected {op:?} failure for {key:?}"),
                cause: "service unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl Store for FaultyStore {
    fn name(&self) -> &'static str {
        "faulty"
    }

    async fn get_record(&self, table: &str, key: &str) -> BackendResult<Option<WorkRecord>> {
        self.enter(StoreOp::Get, table, key).await?;
        self.inner.get_record(table, key).await
    }

    async fn put_record(&self, table: &str, record: &WorkRecord) -> BackendResult<()> {
        self.enter(StoreOp::Put, table, &record.name).await?;
        self.inner.put_record(table, record).await
    }

    async fn delete_record(&self, table: &str, key: &str) -> BackendResult<()> {
        self.enter(StoreOp::Delete, table, key).await?;
        self.inner.delete_record(table, key).await
    }
}
