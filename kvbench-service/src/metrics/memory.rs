use std::sync::{Arc, Mutex};

use super::{MetricDatum, MetricsSink, SinkResult};

/// A [`MetricsSink`] that keeps every observation in memory.
///
/// The sink is [`Clone`] so tests can hold a handle for inspection while the harness owns a
/// shared copy.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    data: Arc<Mutex<Vec<MetricDatum>>>,
}

impl MemorySink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all observations reported so far.
    pub fn data(&self) -> Vec<MetricDatum> {
        self.data.lock().unwrap().clone()
    }

    /// Returns the observations whose `Operation` dimension equals `operation`.
    pub fn for_operation(&self, operation: &str) -> Vec<MetricDatum> {
        self.data
            .lock()
            .unwrap()
            .iter()
            .filter(|datum| datum.dimension("Operation") == Some(operation))
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl MetricsSink for MemorySink {
    async fn report(&self, datum: &MetricDatum) -> SinkResult<()> {
        self.data.lock().unwrap().push(datum.clone());
        Ok(())
    }
}
