//! A [`MetricsSink`] that rejects every observation.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use kvbench_service::{MetricDatum, MetricsSink, SinkError, SinkResult};

/// A sink that counts and then rejects every report.
#[derive(Debug, Clone, Default)]
pub struct FailingSink {
    attempts: Arc<AtomicUsize>,
}

impl FailingSink {
    /// Creates a new failing sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of rejected reports.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl MetricsSink for FailingSink {
    async fn report(&self, datum: &MetricDatum) -> SinkResult<()> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Err(SinkError::Generic {
            context: format!("rejected {} datum", datum.metric_name),
            cause: None,
        })
    }
}
