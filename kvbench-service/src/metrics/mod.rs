//! Time-series reporting of operation latencies.

use std::fmt::{self, Debug};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

mod http;
mod log;
mod memory;

pub use http::HttpSink;
pub use log::LogSink;
pub use memory::MemorySink;

/// A named dimension attached to a [`MetricDatum`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    /// The dimension name, e.g. `Backend`.
    pub name: String,
    /// The dimension value, e.g. `Cached`.
    pub value: String,
}

impl Dimension {
    /// Creates a new dimension.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The unit of a [`MetricDatum`] value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    /// Milliseconds.
    Milliseconds,
    /// Seconds.
    Seconds,
    /// A plain count.
    Count,
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self {
            Unit::Milliseconds => "Milliseconds",
            Unit::Seconds => "Seconds",
            Unit::Count => "Count",
        };
        f.write_str(unit)
    }
}

/// A single observation submitted to a [`MetricsSink`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricDatum {
    /// The namespace grouping related metrics.
    pub namespace: String,
    /// The metric name within the namespace.
    pub metric_name: String,
    /// Dimensions in the order they were attached.
    pub dimensions: Vec<Dimension>,
    /// When the observation was made.
    #[serde(with = "humantime_serde")]
    pub timestamp: SystemTime,
    /// The unit of `value`.
    pub unit: Unit,
    /// The observed value.
    pub value: f64,
}

impl MetricDatum {
    /// Returns the value of the first dimension with the given name.
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|dimension| dimension.name == name)
            .map(|dimension| dimension.value.as_str())
    }
}

/// An append-only sink for metric observations.
#[async_trait::async_trait]
pub trait MetricsSink: Debug + Send + Sync + 'static {
    /// Submits one observation.
    async fn report(&self, datum: &MetricDatum) -> SinkResult<()>;
}

/// Errors returned by [`MetricsSink`] implementations.
#[derive(Debug, Error)]
pub enum SinkError {
    /// Errors sending a request to a remote metrics endpoint, including error status codes.
    #[error("reqwest error: {context}")]
    Reqwest {
        /// A description of the failed request.
        context: String,
        /// The underlying error.
        #[source]
        cause: reqwest::Error,
    },

    /// Any other error stemming from a sink.
    #[error("metrics sink error: {context}")]
    Generic {
        /// A description of the failed operation.
        context: String,
        /// The underlying error, if any.
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type for sink operations.
pub type SinkResult<T> = Result<T, SinkError>;

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn datum_json() {
        let datum = MetricDatum {
            namespace: "KvBenchmark".into(),
            metric_name: "Latency".into(),
            dimensions: vec![
                Dimension::new("Backend", "Cached"),
                Dimension::new("Operation", "GetItem"),
            ],
            timestamp: SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000),
            unit: Unit::Milliseconds,
            value: 1.5,
        };

        let json = serde_json::to_value(&datum).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "namespace": "KvBenchmark",
                "metric_name": "Latency",
                "dimensions": [
                    { "name": "Backend", "value": "Cached" },
                    { "name": "Operation", "value": "GetItem" },
                ],
                "timestamp": "2020-09-13T12:26:40Z",
                "unit": "Milliseconds",
                "value": 1.5,
            })
        );

        assert_eq!(datum.dimension("Operation"), Some("GetItem"));
        assert_eq!(datum.dimension("Missing"), None);
    }
}
