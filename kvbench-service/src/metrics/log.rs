use super::{MetricDatum, MetricsSink, SinkResult};

/// A [`MetricsSink`] that emits every observation as a structured log event.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait::async_trait]
impl MetricsSink for LogSink {
    async fn report(&self, datum: &MetricDatum) -> SinkResult<()> {
        let dimensions = datum
            .dimensions
            .iter()
            .map(|dimension| format!("{}={}", dimension.name, dimension.value))
            .collect::<Vec<_>>()
            .join(",");

        tracing::info!(
            target: "kvbench::metrics",
            namespace = %datum.namespace,
            metric = %datum.metric_name,
            dimensions,
            unit = %datum.unit,
            value = datum.value,
            timestamp = %humantime::format_rfc3339_millis(datum.timestamp),
            "metric"
        );

        Ok(())
    }
}
