use std::time::Duration;

use super::{MetricDatum, MetricsSink, SinkError, SinkResult};

/// User agent string used for outgoing requests.
pub const USER_AGENT: &str = concat!("kvbench/", env!("CARGO_PKG_VERSION"));

/// A [`MetricsSink`] that posts every observation as JSON to a remote endpoint.
///
/// Requests are not retried. Connection failures and non-success status codes are returned as
/// [`SinkError::Reqwest`].
#[derive(Debug)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSink {
    /// Creates a sink posting to `endpoint` with the given per-request timeout.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> SinkResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|cause| SinkError::Reqwest {
                context: "failed to build HTTP client".to_owned(),
                cause,
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait::async_trait]
impl MetricsSink for HttpSink {
    async fn report(&self, datum: &MetricDatum) -> SinkResult<()> {
        self.client
            .post(&self.endpoint)
            .json(datum)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|cause| SinkError::Reqwest {
                context: format!("failed to post metric to {}", self.endpoint),
                cause,
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::SystemTime;

    use axum::Json;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::routing::post;

    use super::*;
    use crate::metrics::{Dimension, Unit};

    type Received = Arc<Mutex<Vec<MetricDatum>>>;

    async fn receiver(status: StatusCode) -> (SocketAddr, Received) {
        let received = Received::default();
        let app = axum::Router::new()
            .route(
                "/metrics",
                post(
                    move |State(received): State<Received>, Json(datum): Json<MetricDatum>| async move {
                        received.lock().unwrap().push(datum);
                        status
                    },
                ),
            )
            .with_state(Arc::clone(&received));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        (addr, received)
    }

    fn datum() -> MetricDatum {
        MetricDatum {
            namespace: "KvBenchmark".into(),
            metric_name: "Latency".into(),
            dimensions: vec![Dimension::new("Operation", "PutItem")],
            timestamp: SystemTime::now(),
            unit: Unit::Milliseconds,
            value: 12.0,
        }
    }

    #[tokio::test]
    async fn posts_json() {
        let (addr, received) = receiver(StatusCode::NO_CONTENT).await;
        let sink = HttpSink::new(format!("http://{addr}/metrics"), Duration::from_secs(5)).unwrap();

        sink.report(&datum()).await.unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].metric_name, "Latency");
        assert_eq!(received[0].dimension("Operation"), Some("PutItem"));
    }

    #[tokio::test]
    async fn error_status() {
        let (addr, _received) = receiver(StatusCode::SERVICE_UNAVAILABLE).await;
        let sink = HttpSink::new(format!("http://{addr}/metrics"), Duration::from_secs(5)).unwrap();

        let err = sink.report(&datum()).await.unwrap_err();
        assert!(matches!(err, SinkError::Reqwest { .. }));
    }

    #[tokio::test]
    async fn unreachable_endpoint() {
        // Bind and immediately drop a listener to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let sink = HttpSink::new(format!("http://{addr}/metrics"), Duration::from_secs(5)).unwrap();
        assert!(sink.report(&datum()).await.is_err());
    }
}
