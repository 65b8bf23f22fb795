//! Pull-based metrics endpoint.
//!
//! Exposes the aggregator for an external monitoring collaborator:
//! `GET /metrics` serves the text exposition, `GET /summary` the JSON
//! summary. Runs happily next to the suite on an ephemeral port.

use std::sync::Arc;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tracing::info;

use crate::error::Result;
use crate::metrics::{MetricsAggregator, TestSummary};

pub fn router(metrics: Arc<MetricsAggregator>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/summary", get(summary_handler))
        .with_state(metrics)
}

/// Serves the metrics endpoint until the listener is closed.
pub async fn serve(listener: TcpListener, metrics: Arc<MetricsAggregator>) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(target = "gauntlet.metrics", %addr, "metrics endpoint listening");
    }
    axum::serve(listener, router(metrics)).await?;
    Ok(())
}

async fn metrics_handler(State(metrics): State<Arc<MetricsAggregator>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

async fn summary_handler(State(metrics): State<Arc<MetricsAggregator>>) -> Json<TestSummary> {
    Json(metrics.summary())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::config::{BrowserKind, SuiteConfig};

    async fn get(addr: std::net::SocketAddr, path: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn endpoint_serves_exposition_and_summary() {
        let metrics = Arc::new(MetricsAggregator::new(&SuiteConfig::default()));
        metrics.record_suite_start();
        metrics.record_test_completion("login", BrowserKind::Chrome, true, 1.2);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, metrics));

        let text = get(addr, "/metrics").await;
        assert!(text.contains("200 OK"));
        assert!(text.contains("tests_total"));

        let json = get(addr, "/summary").await;
        assert!(json.contains("\"totalTests\":1"));
        assert!(json.contains("\"successRate\":100.0"));

        server.abort();
    }
}
