use crate::error::{Result, RuntimeError};
use crate::metrics::PrometheusMetrics;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// HTTP endpoint exposing the controller's Prometheus metrics
pub struct MetricsServer {
    listener: TcpListener,
    metrics: PrometheusMetrics,
}

impl MetricsServer {
    /// Bind the listen address
    pub async fn bind(addr: SocketAddr, metrics: PrometheusMetrics) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            RuntimeError::invalid_config(
                format!("failed to bind metrics address {}: {}", addr, e),
                "Set metricsAddr to a free address, or remove it to disable the endpoint",
            )
        })?;
        Ok(Self { listener, metrics })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .map_err(|e| RuntimeError::internal_error(format!("no local address: {}", e)))
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/metrics", get(metrics))
            .route("/healthz", get(healthz))
            .layer(TraceLayer::new_for_http())
            .with_state(self.metrics.clone())
    }

    /// Serve until the token is cancelled
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let app = self.build_router();
        info!("Serving metrics on http://{}/metrics", self.local_addr()?);

        axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .map_err(|e| RuntimeError::internal_error(format!("metrics server failed: {}", e)))
    }
}

async fn metrics(State(metrics): State<PrometheusMetrics>) -> Response {
    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn healthz() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;

    async fn start(metrics: PrometheusMetrics) -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<Result<()>>) {
        let server = MetricsServer::bind("127.0.0.1:0".parse().unwrap(), metrics)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let token = CancellationToken::new();
        let handle = tokio::spawn(server.run(token.clone()));
        (addr, token, handle)
    }

    #[tokio::test]
    async fn test_serves_metrics_and_health() {
        let metrics = PrometheusMetrics::new("node-a").unwrap();
        metrics.set_tainted(true);
        let (addr, token, handle) = start(metrics).await;

        let resp = reqwest::get(format!("http://{}/metrics", addr)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(content_type, prometheus::TEXT_FORMAT);
        let body = resp.text().await.unwrap();
        assert!(body.contains("dethrottler_node_tainted{node=\"node-a\"} 1"));

        let health = reqwest::get(format!("http://{}/healthz", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(health, "ok");

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_config_error() {
        let metrics = PrometheusMetrics::new("node-a").unwrap();
        let first = MetricsServer::bind("127.0.0.1:0".parse().unwrap(), metrics.clone())
            .await
            .unwrap();
        let taken = first.local_addr().unwrap();

        let err = MetricsServer::bind(taken, metrics).await.err().unwrap();
        assert!(matches!(err, RuntimeError::InvalidConfig { .. }));
    }
}
