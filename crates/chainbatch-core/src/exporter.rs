//! Prometheus exposition endpoint.

use std::net::SocketAddr;

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;

use crate::error::IndexerError;

/// Registry pre-loaded with the process collector (CPU, memory, open fds)
/// where the platform supports it.
pub fn metrics_registry() -> Result<Registry, IndexerError> {
    let registry = Registry::new();
    #[cfg(target_os = "linux")]
    registry
        .register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))
        .map_err(|e| IndexerError::Other(format!("metrics registration failed: {e}")))?;
    Ok(registry)
}

/// Serve `registry` as `GET /metrics` on `0.0.0.0:port`.
///
/// Returns the bound address once the listener is up; the server itself runs
/// on a background task for the rest of the process. Port `0` picks a free port.
pub async fn serve_metrics(registry: Registry, port: u16) -> Result<SocketAddr, IndexerError> {
    let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
        .await
        .map_err(|e| IndexerError::Other(format!("metrics listener on port {port}: {e}")))?;
    let addr = listener
        .local_addr()
        .map_err(|e| IndexerError::Other(e.to_string()))?;

    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(registry);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "metrics exporter stopped");
        }
    });
    Ok(addr)
}

async fn render_metrics(State(registry): State<Registry>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut body = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut body) {
        tracing::warn!(error = %e, "failed to encode metrics");
    }
    ([(header::CONTENT_TYPE, encoder.format_type().to_string())], body)
}
