//! Prometheus scrape endpoint.

use anyhow::Context;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, Registry, TextEncoder};
use retranslator_config::MetricsConfig;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub fn router(registry: Registry, path: &str) -> Router {
    Router::new()
        .route(path, get(metrics_handler))
        .with_state(registry)
}

async fn metrics_handler(State(registry): State<Registry>) -> Result<Response, (StatusCode, String)> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(([(header::CONTENT_TYPE, CONTENT_TYPE)], buffer).into_response())
}

/// Bind before the engine starts so a taken port fails startup.
pub async fn bind(config: &MetricsConfig) -> anyhow::Result<TcpListener> {
    let address = config.bind_address();
    TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind metrics server to {}", address))
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, app: Router, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(address) = listener.local_addr() {
        info!(address = %address, "Metrics server listening");
    }
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
