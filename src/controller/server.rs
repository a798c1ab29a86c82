//! # HTTP Server
//!
//! HTTP server for metrics, health checks, and Kubernetes probes.
//!
//! Provides endpoints:
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - Liveness probe (always returns 200)
//! - `/readyz` - Readiness probe (returns 200 when the operator is ready)
//!
//! The server listens on port 8080 by default (configurable via `METRICS_PORT`).

use crate::observability::metrics::REGISTRY;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

#[derive(Debug)]
pub struct ServerState {
    pub is_ready: Arc<AtomicBool>,
}

impl ServerState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            is_ready: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

#[must_use]
pub fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Serve until the listener fails; marks the state ready once bound
///
/// # Errors
///
/// Bind or serve failures.
pub async fn start_server(port: u16, state: Arc<ServerState>) -> Result<(), anyhow::Error> {
    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("HTTP server listening on {}", addr);
    state.is_ready.store(true, Ordering::Relaxed);

    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready.load(Ordering::Relaxed) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_readiness_follows_state() {
        let state = Arc::new(ServerState::new());
        let response = readyz_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.is_ready.store(true, Ordering::Relaxed);
        let response = readyz_handler(State(Arc::clone(&state))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_encodes_registry() {
        crate::observability::metrics::register_metrics().ok();
        crate::observability::metrics::increment_reconciliations();
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
