pub mod monitoring;
use crate::state::AppState;
use prometheus_client::encoding::text::encode;

use axum::{extract::State, http::StatusCode, routing::get, Router};
use monitoring::{POLLER_METRICS, QUEUE_METRICS};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::error;

async fn health_handler() -> String {
    "Healthy".to_string()
}

async fn expose_metrics(state: State<Arc<AppState>>) -> Result<String, StatusCode> {
    let mut buffer = String::new();
    let registry = state.registry.read().await;
    encode(&mut buffer, &registry).map_err(|err| {
        error!(event = "metrics_encode_failed", error = %err);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(buffer)
}

/// Registers the process-wide metric families once.
pub async fn register_metrics(state: &AppState) {
    let mut registry = state.registry.write().await;

    POLLER_METRICS
        .get_or_init(|| async { monitoring::PollerMetrics::register(&mut registry, "poller") })
        .await;

    QUEUE_METRICS
        .get_or_init(|| async { monitoring::QueueMetrics::register(&mut registry, "queue") })
        .await;

    monitoring::register_build_info_metric(&mut registry, "worker");
}

/// Starts the health/metrics HTTP server on the supplied socket address.
pub async fn setup_server_with_addr(
    state: Arc<AppState>,
    addr: SocketAddr,
) -> Result<tokio::task::JoinHandle<()>, std::io::Error> {
    register_metrics(&state).await;

    let shutdown_token = state.shutdown_token.clone();
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(expose_metrics))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server_handle = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_token.cancelled().await;
            })
            .await;
        if let Err(err) = served {
            error!(event = "metrics_server_failed", error = %err);
        }
    });

    Ok(server_handle)
}
