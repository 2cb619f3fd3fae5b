//! HTTP server for service status.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{extract::Extension, response::Json, routing::get, Router};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::poll::PollStatus;
use crate::watch::WatchStatus;

/// Shared state behind the status API.
pub struct ServerState {
    pub watches: Vec<(&'static str, Arc<WatchStatus>)>,
    pub poll: Arc<PollStatus>,
    pub polling: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub service: String,
    pub status: String,
    pub watches: Vec<WatchStatusResponse>,
    pub poll: PollStatusResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct WatchStatusResponse {
    pub name: String,
    pub state: String,
    pub keys_processed: u64,
    pub keys_failed: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollStatusResponse {
    pub enabled: bool,
    pub cycles: u64,
    pub locations_polled: u64,
    pub locations_failed: u64,
    pub last_cycle_end: Option<String>,
}

/// Create the status API router.
pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/status", get(status_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(Extension(state))
}

/// GET /health - liveness probe
async fn health_handler() -> &'static str {
    "OK"
}

/// GET /status - watch states and poll counters
async fn status_handler(Extension(state): Extension<Arc<ServerState>>) -> Json<StatusResponse> {
    let watches = state
        .watches
        .iter()
        .map(|(name, status)| WatchStatusResponse {
            name: (*name).to_string(),
            state: status.state().as_str().to_string(),
            keys_processed: status.keys_processed.load(Ordering::Relaxed),
            keys_failed: status.keys_failed.load(Ordering::Relaxed),
        })
        .collect();

    Json(StatusResponse {
        service: "weather-sync".to_string(),
        status: "running".to_string(),
        watches,
        poll: PollStatusResponse {
            enabled: state.polling,
            cycles: state.poll.cycles.load(Ordering::Relaxed),
            locations_polled: state.poll.locations_polled.load(Ordering::Relaxed),
            locations_failed: state.poll.locations_failed.load(Ordering::Relaxed),
            last_cycle_end: state.poll.last_cycle_end(),
        },
    })
}

/// Serve the status API on the given port.
pub async fn run_server(state: Arc<ServerState>, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    info!(port = port, "Starting status server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
