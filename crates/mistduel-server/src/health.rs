use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub lobbies: usize,
    pub connections: ConnectionInfo,
}

#[derive(Serialize)]
pub struct ConnectionInfo {
    /// Open sockets, including ones still handshaking.
    pub websocket: usize,
    pub players: usize,
    pub spectators: usize,
}

/// Server status with lobby and connection counts.
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        lobbies: state.lobbies.len().await,
        connections: ConnectionInfo {
            websocket: state.ws_connection_count.load(Ordering::Relaxed),
            players: state.connections.count().await,
            spectators: state.spectators.total_spectators().await,
        },
    })
}

pub async fn readiness_check() -> &'static str {
    "ready"
}
