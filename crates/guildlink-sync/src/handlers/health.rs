//! Liveness endpoint.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::providers::ConnectionStatus;
use crate::router::SyncState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub discord: ConnectionStatus,
    pub gating_enabled: bool,
    pub active_lanes: usize,
}

/// Report process liveness and the guild connection state.
pub async fn health(State(state): State<SyncState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        discord: state.connection.status(),
        gating_enabled: state.dispatcher.engine().membership().gating_enabled(),
        active_lanes: state.dispatcher.active_lanes(),
    })
}
