//! Health check endpoint.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::interfaces::http::router::ApiState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connected_stations: usize,
    pub uptime_secs: i64,
}

pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connected_stations: state.registry.connection_count(),
        uptime_secs: (chrono::Utc::now() - state.started_at).num_seconds(),
    })
}
