use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Tenants with at least one live client.
    pub live_tenants: usize,
    pub live_clients: usize,
}

/// GET /health -- returns service status and live hub occupancy.
///
/// Reports `degraded` when the hub has stopped or the producer is closed.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let snapshot = state.hub.snapshot().await.ok();
    let healthy = snapshot.is_some() && !state.producer.is_closed();
    let snapshot = snapshot.unwrap_or_default();

    Json(HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        live_tenants: snapshot.tenants,
        live_clients: snapshot.clients,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
