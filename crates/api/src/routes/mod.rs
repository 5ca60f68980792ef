pub mod health;
pub mod ingest;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /events                                          ingest (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(ingest::router())
}

/// Root-level live push routes.
///
/// ```text
/// /ws/live/{tenant_id}                             WebSocket
/// ```
pub fn live_routes() -> Router<AppState> {
    Router::new().route("/ws/live/{tenant_id}", get(ws::live_ws_handler))
}
