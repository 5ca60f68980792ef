use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use sitepulse_core::types::Timestamp;
use sitepulse_core::Envelope;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Body of `POST /api/v1/events`.
#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    #[serde(rename = "type")]
    pub event_type: String,
    pub tenant_id: String,
    #[serde(default)]
    pub payload: Value,
    /// Defaults to the time of ingestion.
    #[serde(default)]
    pub timestamp: Option<Timestamp>,
    /// Ordering key on the durable path; defaults to `tenant_id`.
    #[serde(default)]
    pub partition_key: Option<String>,
}

/// POST /events -- publish one envelope to both paths.
///
/// The durable publish decides the response; the live broadcast is
/// best-effort and only logged on failure.
async fn ingest_event(
    State(state): State<AppState>,
    Json(input): Json<IngestRequest>,
) -> AppResult<(StatusCode, Json<Value>)> {
    if input.event_type.trim().is_empty() {
        return Err(AppError::BadRequest("type must not be empty".into()));
    }
    if input.tenant_id.trim().is_empty() {
        return Err(AppError::BadRequest("tenant_id must not be empty".into()));
    }

    let mut envelope = Envelope::new(input.event_type, input.tenant_id).with_payload(input.payload);
    if let Some(timestamp) = input.timestamp {
        envelope = envelope.with_timestamp(timestamp);
    }
    let key = input
        .partition_key
        .filter(|k| !k.trim().is_empty())
        .unwrap_or_else(|| envelope.tenant_id.clone());

    state
        .producer
        .publish(&state.config.pipeline.topic, &key, &envelope)?;

    let tenant_id = envelope.tenant_id.clone();
    if let Err(e) = state.hub.broadcast(envelope).await {
        tracing::warn!(%tenant_id, error = %e, "Live broadcast skipped");
    }

    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "accepted" }))))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/events", post(ingest_event))
}
