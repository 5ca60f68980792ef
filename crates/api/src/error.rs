use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sitepulse_core::error::TransportError;

/// Application-level error type for HTTP handlers.
///
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Publishing to the durable transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Transport(err) => classify_transport_error(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a publish failure into an HTTP status, error code, and message.
///
/// - A full buffer, a closed producer, a rejecting broker or an
///   unacknowledged write map to 503.
/// - Unknown topics and serialization failures are server bugs: 500.
fn classify_transport_error(err: &TransportError) -> (StatusCode, &'static str, String) {
    match err {
        TransportError::BufferFull { .. } => (
            StatusCode::SERVICE_UNAVAILABLE,
            "BUFFER_FULL",
            err.to_string(),
        ),
        TransportError::Closed | TransportError::Rejected(_) | TransportError::Timeout(_) => {
            tracing::warn!(error = %err, "Event transport unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                "TRANSPORT_UNAVAILABLE",
                "Event transport unavailable".to_string(),
            )
        }
        TransportError::UnknownTopic(_) | TransportError::Serialization(_) => {
            tracing::error!(error = %err, "Event publish failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}
