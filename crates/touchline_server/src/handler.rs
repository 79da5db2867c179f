//! Request handlers for the ingestion boundary.

use crate::api::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use touchline_core::{DecodeError, EventEnvelope};
use touchline_ingest::ReduceError;

/// Handler error, mapped onto a plain-text response
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// Body is not a valid envelope
    #[error("Failed to parse JSON: {0}")]
    Decode(#[from] DecodeError),

    /// Envelope could not be applied
    #[error(transparent)]
    Reduce(#[from] ReduceError),
}

impl HandlerError {
    /// Status code this error is reported with
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Decode(_) => StatusCode::BAD_REQUEST,
            Self::Reduce(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            Self::Reduce(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Reduce(e) if !e.is_validation() => format!("Failed to process message: {e}"),
            _ => self.to_string(),
        };
        (status, body).into_response()
    }
}

/// `POST /heartbeat`
pub async fn heartbeat() -> Json<Value> {
    tracing::debug!("heartbeat received");
    Json(json!({ "status": "ok" }))
}

/// `POST /process-msg`
pub async fn process_message(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<StatusCode, HandlerError> {
    let envelope = EventEnvelope::from_json(&body).inspect_err(|e| {
        tracing::warn!(error = %e, bytes = body.len(), "failed to decode message");
    })?;

    state.reducer().ingest(&envelope).await?;
    Ok(StatusCode::OK)
}
