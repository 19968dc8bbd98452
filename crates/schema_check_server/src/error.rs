//! Maps core errors onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use schema_check_core::error::SchemaCheckError;

/// Handler error. Body is `{"error": "...", "retryable": bool}`.
#[derive(Debug)]
pub struct AppError(pub SchemaCheckError);

impl From<SchemaCheckError> for AppError {
    fn from(e: SchemaCheckError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        let body = serde_json::json!({
            "error": self.0.to_string(),
            "retryable": self.0.is_retryable(),
        });
        (status, Json(body)).into_response()
    }
}
