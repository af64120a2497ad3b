//! Error handling for the gateway.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, warn};

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Failure reported by the engine before any output was sent.
    #[error(transparent)]
    Engine(#[from] sta_core::Error),
    /// Internal server error.
    #[error("{0}")]
    Internal(String),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// HTTP status code, repeated in the body.
    pub code: u16,
    /// Always `"error"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub message: String,
}

impl AppError {
    fn status_code(&self) -> u16 {
        match self {
            AppError::Engine(err) => err.status_code(),
            AppError::Internal(_) => 500,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let message = self.to_string();
        if code >= 500 {
            warn!(code, %message, "request failed");
        } else {
            debug!(code, %message, "request rejected");
        }

        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse {
            code,
            kind: "error",
            message,
        };
        (status, Json(body)).into_response()
    }
}
