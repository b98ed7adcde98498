//! JSON error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<String>,
}

/// An error rendered as `{"error": {"code", "message", "details"?}}`.
pub struct ErrorResponse {
    status: StatusCode,
    detail: ErrorDetail,
}

impl ErrorResponse {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            detail: ErrorDetail {
                code,
                message: message.into(),
                details: Vec::new(),
            },
        }
    }

    /// Attach supporting messages, e.g. per-provider discovery warnings.
    #[must_use]
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.detail.details = details;
        self
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.detail,
            }),
        )
            .into_response()
    }
}

pub fn bad_request(message: impl Into<String>) -> ErrorResponse {
    ErrorResponse::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

pub fn not_found(message: impl Into<String>) -> ErrorResponse {
    ErrorResponse::new(StatusCode::NOT_FOUND, "not_found", message)
}

pub fn conflict(message: impl Into<String>) -> ErrorResponse {
    ErrorResponse::new(StatusCode::CONFLICT, "conflict", message)
}

pub fn service_unavailable(message: impl Into<String>) -> ErrorResponse {
    ErrorResponse::new(
        StatusCode::SERVICE_UNAVAILABLE,
        "service_unavailable",
        message,
    )
}
