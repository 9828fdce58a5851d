//! Error types and HTTP error response handling.
//!
//! This module defines all application errors and how they are converted
//! into HTTP responses with appropriate status codes and JSON bodies.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::clients::ClientError;

/// Application-wide error type.
///
/// Each variant maps to a specific HTTP status code and error code.
///
/// # Error Categories
///
/// - **Infrastructure**: database, filesystem and upstream API failures
/// - **Authentication**: invalid API keys, missing privileges, bad signatures
/// - **Resource**: requested records not found or already in a conflicting state
/// - **Business rules**: invalid state transitions, rate limits, disabled features
/// - **Validation**: invalid request data
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed.
    ///
    /// Returns HTTP 500 and hides the details from the client.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Local filesystem operation failed (uploads, snapshots, OCR).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An external API (POS, payroll, gateway, LLM) failed.
    ///
    /// Returns HTTP 502 Bad Gateway.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// API key is missing, invalid, or inactive.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Authenticated staff member lacks the privilege for this operation.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Requested record does not exist.
    #[error("{0}")]
    NotFound(String),

    /// Operation conflicts with existing data (duplicate mapping, already allocated).
    #[error("{0}")]
    Conflict(String),

    /// Operation is not allowed in the record's current state.
    ///
    /// Returns HTTP 422 Unprocessable Entity.
    #[error("{0}")]
    InvalidState(String),

    /// Too many attempts in the current window.
    #[error("{0}")]
    RateLimited(String),

    /// Callback signature did not verify.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Feature needs configuration that is not present.
    #[error("{0}")]
    Disabled(String),

    /// Request body or parameters are invalid.
    ///
    /// The String contains details about what was invalid.
    #[error("{0}")]
    InvalidRequest(String),
}

impl From<ClientError> for AppError {
    fn from(err: ClientError) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::Database(_) | AppError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                "An internal error occurred".to_string(),
            ),
            AppError::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error", self.to_string()),
            AppError::InvalidApiKey => (
                StatusCode::UNAUTHORIZED,
                "invalid_api_key",
                self.to_string(),
            ),
            AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", self.to_string()),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", self.to_string()),
            AppError::Conflict(_) => (StatusCode::CONFLICT, "conflict", self.to_string()),
            AppError::InvalidState(_) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "invalid_state",
                self.to_string(),
            ),
            AppError::RateLimited(_) => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                self.to_string(),
            ),
            AppError::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                "invalid_signature",
                self.to_string(),
            ),
            AppError::Disabled(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "feature_disabled",
                self.to_string(),
            ),
            AppError::InvalidRequest(_) => {
                (StatusCode::BAD_REQUEST, "invalid_request", self.to_string())
            }
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "success": false,
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();

        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AppError::InvalidApiKey, StatusCode::UNAUTHORIZED),
            (AppError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (AppError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (AppError::Conflict("x".into()), StatusCode::CONFLICT),
            (
                AppError::InvalidState("x".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                AppError::RateLimited("x".into()),
                StatusCode::TOO_MANY_REQUESTS,
            ),
            (AppError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
            (
                AppError::Disabled("x".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (AppError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
        ];

        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_database_error_hides_details() {
        let (status, code, message) = AppError::Database(sqlx::Error::RowNotFound).parts();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "internal_error");
        assert_eq!(message, "An internal error occurred");
    }

    #[test]
    fn test_validation_message_passed_through() {
        let (_, code, message) =
            AppError::InvalidRequest("Amount must be positive".into()).parts();

        assert_eq!(code, "invalid_request");
        assert_eq!(message, "Amount must be positive");
    }
}
