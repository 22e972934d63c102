//! Error types for the server.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tether_session::AdmissionError;

use crate::guard::Denial;

/// Server error type.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The connection guard refused the peer.
    #[error("{0}")]
    ConnectionDenied(Denial),

    /// Admission control refused a session.
    #[error("{0}")]
    Admission(#[from] AdmissionError),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<Denial> for ServerError {
    fn from(denial: Denial) -> Self {
        ServerError::ConnectionDenied(denial)
    }
}

/// Result type for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ServerError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ServerError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServerError::ConnectionDenied(Denial::Banned) => (StatusCode::FORBIDDEN, "banned"),
            ServerError::ConnectionDenied(Denial::Blocked) => {
                (StatusCode::TOO_MANY_REQUESTS, "blocked")
            }
            ServerError::ConnectionDenied(_) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            ServerError::Admission(AdmissionError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            ServerError::Admission(AdmissionError::AlreadyActive(_)) => {
                (StatusCode::CONFLICT, "already_active")
            }
            ServerError::Admission(_) => (StatusCode::SERVICE_UNAVAILABLE, "capacity_exceeded"),
            ServerError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            ServerError::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "serialization_error")
            }
            ServerError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
        };

        let message = self.to_string();

        if status.is_server_error() && !matches!(self, ServerError::Admission(_)) {
            tracing::error!(status = %status, code, error = %message, "Server error");
        } else {
            tracing::warn!(status = %status, code, error = %message, "Client error");
        }

        let body = ErrorResponse {
            code: code.to_string(),
            message,
        };

        (status, Json(body)).into_response()
    }
}
