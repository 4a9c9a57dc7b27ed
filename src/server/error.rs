//! HTTP error mapping

use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::error::VaultError;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    /// Internal server error, with optional diagnostics
    Internal {
        message: String,
        details: Option<String>,
    },
    /// Unknown artifact
    NotFound(String),
    /// Bad name or missing confirmation
    BadRequest(String),
    /// Another operation holds the lock
    Conflict(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Internal { message, .. } => write!(f, "Internal error: {}", message),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

/// Error response body
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: u16,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, details) = match self {
            ApiError::Internal { message, details } => {
                tracing::error!(message = %message, details = details.as_deref().unwrap_or_default(), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, message, details)
            }
            ApiError::NotFound(msg) => {
                tracing::debug!("Not found: {}", msg);
                (StatusCode::NOT_FOUND, msg, None)
            }
            ApiError::BadRequest(msg) => {
                tracing::debug!("Bad request: {}", msg);
                (StatusCode::BAD_REQUEST, msg, None)
            }
            ApiError::Conflict(msg) => {
                tracing::debug!("Conflict: {}", msg);
                (StatusCode::CONFLICT, msg, None)
            }
        };

        let body = Json(ErrorResponse {
            code: status.as_u16(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

impl From<VaultError> for ApiError {
    fn from(err: VaultError) -> Self {
        let message = err.to_string();
        match err {
            VaultError::InvalidName(_) | VaultError::ConfirmationRequired => {
                ApiError::BadRequest(message)
            }
            VaultError::NotFound(_) => ApiError::NotFound(message),
            VaultError::Rejected(_) => ApiError::Conflict(message),
            VaultError::DumpFailed { stderr_tail, .. }
            | VaultError::RestoreFailed { stderr_tail, .. } => ApiError::Internal {
                message,
                details: Some(stderr_tail).filter(|s| !s.is_empty()),
            },
            VaultError::Io(_) | VaultError::Config(_) | VaultError::Json(_) => ApiError::Internal {
                message,
                details: None,
            },
        }
    }
}

/// Result type alias
pub type ApiResult<T> = Result<T, ApiError>;
