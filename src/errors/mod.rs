//! Error handling module for the revision backend.
//!
//! Provides centralized error types with mapping to HTTP status codes and response envelopes.
//! The engines only construct these; status codes are applied at the edge.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const NO_OP: &str = "NO_OP";
    pub const CONFLICT: &str = "CONFLICT";
    pub const REMOTE_UNAVAILABLE: &str = "REMOTE_UNAVAILABLE";
    pub const REMOTE_REJECTED: &str = "REMOTE_REJECTED";
    pub const PARTIAL_ROLLBACK_FAILURE: &str = "PARTIAL_ROLLBACK_FAILURE";
    pub const STORE_CORRUPTION: &str = "STORE_CORRUPTION";
    pub const STORE_INCONSISTENT: &str = "STORE_INCONSISTENT";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    /// Authentication required
    Unauthorized(String),
    /// App, environment or version does not exist
    NotFound(String),
    /// Malformed input, rejected before any remote call
    Validation(String),
    /// Rollback target is already the current version
    NoOp(String),
    /// The version pointer moved underneath us
    Conflict {
        message: String,
        current_version: i64,
    },
    /// A read from the control plane failed
    RemoteUnavailable(String),
    /// A write to the control plane failed
    RemoteRejected { message: String, errors: Vec<String> },
    /// A write failed and undoing the earlier writes failed too
    PartialRollbackFailure {
        message: String,
        compensation_errors: Vec<String>,
    },
    /// A pointer references a revision that does not exist
    StoreCorruption(String),
    /// The control plane was changed but the store could not be updated to match
    StoreInconsistent(String),
    /// Database error
    Database(String),
    /// Internal server error
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NoOp(_) => StatusCode::CONFLICT,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::RemoteUnavailable(_) => StatusCode::BAD_GATEWAY,
            AppError::RemoteRejected { .. } => StatusCode::BAD_GATEWAY,
            AppError::PartialRollbackFailure { .. } => StatusCode::BAD_GATEWAY,
            AppError::StoreCorruption(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::StoreInconsistent(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => codes::UNAUTHORIZED,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::NoOp(_) => codes::NO_OP,
            AppError::Conflict { .. } => codes::CONFLICT,
            AppError::RemoteUnavailable(_) => codes::REMOTE_UNAVAILABLE,
            AppError::RemoteRejected { .. } => codes::REMOTE_REJECTED,
            AppError::PartialRollbackFailure { .. } => codes::PARTIAL_ROLLBACK_FAILURE,
            AppError::StoreCorruption(_) => codes::STORE_CORRUPTION,
            AppError::StoreInconsistent(_) => codes::STORE_INCONSISTENT,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> String {
        match self {
            AppError::Unauthorized(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::NoOp(msg)
            | AppError::RemoteUnavailable(msg)
            | AppError::StoreCorruption(msg)
            | AppError::StoreInconsistent(msg)
            | AppError::Database(msg)
            | AppError::Internal(msg) => msg.clone(),
            AppError::Conflict { message, .. }
            | AppError::RemoteRejected { message, .. }
            | AppError::PartialRollbackFailure { message, .. } => message.clone(),
        }
    }

    fn details(&self) -> Option<serde_json::Value> {
        match self {
            AppError::Conflict {
                current_version, ..
            } => Some(serde_json::json!({ "currentVersion": current_version })),
            AppError::RemoteRejected { errors, .. } if !errors.is_empty() => {
                Some(serde_json::json!({ "errors": errors }))
            }
            AppError::PartialRollbackFailure {
                compensation_errors,
                ..
            } => Some(serde_json::json!({ "compensationErrors": compensation_errors })),
            _ => None,
        }
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::Internal(format!("JSON error: {}", err))
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(error: &AppError) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message(),
                details: error.details(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(ErrorResponse::new(&self))).into_response()
    }
}
