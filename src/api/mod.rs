//! REST API module.
//!
//! Handlers validate path and body input before anything reaches the engine,
//! so malformed requests never trigger a fetch or a push.

mod remarks;
mod rollback;
mod snapshot;

pub use remarks::*;
pub use rollback::*;
pub use snapshot::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::{Environment, ResourceKind};

/// Success response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse::new(data))
}

fn parse_kind(raw: &str) -> Result<ResourceKind, AppError> {
    ResourceKind::parse(raw).ok_or_else(|| {
        AppError::Validation(format!(
            "Unknown load balancer kind {:?} (expected http, tcp or cdn)",
            raw
        ))
    })
}

fn parse_environment(raw: &str) -> Result<Environment, AppError> {
    Environment::parse(&raw.trim().to_lowercase()).ok_or_else(|| {
        AppError::Validation(format!(
            "Unknown environment {:?} (expected staging or production)",
            raw
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_parsing() {
        assert_eq!(parse_kind("tcp").unwrap(), ResourceKind::TcpLb);
        assert!(matches!(parse_kind("udp"), Err(AppError::Validation(_))));
        assert_eq!(parse_environment(" Staging ").unwrap(), Environment::Staging);
        assert!(matches!(parse_environment("qa"), Err(AppError::Validation(_))));
    }
}
