//! Replace-version (rollback) API endpoint.

use axum::{
    extract::{Path, State},
    Extension, Json,
};

use super::{parse_environment, parse_kind, success, ApiResult};
use crate::errors::AppError;
use crate::models::{canonical_app_name, Identity, ReplaceVersionRequest, RollbackOutcome};
use crate::AppState;

/// POST /api/:kind/replace-version - Push a stored revision back to the control plane.
pub async fn replace_version(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Extension(actor): Extension<Identity>,
    Json(request): Json<ReplaceVersionRequest>,
) -> ApiResult<RollbackOutcome> {
    let kind = parse_kind(&kind)?;
    let environment = parse_environment(&request.environment)?;

    // Accept the suffixed remote name as well as the canonical one
    let app_name = canonical_app_name(request.app_name.trim());
    if app_name.is_empty() {
        return Err(AppError::Validation("App name is required".to_string()));
    }
    if request.target_version < 1 {
        return Err(AppError::Validation(
            "Target version must be a positive integer".to_string(),
        ));
    }

    let outcome = state
        .engine
        .rollback(kind, app_name, environment, request.target_version, &actor)
        .await?;
    success(outcome)
}
