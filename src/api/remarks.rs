//! Revision remarks API endpoint.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use chrono::Utc;

use super::{parse_environment, parse_kind, success, ApiResult};
use crate::errors::AppError;
use crate::models::{
    canonical_app_name, AppKey, AuditEvent, Identity, Revision, UpdateRemarksRequest,
    REMARKS_UPDATE,
};
use crate::AppState;

const MAX_REMARKS_LEN: usize = 1000;

/// PUT /api/:kind/apps/:app/:env/revisions/:version/remarks - Edit a revision's remarks.
pub async fn update_remarks(
    State(state): State<AppState>,
    Path((kind, app, env, version)): Path<(String, String, String, i64)>,
    Extension(actor): Extension<Identity>,
    Json(request): Json<UpdateRemarksRequest>,
) -> ApiResult<Revision> {
    let kind = parse_kind(&kind)?;
    let environment = parse_environment(&env)?;

    let remarks = request
        .remarks
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    if remarks.is_some_and(|s| s.chars().count() > MAX_REMARKS_LEN) {
        return Err(AppError::Validation(format!(
            "Remarks must be at most {} characters",
            MAX_REMARKS_LEN
        )));
    }

    let key = AppKey::new(kind, canonical_app_name(&app), environment);
    let event = AuditEvent {
        event_type: REMARKS_UPDATE.to_string(),
        created_at: Utc::now(),
        actor: actor.username.clone(),
        description: format!(
            "{} updated the remarks of {} {} version {} on environment {}",
            actor.username,
            kind.spec().label,
            key.app_name,
            version,
            environment
        ),
        environment: Some(environment),
        previous_version: None,
        target_version: Some(version),
    };

    let revision = state
        .engine
        .repository()
        .update_remarks(&key, version, remarks, &event)
        .await?;
    success(revision)
}
