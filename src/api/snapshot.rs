//! Snapshot API endpoints.

use axum::{
    extract::{Path, State},
    Extension,
};

use super::{parse_kind, success, ApiResult};
use crate::models::{Identity, ResourceKind, SnapshotReport};
use crate::AppState;

/// POST /api/snapshot - Snapshot every load balancer kind.
pub async fn snapshot_all(
    State(state): State<AppState>,
    Extension(actor): Extension<Identity>,
) -> ApiResult<SnapshotReport> {
    let report = state.engine.snapshot(&ResourceKind::ALL, &actor).await?;
    success(report)
}

/// POST /api/:kind/snapshot - Snapshot one load balancer kind.
pub async fn snapshot_kind(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Extension(actor): Extension<Identity>,
) -> ApiResult<SnapshotReport> {
    let kind = parse_kind(&kind)?;
    let report = state.engine.snapshot(&[kind], &actor).await?;
    success(report)
}
