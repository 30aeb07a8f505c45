//! Audit events recorded for every meaningful state change.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{Environment, ResourceKind};

pub const REMARKS_UPDATE: &str = "REMARKS_UPDATE";

/// `{TAG}_SNAPSHOT`, e.g. `HTTP_SNAPSHOT`.
pub fn snapshot_event_type(kind: ResourceKind) -> String {
    format!("{}_SNAPSHOT", kind.spec().tag)
}

/// `{TAG}_ROLLBACK`, e.g. `TCP_ROLLBACK`.
pub fn rollback_event_type(kind: ResourceKind) -> String {
    format!("{}_ROLLBACK", kind.spec().tag)
}

/// One audit log entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    pub actor: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_version: Option<i64>,
}
