//! Snapshot run results and operator request bodies.

use serde::{Deserialize, Serialize};

use super::{Environment, ResourceKind};

/// One app written by a snapshot run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub name: String,
    pub new_version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<i64>,
}

/// An app left untouched because something went wrong for it alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedApp {
    pub name: String,
    pub environment: Environment,
    pub reason: String,
}

/// Result of snapshotting one kind across both environments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KindReport {
    pub new_production: Vec<SnapshotEntry>,
    pub new_staging: Vec<SnapshotEntry>,
    pub updated_production: Vec<SnapshotEntry>,
    pub updated_staging: Vec<SnapshotEntry>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<SkippedApp>,
}

impl KindReport {
    pub fn new_for(&mut self, environment: Environment) -> &mut Vec<SnapshotEntry> {
        match environment {
            Environment::Production => &mut self.new_production,
            Environment::Staging => &mut self.new_staging,
        }
    }

    pub fn updated_for(&mut self, environment: Environment) -> &mut Vec<SnapshotEntry> {
        match environment {
            Environment::Production => &mut self.updated_production,
            Environment::Staging => &mut self.updated_staging,
        }
    }

    pub fn has_changes(&self) -> bool {
        !(self.new_production.is_empty()
            && self.new_staging.is_empty()
            && self.updated_production.is_empty()
            && self.updated_staging.is_empty())
    }
}

/// Result of a snapshot run over one or more kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotReport {
    pub result: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_lb: Option<KindReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_lb: Option<KindReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cdn_lb: Option<KindReport>,
}

impl SnapshotReport {
    pub fn from_kinds(reports: Vec<(ResourceKind, KindReport)>) -> Self {
        let changed = reports.iter().any(|(_, r)| r.has_changes());
        let mut report = SnapshotReport {
            result: if changed {
                "Updates found.".to_string()
            } else {
                "No updates found".to_string()
            },
            http_lb: None,
            tcp_lb: None,
            cdn_lb: None,
        };
        for (kind, kind_report) in reports {
            match kind {
                ResourceKind::HttpLb => report.http_lb = Some(kind_report),
                ResourceKind::TcpLb => report.tcp_lb = Some(kind_report),
                ResourceKind::CdnLb => report.cdn_lb = Some(kind_report),
            }
        }
        report
    }
}

/// Request body for replacing the running version with a stored one.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceVersionRequest {
    pub app_name: String,
    pub environment: String,
    pub target_version: i64,
}

/// Result of a successful rollback.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackOutcome {
    pub app_name: String,
    pub environment: Environment,
    pub previous_version: i64,
    pub current_version: i64,
}

/// Request body for editing a revision's remarks.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRemarksRequest {
    #[serde(default)]
    pub remarks: Option<String>,
}
