//! Version pointers, revisions and the identity of whoever produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Environment, ResourceKind};

/// Remarks attached to revisions produced by the scheduler.
pub const SYSTEM_REMARKS: &str = "System-generated";

/// Username of the automated scheduler.
pub const SYSTEM_USERNAME: &str = "autogenerated";

/// Role of an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    System,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(Role::Admin),
            "operator" => Some(Role::Operator),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

/// Who triggered an operation. Every mutation records it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub role: Role,
}

impl Identity {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
        }
    }

    /// The automated scheduler.
    pub fn system() -> Self {
        Self::new(SYSTEM_USERNAME, Role::System)
    }

    pub fn is_system(&self) -> bool {
        self.role == Role::System
    }
}

/// Identifies one tracked app.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AppKey {
    pub kind: ResourceKind,
    pub app_name: String,
    pub environment: Environment,
}

impl AppKey {
    pub fn new(kind: ResourceKind, app_name: impl Into<String>, environment: Environment) -> Self {
        Self {
            kind,
            app_name: app_name.into(),
            environment,
        }
    }
}

impl std::fmt::Display for AppKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.app_name, self.environment)
    }
}

/// The mutable "current version" record of an app.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionPointer {
    pub uid: String,
    pub kind: ResourceKind,
    pub app_name: String,
    /// Remote name, including the environment suffix
    pub original_name: String,
    pub environment: Environment,
    pub current_version: i64,
    pub created_at: DateTime<Utc>,
}

/// An immutable snapshot of one app at one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub uid: String,
    pub kind: ResourceKind,
    pub app_name: String,
    pub original_name: String,
    pub environment: Environment,
    pub version: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<i64>,
    pub generated_by: String,
    pub created_at: DateTime<Utc>,
    pub lb_resource_version: i64,
    pub waf_resource_version: i64,
    pub lb_config: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waf_config: Option<Value>,
    pub origin_config: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remarks: Option<String>,
}

/// A revision computed by reconciliation and not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionDraft {
    pub key: AppKey,
    pub original_name: String,
    pub version: i64,
    pub previous_version: Option<i64>,
    pub lb_config: Value,
    pub waf_config: Option<Value>,
    pub origin_config: Vec<Value>,
    pub lb_resource_version: i64,
    pub waf_resource_version: i64,
    pub generated_by: String,
    pub remarks: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RevisionDraft {
    pub fn uid(&self) -> String {
        derive_uid(&self.key, Some(self.version), self.created_at)
    }
}

/// Fields of a revision rewritten after a rollback re-reads the remote state.
#[derive(Debug, Clone)]
pub struct RevisionPayload {
    pub lb_config: Value,
    pub waf_config: Option<Value>,
    pub origin_config: Vec<Value>,
    pub lb_resource_version: i64,
    pub waf_resource_version: i64,
}

/// Deterministic opaque identifier for a pointer (`version = None`) or revision.
///
/// Uniqueness is enforced by the primary key, not by this derivation.
pub fn derive_uid(key: &AppKey, version: Option<i64>, at: DateTime<Utc>) -> String {
    let prefix = match version {
        Some(_) => "rev",
        None => "app",
    };
    let version = version.map(|v| format!("_v{}", v)).unwrap_or_default();
    let name = format!(
        "{}_{}_{}-{}{}_{}",
        prefix,
        key.kind.spec().tag.to_lowercase(),
        key.app_name,
        key.environment,
        version,
        at.timestamp()
    );
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_uid_is_deterministic_and_version_sensitive() {
        let key = AppKey::new(ResourceKind::HttpLb, "checkout", Environment::Staging);
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        assert_eq!(derive_uid(&key, Some(1), at), derive_uid(&key, Some(1), at));
        assert_ne!(derive_uid(&key, Some(1), at), derive_uid(&key, Some(2), at));
        assert_ne!(derive_uid(&key, None, at), derive_uid(&key, Some(1), at));

        let tcp = AppKey::new(ResourceKind::TcpLb, "checkout", Environment::Staging);
        assert_ne!(derive_uid(&key, Some(1), at), derive_uid(&tcp, Some(1), at));
    }

    #[test]
    fn test_system_identity() {
        assert!(Identity::system().is_system());
        assert!(!Identity::new("alice", Role::Admin).is_system());
    }
}
