//! Client side of the remote control plane.
//!
//! The engines only see the [`RemoteConfig`] trait; [`XcClient`] is the HTTP
//! implementation wired up by `main`.

mod xc;

#[cfg(test)]
pub mod fake;

pub use xc::XcClient;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::models::ResourceKind;

/// A failed call to the control plane.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteError {
    /// Resource the call was about, e.g. `origin_pools/pool-a`
    pub resource: String,
    /// HTTP status, when the control plane answered at all
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn new(resource: impl Into<String>, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            status,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.resource, status, self.message),
            None => write!(f, "{}: {}", self.resource, self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Read and replace load balancers and their dependent resources.
///
/// Reads return the full payload (`resource_version` + `replace_form`); writes
/// take a `replace_form`.
#[async_trait]
pub trait RemoteConfig: Send + Sync {
    /// Names of every live load balancer of a kind, across all environments.
    async fn list(&self, kind: ResourceKind) -> Result<Vec<String>, RemoteError>;

    async fn fetch(&self, kind: ResourceKind, name: &str) -> Result<Value, RemoteError>;

    async fn fetch_origin_pool(&self, name: &str) -> Result<Value, RemoteError>;

    async fn fetch_firewall(&self, name: &str) -> Result<Value, RemoteError>;

    /// Replace a load balancer with `form`.
    async fn push(&self, kind: ResourceKind, name: &str, form: &Value) -> Result<(), RemoteError>;

    /// Replace the origin pool named in `form.metadata.name`.
    async fn push_origin_pool(&self, form: &Value) -> Result<(), RemoteError>;

    /// Replace the app firewall named in `form.metadata.name`.
    async fn push_firewall(&self, form: &Value) -> Result<(), RemoteError>;

    /// Push every pool, continuing past failures. Returns one error per failed pool.
    async fn push_origin_pools(&self, forms: &[Value]) -> Vec<RemoteError> {
        let mut errors = Vec::new();
        for form in forms {
            if let Err(err) = self.push_origin_pool(form).await {
                errors.push(err);
            }
        }
        errors
    }
}
