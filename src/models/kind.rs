//! Resource kinds, environments and the per-kind capability descriptor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Suffix marking a staging resource name.
pub const STAGING_SUFFIX: &str = "-staging";
/// Suffix occasionally carried by production resource names.
const PRODUCTION_SUFFIX: &str = "-production";

/// Kind of load balancer tracked by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    HttpLb,
    TcpLb,
    CdnLb,
}

/// What a kind's payload looks like and where it lives remotely.
#[derive(Debug)]
pub struct KindSpec {
    /// Remote collection the load balancers of this kind are listed under.
    pub collection: &'static str,
    /// Short tag used in UIDs and audit event types.
    pub tag: &'static str,
    /// Human readable label used in audit descriptions.
    pub label: &'static str,
    /// Whether an app firewall can be attached.
    pub has_firewall: bool,
    /// Whether routing rules reference origin pools.
    pub has_origin_pools: bool,
    /// Field of `replace_form.spec` listing referenced pools.
    pub origin_pool_field: &'static str,
}

static HTTP_SPEC: KindSpec = KindSpec {
    collection: "http_loadbalancers",
    tag: "HTTP",
    label: "HTTP Load Balancer",
    has_firewall: true,
    has_origin_pools: true,
    origin_pool_field: "default_route_pools",
};

static TCP_SPEC: KindSpec = KindSpec {
    collection: "tcp_loadbalancers",
    tag: "TCP",
    label: "TCP Load Balancer",
    has_firewall: false,
    has_origin_pools: true,
    origin_pool_field: "origin_pools_weights",
};

static CDN_SPEC: KindSpec = KindSpec {
    collection: "cdn_loadbalancers",
    tag: "CDN",
    label: "CDN Load Balancer",
    has_firewall: true,
    has_origin_pools: true,
    origin_pool_field: "default_route_pools",
};

impl ResourceKind {
    pub const ALL: [ResourceKind; 3] = [ResourceKind::HttpLb, ResourceKind::TcpLb, ResourceKind::CdnLb];

    pub fn spec(&self) -> &'static KindSpec {
        match self {
            ResourceKind::HttpLb => &HTTP_SPEC,
            ResourceKind::TcpLb => &TCP_SPEC,
            ResourceKind::CdnLb => &CDN_SPEC,
        }
    }

    /// Value stored in the `kind` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::HttpLb => "http_lb",
            ResourceKind::TcpLb => "tcp_lb",
            ResourceKind::CdnLb => "cdn_lb",
        }
    }

    /// Parse either the stored form (`http_lb`) or the path form (`http`).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "http" | "http_lb" => Some(ResourceKind::HttpLb),
            "tcp" | "tcp_lb" => Some(ResourceKind::TcpLb),
            "cdn" | "cdn_lb" => Some(ResourceKind::CdnLb),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment environment, derived from the resource name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Staging,
    Production,
}

impl Environment {
    pub const ALL: [Environment; 2] = [Environment::Production, Environment::Staging];

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "staging" => Some(Environment::Staging),
            "production" => Some(Environment::Production),
            _ => None,
        }
    }

    /// Environment a remote resource name belongs to.
    pub fn of_name(name: &str) -> Self {
        if name.ends_with(STAGING_SUFFIX) {
            Environment::Staging
        } else {
            Environment::Production
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical app name: the remote name with its environment suffix removed.
pub fn canonical_app_name(name: &str) -> &str {
    name.strip_suffix(STAGING_SUFFIX)
        .or_else(|| name.strip_suffix(PRODUCTION_SUFFIX))
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_from_suffix() {
        assert_eq!(Environment::of_name("checkout-staging"), Environment::Staging);
        assert_eq!(Environment::of_name("checkout"), Environment::Production);
        assert_eq!(Environment::of_name("checkout-production"), Environment::Production);
        assert_eq!(Environment::of_name("staging-checkout"), Environment::Production);
    }

    #[test]
    fn test_canonical_app_name() {
        assert_eq!(canonical_app_name("checkout-staging"), "checkout");
        assert_eq!(canonical_app_name("checkout-production"), "checkout");
        assert_eq!(canonical_app_name("checkout"), "checkout");
        // Only the trailing suffix is stripped.
        assert_eq!(canonical_app_name("my-staging-app"), "my-staging-app");
    }

    #[test]
    fn test_kind_parse() {
        assert_eq!(ResourceKind::parse("http"), Some(ResourceKind::HttpLb));
        assert_eq!(ResourceKind::parse("cdn_lb"), Some(ResourceKind::CdnLb));
        assert_eq!(ResourceKind::parse("udp"), None);
        assert_eq!(Environment::parse("prod"), None);
    }

    #[test]
    fn test_tcp_has_no_firewall() {
        assert!(!ResourceKind::TcpLb.spec().has_firewall);
        assert_eq!(ResourceKind::TcpLb.spec().origin_pool_field, "origin_pools_weights");
        assert_eq!(
            ResourceKind::CdnLb.spec().origin_pool_field,
            ResourceKind::HttpLb.spec().origin_pool_field
        );
    }
}
