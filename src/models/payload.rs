//! Accessors over the JSON payloads returned by the remote control plane.
//!
//! Payloads are kept as raw `serde_json::Value` so that revisions store exactly
//! what the control plane returned. A payload looks like:
//!
//! ```json
//! { "resource_version": "12", "replace_form": { "metadata": { "name": "..." }, "spec": { ... } } }
//! ```

use serde_json::Value;

use super::KindSpec;

/// Numeric `resource_version` of a payload. Accepts strings and numbers; absent
/// or unparseable values count as 0.
pub fn resource_version(payload: &Value) -> i64 {
    match payload.get("resource_version") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

/// The `replace_form` sub-object, suitable for pushing back.
pub fn replace_form(payload: &Value) -> Option<&Value> {
    payload.get("replace_form").filter(|v| !v.is_null())
}

/// `metadata.name` of a replace form.
pub fn form_name(form: &Value) -> Option<&str> {
    form.pointer("/metadata/name").and_then(Value::as_str)
}

/// Name of the resource described by a full payload.
pub fn payload_name(payload: &Value) -> Option<&str> {
    replace_form(payload).and_then(form_name)
}

/// Origin pool names referenced by a load balancer payload, in routing order.
pub fn referenced_pools(spec: &KindSpec, lb: &Value) -> Vec<String> {
    if !spec.has_origin_pools {
        return Vec::new();
    }
    replace_form(lb)
        .and_then(|form| form.pointer(&format!("/spec/{}", spec.origin_pool_field)))
        .and_then(Value::as_array)
        .map(|pools| {
            pools
                .iter()
                .filter_map(|p| p.pointer("/pool/name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Name of the app firewall attached to a load balancer payload, if any.
pub fn attached_firewall(spec: &KindSpec, lb: &Value) -> Option<String> {
    if !spec.has_firewall {
        return None;
    }
    replace_form(lb)
        .and_then(|form| form.pointer("/spec/app_firewall/name"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// The full live state of one load balancer and its dependents.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePayload {
    pub lb: Value,
    pub origins: Vec<Value>,
    pub waf: Option<Value>,
}

impl LivePayload {
    pub fn lb_resource_version(&self) -> i64 {
        resource_version(&self.lb)
    }

    pub fn waf_resource_version(&self) -> i64 {
        self.waf.as_ref().map(resource_version).unwrap_or(0)
    }
}
