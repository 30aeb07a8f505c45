//! In-memory control plane for tests.
//!
//! Every push bumps the stored `resource_version`, like the real control plane
//! does even for idempotent writes.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{RemoteConfig, RemoteError};
use crate::models::payload::{form_name, replace_form, resource_version};
use crate::models::ResourceKind;

#[derive(Default)]
struct State {
    lbs: HashMap<(ResourceKind, String), Value>,
    pools: HashMap<String, Value>,
    firewalls: HashMap<String, Value>,
    /// Pushes each name still accepts before it starts failing
    failing_pushes: HashMap<String, usize>,
    failing_fetches: Vec<String>,
    failing_list: bool,
    calls: usize,
    pushed: Vec<String>,
}

impl State {
    /// Record a push of `name` and report whether it goes through.
    fn accept_push(&mut self, name: &str) -> bool {
        self.calls += 1;
        self.pushed.push(name.to_string());
        match self.failing_pushes.get_mut(name) {
            Some(0) => false,
            Some(remaining) => {
                *remaining -= 1;
                true
            }
            None => true,
        }
    }
}

#[derive(Default)]
pub struct FakeRemote {
    state: Mutex<State>,
}

/// Full payload as returned by a read.
pub fn payload(resource_version: i64, form: Value) -> Value {
    json!({ "resource_version": resource_version.to_string(), "replace_form": form })
}

/// Replace form of an HTTP or CDN load balancer.
pub fn lb_form(name: &str, pools: &[&str], firewall: Option<&str>, marker: &str) -> Value {
    let routes: Vec<Value> = pools
        .iter()
        .map(|p| json!({ "pool": { "name": p }, "weight": 1 }))
        .collect();
    let mut form = json!({
        "metadata": { "name": name },
        "spec": { "domains": [format!("{}.example.com", marker)], "default_route_pools": routes }
    });
    if let Some(fw) = firewall {
        form["spec"]["app_firewall"] = json!({ "name": fw });
    }
    form
}

/// Replace form of an origin pool or app firewall.
pub fn named_form(name: &str, marker: &str) -> Value {
    json!({ "metadata": { "name": name }, "spec": { "marker": marker } })
}

impl FakeRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn set_lb(&self, kind: ResourceKind, name: &str, rv: i64, form: Value) {
        self.state()
            .lbs
            .insert((kind, name.to_string()), payload(rv, form));
    }

    pub fn set_pool(&self, name: &str, rv: i64, form: Value) {
        self.state().pools.insert(name.to_string(), payload(rv, form));
    }

    pub fn set_firewall(&self, name: &str, rv: i64, form: Value) {
        self.state()
            .firewalls
            .insert(name.to_string(), payload(rv, form));
    }

    pub fn lb(&self, kind: ResourceKind, name: &str) -> Option<Value> {
        self.state().lbs.get(&(kind, name.to_string())).cloned()
    }

    pub fn pool(&self, name: &str) -> Option<Value> {
        self.state().pools.get(name).cloned()
    }

    pub fn fail_push(&self, name: &str) {
        self.fail_push_after(name, 0);
    }

    /// Accept `successes` more pushes of `name`, then fail every later one.
    pub fn fail_push_after(&self, name: &str, successes: usize) {
        self.state()
            .failing_pushes
            .insert(name.to_string(), successes);
    }

    pub fn fail_fetch(&self, name: &str) {
        self.state().failing_fetches.push(name.to_string());
    }

    pub fn fail_list(&self) {
        self.state().failing_list = true;
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing_pushes.clear();
        state.failing_fetches.clear();
        state.failing_list = false;
    }

    /// Number of trait calls made so far.
    pub fn calls(&self) -> usize {
        self.state().calls
    }

    /// Names pushed so far, in order, including failed attempts.
    pub fn pushed(&self) -> Vec<String> {
        self.state().pushed.clone()
    }

    fn read(
        &self,
        collection: &str,
        name: &str,
        pick: fn(&State, &str) -> Option<Value>,
    ) -> Result<Value, RemoteError> {
        let resource = format!("{}/{}", collection, name);
        let mut state = self.state();
        state.calls += 1;
        if state.failing_fetches.iter().any(|n| n == name) {
            return Err(RemoteError::new(resource, Some(503), "unavailable"));
        }
        pick(&*state, name).ok_or_else(|| RemoteError::new(resource, Some(404), "not found"))
    }

    fn write(
        &self,
        collection: &str,
        name: &str,
        form: &Value,
        slot: fn(&mut State) -> &mut HashMap<String, Value>,
    ) -> Result<(), RemoteError> {
        let mut state = self.state();
        if !state.accept_push(name) {
            let resource = format!("{}/{}", collection, name);
            return Err(RemoteError::new(resource, Some(403), "forbidden"));
        }
        let map = slot(&mut *state);
        let next = map.get(name).map(resource_version).unwrap_or(0) + 1;
        map.insert(name.to_string(), payload(next, form.clone()));
        Ok(())
    }
}

#[async_trait]
impl RemoteConfig for FakeRemote {
    async fn list(&self, kind: ResourceKind) -> Result<Vec<String>, RemoteError> {
        let mut state = self.state();
        state.calls += 1;
        if state.failing_list {
            return Err(RemoteError::new(kind.spec().collection, None, "connection refused"));
        }
        let mut names: Vec<String> = state
            .lbs
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn fetch(&self, kind: ResourceKind, name: &str) -> Result<Value, RemoteError> {
        let mut state = self.state();
        state.calls += 1;
        if state.failing_fetches.iter().any(|n| n == name) {
            return Err(RemoteError::new(name, Some(503), "unavailable"));
        }
        state
            .lbs
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| RemoteError::new(name, Some(404), "not found"))
    }

    async fn fetch_origin_pool(&self, name: &str) -> Result<Value, RemoteError> {
        self.read("origin_pools", name, |s, n| s.pools.get(n).cloned())
    }

    async fn fetch_firewall(&self, name: &str) -> Result<Value, RemoteError> {
        self.read("app_firewalls", name, |s, n| s.firewalls.get(n).cloned())
    }

    async fn push(&self, kind: ResourceKind, name: &str, form: &Value) -> Result<(), RemoteError> {
        let mut state = self.state();
        if !state.accept_push(name) {
            return Err(RemoteError::new(name, Some(403), "forbidden"));
        }
        let key = (kind, name.to_string());
        let next = state.lbs.get(&key).map(resource_version).unwrap_or(0) + 1;
        state.lbs.insert(key, payload(next, form.clone()));
        Ok(())
    }

    async fn push_origin_pool(&self, form: &Value) -> Result<(), RemoteError> {
        let name = form_name(form).unwrap_or_default().to_string();
        self.write("origin_pools", &name, form, |s| &mut s.pools)
    }

    async fn push_firewall(&self, form: &Value) -> Result<(), RemoteError> {
        let name = form_name(form).unwrap_or_default().to_string();
        self.write("app_firewalls", &name, form, |s| &mut s.firewalls)
    }
}

/// `replace_form` of a payload held by the fake, for assertions.
pub fn form_of(payload: &Value) -> Value {
    replace_form(payload).cloned().unwrap_or(Value::Null)
}
