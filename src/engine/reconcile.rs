//! Snapshot reconciliation.
//!
//! Live load balancers are classified as NEW (no pointer yet) or EXISTING.
//! An EXISTING app only gets a new revision when its load balancer, firewall
//! or origin pool set moved ahead of the stored revision; the parts that did
//! not move are copied forward from the stored revision unchanged.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::Engine;
use crate::errors::AppError;
use crate::models::payload::{
    attached_firewall, payload_name, referenced_pools, resource_version,
};
use crate::models::{
    canonical_app_name, snapshot_event_type, AppKey, AuditEvent, Environment, Identity,
    KindReport, LivePayload, ResourceKind, Revision, RevisionDraft, SkippedApp, SnapshotEntry,
    SnapshotReport, SYSTEM_REMARKS,
};
use crate::remote::RemoteError;

/// Drafts computed for one kind and environment, not yet persisted.
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub new_revisions: Vec<RevisionDraft>,
    pub updated_revisions: Vec<RevisionDraft>,
    pub skipped: Vec<SkippedApp>,
}

impl ReconcileOutcome {
    fn skip(&mut self, name: &str, environment: Environment, reason: String) {
        tracing::warn!("Skipping {} ({}): {}", name, environment, reason);
        self.skipped.push(SkippedApp {
            name: name.to_string(),
            environment,
            reason,
        });
    }
}

/// Which parts of an existing app moved ahead of its stored revision.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Staleness {
    pub lb: bool,
    pub waf: bool,
    pub origin: bool,
}

impl Staleness {
    pub fn compute(prior: &Revision, live: &LivePayload) -> Self {
        Self {
            lb: prior.lb_resource_version < live.lb_resource_version(),
            waf: live
                .waf
                .as_ref()
                .is_some_and(|waf| firewall_stale(prior, waf)),
            origin: origins_stale(&prior.origin_config, &live.origins),
        }
    }

    pub fn any(&self) -> bool {
        self.lb || self.waf || self.origin
    }
}

fn firewall_stale(prior: &Revision, live: &Value) -> bool {
    match &prior.waf_config {
        None => true,
        Some(stored) if payload_name(stored) != payload_name(live) => true,
        Some(_) => prior.waf_resource_version < resource_version(live),
    }
}

/// Pools are matched by name. Any added or removed pool, or a pool whose live
/// `resource_version` is ahead of the stored one, makes the set stale.
fn origins_stale(stored: &[Value], live: &[Value]) -> bool {
    if live.is_empty() {
        return false;
    }
    if stored.is_empty() {
        return true;
    }

    let stored: HashMap<&str, i64> = stored
        .iter()
        .filter_map(|pool| payload_name(pool).map(|name| (name, resource_version(pool))))
        .collect();
    if stored.len() != live.len() {
        return true;
    }

    live.iter()
        .any(|pool| match payload_name(pool).and_then(|name| stored.get(name)) {
            Some(&stored_version) => stored_version < resource_version(pool),
            None => true,
        })
}

fn remarks_for(actor: &Identity) -> Option<String> {
    actor.is_system().then(|| SYSTEM_REMARKS.to_string())
}

/// Version 1 of an app seen for the first time.
fn new_draft(
    key: AppKey,
    original_name: &str,
    live: LivePayload,
    actor: &Identity,
    at: DateTime<Utc>,
) -> RevisionDraft {
    RevisionDraft {
        lb_resource_version: live.lb_resource_version(),
        waf_resource_version: live.waf_resource_version(),
        key,
        original_name: original_name.to_string(),
        version: 1,
        previous_version: None,
        lb_config: live.lb,
        waf_config: live.waf,
        origin_config: live.origins,
        generated_by: actor.username.clone(),
        remarks: remarks_for(actor),
        created_at: at,
    }
}

/// Next revision of an existing app: stale parts from `live`, the rest from `prior`.
///
/// `version` follows the highest stored version rather than `prior`, which
/// may be an older revision the app was rolled back to.
fn updated_draft(
    key: AppKey,
    original_name: &str,
    version: i64,
    prior: Revision,
    live: LivePayload,
    staleness: Staleness,
    actor: &Identity,
) -> RevisionDraft {
    let live_lb_version = live.lb_resource_version();
    let live_waf_version = live.waf_resource_version();
    let LivePayload { lb, origins, waf } = live;

    let (lb_config, lb_resource_version) = if staleness.lb {
        (lb, live_lb_version)
    } else {
        (prior.lb_config, prior.lb_resource_version)
    };
    let (waf_config, waf_resource_version) = if staleness.waf {
        (waf, live_waf_version)
    } else {
        (prior.waf_config, prior.waf_resource_version)
    };
    let origin_config = if staleness.origin {
        origins
    } else {
        prior.origin_config
    };

    RevisionDraft {
        key,
        original_name: original_name.to_string(),
        version,
        previous_version: Some(prior.version),
        lb_config,
        waf_config,
        origin_config,
        lb_resource_version,
        waf_resource_version,
        generated_by: actor.username.clone(),
        remarks: remarks_for(actor),
        created_at: Utc::now(),
    }
}

fn snapshot_event(draft: &RevisionDraft, actor: &Identity) -> AuditEvent {
    let kind = draft.key.kind;
    let article = if draft.previous_version.is_none() {
        "a new"
    } else {
        "an existing"
    };
    AuditEvent {
        event_type: snapshot_event_type(kind),
        created_at: draft.created_at,
        actor: actor.username.clone(),
        description: format!(
            "{} created a new snapshot for {} {} {} on environment {}",
            actor.username,
            article,
            kind.spec().label,
            draft.key.app_name,
            draft.key.environment
        ),
        environment: Some(draft.key.environment),
        previous_version: draft.previous_version,
        target_version: Some(draft.version),
    }
}

impl Engine {
    /// Current state of a load balancer, its referenced pools and its firewall.
    pub(crate) async fn fetch_live(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Result<LivePayload, RemoteError> {
        let spec = kind.spec();
        let lb = self.remote.fetch(kind, name).await?;

        let mut seen = HashSet::new();
        let mut origins = Vec::new();
        for pool in referenced_pools(spec, &lb) {
            if seen.insert(pool.clone()) {
                origins.push(self.remote.fetch_origin_pool(&pool).await?);
            }
        }

        let waf = match attached_firewall(spec, &lb) {
            Some(firewall) => Some(self.remote.fetch_firewall(&firewall).await?),
            None => None,
        };

        Ok(LivePayload { lb, origins, waf })
    }

    /// Compute the revisions one environment of one kind needs.
    ///
    /// `live_names` is every live name of the kind; names of the other
    /// environment are ignored. Only store errors abort; a failed fetch or a
    /// dangling pointer skips that app alone.
    pub async fn reconcile(
        &self,
        kind: ResourceKind,
        environment: Environment,
        live_names: &[String],
        actor: &Identity,
    ) -> Result<ReconcileOutcome, AppError> {
        let mut outcome = ReconcileOutcome::default();

        for name in live_names
            .iter()
            .filter(|name| Environment::of_name(name) == environment)
        {
            let key = AppKey::new(kind, canonical_app_name(name), environment);

            let Some(pointer) = self.repo.get_pointer(&key).await? else {
                match self.fetch_live(kind, name).await {
                    Ok(live) => {
                        let draft = new_draft(key, name, live, actor, Utc::now());
                        outcome.new_revisions.push(draft);
                    }
                    Err(err) => outcome.skip(name, environment, format!("fetch failed: {}", err)),
                }
                continue;
            };

            let Some(prior) = self
                .repo
                .get_revision(&key, pointer.current_version)
                .await?
            else {
                tracing::error!(
                    "Store corruption: {} points at missing version {}",
                    key,
                    pointer.current_version
                );
                outcome.skip(
                    name,
                    environment,
                    format!("stored version {} is missing", pointer.current_version),
                );
                continue;
            };

            let live = match self.fetch_live(kind, name).await {
                Ok(live) => live,
                Err(err) => {
                    outcome.skip(name, environment, format!("fetch failed: {}", err));
                    continue;
                }
            };

            let staleness = Staleness::compute(&prior, &live);
            tracing::debug!(
                "{} v{}: lb_stale={} waf_stale={} origin_stale={}",
                key,
                prior.version,
                staleness.lb,
                staleness.waf,
                staleness.origin
            );
            if staleness.any() {
                let version = self.repo.max_version(&key).await? + 1;
                let draft = updated_draft(key, name, version, prior, live, staleness, actor);
                outcome.updated_revisions.push(draft);
            }
        }

        Ok(outcome)
    }

    /// Persist an outcome, one app per transaction.
    ///
    /// A pointer that moved since the outcome was computed is reported as
    /// skipped rather than overwritten.
    async fn commit(
        &self,
        outcome: ReconcileOutcome,
        actor: &Identity,
        report: &mut KindReport,
    ) -> Result<(), AppError> {
        report.skipped.extend(outcome.skipped);

        let drafts = outcome
            .new_revisions
            .into_iter()
            .chain(outcome.updated_revisions);

        for draft in drafts {
            let _guard = self.locks.lock(&draft.key).await;
            let event = snapshot_event(&draft, actor);
            let is_new = draft.previous_version.is_none();

            let written = if is_new {
                self.repo.create_app(&draft, &event).await.map(|_| ())
            } else {
                self.repo.append_revision(&draft, &event).await
            };

            let environment = draft.key.environment;
            match written {
                Ok(()) => {
                    let entry = SnapshotEntry {
                        name: draft.key.app_name.clone(),
                        new_version: draft.version,
                        previous_version: draft.previous_version,
                    };
                    if is_new {
                        report.new_for(environment).push(entry);
                    } else {
                        report.updated_for(environment).push(entry);
                    }
                }
                Err(AppError::Conflict { message, .. }) => {
                    tracing::warn!("Skipping {}: {}", draft.key, message);
                    report.skipped.push(SkippedApp {
                        name: draft.original_name.clone(),
                        environment,
                        reason: message,
                    });
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// List, reconcile and commit every requested kind, production first.
    pub async fn snapshot(
        &self,
        kinds: &[ResourceKind],
        actor: &Identity,
    ) -> Result<SnapshotReport, AppError> {
        let mut reports = Vec::with_capacity(kinds.len());

        for &kind in kinds {
            let names = self.remote.list(kind).await.map_err(|err| {
                AppError::RemoteUnavailable(format!("Failed to list {}: {}", kind, err))
            })?;
            tracing::info!(
                "Snapshot of {} {} load balancers by {}",
                names.len(),
                kind,
                actor.username
            );

            let mut report = KindReport::default();
            for environment in Environment::ALL {
                let outcome = self.reconcile(kind, environment, &names, actor).await?;
                self.commit(outcome, actor, &mut report).await?;
            }
            reports.push((kind, report));
        }

        Ok(SnapshotReport::from_kinds(reports))
    }
}
