//! Rollback: push a stored revision back to the control plane.
//!
//! Pushes happen in a fixed order (load balancer, origin pools, firewall).
//! If a later push fails, whatever was already replaced is re-pushed from the
//! revision the pointer currently references. The store is only touched once
//! every push succeeded.

use std::fmt;

use serde_json::Value;

use super::Engine;
use crate::errors::AppError;
use crate::models::payload::{form_name, payload_name, replace_form};
use crate::models::{
    rollback_event_type, AppKey, AuditEvent, Environment, Identity, ResourceKind, Revision,
    RevisionPayload, RollbackOutcome, VersionPointer,
};

/// Where a rollback attempt is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackPhase {
    Validating,
    Pushing,
    ReconcilingStore,
    Done,
    Failed,
}

impl fmt::Display for RollbackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RollbackPhase::Validating => "validating",
            RollbackPhase::Pushing => "pushing",
            RollbackPhase::ReconcilingStore => "reconciling-store",
            RollbackPhase::Done => "done",
            RollbackPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct Attempt<'a> {
    key: &'a AppKey,
    phase: RollbackPhase,
}

impl<'a> Attempt<'a> {
    fn start(key: &'a AppKey, target_version: i64) -> Self {
        tracing::info!("Rollback of {} to version {}: validating", key, target_version);
        Self {
            key,
            phase: RollbackPhase::Validating,
        }
    }

    fn enter(&mut self, phase: RollbackPhase) {
        tracing::info!("Rollback of {}: {} -> {}", self.key, self.phase, phase);
        self.phase = phase;
    }

    fn fail(&mut self, err: AppError) -> AppError {
        self.enter(RollbackPhase::Failed);
        err
    }
}

/// Replace forms of a revision, in push order.
struct PushPlan<'a> {
    lb: &'a Value,
    pools: Vec<Value>,
    firewall: Option<&'a Value>,
}

impl<'a> PushPlan<'a> {
    fn from_revision(revision: &'a Revision) -> Result<Self, AppError> {
        let lb = replace_form(&revision.lb_config).ok_or_else(|| {
            AppError::StoreCorruption(format!(
                "Version {} of {} has no load balancer replace_form",
                revision.version, revision.original_name
            ))
        })?;

        Ok(Self {
            lb,
            pools: revision
                .origin_config
                .iter()
                .filter_map(replace_form)
                .cloned()
                .collect(),
            firewall: revision.waf_config.as_ref().and_then(replace_form),
        })
    }
}

struct Validated {
    pointer: VersionPointer,
    target: Revision,
    /// Revision the pointer references, used to undo partial pushes
    current: Option<Revision>,
}

impl Engine {
    /// Make `target_version` the live configuration of an app again.
    ///
    /// Checked in order: the app exists (`NotFound`), the target is not the
    /// current version (`NoOp`), the target revision exists (`NotFound`).
    /// None of these checks call the control plane.
    pub async fn rollback(
        &self,
        kind: ResourceKind,
        app_name: &str,
        environment: Environment,
        target_version: i64,
        actor: &Identity,
    ) -> Result<RollbackOutcome, AppError> {
        let key = AppKey::new(kind, app_name, environment);
        let _guard = self.locks.lock(&key).await;
        let mut attempt = Attempt::start(&key, target_version);

        let validated = match self.validate(&key, target_version).await {
            Ok(validated) => validated,
            Err(err) => return Err(attempt.fail(err)),
        };
        let plan = match PushPlan::from_revision(&validated.target) {
            Ok(plan) => plan,
            Err(err) => return Err(attempt.fail(err)),
        };
        let pointer = &validated.pointer;

        attempt.enter(RollbackPhase::Pushing);
        if let Err(err) = self
            .push_plan(kind, &pointer.original_name, &plan, validated.current.as_ref())
            .await
        {
            return Err(attempt.fail(err));
        }

        attempt.enter(RollbackPhase::ReconcilingStore);
        if let Err(err) = self.record_rollback(&key, pointer, target_version, actor).await {
            return Err(attempt.fail(err));
        }

        attempt.enter(RollbackPhase::Done);
        Ok(RollbackOutcome {
            app_name: key.app_name.clone(),
            environment,
            previous_version: pointer.current_version,
            current_version: target_version,
        })
    }

    async fn validate(&self, key: &AppKey, target_version: i64) -> Result<Validated, AppError> {
        let pointer = self
            .repo
            .get_pointer(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} is not tracked", key)))?;

        if pointer.current_version == target_version {
            return Err(AppError::NoOp(format!(
                "{} is already running version {}",
                key, target_version
            )));
        }

        let target = self
            .repo
            .get_revision(key, target_version)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} has no version {}", key, target_version)))?;

        let current = self.repo.get_revision(key, pointer.current_version).await?;
        if current.is_none() {
            tracing::warn!(
                "{} points at missing version {}; a failed push cannot be reverted",
                key,
                pointer.current_version
            );
        }

        Ok(Validated {
            pointer,
            target,
            current,
        })
    }

    async fn push_plan(
        &self,
        kind: ResourceKind,
        name: &str,
        plan: &PushPlan<'_>,
        current: Option<&Revision>,
    ) -> Result<(), AppError> {
        if let Err(err) = self.remote.push(kind, name, plan.lb).await {
            return Err(AppError::RemoteRejected {
                message: format!("Failed to push load balancer {}", name),
                errors: vec![err.to_string()],
            });
        }

        // Every pool is attempted; only the ones that went through need reverting.
        let mut pushed = Vec::with_capacity(plan.pools.len());
        let mut errors = Vec::new();
        for pool in &plan.pools {
            match self.remote.push_origin_pool(pool).await {
                Ok(()) => pushed.push(pool.clone()),
                Err(err) => errors.push(err.to_string()),
            }
        }
        if !errors.is_empty() {
            let failure = format!("Failed to push origin pools of {}", name);
            return Err(self.compensate(kind, name, current, &pushed, failure, errors).await);
        }

        if let Some(firewall) = plan.firewall {
            if let Err(err) = self.remote.push_firewall(firewall).await {
                let failure = format!("Failed to push app firewall of {}", name);
                let errors = vec![err.to_string()];
                return Err(self.compensate(kind, name, current, &plan.pools, failure, errors).await);
            }
        }

        Ok(())
    }

    /// Re-push the current revision's load balancer and every pool in
    /// `pushed_pools` that exists in that revision.
    async fn compensate(
        &self,
        kind: ResourceKind,
        name: &str,
        current: Option<&Revision>,
        pushed_pools: &[Value],
        failure: String,
        errors: Vec<String>,
    ) -> AppError {
        let mut compensation_errors = Vec::new();

        match current {
            None => compensation_errors.push("current revision is missing".to_string()),
            Some(current) => {
                match replace_form(&current.lb_config) {
                    Some(form) => {
                        if let Err(err) = self.remote.push(kind, name, form).await {
                            compensation_errors.push(err.to_string());
                        }
                    }
                    None => compensation_errors.push(format!(
                        "version {} has no load balancer replace_form",
                        current.version
                    )),
                }

                let restore: Vec<Value> = pushed_pools
                    .iter()
                    .filter_map(form_name)
                    .filter_map(|pool| {
                        current
                            .origin_config
                            .iter()
                            .find(|stored| payload_name(stored) == Some(pool))
                    })
                    .filter_map(replace_form)
                    .cloned()
                    .collect();
                let failed = self.remote.push_origin_pools(&restore).await;
                compensation_errors.extend(failed.iter().map(ToString::to_string));
            }
        }

        if compensation_errors.is_empty() {
            tracing::warn!("{}; already pushed changes were reverted", failure);
            AppError::RemoteRejected {
                message: format!("{}; already pushed changes were reverted", failure),
                errors,
            }
        } else {
            tracing::error!(
                "{} and reverting failed: {}",
                failure,
                compensation_errors.join("; ")
            );
            AppError::PartialRollbackFailure {
                message: format!("{}: {}", failure, errors.join("; ")),
                compensation_errors,
            }
        }
    }

    /// Re-read the pushed resources, rewrite the target revision with them and
    /// move the pointer.
    async fn record_rollback(
        &self,
        key: &AppKey,
        pointer: &VersionPointer,
        target_version: i64,
        actor: &Identity,
    ) -> Result<(), AppError> {
        let live = self
            .fetch_live(key.kind, &pointer.original_name)
            .await
            .map_err(|err| inconsistent(key, format!("re-read failed: {}", err)))?;

        let payload = RevisionPayload {
            lb_resource_version: live.lb_resource_version(),
            waf_resource_version: live.waf_resource_version(),
            lb_config: live.lb,
            waf_config: live.waf,
            origin_config: live.origins,
        };

        let event = AuditEvent {
            event_type: rollback_event_type(key.kind),
            created_at: chrono::Utc::now(),
            actor: actor.username.clone(),
            description: format!(
                "{} replaced {} {} on environment {} from version {} to version {}",
                actor.username,
                key.kind.spec().label,
                key.app_name,
                key.environment,
                pointer.current_version,
                target_version
            ),
            environment: Some(key.environment),
            previous_version: Some(pointer.current_version),
            target_version: Some(target_version),
        };

        self.repo
            .complete_rollback(key, pointer.current_version, target_version, &payload, &event)
            .await
            .map_err(|err| inconsistent(key, err.to_string()))
    }
}

fn inconsistent(key: &AppKey, detail: String) -> AppError {
    tracing::error!(
        "{} was rolled back remotely but the store was not updated: {}",
        key,
        detail
    );
    AppError::StoreInconsistent(format!(
        "{} was changed remotely but the store could not be updated: {}",
        key, detail
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::engine;
    use crate::models::payload::resource_version;
    use crate::models::Role;
    use crate::remote::fake::{form_of, lb_form, named_form, FakeRemote};
    use std::sync::Arc;

    const LB: &str = "checkout-staging";

    fn key() -> AppKey {
        AppKey::new(ResourceKind::HttpLb, "checkout", Environment::Staging)
    }

    fn alice() -> Identity {
        Identity::new("alice", Role::Operator)
    }

    /// checkout-staging at version 2; version 1 had older LB and pool bodies.
    async fn two_versions(engine: &Engine, remote: &FakeRemote) {
        remote.set_lb(
            ResourceKind::HttpLb,
            LB,
            5,
            lb_form(LB, &["pool-a"], Some("waf-1"), "v1"),
        );
        remote.set_pool("pool-a", 2, named_form("pool-a", "a1"));
        remote.set_firewall("waf-1", 4, named_form("waf-1", "strict"));
        engine
            .snapshot(&[ResourceKind::HttpLb], &Identity::system())
            .await
            .unwrap();

        remote.set_lb(
            ResourceKind::HttpLb,
            LB,
            6,
            lb_form(LB, &["pool-a"], Some("waf-1"), "v2"),
        );
        remote.set_pool("pool-a", 3, named_form("pool-a", "a2"));
        engine
            .snapshot(&[ResourceKind::HttpLb], &Identity::system())
            .await
            .unwrap();
    }

    async fn setup() -> (Arc<Engine>, Arc<FakeRemote>, tempfile::TempDir) {
        let (engine, remote, dir) = engine().await;
        two_versions(&engine, &remote).await;
        (engine, remote, dir)
    }

    async fn current_version(engine: &Engine) -> i64 {
        engine
            .repository()
            .get_pointer(&key())
            .await
            .unwrap()
            .unwrap()
            .current_version
    }

    #[tokio::test]
    async fn test_rollback_to_current_version_is_noop_without_remote_calls() {
        let (engine, remote, _dir) = setup().await;
        let calls = remote.calls();

        let err = engine
            .rollback(ResourceKind::HttpLb, "checkout", Environment::Staging, 2, &alice())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::NoOp(_)));
        assert_eq!(remote.calls(), calls);
    }

    #[tokio::test]
    async fn test_unknown_app_or_version_is_not_found() {
        let (engine, remote, _dir) = setup().await;
        let calls = remote.calls();

        let err = engine
            .rollback(ResourceKind::HttpLb, "nope", Environment::Staging, 1, &alice())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        // Tracked in staging only.
        let err = engine
            .rollback(ResourceKind::HttpLb, "checkout", Environment::Production, 1, &alice())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        let err = engine
            .rollback(ResourceKind::HttpLb, "checkout", Environment::Staging, 9, &alice())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        assert_eq!(remote.calls(), calls);
    }

    #[tokio::test]
    async fn test_rollback_restores_payload_and_resyncs_revision() {
        let (engine, remote, _dir) = setup().await;
        let repo = engine.repository();
        let v1 = repo.get_revision(&key(), 1).await.unwrap().unwrap();

        let outcome = engine
            .rollback(ResourceKind::HttpLb, "checkout", Environment::Staging, 1, &alice())
            .await
            .unwrap();
        assert_eq!(outcome.previous_version, 2);
        assert_eq!(outcome.current_version, 1);

        let live_lb = remote.lb(ResourceKind::HttpLb, LB).unwrap();
        assert_eq!(form_of(&live_lb), form_of(&v1.lb_config));
        assert_eq!(form_of(&remote.pool("pool-a").unwrap()), named_form("pool-a", "a1"));
        assert_eq!(remote.pushed(), vec![LB, "pool-a", "waf-1"]);

        // Version 1 now carries the counters bumped by the pushes.
        let rewritten = repo.get_revision(&key(), 1).await.unwrap().unwrap();
        assert_eq!(rewritten.lb_resource_version, 7);
        assert_eq!(rewritten.waf_resource_version, 5);
        assert_eq!(resource_version(&rewritten.origin_config[0]), 4);
        assert_eq!(form_of(&rewritten.lb_config), form_of(&v1.lb_config));
        assert_eq!(current_version(&engine).await, 1);
        assert_eq!(
            repo.event_types().await.unwrap().last().map(String::as_str),
            Some("HTTP_ROLLBACK")
        );

        // Rolling back to the same version again is a no-op.
        let err = engine
            .rollback(ResourceKind::HttpLb, "checkout", Environment::Staging, 1, &alice())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NoOp(_)));

        // The resynced counters keep the next snapshot quiet.
        let report = engine
            .snapshot(&[ResourceKind::HttpLb], &Identity::system())
            .await
            .unwrap();
        assert_eq!(report.result, "No updates found");
    }

    #[tokio::test]
    async fn test_load_balancer_push_failure_leaves_everything_untouched() {
        let (engine, remote, _dir) = setup().await;
        remote.fail_push(LB);

        let err = engine
            .rollback(ResourceKind::HttpLb, "checkout", Environment::Staging, 1, &alice())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::RemoteRejected { .. }));
        assert_eq!(remote.pushed(), vec![LB]);
        assert_eq!(current_version(&engine).await, 2);
    }

    #[tokio::test]
    async fn test_firewall_failure_reverts_pushed_resources() {
        let (engine, remote, _dir) = setup().await;
        let v2 = engine
            .repository()
            .get_revision(&key(), 2)
            .await
            .unwrap()
            .unwrap();
        remote.fail_push("waf-1");

        let err = engine
            .rollback(ResourceKind::HttpLb, "checkout", Environment::Staging, 1, &alice())
            .await
            .unwrap_err();

        match err {
            AppError::RemoteRejected { errors, .. } => assert_eq!(errors.len(), 1),
            other => panic!("expected RemoteRejected, got {:?}", other),
        }
        assert_eq!(remote.pushed(), vec![LB, "pool-a", "waf-1", LB, "pool-a"]);
        let live_lb = remote.lb(ResourceKind::HttpLb, LB).unwrap();
        assert_eq!(form_of(&live_lb), form_of(&v2.lb_config));
        assert_eq!(form_of(&remote.pool("pool-a").unwrap()), named_form("pool-a", "a2"));

        assert_eq!(current_version(&engine).await, 2);
        let v1 = engine
            .repository()
            .get_revision(&key(), 1)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(v1.lb_resource_version, 5);
    }

    #[tokio::test]
    async fn test_pool_failure_reverts_only_what_changed() {
        let (engine, remote, _dir) = setup().await;
        remote.fail_push("pool-a");

        let err = engine
            .rollback(ResourceKind::HttpLb, "checkout", Environment::Staging, 1, &alice())
            .await
            .unwrap_err();

        match err {
            AppError::RemoteRejected { errors, .. } => assert_eq!(errors.len(), 1),
            other => panic!("expected RemoteRejected, got {:?}", other),
        }
        // The rejected pool was never changed, so only the LB is re-pushed.
        assert_eq!(remote.pushed(), vec![LB, "pool-a", LB]);
        assert_eq!(form_of(&remote.pool("pool-a").unwrap()), named_form("pool-a", "a2"));
        let live_lb = remote.lb(ResourceKind::HttpLb, LB).unwrap();
        assert_eq!(live_lb["replace_form"]["spec"]["domains"][0], "v2.example.com");
        assert_eq!(current_version(&engine).await, 2);
    }

    #[tokio::test]
    async fn test_failed_revert_is_partial_failure() {
        let (engine, remote, _dir) = setup().await;
        // The forward LB push goes through, the revert of it does not.
        remote.fail_push_after(LB, 1);
        remote.fail_push("waf-1");

        let err = engine
            .rollback(ResourceKind::HttpLb, "checkout", Environment::Staging, 1, &alice())
            .await
            .unwrap_err();

        match err {
            AppError::PartialRollbackFailure {
                message,
                compensation_errors,
            } => {
                assert!(message.contains("waf-1"));
                assert_eq!(compensation_errors.len(), 1);
                assert!(compensation_errors[0].contains(LB));
            }
            other => panic!("expected PartialRollbackFailure, got {:?}", other),
        }
        assert_eq!(remote.pushed(), vec![LB, "pool-a", "waf-1", LB, "pool-a"]);
        // The pool revert still went through.
        assert_eq!(form_of(&remote.pool("pool-a").unwrap()), named_form("pool-a", "a2"));
        assert_eq!(current_version(&engine).await, 2);
        assert!(!engine
            .repository()
            .event_types()
            .await
            .unwrap()
            .iter()
            .any(|t| t == "HTTP_ROLLBACK"));
    }
}
