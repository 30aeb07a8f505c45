//! Periodic snapshot trigger.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::engine::Engine;
use crate::models::{Identity, ResourceKind, SnapshotReport};

/// Snapshot every kind each `period`, as the system actor. The first run
/// happens one period after start.
pub fn spawn(engine: Arc<Engine>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            run_once(&engine).await;
        }
    })
}

/// One scheduled snapshot. Errors are logged; the next tick tries again.
pub async fn run_once(engine: &Engine) -> Option<SnapshotReport> {
    match engine.snapshot(&ResourceKind::ALL, &Identity::system()).await {
        Ok(report) => {
            tracing::info!("Scheduled snapshot finished: {}", report.result);
            Some(report)
        }
        Err(e) => {
            tracing::warn!("Scheduled snapshot failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::engine;
    use crate::models::{AppKey, Environment, SYSTEM_REMARKS, SYSTEM_USERNAME};
    use crate::remote::fake::lb_form;

    #[tokio::test]
    async fn test_run_once_snapshots_as_system() {
        let (engine, remote, _dir) = engine().await;
        remote.set_lb(ResourceKind::CdnLb, "media", 2, lb_form("media", &[], None, "m"));

        let report = run_once(&engine).await.unwrap();
        assert_eq!(report.cdn_lb.unwrap().new_production.len(), 1);

        let key = AppKey::new(ResourceKind::CdnLb, "media", Environment::Production);
        let revision = engine.repository().get_revision(&key, 1).await.unwrap().unwrap();
        assert_eq!(revision.generated_by, SYSTEM_USERNAME);
        assert_eq!(revision.remarks.as_deref(), Some(SYSTEM_REMARKS));
    }

    #[tokio::test]
    async fn test_run_once_survives_remote_outage() {
        let (engine, remote, _dir) = engine().await;
        remote.fail_list();
        assert!(run_once(&engine).await.is_none());

        remote.clear_failures();
        assert!(run_once(&engine).await.is_some());
    }

    #[tokio::test]
    async fn test_spawned_scheduler_ticks() {
        let (engine, remote, _dir) = engine().await;
        remote.set_lb(ResourceKind::HttpLb, "shop", 1, lb_form("shop", &[], None, "s"));

        let handle = spawn(engine.clone(), Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        let key = AppKey::new(ResourceKind::HttpLb, "shop", Environment::Production);
        assert!(engine.repository().get_pointer(&key).await.unwrap().is_some());
    }
}
