//! Reconciliation and rollback over the revision store and the control plane.
//!
//! The engine owns no globals: the store and remote handles are injected by
//! `main`, and mutual exclusion is per tracked app.

mod reconcile;
mod rollback;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::Repository;
use crate::models::AppKey;
use crate::remote::RemoteConfig;

/// One async mutex per `(kind, app, environment)`.
///
/// Rollback holds an app's lock for its whole procedure; a snapshot commit
/// holds it while writing that app. Different apps never wait on each other.
/// An entry lives only while someone holds or waits for it.
#[derive(Default)]
pub struct KeyLocks {
    locks: SyncMutex<HashMap<AppKey, Arc<Mutex<()>>>>,
}

/// Held lock of one app; releasing it drops the map entry when unused.
pub struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: AppKey,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyLocks {
    pub async fn lock(&self, key: &AppKey) -> KeyGuard<'_> {
        let lock = self.entries().entry(key.clone()).or_default().clone();
        KeyGuard {
            locks: self,
            key: key.clone(),
            guard: Some(lock.lock_owned().await),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<AppKey, Arc<Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries().len()
    }
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut entries = self.locks.entries();
        // Waiters clone the Arc under this map lock, so the count is exact.
        if entries
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            entries.remove(&self.key);
        }
    }
}

/// Reconciliation and rollback engine.
pub struct Engine {
    repo: Repository,
    remote: Arc<dyn RemoteConfig>,
    locks: KeyLocks,
}

impl Engine {
    pub fn new(repo: Repository, remote: Arc<dyn RemoteConfig>) -> Self {
        Self {
            repo,
            remote,
            locks: KeyLocks::default(),
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::db::init_database;
    use crate::remote::fake::FakeRemote;
    use tempfile::TempDir;

    /// An engine over a fresh temp-dir database and an empty fake control plane.
    pub async fn engine() -> (Arc<Engine>, Arc<FakeRemote>, TempDir) {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("test.sqlite")).await.unwrap();
        let remote = Arc::new(FakeRemote::new());
        let engine = Engine::new(Repository::new(pool), remote.clone());
        (Arc::new(engine), remote, dir)
    }
}
