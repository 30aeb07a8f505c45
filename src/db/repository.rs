//! Revision store: version pointers, revisions and audit events.
//!
//! Every multi-row write runs in a transaction so that an app's pointer and
//! revisions never disagree. Pointer moves are compare-and-swap on
//! `current_version`.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    derive_uid, AppKey, AuditEvent, Environment, ResourceKind, Revision, RevisionDraft,
    RevisionPayload, VersionPointer,
};

const POINTER_COLUMNS: &str =
    "uid, kind, app_name, original_name, environment, current_version, created_at";

const REVISION_COLUMNS: &str = "uid, kind, app_name, original_name, environment, version, previous_version, generated_by, created_at, lb_resource_version, waf_resource_version, lb_config, waf_config, origin_config, remarks";

/// Database repository for all revision data.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== POINTERS ====================

    /// Get the version pointer of an app.
    pub async fn get_pointer(&self, key: &AppKey) -> Result<Option<VersionPointer>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM version_pointers WHERE kind = ? AND app_name = ? AND environment = ?",
            POINTER_COLUMNS
        ))
        .bind(key.kind.as_str())
        .bind(&key.app_name)
        .bind(key.environment.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(pointer_from_row).transpose()
    }

    // ==================== REVISIONS ====================

    /// Get one revision of an app.
    pub async fn get_revision(
        &self,
        key: &AppKey,
        version: i64,
    ) -> Result<Option<Revision>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM revisions WHERE kind = ? AND app_name = ? AND environment = ? AND version = ?",
            REVISION_COLUMNS
        ))
        .bind(key.kind.as_str())
        .bind(&key.app_name)
        .bind(key.environment.as_str())
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(revision_from_row).transpose()
    }

    /// Highest version stored for an app, 0 when it has none.
    ///
    /// After a rollback the pointer sits below this, so new revisions are
    /// numbered from here.
    pub async fn max_version(&self, key: &AppKey) -> Result<i64, AppError> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(version) FROM revisions WHERE kind = ? AND app_name = ? AND environment = ?",
        )
        .bind(key.kind.as_str())
        .bind(&key.app_name)
        .bind(key.environment.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(max.unwrap_or(0))
    }

    /// Create the pointer of a newly observed app together with its first revision.
    pub async fn create_app(
        &self,
        draft: &RevisionDraft,
        event: &AuditEvent,
    ) -> Result<VersionPointer, AppError> {
        let pointer = VersionPointer {
            uid: derive_uid(&draft.key, None, draft.created_at),
            kind: draft.key.kind,
            app_name: draft.key.app_name.clone(),
            original_name: draft.original_name.clone(),
            environment: draft.key.environment,
            current_version: draft.version,
            created_at: draft.created_at,
        };

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO version_pointers ({}) VALUES (?, ?, ?, ?, ?, ?, ?)",
            POINTER_COLUMNS
        ))
        .bind(&pointer.uid)
        .bind(pointer.kind.as_str())
        .bind(&pointer.app_name)
        .bind(&pointer.original_name)
        .bind(pointer.environment.as_str())
        .bind(pointer.current_version)
        .bind(pointer.created_at)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            let duplicate =
                matches!(&err, sqlx::Error::Database(db) if db.is_unique_violation());
            return Err(if duplicate {
                AppError::Conflict {
                    message: format!("{} is already tracked", draft.key),
                    current_version: 0,
                }
            } else {
                err.into()
            });
        }

        insert_revision(&mut *tx, draft).await?;
        insert_event(&mut *tx, event).await?;
        tx.commit().await?;

        Ok(pointer)
    }

    /// Append a revision and move the pointer from `previous_version` to it.
    pub async fn append_revision(
        &self,
        draft: &RevisionDraft,
        event: &AuditEvent,
    ) -> Result<(), AppError> {
        let expected = draft.previous_version.ok_or_else(|| {
            AppError::Internal(format!("{} update has no previous version", draft.key))
        })?;

        let mut tx = self.pool.begin().await?;

        // Swap first: a writer that lost the race gets a Conflict, not a
        // duplicate version.
        swap_pointer(&mut *tx, &draft.key, expected, draft.version).await?;
        insert_revision(&mut *tx, draft).await?;
        insert_event(&mut *tx, event).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Rewrite a rolled-back-to revision with freshly observed payloads and move
    /// the pointer to it.
    pub async fn complete_rollback(
        &self,
        key: &AppKey,
        expected_current: i64,
        target_version: i64,
        payload: &RevisionPayload,
        event: &AuditEvent,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE revisions SET lb_config = ?, waf_config = ?, origin_config = ?, lb_resource_version = ?, waf_resource_version = ? WHERE kind = ? AND app_name = ? AND environment = ? AND version = ?",
        )
        .bind(serde_json::to_string(&payload.lb_config)?)
        .bind(
            payload
                .waf_config
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(serde_json::to_string(&payload.origin_config)?)
        .bind(payload.lb_resource_version)
        .bind(payload.waf_resource_version)
        .bind(key.kind.as_str())
        .bind(&key.app_name)
        .bind(key.environment.as_str())
        .bind(target_version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "{} has no version {}",
                key, target_version
            )));
        }

        swap_pointer(&mut *tx, key, expected_current, target_version).await?;
        insert_event(&mut *tx, event).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Update the remarks of a revision, the only field editable after creation.
    pub async fn update_remarks(
        &self,
        key: &AppKey,
        version: i64,
        remarks: Option<&str>,
        event: &AuditEvent,
    ) -> Result<Revision, AppError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE revisions SET remarks = ? WHERE kind = ? AND app_name = ? AND environment = ? AND version = ?",
        )
        .bind(remarks)
        .bind(key.kind.as_str())
        .bind(&key.app_name)
        .bind(key.environment.as_str())
        .bind(version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{} has no version {}", key, version)));
        }

        insert_event(&mut *tx, event).await?;
        tx.commit().await?;

        self.get_revision(key, version)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} has no version {}", key, version)))
    }
}

#[cfg(test)]
impl Repository {
    /// All pointers known for a kind in one environment.
    pub async fn list_pointers(
        &self,
        kind: ResourceKind,
        environment: Environment,
    ) -> Result<Vec<VersionPointer>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM version_pointers WHERE kind = ? AND environment = ? ORDER BY app_name",
            POINTER_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(environment.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(pointer_from_row).collect()
    }

    /// Every revision of an app, oldest first.
    pub async fn list_revisions(&self, key: &AppKey) -> Result<Vec<Revision>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM revisions WHERE kind = ? AND app_name = ? AND environment = ? ORDER BY version",
            REVISION_COLUMNS
        ))
        .bind(key.kind.as_str())
        .bind(&key.app_name)
        .bind(key.environment.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(revision_from_row).collect()
    }

    /// Event types recorded so far, oldest first.
    pub async fn event_types(&self) -> Result<Vec<String>, AppError> {
        let rows = sqlx::query("SELECT event_type FROM events ORDER BY created_at, rowid")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get("event_type")).collect())
    }

    /// Drop a revision row to simulate a damaged store.
    pub async fn delete_revision(&self, key: &AppKey, version: i64) -> Result<(), AppError> {
        sqlx::query(
            "DELETE FROM revisions WHERE kind = ? AND app_name = ? AND environment = ? AND version = ?",
        )
        .bind(key.kind.as_str())
        .bind(&key.app_name)
        .bind(key.environment.as_str())
        .bind(version)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// Statements shared by the transactional writes above

async fn insert_revision(
    conn: &mut SqliteConnection,
    draft: &RevisionDraft,
) -> Result<(), AppError> {
    sqlx::query(&format!(
        "INSERT INTO revisions ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        REVISION_COLUMNS
    ))
    .bind(draft.uid())
    .bind(draft.key.kind.as_str())
    .bind(&draft.key.app_name)
    .bind(&draft.original_name)
    .bind(draft.key.environment.as_str())
    .bind(draft.version)
    .bind(draft.previous_version)
    .bind(&draft.generated_by)
    .bind(draft.created_at)
    .bind(draft.lb_resource_version)
    .bind(draft.waf_resource_version)
    .bind(serde_json::to_string(&draft.lb_config)?)
    .bind(
        draft
            .waf_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?,
    )
    .bind(serde_json::to_string(&draft.origin_config)?)
    .bind(&draft.remarks)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn swap_pointer(
    conn: &mut SqliteConnection,
    key: &AppKey,
    expected: i64,
    new_version: i64,
) -> Result<(), AppError> {
    let result = sqlx::query(
        "UPDATE version_pointers SET current_version = ? WHERE kind = ? AND app_name = ? AND environment = ? AND current_version = ?",
    )
    .bind(new_version)
    .bind(key.kind.as_str())
    .bind(&key.app_name)
    .bind(key.environment.as_str())
    .bind(expected)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        let current: Option<i64> = sqlx::query_scalar(
            "SELECT current_version FROM version_pointers WHERE kind = ? AND app_name = ? AND environment = ?",
        )
        .bind(key.kind.as_str())
        .bind(&key.app_name)
        .bind(key.environment.as_str())
        .fetch_optional(&mut *conn)
        .await?;

        return Err(AppError::Conflict {
            message: format!(
                "{} moved concurrently: expected version {}, found {:?}",
                key, expected, current
            ),
            current_version: current.unwrap_or(0),
        });
    }
    Ok(())
}

async fn insert_event(conn: &mut SqliteConnection, event: &AuditEvent) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO events (id, event_type, created_at, actor, description, environment, previous_version, target_version) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&event.event_type)
    .bind(event.created_at)
    .bind(&event.actor)
    .bind(&event.description)
    .bind(event.environment.map(|e| e.as_str()))
    .bind(event.previous_version)
    .bind(event.target_version)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// Helper functions for row conversion

fn pointer_from_row(row: &SqliteRow) -> Result<VersionPointer, AppError> {
    Ok(VersionPointer {
        uid: row.try_get("uid")?,
        kind: kind_column(row)?,
        app_name: row.try_get("app_name")?,
        original_name: row.try_get("original_name")?,
        environment: environment_column(row)?,
        current_version: row.try_get("current_version")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
    })
}

fn revision_from_row(row: &SqliteRow) -> Result<Revision, AppError> {
    let lb_config: String = row.try_get("lb_config")?;
    let waf_config: Option<String> = row.try_get("waf_config")?;
    let origin_config: String = row.try_get("origin_config")?;

    Ok(Revision {
        uid: row.try_get("uid")?,
        kind: kind_column(row)?,
        app_name: row.try_get("app_name")?,
        original_name: row.try_get("original_name")?,
        environment: environment_column(row)?,
        version: row.try_get("version")?,
        previous_version: row.try_get("previous_version")?,
        generated_by: row.try_get("generated_by")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        lb_resource_version: row.try_get("lb_resource_version")?,
        waf_resource_version: row.try_get("waf_resource_version")?,
        lb_config: serde_json::from_str(&lb_config)?,
        waf_config: waf_config
            .map(|s| serde_json::from_str::<Value>(&s))
            .transpose()?,
        origin_config: serde_json::from_str(&origin_config)?,
        remarks: row.try_get("remarks")?,
    })
}

fn kind_column(row: &SqliteRow) -> Result<ResourceKind, AppError> {
    let raw: String = row.try_get("kind")?;
    ResourceKind::parse(&raw)
        .ok_or_else(|| AppError::StoreCorruption(format!("unknown resource kind {:?}", raw)))
}

fn environment_column(row: &SqliteRow) -> Result<Environment, AppError> {
    let raw: String = row.try_get("environment")?;
    Environment::parse(&raw)
        .ok_or_else(|| AppError::StoreCorruption(format!("unknown environment {:?}", raw)))
}
