//! Database module for SQLite persistence.
//!
//! SQLite holds version pointers, revisions and the audit log.

mod repository;

pub use repository::*;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// Initialize the database connection pool and run migrations.
pub async fn init_database(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure the parent directory exists
    if let Some(parent) = db_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS version_pointers (
            uid TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            app_name TEXT NOT NULL,
            original_name TEXT NOT NULL,
            environment TEXT NOT NULL,
            current_version INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (kind, app_name, environment)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS revisions (
            uid TEXT PRIMARY KEY,
            kind TEXT NOT NULL,
            app_name TEXT NOT NULL,
            original_name TEXT NOT NULL,
            environment TEXT NOT NULL,
            version INTEGER NOT NULL CHECK (version > 0),
            previous_version INTEGER,
            generated_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            lb_resource_version INTEGER NOT NULL DEFAULT 0,
            waf_resource_version INTEGER NOT NULL DEFAULT 0,
            lb_config TEXT NOT NULL,
            waf_config TEXT,
            origin_config TEXT NOT NULL DEFAULT '[]',
            remarks TEXT,
            UNIQUE (kind, app_name, environment, version)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            created_at TEXT NOT NULL,
            actor TEXT NOT NULL,
            description TEXT NOT NULL,
            environment TEXT,
            previous_version INTEGER,
            target_version INTEGER
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pointers_kind_env ON version_pointers(kind, environment)",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)")
        .execute(pool)
        .await?;

    Ok(())
}
