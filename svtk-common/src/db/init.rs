//! Database initialization
//!
//! Creates the tracking tables on first use. Every statement is idempotent so
//! concurrent service instances may initialize the same database file.

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // WAL lets heartbeats read while a scan holds the writer
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(10)
        .min_connections(1)
        .connect_with(options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// Each SQLite in-memory connection is its own database, so the pool is capped
/// at one connection.
pub async fn init_memory_database() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;

    create_schema(&pool).await?;
    Ok(pool)
}

/// Create every table and run migrations (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_tracked_sessions_table(pool).await?;
    create_transport_sessions_table(pool).await?;
    create_scan_marker_table(pool).await?;
    create_catalog_tables(pool).await?;

    crate::db::migrations::run_migrations(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// One row per tracked survey session; never deleted by lifecycle transitions
pub async fn create_tracked_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracked_sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            correlation_key TEXT NOT NULL UNIQUE,
            survey_id INTEGER NOT NULL,
            response_id INTEGER,
            step INTEGER NOT NULL DEFAULT 0,
            started_at INTEGER NOT NULL,
            last_seen INTEGER NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            abandoned_sent INTEGER NOT NULL DEFAULT 0,
            abandoned_sent_at INTEGER,
            uuid TEXT,
            custom_id TEXT,
            transport_session_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Explicit per-transport session context (JSON), replacing ambient session state
pub async fn create_transport_sessions_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transport_sessions (
            id TEXT PRIMARY KEY,
            context TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Single-row marker arbitrating the self-scan
pub async fn create_scan_marker_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS scan_marker (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            last_scan_at INTEGER NOT NULL DEFAULT 0,
            running INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("INSERT OR IGNORE INTO scan_marker (id, last_scan_at, running) VALUES (1, 0, 0)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Local question/answer catalog, used when no engine database is configured
pub async fn create_catalog_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS questions (
            qid INTEGER PRIMARY KEY,
            parent_qid INTEGER NOT NULL DEFAULT 0,
            sid INTEGER NOT NULL,
            type TEXT NOT NULL,
            title TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS answers (
            aid INTEGER PRIMARY KEY,
            qid INTEGER NOT NULL,
            code TEXT NOT NULL,
            scale_id INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
