//! Database module for the tenant-partitioned SQLite cache.
//!
//! The remote store is the source of truth for documents; this cache serves reads and holds
//! local edits until they are committed.

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

    // Run embedded migrations
    run_migrations(&pool).await?;

    Ok(pool)
}

/// Run database migrations.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS projects (
            tenant_id TEXT NOT NULL,
            repository TEXT NOT NULL,
            collaborators TEXT NOT NULL DEFAULT '[]',
            deployment TEXT,
            last_synced_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, repository)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS posts (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            repository TEXT NOT NULL,
            path TEXT NOT NULL,
            collection TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            body TEXT NOT NULL DEFAULT '',
            version_token TEXT,
            status TEXT NOT NULL,
            validation_errors TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            last_commit_at TEXT,
            UNIQUE (tenant_id, repository, path)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS share_references (
            tenant_id TEXT NOT NULL,
            repository TEXT NOT NULL,
            owner_tenant_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, repository)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_definitions (
            tenant_id TEXT NOT NULL,
            repository TEXT NOT NULL,
            collection TEXT NOT NULL,
            fields TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (tenant_id, repository, collection)
        );
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS settings (
            tenant_id TEXT PRIMARY KEY,
            entries TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL
        );
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes for common queries
    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_posts_collection ON posts(tenant_id, repository, collection);
        CREATE INDEX IF NOT EXISTS idx_posts_updated_at ON posts(updated_at);
        CREATE INDEX IF NOT EXISTS idx_share_references_owner ON share_references(owner_tenant_id, repository);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
