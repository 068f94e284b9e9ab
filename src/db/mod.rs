mod models;

pub use models::*;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

pub type DbPool = SqlitePool;

/// Tables every migration run must leave behind
pub const REQUIRED_TABLES: [&str; 4] = ["users", "sessions", "audience_segments", "campaigns"];

/// Format a timestamp the way every row stores it (UTC, millisecond precision, `Z` suffix)
/// so string comparison in SQL matches chronological order.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Current time in storage format
pub fn now() -> String {
    timestamp(Utc::now())
}

/// Execute a SQL migration file. Comment lines are dropped before splitting on
/// `;` so punctuation inside a comment never ends a statement.
async fn execute_sql(pool: &SqlitePool, sql: &str) -> Result<()> {
    let cleaned: String = sql
        .lines()
        .filter(|line| !line.trim().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    for statement in cleaned.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
        }
    }
    Ok(())
}

pub async fn init(data_dir: &Path) -> Result<DbPool> {
    let db_path = data_dir.join("pulse.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    info!("Initializing database at {}", db_path.display());

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    // Enable WAL mode for better concurrency
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    info!("Database initialized successfully");
    Ok(pool)
}

async fn table_exists(pool: &SqlitePool, table: &str) -> Result<bool> {
    let found: Option<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = ?")
            .bind(table)
            .fetch_optional(pool)
            .await?;
    Ok(found.is_some())
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    info!("Running database migrations...");

    // Migration 001: Users and sessions
    if !table_exists(pool, "users").await? || !table_exists(pool, "sessions").await? {
        execute_sql(pool, include_str!("../../migrations/001_users.sql")).await?;
    }

    // Migration 002: Audience segments
    if !table_exists(pool, "audience_segments").await? {
        execute_sql(pool, include_str!("../../migrations/002_audience_segments.sql")).await?;
    }

    // Migration 003: Campaigns
    if !table_exists(pool, "campaigns").await? {
        execute_sql(pool, include_str!("../../migrations/003_campaigns.sql")).await?;
    }

    info!("Migrations completed");
    Ok(())
}

/// Names of required tables missing from the schema
pub async fn missing_tables(pool: &SqlitePool) -> Result<Vec<&'static str>> {
    let mut missing = Vec::new();
    for table in REQUIRED_TABLES {
        if !table_exists(pool, table).await? {
            missing.push(table);
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_creates_schema() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init(temp_dir.path()).await.unwrap();

        assert!(missing_tables(&pool).await.unwrap().is_empty());
        assert!(temp_dir.path().join("pulse.db").exists());
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let pool = init(temp_dir.path()).await.unwrap();
        drop(pool);

        let pool = init(temp_dir.path()).await.unwrap();
        assert!(missing_tables(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_semicolon_in_comment_does_not_split_statement() {
        let temp_dir = TempDir::new().unwrap();
        let pool = SqlitePoolOptions::new()
            .connect(&format!("sqlite:{}?mode=rwc", temp_dir.path().join("t.db").display()))
            .await
            .unwrap();

        let sql = "-- first table; holds notes\nCREATE TABLE notes (id TEXT PRIMARY KEY);\n\
                   -- second; also commented\nCREATE TABLE tags (id TEXT PRIMARY KEY);\n";
        execute_sql(&pool, sql).await.unwrap();

        assert!(table_exists(&pool, "notes").await.unwrap());
        assert!(table_exists(&pool, "tags").await.unwrap());
    }

    #[test]
    fn test_timestamps_sort_lexically() {
        let earlier = Utc::now();
        let later = earlier + chrono::Duration::milliseconds(1500);
        assert!(timestamp(earlier) < timestamp(later));
        assert!(timestamp(earlier).ends_with('Z'));
    }
}
