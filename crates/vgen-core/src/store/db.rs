//! SQLite-backed job/account store.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// Handle to the SQLite-backed store.
///
/// The database file lives under the configured data dir, e.g.
/// `data/db/vgen.db`. Workers clone the handle; sqlx pools connections.
#[derive(Clone)]
pub struct JobStore {
    pub(crate) pool: Pool<Sqlite>,
}

/// Columns reconciled additively on startup. Pre-existing columns are never
/// altered or dropped; anything missing from this list is added with
/// `ALTER TABLE ... ADD COLUMN`.
const JOB_COLUMNS: &[(&str, &str)] = &[
    ("image_path", "TEXT"),
    ("duration", "INTEGER NOT NULL DEFAULT 5"),
    ("aspect_ratio", "TEXT NOT NULL DEFAULT '16:9'"),
    ("progress", "INTEGER NOT NULL DEFAULT 0"),
    ("error_message", "TEXT"),
    ("retry_count", "INTEGER NOT NULL DEFAULT 0"),
    ("max_retries", "INTEGER NOT NULL DEFAULT 3"),
    ("video_url", "TEXT"),
    ("video_id", "TEXT"),
    ("generation_id", "TEXT"),
    ("local_path", "TEXT"),
    ("account_id", "INTEGER"),
    ("task_state", "TEXT"),
];

const ACCOUNT_COLUMNS: &[(&str, &str)] = &[
    ("password_enc", "TEXT"),
    ("access_token", "TEXT"),
    ("device_id", "TEXT"),
    ("user_agent", "TEXT"),
    ("cookies", "TEXT"),
    ("credits_remaining", "INTEGER NOT NULL DEFAULT 0"),
    ("credits_last_checked", "INTEGER"),
    ("credits_reset_at", "INTEGER"),
    ("last_used", "INTEGER"),
];

impl JobStore {
    /// Open (or create) the database at `path` and reconcile the schema.
    pub async fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        let store = JobStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open an in-memory database (tests). Single connection so the pool
    /// never hands back a different empty DB.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = JobStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the base tables and add any missing columns from the known
    /// lists. Additive only: upgrades are zero-ops, downgrades keep working.
    pub(crate) async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                prompt TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                platform TEXT NOT NULL,
                email TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'live',
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        self.ensure_columns("jobs", JOB_COLUMNS).await?;
        self.ensure_columns("accounts", ACCOUNT_COLUMNS).await?;

        Ok(())
    }

    async fn ensure_columns(&self, table: &str, wanted: &[(&str, &str)]) -> Result<()> {
        let rows = sqlx::query(&format!("PRAGMA table_info({table})"))
            .fetch_all(&self.pool)
            .await?;
        let existing: Vec<String> = rows
            .iter()
            .map(|row| row.get::<String, _>("name"))
            .collect();

        for (name, decl) in wanted {
            if !existing.iter().any(|c| c == name) {
                tracing::info!("adding column {table}.{name}");
                sqlx::query(&format!("ALTER TABLE {table} ADD COLUMN {name} {decl}"))
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
