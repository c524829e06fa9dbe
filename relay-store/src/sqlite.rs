//! SQLite-backed session store.
//!
//! One table keyed by channel ID. Every operation opens its own connection on
//! the blocking pool, so callers on different channels never share a handle;
//! SQLite serializes the writes.

use crate::traits::{Session, StoreResult, ThreadStore};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite session store.
pub struct SqliteThreadStore {
    db_path: PathBuf,
}

impl SqliteThreadStore {
    /// Open (or create) the database at `db_path`.
    ///
    /// Parent directories are created as needed.
    pub fn open(db_path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = db_path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = connect(&db_path)?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                channel_id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        tracing::debug!(path = %db_path.display(), "Session store opened");

        Ok(Self { db_path })
    }

    /// Database file location.
    pub fn path(&self) -> &Path {
        &self.db_path
    }
}

fn connect(path: &Path) -> StoreResult<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(conn)
}

#[async_trait]
impl ThreadStore for SqliteThreadStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn resolve(&self, channel_id: &str) -> StoreResult<Option<String>> {
        let db_path = self.db_path.clone();
        let channel_id = channel_id.to_string();

        tokio::task::spawn_blocking(move || -> StoreResult<Option<String>> {
            let conn = connect(&db_path)?;
            let thread_id = conn
                .query_row(
                    "SELECT thread_id FROM sessions WHERE channel_id = ?1",
                    params![channel_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(thread_id)
        })
        .await?
    }

    async fn store(&self, channel_id: &str, thread_id: &str) -> StoreResult<()> {
        let db_path = self.db_path.clone();
        let channel_id = channel_id.to_string();
        let thread_id = thread_id.to_string();

        tokio::task::spawn_blocking(move || -> StoreResult<()> {
            let conn = connect(&db_path)?;
            let now = chrono::Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO sessions (channel_id, thread_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(channel_id) DO UPDATE SET
                    thread_id = excluded.thread_id,
                    updated_at = excluded.updated_at",
                params![channel_id, thread_id, now],
            )?;
            Ok(())
        })
        .await?
    }

    async fn insert_if_absent(&self, channel_id: &str, thread_id: &str) -> StoreResult<String> {
        let db_path = self.db_path.clone();
        let channel_id = channel_id.to_string();
        let thread_id = thread_id.to_string();

        tokio::task::spawn_blocking(move || -> StoreResult<String> {
            let mut conn = connect(&db_path)?;
            let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
            let now = chrono::Utc::now().to_rfc3339();
            tx.execute(
                "INSERT OR IGNORE INTO sessions (channel_id, thread_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![channel_id, thread_id, now],
            )?;
            let stored: String = tx.query_row(
                "SELECT thread_id FROM sessions WHERE channel_id = ?1",
                params![channel_id],
                |row| row.get(0),
            )?;
            tx.commit()?;
            Ok(stored)
        })
        .await?
    }

    async fn count(&self) -> StoreResult<usize> {
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || -> StoreResult<usize> {
            let conn = connect(&db_path)?;
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await?
    }

    async fn list(&self) -> StoreResult<Vec<Session>> {
        let db_path = self.db_path.clone();

        tokio::task::spawn_blocking(move || -> StoreResult<Vec<Session>> {
            let conn = connect(&db_path)?;
            let mut stmt =
                conn.prepare("SELECT channel_id, thread_id FROM sessions ORDER BY channel_id")?;
            let sessions = stmt
                .query_map([], |row| {
                    Ok(Session {
                        channel_id: row.get(0)?,
                        thread_id: row.get(1)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(sessions)
        })
        .await?
    }
}
