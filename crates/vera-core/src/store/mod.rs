//! SQLite persistence for research IDs, sessions, disclaimers and messages.
//!
//! One database file backs every component. Each operation opens its own
//! connection, so handles are cheap to clone and safe to share across tasks;
//! SQLite serializes writers and WAL mode keeps readers off the writer's back.

pub mod admin;
pub mod identity;

use rusqlite::{Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{VeraError, VeraResult};

/// How long a writer waits on a locked database before giving up.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct Database {
    db_path: PathBuf,
    busy_timeout: Duration,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and ensure the schema exists.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self, rusqlite::Error> {
        let this = Self {
            db_path: db_path.into(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        };
        this.init()?;
        Ok(this)
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Same file, different lock wait for connections opened from the returned handle.
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub(crate) fn connect(&self) -> Result<Connection, rusqlite::Error> {
        let conn = Connection::open_with_flags(
            &self.db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    fn init(&self) -> Result<(), rusqlite::Error> {
        if let Some(parent) = self.db_path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(
                    target: "vera::store",
                    dir = %parent.display(),
                    error = %e,
                    "Could not create database directory"
                );
            }
        }
        let conn = self.connect()?;
        // journal_mode returns a row, so it cannot go through execute_batch.
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS research_ids (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                research_id TEXT NOT NULL UNIQUE,
                created_at_ms INTEGER NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                notes TEXT NULL
            );

            CREATE TABLE IF NOT EXISTS user_sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                research_id_fk INTEGER NOT NULL,
                token_id TEXT NOT NULL UNIQUE,
                session_token TEXT NOT NULL UNIQUE,
                created_at_ms INTEGER NOT NULL,
                last_active_ms INTEGER NOT NULL,
                ip_address TEXT NULL,
                user_agent TEXT NULL,
                FOREIGN KEY(research_id_fk) REFERENCES research_ids(id)
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_research ON user_sessions(research_id_fk);
            CREATE INDEX IF NOT EXISTS idx_sessions_last_active ON user_sessions(last_active_ms);

            CREATE TABLE IF NOT EXISTS disclaimer_acknowledgments (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                research_id_fk INTEGER NOT NULL,
                acknowledged_at_ms INTEGER NOT NULL,
                ip_address TEXT NULL,
                disclaimer_version TEXT NOT NULL DEFAULT '1.0',
                FOREIGN KEY(research_id_fk) REFERENCES research_ids(id)
            );

            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                research_id_fk INTEGER NOT NULL,
                conversation_id TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                role TEXT NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
                content TEXT NOT NULL,
                model_used TEXT NULL,
                audio_url TEXT NULL,
                provider TEXT NULL,
                provider_conversation_id TEXT NULL,
                provider_message_id TEXT NULL,
                FOREIGN KEY(research_id_fk) REFERENCES research_ids(id)
            );

            CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts ON messages(conversation_id, timestamp_ms);
            CREATE INDEX IF NOT EXISTS idx_messages_research_ts ON messages(research_id_fk, timestamp_ms);
            "#,
        )?;
        Ok(())
    }
}

/// Primary key of a research ID, if it exists.
pub(crate) fn research_pk(conn: &Connection, research_id: &str) -> Result<Option<i64>, rusqlite::Error> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT id FROM research_ids WHERE research_id = ?1",
        [research_id],
        |r| r.get(0),
    )
    .optional()
}

/// Run a store operation on tokio's blocking pool. SQLite lock waits then park
/// a pool thread instead of an async worker.
pub async fn blocking<T, F>(op: F) -> VeraResult<T>
where
    F: FnOnce() -> VeraResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|e| VeraError::TransientStore(format!("store task failed: {}", e)))?
}
