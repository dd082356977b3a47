use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use tracing::instrument;

use parley_core::types::SpeechTask;

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::records::{ConversationRecord, SessionMeta, SessionRecord, SummaryRecord};
use crate::store::SessionStore;

/// SQLite-backed [`SessionStore`].
///
/// Wraps a single connection in a `Mutex`. Calls are short (single-row JSON
/// reads and writes) so a mutex is sufficient for the single-node target;
/// a pool would be the upgrade path for multi-writer deployments.
pub struct SqliteStore {
    db: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and initialise the
    /// schema.
    pub fn open(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("open {path}: {e}")))?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Unavailable(format!("open in-memory: {e}")))?;
        init_db(&conn)?;
        Ok(Self { db: Mutex::new(conn) })
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    #[instrument(skip(self, record), fields(session_id = %record.meta.session_id))]
    async fn create(&self, record: &SessionRecord) -> Result<()> {
        let meta_json = serde_json::to_string(&record.meta)?;
        let conv_json = serde_json::to_string(&record.conversation)?;
        let summary_json = serde_json::to_string(&record.summary)?;
        let status = status_str(&record.meta);

        let db = self.db.lock().unwrap();
        let inserted = db.execute(
            "INSERT OR IGNORE INTO sessions
             (session_id, owner_id, status, meta, conversation, summary, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                record.meta.session_id,
                record.meta.owner_id,
                status,
                meta_json,
                conv_json,
                summary_json,
                record.meta.created_at.to_rfc3339(),
                record.meta.updated_at.to_rfc3339(),
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists { id: record.meta.session_id.clone() });
        }
        Ok(())
    }

    #[instrument(skip(self, record), fields(session_id = %record.meta.session_id))]
    async fn put_snapshot(&self, record: &SessionRecord) -> Result<()> {
        let meta_json = serde_json::to_string(&record.meta)?;
        let conv_json = serde_json::to_string(&record.conversation)?;
        let summary_json = serde_json::to_string(&record.summary)?;
        let status = status_str(&record.meta);

        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO sessions
             (session_id, owner_id, status, meta, conversation, summary, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(session_id) DO UPDATE SET
                 owner_id = excluded.owner_id,
                 status = excluded.status,
                 meta = excluded.meta,
                 conversation = excluded.conversation,
                 summary = excluded.summary,
                 updated_at = excluded.updated_at",
            rusqlite::params![
                record.meta.session_id,
                record.meta.owner_id,
                status,
                meta_json,
                conv_json,
                summary_json,
                record.meta.created_at.to_rfc3339(),
                record.meta.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    #[instrument(skip(self, meta), fields(session_id = %meta.session_id))]
    async fn put_meta(&self, meta: &SessionMeta) -> Result<()> {
        let meta_json = serde_json::to_string(meta)?;
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE sessions
             SET owner_id = ?1, status = ?2, meta = ?3, updated_at = ?4
             WHERE session_id = ?5",
            rusqlite::params![
                meta.owner_id,
                status_str(meta),
                meta_json,
                meta.updated_at.to_rfc3339(),
                meta.session_id,
            ],
        )?;
        ensure_row(changed, &meta.session_id)
    }

    async fn get_meta(&self, session_id: &str) -> Result<Option<SessionMeta>> {
        self.get_column("meta", session_id)
    }

    #[instrument(skip(self, conversation), fields(session_id = %conversation.session_id))]
    async fn put_conversation(&self, conversation: &ConversationRecord) -> Result<()> {
        let json = serde_json::to_string(conversation)?;
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE sessions SET conversation = ?1 WHERE session_id = ?2",
            rusqlite::params![json, conversation.session_id],
        )?;
        ensure_row(changed, &conversation.session_id)
    }

    async fn get_conversation(&self, session_id: &str) -> Result<Option<ConversationRecord>> {
        self.get_column("conversation", session_id)
    }

    #[instrument(skip(self, summary), fields(session_id = %summary.session_id))]
    async fn put_summary(&self, summary: &SummaryRecord) -> Result<()> {
        let json = serde_json::to_string(summary)?;
        let db = self.db.lock().unwrap();
        let changed = db.execute(
            "UPDATE sessions SET summary = ?1 WHERE session_id = ?2",
            rusqlite::params![json, summary.session_id],
        )?;
        ensure_row(changed, &summary.session_id)
    }

    async fn get_summary(&self, session_id: &str) -> Result<Option<SummaryRecord>> {
        self.get_column("summary", session_id)
    }

    #[instrument(skip(self))]
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let db = self.db.lock().unwrap();
        let row: Option<(String, String, String)> = db
            .query_row(
                "SELECT meta, conversation, summary FROM sessions WHERE session_id = ?1",
                rusqlite::params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        match row {
            Some((meta, conversation, summary)) => Ok(Some(SessionRecord {
                meta: serde_json::from_str(&meta)?,
                conversation: serde_json::from_str(&conversation)?,
                summary: serde_json::from_str(&summary)?,
            })),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_for_owner(&self, owner_id: &str, limit: usize) -> Result<Vec<SessionMeta>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT meta FROM sessions
             WHERE owner_id = ?1
             ORDER BY updated_at DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![owner_id, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;
        let mut metas = Vec::new();
        for json in rows.filter_map(|r| r.ok()) {
            metas.push(serde_json::from_str(&json)?);
        }
        Ok(metas)
    }

    #[instrument(skip(self, task), fields(task_id = %task.task_id))]
    async fn put_task(&self, task: &SpeechTask) -> Result<()> {
        let json = serde_json::to_string(task)?;
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO speech_tasks (task_id, session_id, task, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(task_id) DO UPDATE SET
                 session_id = excluded.session_id,
                 task = excluded.task,
                 updated_at = excluded.updated_at",
            rusqlite::params![
                task.task_id,
                task.session_id,
                json,
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<Option<SpeechTask>> {
        let db = self.db.lock().unwrap();
        let json: Option<String> = db
            .query_row(
                "SELECT task FROM speech_tasks WHERE task_id = ?1",
                rusqlite::params![task_id],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_tasks(&self, session_id: &str) -> Result<Vec<SpeechTask>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT task FROM speech_tasks
             WHERE session_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(rusqlite::params![session_id], |row| row.get::<_, String>(0))?;
        let mut tasks = Vec::new();
        for json in rows.filter_map(|r| r.ok()) {
            tasks.push(serde_json::from_str(&json)?);
        }
        Ok(tasks)
    }
}

impl SqliteStore {
    fn get_column<T: serde::de::DeserializeOwned>(
        &self,
        column: &str,
        session_id: &str,
    ) -> Result<Option<T>> {
        let db = self.db.lock().unwrap();
        // `column` is one of three compile-time literals, never user input.
        let sql = format!("SELECT {column} FROM sessions WHERE session_id = ?1");
        let json: Option<String> = db
            .query_row(&sql, rusqlite::params![session_id], |row| row.get(0))
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

fn status_str(meta: &SessionMeta) -> &'static str {
    match meta.status {
        parley_core::types::SessionStatus::Active => "active",
        parley_core::types::SessionStatus::Completed => "completed",
        parley_core::types::SessionStatus::Abandoned => "abandoned",
    }
}

fn ensure_row(changed: usize, session_id: &str) -> Result<()> {
    if changed == 0 {
        return Err(StoreError::Unavailable(format!(
            "no session row for {session_id}"
        )));
    }
    Ok(())
}
