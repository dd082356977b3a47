use rusqlite::Connection;

use crate::error::Result;

/// Initialise the session and speech-task tables and their indexes.
///
/// Safe to call on every startup — uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sessions (
            session_id   TEXT PRIMARY KEY,
            owner_id     TEXT,
            status       TEXT NOT NULL,
            meta         TEXT NOT NULL,
            conversation TEXT NOT NULL,
            summary      TEXT NOT NULL,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_sessions_owner
            ON sessions(owner_id, updated_at DESC);
        CREATE TABLE IF NOT EXISTS speech_tasks (
            task_id    TEXT PRIMARY KEY,
            session_id TEXT,
            task       TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_speech_tasks_session
            ON speech_tasks(session_id, created_at DESC);",
    )?;
    Ok(())
}
