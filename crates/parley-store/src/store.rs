use async_trait::async_trait;

use parley_core::types::SpeechTask;

use crate::error::Result;
use crate::records::{ConversationRecord, SessionMeta, SessionRecord, SummaryRecord};

/// Persistence capability consumed by the session layer.
///
/// Three logical records exist per session (meta, conversation, summary);
/// each `put_*` atomically replaces one record, and `put_snapshot` replaces
/// all three in a single transaction. Speech tasks live in a side table
/// keyed by task id with a session back-reference.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a brand-new session. Fails with `AlreadyExists` when the id
    /// has a row, so a failed create never half-publishes a session.
    async fn create(&self, record: &SessionRecord) -> Result<()>;

    /// Replace all three records with one point-in-time snapshot.
    async fn put_snapshot(&self, record: &SessionRecord) -> Result<()>;

    async fn put_meta(&self, meta: &SessionMeta) -> Result<()>;
    async fn get_meta(&self, session_id: &str) -> Result<Option<SessionMeta>>;

    async fn put_conversation(&self, conversation: &ConversationRecord) -> Result<()>;
    async fn get_conversation(&self, session_id: &str) -> Result<Option<ConversationRecord>>;

    async fn put_summary(&self, summary: &SummaryRecord) -> Result<()>;
    async fn get_summary(&self, session_id: &str) -> Result<Option<SummaryRecord>>;

    /// Load the full session, or `None` when no record exists.
    async fn load(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Most recently updated sessions for an owner, newest first.
    async fn list_for_owner(&self, owner_id: &str, limit: usize) -> Result<Vec<SessionMeta>>;

    /// Upsert a speech task record.
    async fn put_task(&self, task: &SpeechTask) -> Result<()>;
    async fn get_task(&self, task_id: &str) -> Result<Option<SpeechTask>>;
    async fn list_tasks(&self, session_id: &str) -> Result<Vec<SpeechTask>>;
}
