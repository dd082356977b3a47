use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_core::types::{
    FeedbackEntry, SessionConfig, SessionStats, SessionStatus, SummaryStatus, Turn,
};

/// Configuration + status + stats: the first of the three logical records
/// persisted per session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    /// Owning user; `None` for anonymous sessions.
    #[serde(default)]
    pub owner_id: Option<String>,
    pub status: SessionStatus,
    pub config: SessionConfig,
    pub stats: SessionStats,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Conversation history plus the per-turn feedback log: the second record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub session_id: String,
    pub turns: Vec<Turn>,
    pub feedback: Vec<FeedbackEntry>,
}

/// Final-summary blob: the third record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub session_id: String,
    pub status: SummaryStatus,
    /// Generation counter bumped by session resets; distinguishes a
    /// summary produced for the current conversation from one produced
    /// for a conversation that was since reset away.
    #[serde(default)]
    pub epoch: u64,
}

/// Full point-in-time view of a session, written after each committed
/// state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub meta: SessionMeta,
    pub conversation: ConversationRecord,
    pub summary: SummaryRecord,
}
