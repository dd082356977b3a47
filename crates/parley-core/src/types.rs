use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ParleyError, Result};

/// Allocate a fresh opaque id (sessions, tasks, connections).
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// Session configuration
// ---------------------------------------------------------------------------

/// Lifecycle status of a session as persisted and reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterviewStyle {
    #[default]
    Formal,
    Casual,
    Aggressive,
    Technical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    #[default]
    Medium,
    Hard,
}

pub const MIN_DURATION_MINUTES: u32 = 5;
pub const MAX_DURATION_MINUTES: u32 = 30;

/// Immutable interview parameters, fixed when the session is created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// The role the candidate is interviewing for (e.g. "Software Engineer").
    pub target_role: String,
    #[serde(default)]
    pub role_description: Option<String>,
    /// Extracted resume text supplied by the candidate, if any.
    #[serde(default)]
    pub resume_text: Option<String>,
    #[serde(default)]
    pub style: InterviewStyle,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub company: Option<String>,
    /// Target interview length, 5..=30 minutes.
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: u32,
    /// When true the interview ends on elapsed time; when false a target
    /// question count derived from the duration terminates instead.
    #[serde(default = "bool_true")]
    pub use_time_based: bool,
}

fn default_duration_minutes() -> u32 {
    15
}

fn bool_true() -> bool {
    true
}

impl SessionConfig {
    /// Validate user-supplied configuration before a session is created.
    pub fn validate(&self) -> Result<()> {
        if self.target_role.trim().is_empty() {
            return Err(ParleyError::Validation("target_role must not be empty".into()));
        }
        if !(MIN_DURATION_MINUTES..=MAX_DURATION_MINUTES).contains(&self.duration_minutes) {
            return Err(ParleyError::Validation(format!(
                "duration_minutes must be in {MIN_DURATION_MINUTES}..={MAX_DURATION_MINUTES}, got {}",
                self.duration_minutes
            )));
        }
        Ok(())
    }

    /// Number of questions that terminates a count-based interview.
    ///
    /// Roughly one question per two minutes, never fewer than three.
    pub fn target_question_count(&self) -> u32 {
        (self.duration_minutes / 2).max(3)
    }
}

// ---------------------------------------------------------------------------
// Conversation turns
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// Which agent produced an assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentTag {
    Interviewer,
    Coach,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Introduction,
    Question,
    FollowUp,
    Closing,
    CoachingFeedback,
    Answer,
}

/// Structured payload carried by coach assistant turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoachNote {
    /// Index of the user turn this note evaluates.
    pub turn_index: usize,
    pub feedback: String,
}

/// Turn content is dynamic: interviewer turns carry plain text, coach turns
/// carry a structured object. Readers branch on the `kind` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnContent {
    Text { text: String },
    Coaching { note: CoachNote },
}

impl TurnContent {
    /// Plain-text view of the content, whatever the variant.
    pub fn as_text(&self) -> &str {
        match self {
            TurnContent::Text { text } => text,
            TurnContent::Coaching { note } => &note.feedback,
        }
    }
}

/// One entry in the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    /// Set for assistant turns; `None` for user and system turns.
    #[serde(default)]
    pub agent: Option<AgentTag>,
    pub content: TurnContent,
    pub response_type: ResponseType,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            agent: None,
            content: TurnContent::Text { text: text.into() },
            response_type: ResponseType::Answer,
            created_at: Utc::now(),
        }
    }

    pub fn interviewer(text: impl Into<String>, response_type: ResponseType) -> Self {
        Self {
            role: TurnRole::Assistant,
            agent: Some(AgentTag::Interviewer),
            content: TurnContent::Text { text: text.into() },
            response_type,
            created_at: Utc::now(),
        }
    }

    pub fn coach(note: CoachNote) -> Self {
        Self {
            role: TurnRole::Assistant,
            agent: Some(AgentTag::Coach),
            content: TurnContent::Coaching { note },
            response_type: ResponseType::CoachingFeedback,
            created_at: Utc::now(),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_text()
    }

    pub fn is_user(&self) -> bool {
        self.role == TurnRole::User
    }
}

// ---------------------------------------------------------------------------
// Per-turn feedback
// ---------------------------------------------------------------------------

/// Coach evaluation of one user answer, keyed by the user-turn index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEntry {
    /// Ordinal of the user turn this entry evaluates (0-based, counting
    /// user turns only).
    pub turn_index: usize,
    /// The interviewer question the answer responded to.
    pub question: String,
    /// The candidate's answer verbatim.
    pub answer: String,
    pub feedback: String,
    /// Set when grading failed terminally; `feedback` then carries a
    /// diagnostic rather than an evaluation.
    #[serde(default)]
    pub error: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Final summary
// ---------------------------------------------------------------------------

/// An external resource recommended by the coach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub title: String,
    pub url: String,
    pub description: String,
    #[serde(default)]
    pub resource_type: Option<String>,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FinalSummary {
    pub patterns: Vec<String>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    /// Prioritized, most important first.
    pub improvement_areas: Vec<String>,
    pub search_topics: Vec<String>,
    pub resources: Vec<Resource>,
}

/// Where final-summary generation currently stands for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SummaryStatus {
    NotStarted,
    Generating,
    Completed { summary: FinalSummary },
    Error { message: String },
}

impl SummaryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SummaryStatus::Completed { .. } | SummaryStatus::Error { .. })
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Questions the interviewer has asked so far.
    pub question_count: u32,
    /// Cumulative wall time spent producing assistant replies to answers.
    pub total_answer_latency_ms: u64,
    pub llm_calls: u32,
    pub search_calls: u32,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl SessionStats {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            question_count: 0,
            total_answer_latency_ms: 0,
            llm_calls: 0,
            search_calls: 0,
            started_at: now,
            last_activity_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Speech tasks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    BatchTranscription,
    StreamingTranscription,
    Synthesis,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }
}

/// Recognised speech with provider confidence and audio duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    pub confidence: f64,
    pub duration_secs: f64,
}

/// Outcome payload of a finished speech task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskResult {
    Transcript { transcript: Transcript },
    /// Handle under which synthesized audio can be retrieved.
    Audio { handle: String },
}

/// One row in the speech-task side table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechTask {
    pub task_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Opaque provider progress blob; shape is provider-defined.
    #[serde(default)]
    pub progress: serde_json::Value,
    #[serde(default)]
    pub result: Option<TaskResult>,
    #[serde(default)]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SpeechTask {
    pub fn new(task_type: TaskType, session_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id: new_id(),
            session_id,
            task_type,
            status: TaskStatus::Processing,
            progress: serde_json::Value::Null,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn complete(&mut self, result: TaskResult) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.updated_at = Utc::now();
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = TaskStatus::Error;
        self.error = Some(message.into());
        self.updated_at = Utc::now();
    }
}
