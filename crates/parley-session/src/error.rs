use thiserror::Error;

use parley_agent::AgentError;
use parley_core::error::ParleyError;
use parley_store::StoreError;

/// Errors raised by the session layer.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No session with this id exists in memory or in the store.
    #[error("session not found: {id}")]
    NotFound { id: String },

    /// The operation is not valid in the session's current state.
    #[error("invalid session state: {reason}")]
    InvalidState { reason: String },

    /// The session was abandoned by the idle sweeper.
    #[error("session timed out")]
    TimedOut,

    /// The caller supplied an unusable configuration or message.
    #[error("validation error: {0}")]
    Validation(String),

    /// An agent call failed after retries.
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// The backing store rejected a read or write.
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// An invariant was violated (e.g. a feedback merge for a turn that
    /// does not exist). Never silently absorbed.
    #[error("merge violation: {reason}")]
    MergeViolation { reason: String },
}

impl From<SessionError> for ParleyError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound { id } => ParleyError::SessionNotFound { id },
            SessionError::InvalidState { reason } => ParleyError::SessionStateInvalid { reason },
            SessionError::TimedOut => ParleyError::SessionTimeout,
            SessionError::Validation(msg) => ParleyError::Validation(msg),
            SessionError::Agent(e) => e.into(),
            SessionError::Storage(e) => e.into(),
            SessionError::MergeViolation { reason } => ParleyError::Internal(reason),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
