use thiserror::Error;

/// The uniform error taxonomy surfaced at the service boundary.
///
/// Internal components carry their own error enums and convert into this
/// type at the point where an outcome becomes user-visible. Every variant
/// maps to a stable wire code and an HTTP status class.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("session not found: {id}")]
    SessionNotFound { id: String },

    #[error("invalid session state: {reason}")]
    SessionStateInvalid { reason: String },

    #[error("session timed out")]
    SessionTimeout,

    #[error("capacity exhausted for {provider}")]
    CapacityExhausted { provider: String },

    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),

    #[error("persistence degraded: {0}")]
    PersistenceDegraded(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ParleyError {
    /// Stable machine code sent to clients alongside the human message.
    pub fn code(&self) -> &'static str {
        match self {
            ParleyError::SessionNotFound { .. } => "session-not-found",
            ParleyError::SessionStateInvalid { .. } => "session-state-invalid",
            ParleyError::SessionTimeout => "session-timeout",
            ParleyError::CapacityExhausted { .. } => "capacity-exhausted",
            ParleyError::AgentUnavailable(_) => "agent-unavailable",
            ParleyError::PersistenceDegraded(_) => "persistence-degraded",
            ParleyError::Validation(_) => "validation-error",
            ParleyError::Unauthenticated(_) => "unauthenticated",
            ParleyError::Internal(_) => "internal-error",
        }
    }

    /// HTTP status class for the boundary layer.
    pub fn http_status(&self) -> u16 {
        match self {
            ParleyError::SessionNotFound { .. } => 404,
            ParleyError::SessionStateInvalid { .. } => 409,
            ParleyError::SessionTimeout => 410,
            ParleyError::CapacityExhausted { .. } => 429,
            ParleyError::AgentUnavailable(_) => 502,
            ParleyError::PersistenceDegraded(_) => 500,
            ParleyError::Validation(_) => 400,
            ParleyError::Unauthenticated(_) => 401,
            ParleyError::Internal(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            ParleyError::SessionNotFound { id: "x".into() }.code(),
            "session-not-found"
        );
        assert_eq!(ParleyError::SessionTimeout.code(), "session-timeout");
        assert_eq!(
            ParleyError::CapacityExhausted { provider: "llm".into() }.code(),
            "capacity-exhausted"
        );
    }

    #[test]
    fn status_classes() {
        assert_eq!(
            ParleyError::SessionStateInvalid { reason: "sent after end".into() }.http_status(),
            409
        );
        assert_eq!(ParleyError::AgentUnavailable("down".into()).http_status(), 502);
        assert_eq!(ParleyError::Validation("bad".into()).http_status(), 400);
    }
}
