use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use parley_core::error::ParleyError;

/// Generation knobs passed to the LLM capability.
#[derive(Debug, Clone)]
pub struct GenerateParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerateParams {
    fn default() -> Self {
        Self { max_tokens: 1024, temperature: 0.7 }
    }
}

/// Text-generation capability. The implementation performs its own
/// transport; concurrency caps and retries are applied by the callers.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    async fn generate(&self, prompt: &str, params: &GenerateParams) -> Result<String, AgentError>;
}

/// One result from the external-resource search capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
    #[serde(default)]
    pub resource_type: Option<String>,
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, AgentError>;
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("operation timed out")]
    Timeout,

    #[error("operation cancelled")]
    Cancelled,
}

impl AgentError {
    /// Whether a bounded-backoff retry is worthwhile. Rate limiting is
    /// excluded: capacity outcomes go straight back to the caller.
    pub fn is_transient(&self) -> bool {
        match self {
            AgentError::Http(_) | AgentError::Timeout | AgentError::Unavailable(_) => true,
            AgentError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<AgentError> for ParleyError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::RateLimited { .. } => {
                ParleyError::CapacityExhausted { provider: "llm".to_string() }
            }
            other => ParleyError::AgentUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(AgentError::Api { status: 503, message: "overloaded".into() }.is_transient());
        assert!(AgentError::Timeout.is_transient());
        assert!(!AgentError::Api { status: 400, message: "bad prompt".into() }.is_transient());
        assert!(!AgentError::RateLimited { retry_after_ms: 500 }.is_transient());
        assert!(!AgentError::Parse("not json".into()).is_transient());
    }

    #[test]
    fn rate_limits_surface_as_capacity() {
        let err: ParleyError = AgentError::RateLimited { retry_after_ms: 100 }.into();
        assert_eq!(err.code(), "capacity-exhausted");

        let err: ParleyError = AgentError::Timeout.into();
        assert_eq!(err.code(), "agent-unavailable");
    }
}
