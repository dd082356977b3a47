use std::sync::Arc;

use tracing::info;

use parley_core::types::{ResponseType, SessionConfig, Turn};
use parley_limits::{Provider, RateLimitFabric};

use crate::client::{AgentError, GenerateParams, LlmClient};
use crate::prompt;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// The interviewer's reply for one turn, already classified.
#[derive(Debug, Clone)]
pub struct InterviewerReply {
    pub text: String,
    pub response_type: ResponseType,
}

/// Per-session interviewer adapter.
///
/// Constructed fresh for each session so no process-wide object ever holds
/// candidate data. The shared pieces (transport client, fabric) carry no
/// user state.
pub struct InterviewerAgent {
    llm: Arc<dyn LlmClient>,
    fabric: Arc<RateLimitFabric>,
    retry: RetryPolicy,
    params: GenerateParams,
}

impl InterviewerAgent {
    pub fn new(llm: Arc<dyn LlmClient>, fabric: Arc<RateLimitFabric>, retry: RetryPolicy) -> Self {
        Self { llm, fabric, retry, params: GenerateParams::default() }
    }

    /// Produce the opening turn of the interview.
    pub async fn opening(&self, config: &SessionConfig) -> Result<InterviewerReply, AgentError> {
        let prompt = prompt::opening_prompt(config);
        let text = self.generate("interviewer.opening", &prompt).await?;
        Ok(InterviewerReply {
            text: text.trim().to_string(),
            response_type: ResponseType::Introduction,
        })
    }

    /// Produce the next interviewer turn from the conversation so far.
    ///
    /// `should_close` asks for a closing turn instead of another question
    /// (time budget spent or question target reached).
    pub async fn next_turn(
        &self,
        config: &SessionConfig,
        history: &[Turn],
        should_close: bool,
    ) -> Result<InterviewerReply, AgentError> {
        let prompt = prompt::next_turn_prompt(config, history, should_close);
        let raw = self.generate("interviewer.next_turn", &prompt).await?;
        let (text, response_type) = prompt::parse_interviewer_reply(&raw, should_close);
        Ok(InterviewerReply { text, response_type })
    }

    /// One logical LLM operation: a fabric slot is held for the duration of
    /// each attempt, and transient failures retry with backoff.
    async fn generate(&self, operation: &str, prompt: &str) -> Result<String, AgentError> {
        info!(provider = %self.llm.name(), %operation, "calling interviewer model");
        retry_with_backoff(&self.retry, operation, || async {
            let _slot = self
                .fabric
                .acquire(Provider::Llm)
                .await
                .map_err(|_| AgentError::RateLimited { retry_after_ms: 1_000 })?;
            self.llm.generate(prompt, &self.params).await
        })
        .await
    }
}
