use std::sync::Arc;

use parley_limits::RateLimitFabric;

use crate::client::{LlmClient, SearchClient};
use crate::coach::CoachAgent;
use crate::interviewer::InterviewerAgent;
use crate::retry::RetryPolicy;

/// Builds the per-session agent pair.
///
/// The factory holds only stateless transports; every session gets its own
/// [`InterviewerAgent`] and [`CoachAgent`] so candidate data never lives in
/// a process-wide agent object.
#[derive(Clone)]
pub struct AgentFactory {
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
    fabric: Arc<RateLimitFabric>,
    retry: RetryPolicy,
}

impl AgentFactory {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchClient>,
        fabric: Arc<RateLimitFabric>,
        retry: RetryPolicy,
    ) -> Self {
        Self { llm, search, fabric, retry }
    }

    pub fn interviewer(&self) -> InterviewerAgent {
        InterviewerAgent::new(self.llm.clone(), self.fabric.clone(), self.retry.clone())
    }

    pub fn coach(&self) -> CoachAgent {
        CoachAgent::new(
            self.llm.clone(),
            self.search.clone(),
            self.fabric.clone(),
            self.retry.clone(),
        )
    }
}
