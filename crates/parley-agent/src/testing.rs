//! Scripted capability fakes for tests in this crate and downstream crates.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::{AgentError, GenerateParams, LlmClient, SearchClient, SearchHit};

/// An [`LlmClient`] that replays a scripted queue of outcomes. When the
/// script runs dry it echoes a canned reply.
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Result<String, AgentError>>>,
    fallback: String,
    calls: Mutex<u32>,
}

impl ScriptedLlm {
    pub fn new(fallback: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: fallback.into(),
            calls: Mutex::new(0),
        }
    }

    /// Queue the outcome of the next call.
    pub fn push(&self, outcome: Result<String, AgentError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Total calls observed so far.
    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerateParams,
    ) -> Result<String, AgentError> {
        *self.calls.lock().unwrap() += 1;
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(outcome) => outcome,
            None => Ok(self.fallback.clone()),
        }
    }
}

/// A [`SearchClient`] returning one synthetic hit per query.
pub struct StaticSearch;

#[async_trait]
impl SearchClient for StaticSearch {
    async fn search(&self, query: &str, _limit: usize) -> Result<Vec<SearchHit>, AgentError> {
        Ok(vec![SearchHit {
            title: format!("Guide to {query}"),
            url: format!("https://example.com/{}", query.replace(' ', "-")),
            snippet: format!("An introduction to {query}."),
            resource_type: Some("article".into()),
        }])
    }
}
