use std::sync::Arc;

use serde::Deserialize;
use tracing::{info, warn};

use parley_core::types::{FeedbackEntry, FinalSummary, Resource, SessionConfig, Turn};
use parley_limits::{Provider, RateLimitFabric};

use crate::client::{AgentError, GenerateParams, LlmClient, SearchClient};
use crate::prompt;
use crate::retry::{retry_with_backoff, RetryPolicy};

/// How many search topics are actually queried for resources.
const MAX_SEARCH_TOPICS: usize = 3;
/// Hits requested per topic.
const HITS_PER_TOPIC: usize = 3;

/// Final summary plus the external-call counts it cost, for stats merging.
#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub summary: FinalSummary,
    pub llm_calls: u32,
    pub search_calls: u32,
}

/// Per-session coach adapter: per-answer grading, terminal summary, and
/// resource recommendation.
pub struct CoachAgent {
    llm: Arc<dyn LlmClient>,
    search: Arc<dyn SearchClient>,
    fabric: Arc<RateLimitFabric>,
    retry: RetryPolicy,
    params: GenerateParams,
}

impl CoachAgent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        search: Arc<dyn SearchClient>,
        fabric: Arc<RateLimitFabric>,
        retry: RetryPolicy,
    ) -> Self {
        Self { llm, search, fabric, retry, params: GenerateParams::default() }
    }

    /// Grade one question/answer pair, returning the feedback text.
    pub async fn evaluate_answer(
        &self,
        config: &SessionConfig,
        question: &str,
        answer: &str,
    ) -> Result<String, AgentError> {
        let prompt = prompt::evaluate_prompt(config, question, answer);
        let text = self.generate("coach.evaluate", &prompt).await?;
        Ok(text.trim().to_string())
    }

    /// Produce the full terminal analysis: summary core from the whole
    /// conversation, then external resources for the derived topics.
    pub async fn summarize_session(
        &self,
        config: &SessionConfig,
        history: &[Turn],
        feedback: &[FeedbackEntry],
    ) -> Result<SummaryOutcome, AgentError> {
        let notes: Vec<String> = feedback
            .iter()
            .filter(|f| !f.error)
            .map(|f| f.feedback.clone())
            .collect();
        let prompt = prompt::summary_prompt(config, history, &notes);
        let raw = self.generate("coach.summarize", &prompt).await?;

        let json = prompt::extract_json_object(&raw)?;
        let core: SummaryCore = serde_json::from_str(json)
            .map_err(|e| AgentError::Parse(format!("summary JSON: {e}")))?;

        let (resources, search_calls) = self.recommend_resources(&core.search_topics).await;

        Ok(SummaryOutcome {
            summary: FinalSummary {
                patterns: core.patterns,
                strengths: core.strengths,
                weaknesses: core.weaknesses,
                improvement_areas: core.improvement_areas,
                search_topics: core.search_topics,
                resources,
            },
            llm_calls: 1,
            search_calls,
        })
    }

    /// Query the search capability for each derived topic. A failing topic
    /// is skipped rather than failing the whole summary.
    pub async fn recommend_resources(&self, topics: &[String]) -> (Vec<Resource>, u32) {
        let mut resources = Vec::new();
        let mut search_calls = 0;

        for topic in topics.iter().take(MAX_SEARCH_TOPICS) {
            search_calls += 1;
            match self.search.search(topic, HITS_PER_TOPIC).await {
                Ok(hits) => {
                    for hit in hits {
                        resources.push(Resource {
                            title: hit.title,
                            url: hit.url,
                            description: hit.snippet,
                            resource_type: hit.resource_type,
                            reasoning: format!("Relevant to improving: {topic}"),
                        });
                    }
                }
                Err(e) => {
                    warn!(%topic, error = %e, "resource search failed, skipping topic");
                }
            }
        }

        (resources, search_calls)
    }

    async fn generate(&self, operation: &str, prompt: &str) -> Result<String, AgentError> {
        info!(provider = %self.llm.name(), %operation, "calling coach model");
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

/// The model-produced half of the final summary, before resource search.
#[derive(Debug, Deserialize)]
struct SummaryCore {
    #[serde(default)]
    patterns: Vec<String>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
    #[serde(default)]
    improvement_areas: Vec<String>,
    #[serde(default)]
    search_topics: Vec<String>,
}
