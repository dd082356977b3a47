use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use parley_core::config::{LlmProviderConfig, SearchProviderConfig};

use crate::client::{AgentError, GenerateParams, LlmClient, SearchClient, SearchHit};

/// LLM capability backed by an OpenAI-compatible chat-completions endpoint.
pub struct HttpLlmClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    chat_path: String,
    model: String,
}

impl HttpLlmClient {
    /// `base_url` should NOT include a trailing slash.
    pub fn new(config: &LlmProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            chat_path: config.chat_path.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    fn name(&self) -> &str {
        "llm-http"
    }

    async fn generate(&self, prompt: &str, params: &GenerateParams) -> Result<String, AgentError> {
        let url = format!("{}{}", self.base_url, self.chat_path);
        let body = serde_json::json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        });

        debug!(model = %self.model, "sending generation request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|s| s * 1000) // convert seconds to ms
                .unwrap_or(5000);
            return Err(AgentError::RateLimited { retry_after_ms: retry });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "LLM API error");
            return Err(AgentError::Api { status, message: text });
        }

        let api_resp: ChatResponse =
            resp.json().await.map_err(|e| AgentError::Parse(e.to_string()))?;

        api_resp
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| AgentError::Parse("response contained no choices".into()))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// Search capability backed by a JSON web-search API.
pub struct HttpSearchClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpSearchClient {
    pub fn new(config: &SearchProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
        }
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>, AgentError> {
        let url = format!("{}/search", self.base_url);

        debug!(%query, limit, "sending search request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "query": query, "count": limit }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if status == 429 {
            return Err(AgentError::RateLimited { retry_after_ms: 5000 });
        }
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "search API error");
            return Err(AgentError::Api { status, message: text });
        }

        let api_resp: SearchResponse =
            resp.json().await.map_err(|e| AgentError::Parse(e.to_string()))?;

        Ok(api_resp
            .results
            .into_iter()
            .take(limit)
            .map(|r| SearchHit {
                title: r.title,
                url: r.url,
                snippet: r.snippet.unwrap_or_default(),
                resource_type: r.result_type,
            })
            .collect())
    }
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Deserialize)]
struct SearchResult {
    title: String,
    url: String,
    snippet: Option<String>,
    #[serde(rename = "type")]
    result_type: Option<String>,
}
