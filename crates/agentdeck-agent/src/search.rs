// ABOUTME: Web search backends for the research tool: Perplexity over HTTP, or an offline stub.
// ABOUTME: The offline backend is deterministic so flows and tests produce repeatable output.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::engine::EngineError;

const DEFAULT_BASE_URL: &str = "https://api.perplexity.ai";
const DEFAULT_MODEL: &str = "sonar";

/// A source of search summaries for the `web_search` tool.
#[async_trait]
pub trait WebSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<String, EngineError>;

    /// Backend name for logging (e.g. "perplexity", "offline").
    fn provider_name(&self) -> &str;
}

/// Deterministic search used when no API key is configured.
#[derive(Debug, Clone, Default)]
pub struct OfflineSearch;

#[async_trait]
impl WebSearch for OfflineSearch {
    async fn search(&self, query: &str) -> Result<String, EngineError> {
        let topic = query.trim().trim_end_matches(['?', '.', '!']);
        Ok(format!(
            "{topic} is a widely discussed subject. Key findings: it has a well documented \
             history, recent work has focused on practical adoption, and practitioners \
             still debate its trade-offs."
        ))
    }

    fn provider_name(&self) -> &str {
        "offline"
    }
}

/// Perplexity chat-completions search.
pub struct PerplexitySearch {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl PerplexitySearch {
    /// Read configuration from environment variables.
    /// Required: `PERPLEXITY_API_KEY`
    /// Optional: `PERPLEXITY_API_BASE_URL` (defaults to https://api.perplexity.ai)
    /// Optional: `PERPLEXITY_MODEL` (defaults to sonar)
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("PERPLEXITY_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())?;
        let base_url = std::env::var("PERPLEXITY_API_BASE_URL")
            .unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("PERPLEXITY_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        Some(Self::new(api_key, base_url, model))
    }

    pub fn new(api_key: String, base_url: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            base_url,
            model,
        }
    }

    /// Build the request body for a search query.
    pub fn build_request_body(&self, query: &str) -> Value {
        json!({
            "model": self.model,
            "messages": [
                {
                    "role": "system",
                    "content": "You are an artificial intelligence assistant and you need to do web search and return response to user."
                },
                { "role": "user", "content": query }
            ]
        })
    }

    /// Extract the answer text from a chat-completions response.
    pub fn parse_response(body: &Value) -> Result<String, EngineError> {
        body.pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .ok_or_else(|| EngineError::Tool {
                tool: "web_search".to_string(),
                message: "missing choices[0].message.content in response".to_string(),
            })
    }
}

#[async_trait]
impl WebSearch for PerplexitySearch {
    async fn search(&self, query: &str) -> Result<String, EngineError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let tool_error = |message: String| EngineError::Tool {
            tool: "web_search".to_string(),
            message,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.build_request_body(query))
            .send()
            .await
            .map_err(|e| tool_error(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(tool_error(format!("API error {status}: {body}")));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| tool_error(format!("failed to parse JSON: {e}")))?;

        let answer = Self::parse_response(&body)?;
        tracing::info!(query, chars = answer.len(), "web search completed");
        Ok(answer)
    }

    fn provider_name(&self) -> &str {
        "perplexity"
    }
}
