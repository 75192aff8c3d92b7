use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

pub const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Remote provider speaking the Messages API (`{model, max_tokens, messages}` in,
/// `{content: [{text}]}` out). The URL may point at the vendor or at a proxy that injects
/// credentials, in which case no API key is configured here.
pub struct RemoteLlmProvider {
    api_url: String,
    api_key: Option<String>,
    model: String,
    api_version: String,
    default_timeout: Duration,
    default_max_tokens: usize,
    client: reqwest::Client,
}

impl RemoteLlmProvider {
    pub fn new(
        api_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            default_timeout: Duration::from_secs(30),
            default_max_tokens: 1000,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(mut self, timeout_secs: u64, max_tokens: usize) -> Self {
        self.default_timeout = Duration::from_secs(timeout_secs);
        self.default_max_tokens = max_tokens;
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }
}

#[async_trait::async_trait]
impl LlmProvider for RemoteLlmProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let timeout = request
            .timeout_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout);

        let req_body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt,
            }],
        };

        let mut builder = self
            .client
            .post(&self.api_url)
            .header("Content-Type", "application/json")
            .header("anthropic-version", &self.api_version)
            .json(&req_body);
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = tokio::time::timeout(timeout, builder.send())
            .await
            .context("LLM request timed out")?
            .context("LLM HTTP request failed")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LLM API error {}: {}", status, body);
        }

        let resp_body: MessagesResponse = tokio::time::timeout(timeout, response.json())
            .await
            .context("LLM request timed out")?
            .context("Failed to parse LLM response")?;

        let text = resp_body
            .content
            .into_iter()
            .find_map(|block| block.text)
            .context("LLM response has no text content")?;

        let usage = resp_body
            .usage
            .map(|u| UsageMetadata {
                input_tokens: u.input_tokens.unwrap_or(0),
                output_tokens: u.output_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content: text,
            usage,
            model: resp_body.model.unwrap_or_else(|| self.model.clone()),
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

// Messages API request/response structures
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: usize,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: Option<usize>,
    #[serde(default)]
    output_tokens: Option<usize>,
}
