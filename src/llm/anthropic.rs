use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ModelConfig, DEFAULT_ANTHROPIC_MODEL};
use crate::llm::{GenerationRequest, GlossModel, TurnRole};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: Client,
    url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn new(http: Client, config: &ModelConfig, api_key: String) -> Self {
        let model = config
            .deployment
            .clone()
            .and_then(|value| (!value.trim().is_empty()).then_some(value))
            .unwrap_or_else(|| DEFAULT_ANTHROPIC_MODEL.to_owned());
        let url = config
            .endpoint
            .as_ref()
            .map(|endpoint| endpoint.to_string())
            .unwrap_or_else(|| ANTHROPIC_API_URL.to_owned());
        Self {
            http,
            url,
            api_key,
            model,
            max_tokens: config.max_tokens,
        }
    }
}

#[async_trait]
impl GlossModel for AnthropicClient {
    fn label(&self) -> String {
        format!("anthropic:{}", self.model)
    }

    async fn complete(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let body = AnthropicRequest::deterministic(&self.model, self.max_tokens, request);
        debug!(model = %self.model, "calling Anthropic messages API");

        let response: AnthropicResponse = self
            .http
            .post(&self.url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&body)
            .send()
            .await
            .context("failed to call Anthropic API")?
            .error_for_status()
            .context("Anthropic API returned an error status")?
            .json()
            .await
            .context("failed to decode Anthropic response")?;

        let text = response.text();
        if text.trim().is_empty() {
            warn!(model = %self.model, "Anthropic response had no text content");
        }
        Ok(text)
    }
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    temperature: f32,
    system: String,
    messages: Vec<AnthropicMessage>,
}

impl AnthropicRequest {
    /// The Messages API takes the system prompt separately, and the sentence plus
    /// any correction travel as text blocks of a single user turn.
    fn deterministic(model: &str, max_tokens: u32, request: &GenerationRequest<'_>) -> Self {
        let mut system = String::new();
        let mut blocks = Vec::new();
        for turn in request.turns() {
            match turn.role {
                TurnRole::System => system = turn.text,
                TurnRole::User => blocks.push(AnthropicContentBlock {
                    kind: "text",
                    text: turn.text,
                }),
            }
        }
        Self {
            model: model.to_owned(),
            max_tokens,
            temperature: 0.0,
            system,
            messages: vec![AnthropicMessage {
                role: "user",
                content: blocks,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<AnthropicContentBlock>,
}

#[derive(Debug, Clone, Serialize)]
struct AnthropicContentBlock {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicContent>,
}

impl AnthropicResponse {
    /// Concatenated text blocks; empty when the reply carried none.
    fn text(self) -> String {
        self.content
            .into_iter()
            .filter_map(|chunk| chunk.text)
            .collect::<Vec<_>>()
            .join("")
    }
}

#[derive(Debug, Clone, Deserialize)]
struct AnthropicContent {
    #[serde(default)]
    text: Option<String>,
}
