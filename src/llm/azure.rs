use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::config::ModelConfig;
use crate::llm::{GenerationRequest, GlossModel};

#[derive(Debug, Clone)]
pub struct AzureOpenAiClient {
    http: Client,
    url: Url,
    deployment: String,
    api_key: String,
    max_tokens: u32,
}

impl AzureOpenAiClient {
    pub fn new(http: Client, config: &ModelConfig, api_key: String) -> Result<Self> {
        let endpoint = config
            .endpoint
            .as_ref()
            .ok_or_else(|| anyhow!("azure_openai requires model.endpoint"))?;
        let deployment = config
            .deployment
            .clone()
            .ok_or_else(|| anyhow!("azure_openai requires model.deployment"))?;
        let url = chat_completions_url(endpoint, &deployment, &config.api_version)?;
        Ok(Self {
            http,
            url,
            deployment,
            api_key,
            max_tokens: config.max_tokens,
        })
    }
}

#[async_trait]
impl GlossModel for AzureOpenAiClient {
    fn label(&self) -> String {
        format!("azure_openai:{}", self.deployment)
    }

    async fn complete(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let body = ChatCompletionRequest::deterministic(request, self.max_tokens);
        debug!(url = %self.url, messages = body.messages.len(), "calling Azure OpenAI");

        let response: ChatCompletionResponse = self
            .http
            .post(self.url.clone())
            .header("api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to call Azure OpenAI chat completions API")?
            .error_for_status()
            .context("Azure OpenAI API returned an error status")?
            .json()
            .await
            .context("failed to decode Azure OpenAI response")?;

        let text = response.text();
        if text.trim().is_empty() {
            warn!(deployment = %self.deployment, "Azure OpenAI response had no message content");
        }
        Ok(text)
    }
}

fn chat_completions_url(endpoint: &Url, deployment: &str, api_version: &str) -> Result<Url> {
    let mut base = endpoint.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    let mut url = base
        .join(&format!("openai/deployments/{deployment}/chat/completions"))
        .with_context(|| format!("failed to build chat completions URL from {endpoint}"))?;
    url.query_pairs_mut().append_pair("api-version", api_version);
    Ok(url)
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionRequest {
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    stream: bool,
}

impl ChatCompletionRequest {
    fn deterministic(request: &GenerationRequest<'_>, max_tokens: u32) -> Self {
        let messages = request
            .turns()
            .into_iter()
            .map(|turn| ChatMessage {
                role: turn.role.as_str(),
                content: vec![ContentPart {
                    kind: "text",
                    text: turn.text,
                }],
            })
            .collect();
        Self {
            messages,
            max_tokens,
            temperature: 0.0,
            top_p: 0.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stream: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Debug, Clone, Serialize)]
struct ContentPart {
    #[serde(rename = "type")]
    kind: &'static str,
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

impl ChatCompletionResponse {
    /// First choice's content; a filtered or empty reply yields an empty string.
    fn text(self) -> String {
        self.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use url::Url;

    use super::{chat_completions_url, ChatCompletionRequest, ChatCompletionResponse};
    use crate::llm::GenerationRequest;

    #[test]
    fn url_targets_deployment_with_api_version() {
        let endpoint = Url::parse("https://demo.cognitiveservices.azure.com").expect("url");
        let url = chat_completions_url(&endpoint, "gpt-4.1", "2024-05-01-preview").expect("url");
        assert_eq!(
            url.as_str(),
            "https://demo.cognitiveservices.azure.com/openai/deployments/gpt-4.1/chat/completions?api-version=2024-05-01-preview"
        );
    }

    #[test]
    fn url_keeps_endpoint_path_prefix() {
        let endpoint = Url::parse("https://gateway.example.com/azure").expect("url");
        let url = chat_completions_url(&endpoint, "d", "v1").expect("url");
        assert_eq!(
            url.as_str(),
            "https://gateway.example.com/azure/openai/deployments/d/chat/completions?api-version=v1"
        );
    }

    #[test]
    fn request_body_is_deterministic_chat_payload() {
        let request = GenerationRequest {
            instructions: "Only dictionary words.",
            input: "Hello world",
            correction: None,
        };
        let body = serde_json::to_value(ChatCompletionRequest::deterministic(&request, 800))
            .expect("body serializes");
        assert_eq!(
            body,
            json!({
                "messages": [
                    {"role": "system", "content": [{"type": "text", "text": "Only dictionary words."}]},
                    {"role": "user", "content": [{"type": "text", "text": "Hello world"}]}
                ],
                "max_tokens": 800,
                "temperature": 0.0,
                "top_p": 0.0,
                "frequency_penalty": 0.0,
                "presence_penalty": 0.0,
                "stream": false
            })
        );
    }

    #[test]
    fn filtered_reply_without_content_is_empty_text() {
        let filtered: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [{
                "finish_reason": "content_filter",
                "message": { "role": "assistant", "content": null }
            }]
        }))
        .expect("response decodes");
        assert_eq!(filtered.text(), "");

        let no_choices: ChatCompletionResponse =
            serde_json::from_value(json!({ "choices": [] })).expect("response decodes");
        assert_eq!(no_choices.text(), "");
    }

    #[test]
    fn first_choice_content_is_returned() {
        let reply: ChatCompletionResponse = serde_json::from_value(json!({
            "choices": [
                { "message": { "content": "<final_result>hello</final_result>" } },
                { "message": { "content": "ignored" } }
            ]
        }))
        .expect("response decodes");
        assert_eq!(reply.text(), "<final_result>hello</final_result>");
    }
}
