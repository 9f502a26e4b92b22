//! Language model endpoints that turn an English sentence into a tagged gloss answer.
//!
//! Every provider receives the same [`GenerationRequest`]: the session's system
//! instructions, the user's sentence, and on retries a [`Correction`] naming the
//! words the previous answer used from outside the dictionary. Generation
//! parameters are fixed to deterministic values so that retries differ only by
//! the feedback they carry.

pub mod anthropic;
pub mod azure;
pub mod replay;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;

use crate::config::{ModelConfig, Provider};
use crate::extract::{FINAL_RESULT_CLOSE, FINAL_RESULT_OPEN};
use crate::validate::Rejection;

const RAW_EXCERPT_CHARS: usize = 500;

/// Feedback about the previous attempt, carried into the next request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correction {
    previous_output: String,
    rejection: Rejection,
}

impl Correction {
    /// `candidate` is the extracted answer; `raw` is the full model text, quoted
    /// back only when nothing could be extracted.
    pub fn new(candidate: &str, raw: &str, rejection: Rejection) -> Self {
        let previous_output = match rejection {
            Rejection::NoPayload => excerpt(raw, RAW_EXCERPT_CHARS),
            Rejection::OutOfVocabulary(_) => candidate.to_owned(),
        };
        Self {
            previous_output,
            rejection,
        }
    }

    pub fn previous_output(&self) -> &str {
        &self.previous_output
    }

    pub fn rejection(&self) -> &Rejection {
        &self.rejection
    }

    pub fn message(&self) -> String {
        match &self.rejection {
            Rejection::OutOfVocabulary(unknown) => format!(
                "The first generate attempt was: {} and the output has these words from outside dictionary: {}. Please try again.",
                self.previous_output,
                unknown.joined()
            ),
            Rejection::NoPayload => format!(
                "The first generate attempt was: {} and it did not contain a {FINAL_RESULT_OPEN}...{FINAL_RESULT_CLOSE} answer made of dictionary words. Please try again.",
                self.previous_output
            ),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GenerationRequest<'a> {
    pub instructions: &'a str,
    pub input: &'a str,
    pub correction: Option<&'a Correction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    System,
    User,
}

impl TurnRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub text: String,
}

impl GenerationRequest<'_> {
    /// System turn, user sentence, then the correction as a follow-up user turn.
    pub fn turns(&self) -> Vec<ChatTurn> {
        let mut turns = vec![
            ChatTurn {
                role: TurnRole::System,
                text: self.instructions.to_owned(),
            },
            ChatTurn {
                role: TurnRole::User,
                text: self.input.to_owned(),
            },
        ];
        if let Some(correction) = self.correction {
            turns.push(ChatTurn {
                role: TurnRole::User,
                text: correction.message(),
            });
        }
        turns
    }
}

#[async_trait]
pub trait GlossModel: Send + Sync {
    fn label(&self) -> String;

    /// Returns the raw model text for one request.
    async fn complete(&self, request: &GenerationRequest<'_>) -> Result<String>;
}

pub fn build_model(config: &ModelConfig) -> Result<Arc<dyn GlossModel>> {
    match config.provider {
        Provider::Replay => {
            let path = config
                .responses
                .as_deref()
                .ok_or_else(|| anyhow!("model.responses is required for the replay provider"))?;
            Ok(Arc::new(replay::ReplayModel::load(path)?))
        }
        Provider::AzureOpenai => {
            let http = http_client(config)?;
            Ok(Arc::new(azure::AzureOpenAiClient::new(
                http,
                config,
                config.api_key()?,
            )?))
        }
        Provider::Anthropic => {
            let http = http_client(config)?;
            Ok(Arc::new(anthropic::AnthropicClient::new(
                http,
                config,
                config.api_key()?,
            )))
        }
    }
}

fn http_client(config: &ModelConfig) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_seconds))
        .build()
        .context("failed to create HTTP client")
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_owned();
    }
    let mut cut = trimmed.chars().take(max_chars).collect::<String>();
    cut.push_str("...");
    cut
}
