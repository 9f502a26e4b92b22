use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use url::Url;

use crate::assembler::FfmpegMode;

pub const DEFAULT_CONFIG_FILE: &str = "signclip.yaml";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const MAX_RETRIES_LIMIT: u32 = 100;
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-05-01-preview";
pub const DEFAULT_ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";
pub const ENDPOINT_ENV: &str = "ENDPOINT_URL";
pub const DEPLOYMENT_ENV: &str = "DEPLOYMENT_NAME";

#[derive(Debug, Clone)]
pub struct Config {
    pub vocabulary: PathBuf,
    pub instructions: PathBuf,
    pub clip_dir: PathBuf,
    pub clip_extension: String,
    pub output: PathBuf,
    pub max_retries: u32,
    pub ffmpeg: FfmpegMode,
    pub model: ModelConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    AzureOpenai,
    Anthropic,
    Replay,
}

impl Provider {
    pub fn default_api_key_env(self) -> Option<&'static str> {
        match self {
            Self::AzureOpenai => Some("AZURE_OPENAI_API_KEY"),
            Self::Anthropic => Some("ANTHROPIC_API_KEY"),
            Self::Replay => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: Provider,
    pub endpoint: Option<Url>,
    pub deployment: Option<String>,
    pub api_version: String,
    pub api_key_env: Option<String>,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub responses: Option<PathBuf>,
}

impl ModelConfig {
    /// Reads the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        let name = self
            .api_key_env
            .as_deref()
            .or_else(|| self.provider.default_api_key_env())
            .ok_or_else(|| anyhow!("model provider {:?} does not take an API key", self.provider))?;
        match env::var(name) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            _ => bail!("{name} is required to call the {:?} model endpoint", self.provider),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    vocabulary: PathBuf,
    instructions: PathBuf,
    clip_dir: PathBuf,
    #[serde(default = "default_clip_extension")]
    clip_extension: String,
    #[serde(default = "default_output")]
    output: PathBuf,
    #[serde(default = "default_max_retries")]
    max_retries: u32,
    #[serde(default)]
    ffmpeg: FfmpegMode,
    model: RawModelConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawModelConfig {
    provider: Provider,
    #[serde(default)]
    endpoint: Option<String>,
    #[serde(default)]
    deployment: Option<String>,
    #[serde(default)]
    api_version: Option<String>,
    #[serde(default)]
    api_key_env: Option<String>,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
    #[serde(default)]
    responses: Option<PathBuf>,
}

fn default_clip_extension() -> String {
    "mp4".to_owned()
}

fn default_output() -> PathBuf {
    PathBuf::from("output.mp4")
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_tokens() -> u32 {
    800
}

fn default_timeout_seconds() -> u64 {
    60
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let raw: RawConfig = serde_yaml::from_str(&contents).map_err(|error| {
            let location = error
                .location()
                .map(|location| format!("line {}, column {}", location.line(), location.column()))
                .unwrap_or_else(|| "unknown location".to_owned());
            anyhow!(
                "failed to parse config {} at {}: {}",
                path.display(),
                location,
                error
            )
        })?;

        let base_dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        Self::from_raw(raw, &base_dir, |name| env::var(name).ok())
    }

    fn from_raw(
        raw: RawConfig,
        base_dir: &Path,
        lookup_env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let clip_extension = raw.clip_extension.trim().trim_start_matches('.').to_owned();
        if clip_extension.is_empty() {
            bail!("clip_extension must not be empty");
        }

        if raw.max_retries > MAX_RETRIES_LIMIT {
            bail!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}, got {}",
                raw.max_retries
            );
        }

        // The endpoint variables name an Azure resource and never redirect other providers.
        let azure_env = |name: &str| {
            (raw.model.provider == Provider::AzureOpenai)
                .then(|| lookup_env(name))
                .flatten()
                .filter(|value| !value.trim().is_empty())
        };
        let endpoint_text = azure_env(ENDPOINT_ENV).or(raw.model.endpoint);
        let endpoint = endpoint_text
            .map(|text| {
                Url::parse(text.trim())
                    .with_context(|| format!("model endpoint '{text}' is not a valid URL"))
            })
            .transpose()?;
        let deployment = azure_env(DEPLOYMENT_ENV).or(raw.model.deployment);

        match raw.model.provider {
            Provider::AzureOpenai => {
                if endpoint.is_none() {
                    bail!("model.endpoint (or {ENDPOINT_ENV}) is required for azure_openai");
                }
                if deployment.is_none() {
                    bail!("model.deployment (or {DEPLOYMENT_ENV}) is required for azure_openai");
                }
            }
            Provider::Anthropic => {}
            Provider::Replay => {
                if raw.model.responses.is_none() {
                    bail!("model.responses is required for the replay provider");
                }
            }
        }

        let resolve = |path: PathBuf| {
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };

        Ok(Self {
            vocabulary: resolve(raw.vocabulary),
            instructions: resolve(raw.instructions),
            clip_dir: resolve(raw.clip_dir),
            clip_extension,
            output: resolve(raw.output),
            max_retries: raw.max_retries,
            ffmpeg: raw.ffmpeg,
            model: ModelConfig {
                provider: raw.model.provider,
                endpoint,
                deployment,
                api_version: raw
                    .model
                    .api_version
                    .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_owned()),
                api_key_env: raw.model.api_key_env,
                max_tokens: raw.model.max_tokens,
                timeout_seconds: raw.model.timeout_seconds,
                responses: raw.model.responses.map(resolve),
            },
        })
    }
}

/// Reads the instruction text used verbatim as the system prompt.
pub fn load_instructions(path: &Path) -> Result<String> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read instructions {}", path.display()))?;
    if text.trim().is_empty() {
        bail!("instructions file {} is empty", path.display());
    }
    Ok(text)
}
