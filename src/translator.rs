use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::info;

use crate::config::{load_instructions, Config};
use crate::generator::{ConstrainedGenerator, GenerationOutcome};
use crate::llm::{build_model, GlossModel};
use crate::validate::GlossSequence;
use crate::vocabulary::{ClipId, ClipResolutionError, Vocabulary};

/// Session state for translations: vocabulary, instructions and model are loaded
/// once and shared read-only across calls.
#[derive(Clone)]
pub struct Translator {
    vocabulary: Arc<Vocabulary>,
    instructions: Arc<str>,
    model: Arc<dyn GlossModel>,
    max_retries: u32,
}

impl Translator {
    pub fn new(
        vocabulary: Arc<Vocabulary>,
        instructions: impl Into<Arc<str>>,
        model: Arc<dyn GlossModel>,
        max_retries: u32,
    ) -> Self {
        Self {
            vocabulary,
            instructions: instructions.into(),
            model,
            max_retries,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let vocabulary = Vocabulary::load(&config.vocabulary)?;
        if vocabulary.is_empty() {
            bail!("vocabulary {} has no entries", config.vocabulary.display());
        }
        let instructions = load_instructions(&config.instructions)?;
        let model = build_model(&config.model).context("failed to set up the model endpoint")?;
        info!(
            words = vocabulary.len(),
            model = %model.label(),
            "translator ready"
        );
        Ok(Self::new(
            Arc::new(vocabulary),
            instructions,
            model,
            config.max_retries,
        ))
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn model_label(&self) -> String {
        self.model.label()
    }

    pub async fn translate(&self, input_text: &str) -> Result<GenerationOutcome> {
        let input = input_text.trim();
        if input.is_empty() {
            bail!("input text is empty");
        }
        ConstrainedGenerator::new(
            self.model.as_ref(),
            &self.vocabulary,
            &self.instructions,
            self.max_retries,
        )
        .generate(input)
        .await
    }

    pub fn clips_for(&self, gloss: &GlossSequence) -> Result<Vec<ClipId>, ClipResolutionError> {
        gloss.clip_ids(&self.vocabulary)
    }
}
