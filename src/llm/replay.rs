use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::{GenerationRequest, GlossModel};

/// Offline endpoint answering with canned responses in order; the last one repeats.
#[derive(Debug)]
pub struct ReplayModel {
    responses: Vec<String>,
    calls: AtomicUsize,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReplayFile {
    List(Vec<String>),
    Keyed { responses: Vec<String> },
}

impl ReplayModel {
    pub fn new(responses: Vec<String>) -> Result<Self> {
        if responses.is_empty() {
            bail!("replay model needs at least one response");
        }
        Ok(Self {
            responses,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read replay responses {}", path.display()))?;
        let file: ReplayFile = serde_yaml::from_str(&contents).with_context(|| {
            format!(
                "failed to parse replay responses {} (expected a list of strings)",
                path.display()
            )
        })?;
        let responses = match file {
            ReplayFile::List(responses) | ReplayFile::Keyed { responses } => responses,
        };
        Self::new(responses)
            .with_context(|| format!("replay responses {} are empty", path.display()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GlossModel for ReplayModel {
    fn label(&self) -> String {
        format!("replay:{}", self.responses.len())
    }

    async fn complete(&self, _request: &GenerationRequest<'_>) -> Result<String> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        let last = self.responses.len() - 1;
        Ok(self.responses[index.min(last)].clone())
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::ReplayModel;
    use crate::llm::{GenerationRequest, GlossModel};

    const REQUEST: GenerationRequest<'static> = GenerationRequest {
        instructions: "system",
        input: "input",
        correction: None,
    };

    #[tokio::test]
    async fn responses_replay_in_order_and_last_repeats() {
        let model = ReplayModel::new(vec!["a".to_owned(), "b".to_owned()]).expect("model");
        assert_eq!(model.complete(&REQUEST).await.expect("first"), "a");
        assert_eq!(model.complete(&REQUEST).await.expect("second"), "b");
        assert_eq!(model.complete(&REQUEST).await.expect("third"), "b");
        assert_eq!(model.calls(), 3);
    }

    #[test]
    fn load_accepts_plain_and_keyed_lists() {
        let dir = tempdir().expect("tempdir should create");
        let plain = dir.path().join("plain.yaml");
        fs::write(&plain, "- \"<final_result>hello</final_result>\"\n").expect("write");
        let keyed = dir.path().join("keyed.yaml");
        fs::write(&keyed, "responses:\n  - one\n  - two\n").expect("write");

        assert_eq!(ReplayModel::load(&plain).expect("plain").responses.len(), 1);
        assert_eq!(ReplayModel::load(&keyed).expect("keyed").responses.len(), 2);
    }

    #[test]
    fn empty_list_is_rejected() {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("empty.yaml");
        fs::write(&path, "[]\n").expect("write");
        assert!(ReplayModel::load(&path).is_err());
    }
}
