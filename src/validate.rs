use std::fmt;

use serde::Serialize;

use crate::vocabulary::{ClipId, ClipResolutionError, Vocabulary};

/// Non-empty tokens of a candidate, split on single spaces.
pub fn gloss_tokens(candidate: &str) -> impl Iterator<Item = &str> {
    candidate
        .split(' ')
        .filter(|token| !token.trim().is_empty())
}

/// Tokens of a candidate that are absent from the vocabulary, in order, duplicates kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OutOfVocabulary(Vec<String>);

impl OutOfVocabulary {
    pub fn tokens(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Comma-joined form sent back to the model; empty means every token was known.
    pub fn joined(&self) -> String {
        self.0.join(",")
    }
}

pub fn find_out_of_vocabulary(candidate: &str, vocabulary: &Vocabulary) -> OutOfVocabulary {
    OutOfVocabulary(
        gloss_tokens(candidate)
            .filter(|token| !vocabulary.contains(token))
            .map(ToOwned::to_owned)
            .collect(),
    )
}

/// A gloss sequence whose every word was found in the vocabulary at validation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct GlossSequence(Vec<String>);

impl GlossSequence {
    pub fn words(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn clip_ids(&self, vocabulary: &Vocabulary) -> Result<Vec<ClipId>, ClipResolutionError> {
        self.0
            .iter()
            .map(|word| {
                vocabulary
                    .clip_for(word)
                    .ok_or_else(|| ClipResolutionError { word: word.clone() })
            })
            .collect()
    }
}

impl fmt::Display for GlossSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "tokens", rename_all = "snake_case")]
pub enum Rejection {
    /// Nothing usable was extracted from the model output.
    NoPayload,
    OutOfVocabulary(OutOfVocabulary),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(GlossSequence),
    Rejected(Rejection),
}

impl Verdict {
    pub fn judge(candidate: &str, vocabulary: &Vocabulary) -> Self {
        let tokens = gloss_tokens(candidate).collect::<Vec<_>>();
        if tokens.is_empty() {
            return Self::Rejected(Rejection::NoPayload);
        }

        let unknown = find_out_of_vocabulary(candidate, vocabulary);
        if unknown.is_empty() {
            Self::Accepted(GlossSequence(
                tokens.into_iter().map(ToOwned::to_owned).collect(),
            ))
        } else {
            Self::Rejected(Rejection::OutOfVocabulary(unknown))
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}
