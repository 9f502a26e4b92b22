use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Width of the zero-padded numeric stem used by clip files (`00042.mp4`).
pub const CLIP_STEM_WIDTH: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ClipId(u64);

impl ClipId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn file_name(self, extension: &str) -> String {
        format!("{:0width$}.{}", self.0, extension, width = CLIP_STEM_WIDTH)
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VocabularyError {
    #[error("vocabulary defines '{word}' more than once (keys are compared after lowercasing)")]
    DuplicateWord { word: String },
    #[error("vocabulary contains an empty gloss word")]
    EmptyWord,
    #[error("clip identifier for '{word}' must be a non-negative integer, got {value}")]
    InvalidClipId { word: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("gloss word '{word}' has no clip identifier in the vocabulary")]
pub struct ClipResolutionError {
    pub word: String,
}

/// Read-only mapping from lowercase gloss word to clip identifier.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    entries: HashMap<String, ClipId>,
}

impl Vocabulary {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read vocabulary {}", path.display()))?;
        let raw: RawEntries = serde_json::from_str(&contents).with_context(|| {
            format!(
                "failed to parse vocabulary {} (expected a JSON object of word -> clip id)",
                path.display()
            )
        })?;

        let mut entries = Vec::with_capacity(raw.0.len());
        for (word, value) in raw.0 {
            let clip = value.into_clip_id(&word)?;
            entries.push((word, clip));
        }
        let vocabulary = Self::from_entries(entries)
            .with_context(|| format!("invalid vocabulary {}", path.display()))?;
        Ok(vocabulary)
    }

    pub fn from_entries<I, S>(entries: I) -> Result<Self, VocabularyError>
    where
        I: IntoIterator<Item = (S, ClipId)>,
        S: AsRef<str>,
    {
        let mut map = HashMap::new();
        for (word, clip) in entries {
            let normalized = word.as_ref().trim().to_lowercase();
            if normalized.is_empty() {
                return Err(VocabularyError::EmptyWord);
            }
            if normalized.contains(char::is_whitespace) {
                // Tokens are split on spaces, so this entry can never be matched.
                warn!(word = %normalized, "vocabulary word contains whitespace and is unreachable");
            }
            if map.insert(normalized.clone(), clip).is_some() {
                return Err(VocabularyError::DuplicateWord { word: normalized });
            }
        }
        Ok(Self { entries: map })
    }

    pub fn contains(&self, word: &str) -> bool {
        self.entries.contains_key(word)
    }

    pub fn clip_for(&self, word: &str) -> Option<ClipId> {
        self.entries.get(word).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by word, for stable reports.
    pub fn sorted_entries(&self) -> Vec<(&str, ClipId)> {
        let mut entries = self
            .entries
            .iter()
            .map(|(word, clip)| (word.as_str(), *clip))
            .collect::<Vec<_>>();
        entries.sort_by(|left, right| left.0.cmp(right.0));
        entries
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum RawClipId {
    Number(u64),
    Text(String),
    Other(serde_json::Value),
}

impl RawClipId {
    fn into_clip_id(self, word: &str) -> Result<ClipId, VocabularyError> {
        match self {
            Self::Number(value) => Ok(ClipId(value)),
            Self::Text(text) => text
                .trim()
                .parse::<u64>()
                .map(ClipId)
                .map_err(|_| VocabularyError::InvalidClipId {
                    word: word.to_owned(),
                    value: format!("'{text}'"),
                }),
            Self::Other(value) => Err(VocabularyError::InvalidClipId {
                word: word.to_owned(),
                value: value.to_string(),
            }),
        }
    }
}

/// JSON object entries in document order, keeping duplicate keys so they can be rejected.
struct RawEntries(Vec<(String, RawClipId)>);

impl<'de> Deserialize<'de> for RawEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RawEntries;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a JSON object mapping gloss words to clip identifiers")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((word, clip)) = access.next_entry::<String, RawClipId>()? {
                    entries.push((word, clip));
                }
                Ok(RawEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::{ClipId, Vocabulary, VocabularyError};

    fn write_vocabulary(json: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempdir().expect("tempdir should create");
        let path = dir.path().join("gloss_video.json");
        fs::write(&path, json).expect("vocabulary should write");
        (dir, path)
    }

    #[test]
    fn load_lowercases_words_and_accepts_numeric_strings() {
        let (_dir, path) = write_vocabulary(r#"{"Hello": 1, "world": "00002"}"#);
        let vocabulary = Vocabulary::load(&path).expect("vocabulary should load");

        assert_eq!(vocabulary.len(), 2);
        assert_eq!(vocabulary.clip_for("hello"), Some(ClipId::new(1)));
        assert_eq!(vocabulary.clip_for("world"), Some(ClipId::new(2)));
        assert!(!vocabulary.contains("Hello"));
    }

    #[test]
    fn duplicate_keys_after_lowercasing_are_rejected() {
        let (_dir, path) = write_vocabulary(r#"{"Book": 1, "book": 2}"#);
        let error = Vocabulary::load(&path).expect_err("duplicate should fail");
        let cause = error
            .chain()
            .find_map(|cause| cause.downcast_ref::<VocabularyError>())
            .expect("typed vocabulary error");
        assert_eq!(
            cause,
            &VocabularyError::DuplicateWord {
                word: "book".to_owned()
            }
        );
    }

    #[test]
    fn literal_duplicate_keys_in_json_are_rejected() {
        let (_dir, path) = write_vocabulary(r#"{"book": 1, "book": 1}"#);
        assert!(Vocabulary::load(&path).is_err());
    }

    #[test]
    fn non_numeric_clip_ids_name_the_word() {
        let (_dir, path) = write_vocabulary(r#"{"tree": "oak-clip"}"#);
        let error = Vocabulary::load(&path).expect_err("non-numeric id should fail");
        let message = format!("{error:#}");
        assert!(message.contains("tree"), "message was: {message}");
        assert!(message.contains("oak-clip"), "message was: {message}");
    }

    #[test]
    fn empty_word_is_rejected() {
        let result = Vocabulary::from_entries([("  ", ClipId::new(3))]);
        assert_eq!(result.unwrap_err(), VocabularyError::EmptyWord);
    }

    #[test]
    fn clip_file_name_is_zero_padded_to_five_digits() {
        assert_eq!(ClipId::new(2).file_name("mp4"), "00002.mp4");
        assert_eq!(ClipId::new(123456).file_name("webm"), "123456.webm");
    }

    #[test]
    fn sorted_entries_are_ordered_by_word() {
        let vocabulary =
            Vocabulary::from_entries([("zebra", ClipId::new(9)), ("apple", ClipId::new(4))])
                .expect("vocabulary should build");
        let words = vocabulary
            .sorted_entries()
            .into_iter()
            .map(|(word, _)| word)
            .collect::<Vec<_>>();
        assert_eq!(words, vec!["apple", "zebra"]);
    }
}
