use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::{json, Value};

use crate::assembler::AssemblyError;
use crate::generator::AttemptRecord;
use crate::validate::OutOfVocabulary;
use crate::vocabulary::VocabularyError;

pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
pub const VOCABULARY_INVALID: &str = "VOCABULARY_INVALID";
pub const TRANSLATION_FAILED: &str = "TRANSLATION_FAILED";
pub const GLOSS_OUT_OF_VOCABULARY: &str = "GLOSS_OUT_OF_VOCABULARY";
pub const MISSING_CLIP: &str = "MISSING_CLIP";
pub const ASSEMBLY_FAILED: &str = "ASSEMBLY_FAILED";
pub const INTERNAL_INCONSISTENCY: &str = "INTERNAL_INCONSISTENCY";
pub const MODEL_UNAVAILABLE: &str = "MODEL_UNAVAILABLE";
pub const EMPTY_INPUT: &str = "EMPTY_INPUT";
pub const UNEXPECTED: &str = "UNEXPECTED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    Usage,
    Translation,
    Assembly,
}

impl CodedErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Usage => 1,
            Self::Translation => 2,
            Self::Assembly => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, message, CodedErrorKind::Usage)
    }

    pub fn translation(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, message, CodedErrorKind::Translation)
    }

    pub fn assembly(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, message, CodedErrorKind::Assembly)
    }

    fn new(code: &'static str, message: impl Into<String>, kind: CodedErrorKind) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }

    pub fn retries_exhausted(attempts: &[AttemptRecord]) -> Self {
        Self::translation(
            TRANSLATION_FAILED,
            format!(
                "no valid gloss sequence after {} model call(s)",
                attempts.len()
            ),
        )
        .with_details(json!({ "attempts": attempts }))
    }

    pub fn out_of_vocabulary(unknown: &OutOfVocabulary) -> Self {
        Self::translation(
            GLOSS_OUT_OF_VOCABULARY,
            format!("words outside the vocabulary: {}", unknown.joined()),
        )
        .with_details(json!({ "out_of_vocabulary": unknown }))
    }
}

impl From<&AssemblyError> for CodedError {
    fn from(error: &AssemblyError) -> Self {
        match error {
            AssemblyError::MissingClips { paths } => {
                Self::assembly(MISSING_CLIP, error.to_string()).with_details(json!({
                    "missing": paths
                        .iter()
                        .map(|path| path.display().to_string())
                        .collect::<Vec<_>>()
                }))
            }
            AssemblyError::EmptySequence | AssemblyError::Concat { .. } => {
                Self::assembly(ASSEMBLY_FAILED, error.to_string())
            }
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Coded form of any error: an explicit `CodedError` in the chain wins, then known
/// domain errors, then a generic usage failure.
pub fn classify(error: &Error) -> CodedError {
    if let Some(coded) = find_coded_error(error) {
        return coded.clone();
    }
    for cause in error.chain() {
        if let Some(assembly) = cause.downcast_ref::<AssemblyError>() {
            return CodedError::from(assembly);
        }
        if cause.downcast_ref::<VocabularyError>().is_some() {
            return CodedError::usage(VOCABULARY_INVALID, format!("{error:#}"));
        }
    }
    CodedError::usage(UNEXPECTED, format!("{error:#}"))
}
