//! The generate → validate → correct loop that keeps model output inside the vocabulary.
//!
//! ```text
//! Init ──request──▶ Validating ──all known──▶ Success
//!                      │    ▲
//!          unknown words│    │request + correction
//!                      ▼    │
//!                    Retrying          (budget spent) ──▶ Failed
//! ```
//!
//! [`next_step`] is the pure transition function; [`ConstrainedGenerator`] drives it
//! against a [`GlossModel`].

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::extract::extract_final_result;
use crate::llm::{Correction, GenerationRequest, GlossModel};
use crate::validate::{GlossSequence, Rejection, Verdict};
use crate::vocabulary::Vocabulary;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Init,
    Validating,
    Retrying,
    Success,
    Failed,
}

/// Retries used so far against the budget. Replaced, never mutated, on each retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    retries_used: u32,
    max_retries: u32,
}

impl RetryState {
    pub fn new(max_retries: u32) -> Self {
        Self {
            retries_used: 0,
            max_retries,
        }
    }

    /// 1-based number of the model call this state belongs to.
    pub fn attempt(self) -> u32 {
        self.retries_used.saturating_add(1)
    }

    pub fn retries_used(self) -> u32 {
        self.retries_used
    }

    pub fn max_attempts(self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn can_retry(self) -> bool {
        self.retries_used < self.max_retries
    }

    fn advanced(self) -> Self {
        Self {
            retries_used: self.retries_used + 1,
            ..self
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Accept,
    Retry(RetryState),
    GiveUp,
}

impl Step {
    pub fn state(self) -> LoopState {
        match self {
            Self::Accept => LoopState::Success,
            Self::Retry(_) => LoopState::Retrying,
            Self::GiveUp => LoopState::Failed,
        }
    }
}

pub fn next_step(retry: RetryState, verdict: &Verdict) -> Step {
    if verdict.is_accepted() {
        Step::Accept
    } else if retry.can_retry() {
        Step::Retry(retry.advanced())
    } else {
        Step::GiveUp
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub candidate: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Success {
        gloss: GlossSequence,
        attempts: Vec<AttemptRecord>,
    },
    /// Every attempt in the budget used words outside the vocabulary (or none at all).
    Exhausted { attempts: Vec<AttemptRecord> },
}

impl GenerationOutcome {
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            Self::Success { attempts, .. } | Self::Exhausted { attempts } => attempts,
        }
    }

    pub fn gloss(&self) -> Option<&GlossSequence> {
        match self {
            Self::Success { gloss, .. } => Some(gloss),
            Self::Exhausted { .. } => None,
        }
    }
}

pub struct ConstrainedGenerator<'a> {
    model: &'a dyn GlossModel,
    vocabulary: &'a Vocabulary,
    instructions: &'a str,
    max_retries: u32,
}

impl<'a> ConstrainedGenerator<'a> {
    pub fn new(
        model: &'a dyn GlossModel,
        vocabulary: &'a Vocabulary,
        instructions: &'a str,
        max_retries: u32,
    ) -> Self {
        Self {
            model,
            vocabulary,
            instructions,
            max_retries,
        }
    }

    /// Runs the loop to a terminal state. `Err` means the endpoint itself failed;
    /// running out of retries is `Ok(GenerationOutcome::Exhausted)`.
    pub async fn generate(&self, input: &str) -> Result<GenerationOutcome> {
        let mut retry = RetryState::new(self.max_retries);
        let mut correction: Option<Correction> = None;
        let mut attempts = Vec::new();
        debug!(
            state = ?LoopState::Init,
            model = %self.model.label(),
            max_attempts = retry.max_attempts(),
            "starting constrained generation"
        );

        loop {
            let request = GenerationRequest {
                instructions: self.instructions,
                input,
                correction: correction.as_ref(),
            };
            let raw = self.model.complete(&request).await.with_context(|| {
                format!(
                    "model call {} of {} failed",
                    retry.attempt(),
                    retry.max_attempts()
                )
            })?;

            let candidate = extract_final_result(&raw);
            let verdict = Verdict::judge(&candidate, self.vocabulary);
            let step = next_step(retry, &verdict);
            log_transition(retry, &candidate, &verdict, step);

            match verdict {
                Verdict::Accepted(gloss) => {
                    attempts.push(AttemptRecord {
                        attempt: retry.attempt(),
                        candidate,
                        rejection: None,
                    });
                    return Ok(GenerationOutcome::Success { gloss, attempts });
                }
                Verdict::Rejected(rejection) => {
                    attempts.push(AttemptRecord {
                        attempt: retry.attempt(),
                        candidate: candidate.clone(),
                        rejection: Some(rejection.clone()),
                    });
                    match step {
                        Step::Retry(next) => {
                            correction = Some(Correction::new(&candidate, &raw, rejection));
                            retry = next;
                        }
                        Step::GiveUp | Step::Accept => {
                            return Ok(GenerationOutcome::Exhausted { attempts });
                        }
                    }
                }
            }
        }
    }
}

fn log_transition(retry: RetryState, candidate: &str, verdict: &Verdict, step: Step) {
    let attempt = retry.attempt();
    match verdict {
        Verdict::Accepted(gloss) => info!(
            attempt,
            state = ?step.state(),
            gloss = %gloss,
            "gloss sequence accepted"
        ),
        Verdict::Rejected(Rejection::NoPayload) => warn!(
            attempt,
            state = ?step.state(),
            "no <final_result> payload in model output"
        ),
        Verdict::Rejected(Rejection::OutOfVocabulary(unknown)) => warn!(
            attempt,
            state = ?step.state(),
            candidate,
            out_of_vocabulary = %unknown.joined(),
            "model output used words outside the vocabulary"
        ),
    }
    if step == Step::GiveUp {
        warn!(
            attempts = attempt,
            "retry budget exhausted without a valid gloss sequence"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::{next_step, RetryState, Step};
    use crate::validate::{Rejection, Verdict};
    use crate::vocabulary::{ClipId, Vocabulary};

    fn vocabulary() -> Vocabulary {
        Vocabulary::from_entries([("hello", ClipId::new(1))]).expect("vocabulary should build")
    }

    #[test]
    fn accepted_verdict_succeeds_regardless_of_budget() {
        let verdict = Verdict::judge("hello", &vocabulary());
        let spent = RetryState {
            retries_used: 3,
            max_retries: 3,
        };
        assert_eq!(next_step(spent, &verdict), Step::Accept);
    }

    #[test]
    fn rejection_retries_until_budget_is_spent() {
        let verdict = Verdict::judge("mars", &vocabulary());
        let mut retry = RetryState::new(3);
        let mut calls = 1;
        while let Step::Retry(next) = next_step(retry, &verdict) {
            retry = next;
            calls += 1;
        }
        assert_eq!(calls, 4);
        assert_eq!(retry.retries_used(), 3);
        assert_eq!(next_step(retry, &verdict), Step::GiveUp);
    }

    #[test]
    fn max_attempts_saturates_instead_of_wrapping() {
        assert_eq!(RetryState::new(u32::MAX).max_attempts(), u32::MAX);
        assert_eq!(RetryState::new(3).max_attempts(), 4);
    }

    #[test]
    fn zero_budget_gives_up_after_first_rejection() {
        let verdict = Verdict::Rejected(Rejection::NoPayload);
        assert_eq!(next_step(RetryState::new(0), &verdict), Step::GiveUp);
    }

    #[test]
    fn retry_state_is_replaced_not_mutated() {
        let verdict = Verdict::judge("mars", &vocabulary());
        let first = RetryState::new(3);
        let Step::Retry(second) = next_step(first, &verdict) else {
            panic!("expected retry");
        };
        assert_eq!(first.attempt(), 1);
        assert_eq!(second.attempt(), 2);
    }
}
