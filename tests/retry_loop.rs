use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use signclip::generator::GenerationOutcome;
use signclip::llm::{ChatTurn, GenerationRequest, GlossModel, TurnRole};
use signclip::translator::Translator;
use signclip::validate::Rejection;
use signclip::vocabulary::{ClipId, Vocabulary};

const INSTRUCTIONS: &str = "Answer with gloss words inside <final_result></final_result>.";

/// Answers from a script and keeps every request's turns for inspection.
struct ScriptedModel {
    script: Vec<&'static str>,
    seen: Mutex<Vec<Vec<ChatTurn>>>,
}

impl ScriptedModel {
    fn new(script: Vec<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            script,
            seen: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<Vec<ChatTurn>> {
        self.seen.lock().expect("lock should not be poisoned").clone()
    }
}

#[async_trait]
impl GlossModel for ScriptedModel {
    fn label(&self) -> String {
        "scripted".to_owned()
    }

    async fn complete(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let mut seen = self.seen.lock().expect("lock should not be poisoned");
        let index = seen.len();
        seen.push(request.turns());
        self.script
            .get(index)
            .map(|answer| (*answer).to_owned())
            .ok_or_else(|| anyhow!("model called more often than scripted ({})", index + 1))
    }
}

struct FailingModel;

#[async_trait]
impl GlossModel for FailingModel {
    fn label(&self) -> String {
        "failing".to_owned()
    }

    async fn complete(&self, _request: &GenerationRequest<'_>) -> Result<String> {
        Err(anyhow!("connection refused"))
    }
}

fn vocabulary() -> Arc<Vocabulary> {
    Arc::new(
        Vocabulary::from_entries([
            ("hello", ClipId::new(1)),
            ("world", ClipId::new(2)),
            ("you", ClipId::new(7)),
        ])
        .expect("vocabulary should build"),
    )
}

fn translator(model: Arc<dyn GlossModel>, max_retries: u32) -> Translator {
    Translator::new(vocabulary(), INSTRUCTIONS, model, max_retries)
}

#[tokio::test]
async fn valid_first_answer_is_accepted_without_retry() {
    let model = ScriptedModel::new(vec!["<final_result>hello world</final_result>"]);
    let outcome = translator(model.clone(), 3)
        .translate("Hello, world!")
        .await
        .expect("translation should run");

    let gloss = outcome.gloss().expect("gloss should be accepted");
    assert_eq!(gloss.words(), ["hello", "world"]);
    assert_eq!(outcome.attempts().len(), 1);

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    let turns = &requests[0];
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, TurnRole::System);
    assert_eq!(turns[0].text, INSTRUCTIONS);
    assert_eq!(turns[1].role, TurnRole::User);
    assert_eq!(turns[1].text, "Hello, world!");
}

#[tokio::test]
async fn retry_carries_previous_answer_and_unknown_words() {
    let model = ScriptedModel::new(vec![
        "<final_result>hello mars</final_result>",
        "<final_result>hello world</final_result>",
    ]);
    let outcome = translator(model.clone(), 3)
        .translate("hello mars")
        .await
        .expect("translation should run");
    assert!(matches!(outcome, GenerationOutcome::Success { .. }));

    let requests = model.requests();
    assert_eq!(requests.len(), 2);
    let retry = &requests[1];
    assert_eq!(retry.len(), 3, "retry should append one correction turn");
    assert_eq!(retry[2].role, TurnRole::User);
    assert_eq!(
        retry[2].text,
        "The first generate attempt was: hello mars and the output has these words from outside dictionary: mars. Please try again."
    );
}

#[tokio::test]
async fn only_the_latest_correction_is_sent() {
    let model = ScriptedModel::new(vec![
        "<final_result>mars</final_result>",
        "<final_result>venus</final_result>",
        "<final_result>world</final_result>",
    ]);
    translator(model.clone(), 3)
        .translate("a planet")
        .await
        .expect("translation should run");

    let third = &model.requests()[2];
    assert_eq!(third.len(), 3);
    assert!(third[2].text.contains("was: venus"));
    assert!(!third[2].text.contains("mars"));
}

#[tokio::test]
async fn gives_up_after_max_retries_plus_one_calls() {
    let model = ScriptedModel::new(vec!["<final_result>mars</final_result>"; 10]);
    let outcome = translator(model.clone(), 3)
        .translate("mars")
        .await
        .expect("translation should run");

    match outcome {
        GenerationOutcome::Exhausted { attempts } => {
            assert_eq!(attempts.len(), 4);
            assert_eq!(
                attempts.iter().map(|record| record.attempt).collect::<Vec<_>>(),
                vec![1, 2, 3, 4]
            );
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert_eq!(model.requests().len(), 4);
}

#[tokio::test]
async fn zero_retries_means_a_single_call() {
    let model = ScriptedModel::new(vec!["<final_result>mars</final_result>"; 3]);
    let outcome = translator(model.clone(), 0)
        .translate("mars")
        .await
        .expect("translation should run");
    assert!(outcome.gloss().is_none());
    assert_eq!(model.requests().len(), 1);
}

#[tokio::test]
async fn missing_tag_is_rejected_and_retried() {
    let model = ScriptedModel::new(vec![
        "hello world",
        "<final_result>hello you</final_result>",
    ]);
    let outcome = translator(model.clone(), 3)
        .translate("hello to you")
        .await
        .expect("translation should run");

    assert_eq!(outcome.attempts()[0].candidate, "");
    assert_eq!(outcome.attempts()[0].rejection, Some(Rejection::NoPayload));
    assert_eq!(
        outcome.gloss().map(ToString::to_string).as_deref(),
        Some("hello you")
    );
    let correction = &model.requests()[1][2].text;
    assert!(correction.contains("hello world"));
    assert!(correction.contains("<final_result>"));
}

#[tokio::test]
async fn empty_reply_is_retried_like_a_missing_tag() {
    let model = ScriptedModel::new(vec!["", "<final_result>hello</final_result>"]);
    let outcome = translator(model.clone(), 3)
        .translate("hello")
        .await
        .expect("empty reply should not abort the translation");

    assert_eq!(outcome.attempts().len(), 2);
    assert_eq!(outcome.attempts()[0].rejection, Some(Rejection::NoPayload));
    assert_eq!(
        outcome.gloss().map(ToString::to_string).as_deref(),
        Some("hello")
    );
    assert_eq!(model.requests().len(), 2);
}

#[tokio::test]
async fn repeated_valid_words_keep_their_order() {
    let model = ScriptedModel::new(vec!["<final_result>world  hello world</final_result>"]);
    let translator = translator(model, 3);
    let outcome = translator
        .translate("world hello world")
        .await
        .expect("translation should run");
    let gloss = outcome.gloss().expect("gloss should be accepted");
    let clips = translator.clips_for(gloss).expect("clips should resolve");
    assert_eq!(clips, vec![ClipId::new(2), ClipId::new(1), ClipId::new(2)]);
}

#[tokio::test]
async fn endpoint_failure_is_an_error_not_exhaustion() {
    let error = translator(Arc::new(FailingModel), 3)
        .translate("hello")
        .await
        .expect_err("endpoint failure should surface");
    assert!(format!("{error:#}").contains("connection refused"));
}

#[tokio::test]
async fn empty_input_is_rejected_before_calling_the_model() {
    let model = ScriptedModel::new(vec![]);
    let error = translator(model.clone(), 3)
        .translate("   ")
        .await
        .expect_err("empty input should fail");
    assert!(error.to_string().contains("empty"));
    assert!(model.requests().is_empty());
}
