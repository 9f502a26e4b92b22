//! Browser form for translating one sentence at a time.
//!
//! `GET /` renders the form, `POST /translate` runs the generation loop and
//! assembles the clips, and `/videos/*` serves the assembled files. Outputs are
//! named after a hash of the gloss so repeated sentences reuse the same file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Form, State};
use axum::response::Html;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::assembler::{AssemblyError, VideoAssembler};
use crate::config::Config;
use crate::generator::GenerationOutcome;
use crate::translator::Translator;
use crate::validate::GlossSequence;

const VIDEO_NAME_HEX_CHARS: usize = 16;
const DEFAULT_VIDEO_EXTENSION: &str = "mp4";

struct AppState {
    translator: Translator,
    assembler: VideoAssembler,
    output_dir: PathBuf,
    extension: String,
}

#[derive(Debug, Deserialize)]
struct TranslateForm {
    text: String,
}

pub async fn serve(config: &Config, addr: SocketAddr) -> Result<()> {
    let translator = Translator::from_config(config)?;
    let output_dir = config
        .output
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("signclip-videos");
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create video directory {}", output_dir.display()))?;

    let state = Arc::new(AppState {
        translator,
        assembler: VideoAssembler::new(&config.clip_dir, &config.clip_extension, config.ffmpeg),
        output_dir: output_dir.clone(),
        extension: video_extension(&config.output),
    });

    let app = Router::new()
        .route("/", get(index))
        .route("/translate", post(translate))
        .nest_service("/videos", ServeDir::new(&output_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, videos = %output_dir.display(), "serving translation form");
    axum::serve(listener, app)
        .await
        .context("web server stopped unexpectedly")
}

async fn index() -> Html<String> {
    Html(render_page("", None))
}

async fn translate(
    State(state): State<Arc<AppState>>,
    Form(form): Form<TranslateForm>,
) -> Html<String> {
    let text = form.text.trim().to_owned();
    if text.is_empty() {
        return Html(render_page("", Some(error_block("Enter a sentence to translate."))));
    }

    let outcome = match state.translator.translate(&text).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(error = %format!("{err:#}"), "model request failed");
            return Html(render_page(
                &text,
                Some(error_block(&format!("Model request failed: {err:#}"))),
            ));
        }
    };
    let gloss = match outcome {
        GenerationOutcome::Success { gloss, .. } => gloss,
        GenerationOutcome::Exhausted { attempts } => {
            warn!(attempts = attempts.len(), "no valid gloss for web request");
            return Html(render_page(
                &text,
                Some(error_block(&format!(
                    "No valid gloss sequence after {} attempt(s). Try rephrasing the sentence.",
                    attempts.len()
                ))),
            ));
        }
    };

    let body = match assemble_for_web(&state, &gloss).await {
        Ok(file_name) => result_block(&gloss, Some(&file_name)),
        Err(message) => format!("{}{}", result_block(&gloss, None), error_block(&message)),
    };
    Html(render_page(&text, Some(body)))
}

/// Returns the served file name, or a message for the page on failure.
async fn assemble_for_web(
    state: &AppState,
    gloss: &GlossSequence,
) -> std::result::Result<String, String> {
    let clips = state
        .translator
        .clips_for(gloss)
        .map_err(|err| err.to_string())?;
    let file_name = video_file_name(gloss, &state.extension);
    let output = state.output_dir.join(&file_name);
    if output.is_file() {
        return Ok(file_name);
    }

    let assembler = state.assembler.clone();
    let joined = tokio::task::spawn_blocking(move || assembler.assemble(&clips, &output)).await;
    match joined {
        Ok(Ok(_)) => Ok(file_name),
        Ok(Err(AssemblyError::MissingClips { paths })) => Err(format!(
            "Missing clip files: {}",
            paths
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )),
        Ok(Err(err)) => Err(err.to_string()),
        Err(err) => Err(format!("assembly task failed: {err}")),
    }
}

/// Served files take the configured output's container; clips may use any extension.
fn video_extension(output: &Path) -> String {
    output
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .unwrap_or(DEFAULT_VIDEO_EXTENSION)
        .to_ascii_lowercase()
}

fn video_file_name(gloss: &GlossSequence, extension: &str) -> String {
    let digest = Sha256::digest(gloss.to_string().as_bytes());
    let hex = format!("{digest:x}");
    format!("{}.{}", &hex[..VIDEO_NAME_HEX_CHARS], extension)
}

fn result_block(gloss: &GlossSequence, video: Option<&str>) -> String {
    let mut block = format!(
        "<section><h2>Gloss</h2><p class=\"gloss\">{}</p>",
        escape_html(&gloss.to_string())
    );
    if let Some(file_name) = video {
        block.push_str(&format!(
            "<video controls autoplay src=\"/videos/{}\"></video>",
            escape_html(file_name)
        ));
    }
    block.push_str("</section>");
    block
}

fn error_block(message: &str) -> String {
    format!("<p class=\"error\">{}</p>", escape_html(message))
}

fn render_page(text: &str, body: Option<String>) -> String {
    format!(
        r#"<!doctype html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>signclip</title>
<style>
body {{ font-family: sans-serif; max-width: 48rem; margin: 2rem auto; }}
textarea {{ width: 100%; }}
.error {{ color: #b00020; }}
video {{ max-width: 100%; }}
</style>
</head>
<body>
<h1>English to sign gloss</h1>
<form method="post" action="/translate">
<textarea name="text" rows="3">{}</textarea>
<button type="submit">Translate</button>
</form>
{}
</body>
</html>
"#,
        escape_html(text),
        body.unwrap_or_default()
    )
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
