use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use signclip::assembler::VideoAssembler;
use signclip::config::{load_instructions, Config, DEFAULT_CONFIG_FILE};
use signclip::error_codes::{
    classify, CodedError, CONFIG_INVALID, EMPTY_INPUT, INTERNAL_INCONSISTENCY, MISSING_CLIP,
    MODEL_UNAVAILABLE, UNEXPECTED,
};
use signclip::generator::{GenerationOutcome, RetryState};
use signclip::llm::build_model;
use signclip::player::play_video;
use signclip::translator::Translator;
use signclip::validate::{Rejection, Verdict};
use signclip::vocabulary::{ClipId, Vocabulary};

#[derive(Debug, Parser)]
#[command(name = "signclip", version)]
#[command(about = "Translate English sentences into sign-language gloss clip videos")]
struct Cli {
    /// Path to the YAML config file.
    #[arg(short = 'c', long = "config", global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Print machine-readable JSON on stdout.
    #[arg(long = "json", global = true, default_value_t = false)]
    json: bool,
    #[arg(short = 'v', long = "verbose", global = true, default_value_t = false)]
    verbose: bool,
    #[arg(
        short = 'q',
        long = "quiet",
        global = true,
        default_value_t = false,
        conflicts_with = "verbose"
    )]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Translate a sentence into gloss words and assemble the matching clips.
    Translate {
        text: String,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        /// Stop after translation; do not assemble a video.
        #[arg(long = "no-video", default_value_t = false, conflicts_with = "play")]
        no_video: bool,
        /// Play the assembled video with ffplay.
        #[arg(long = "play", default_value_t = false)]
        play: bool,
    },
    /// Assemble a video from gloss words directly, without calling the model.
    Gloss {
        #[arg(required = true)]
        words: Vec<String>,
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
        #[arg(long = "play", default_value_t = false)]
        play: bool,
    },
    /// Validate config, vocabulary, instructions and clip files.
    Check {
        /// Fail when any vocabulary entry has no clip file.
        #[arg(long = "strict", default_value_t = false)]
        strict: bool,
    },
    /// Serve the translation web form.
    #[cfg(feature = "web")]
    Serve {
        #[arg(long = "addr", default_value = "127.0.0.1:8080")]
        addr: std::net::SocketAddr,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    let json_output = cli.json;

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let coded = classify(&error);
            if json_output {
                match serde_json::to_string_pretty(&coded.envelope()) {
                    Ok(text) => println!("{text}"),
                    Err(_) => eprintln!("error: {coded}"),
                }
            } else if coded.code == UNEXPECTED {
                eprintln!("error: {error:#}");
            } else {
                eprintln!("error: {coded}");
            }
            ExitCode::from(coded.exit_code())
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let default_directive = if verbose {
        "signclip=debug"
    } else if quiet {
        "signclip=warn"
    } else {
        "signclip=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)
        .map_err(|error| CodedError::usage(CONFIG_INVALID, format!("{error:#}")))?;

    match cli.command {
        Commands::Translate {
            text,
            output,
            no_video,
            play,
        } => {
            let output = (!no_video).then(|| output.unwrap_or_else(|| config.output.clone()));
            run_translate(&config, &text, output.as_deref(), play, cli.json).await
        }
        Commands::Gloss {
            words,
            output,
            play,
        } => {
            let output = output.unwrap_or_else(|| config.output.clone());
            run_gloss(&config, &words, &output, play, cli.json)
        }
        Commands::Check { strict } => run_check(&cli.config, &config, strict, cli.json),
        #[cfg(feature = "web")]
        Commands::Serve { addr } => signclip::web::serve(&config, addr).await,
    }
}

async fn run_translate(
    config: &Config,
    text: &str,
    output: Option<&Path>,
    play: bool,
    json_output: bool,
) -> Result<()> {
    if text.trim().is_empty() {
        return Err(CodedError::usage(EMPTY_INPUT, "input text is empty").into());
    }
    let translator = Translator::from_config(config).map_err(setup_failure)?;

    let outcome = translator
        .translate(text)
        .await
        .map_err(|error| CodedError::usage(MODEL_UNAVAILABLE, format!("{error:#}")))?;
    let (gloss, attempts) = match outcome {
        GenerationOutcome::Success { gloss, attempts } => (gloss, attempts),
        GenerationOutcome::Exhausted { attempts } => {
            return Err(CodedError::retries_exhausted(&attempts).into());
        }
    };
    let clips = translator
        .clips_for(&gloss)
        .map_err(|error| CodedError::usage(INTERNAL_INCONSISTENCY, error.to_string()))?;

    let written = match output {
        Some(path) => Some(assemble(config, &clips, path)?),
        None => None,
    };

    if json_output {
        print_json(&json!({
            "ok": true,
            "input": text.trim(),
            "gloss": gloss,
            "attempts": attempts,
            "clips": clips,
            "output": written.as_ref().map(|path| path.display().to_string()),
        }))?;
    } else {
        println!("Gloss: {gloss}");
        println!("Attempts: {}", attempts.len());
        println!("Clips: {}", join_clips(&clips));
        if let Some(path) = &written {
            println!("Wrote {}", path.display());
        }
    }

    if play {
        if let Some(path) = &written {
            play_video(path)?;
        }
    }
    Ok(())
}

fn run_gloss(
    config: &Config,
    words: &[String],
    output: &Path,
    play: bool,
    json_output: bool,
) -> Result<()> {
    let vocabulary = Vocabulary::load(&config.vocabulary).map_err(setup_failure)?;
    let candidate = words.join(" ").to_lowercase();
    let gloss = match Verdict::judge(&candidate, &vocabulary) {
        Verdict::Accepted(gloss) => gloss,
        Verdict::Rejected(Rejection::NoPayload) => {
            return Err(CodedError::usage(EMPTY_INPUT, "no gloss words given").into());
        }
        Verdict::Rejected(Rejection::OutOfVocabulary(unknown)) => {
            return Err(CodedError::out_of_vocabulary(&unknown).into());
        }
    };
    let clips = gloss
        .clip_ids(&vocabulary)
        .map_err(|error| CodedError::usage(INTERNAL_INCONSISTENCY, error.to_string()))?;
    let written = assemble(config, &clips, output)?;

    if json_output {
        print_json(&json!({
            "ok": true,
            "gloss": gloss,
            "clips": clips,
            "output": written.display().to_string(),
        }))?;
    } else {
        println!("Clips: {}", join_clips(&clips));
        println!("Wrote {}", written.display());
    }

    if play {
        play_video(&written)?;
    }
    Ok(())
}

fn run_check(config_path: &Path, config: &Config, strict: bool, json_output: bool) -> Result<()> {
    let vocabulary = Vocabulary::load(&config.vocabulary).map_err(setup_failure)?;
    let instructions = load_instructions(&config.instructions).map_err(setup_failure)?;
    let model = build_model(&config.model).map_err(setup_failure)?;

    let max_attempts = RetryState::new(config.max_retries).max_attempts();
    let assembler = assembler_for(config);
    let missing = vocabulary
        .sorted_entries()
        .into_iter()
        .filter(|(_, clip)| !assembler.clip_path(*clip).is_file())
        .map(|(word, clip)| (word.to_owned(), assembler.clip_path(clip)))
        .collect::<Vec<_>>();

    if strict && !missing.is_empty() {
        return Err(CodedError::assembly(
            MISSING_CLIP,
            format!("{} vocabulary clip file(s) are missing", missing.len()),
        )
        .with_details(json!({
            "missing": missing
                .iter()
                .map(|(word, path)| json!({ "word": word, "path": path.display().to_string() }))
                .collect::<Vec<_>>()
        }))
        .into());
    }

    if json_output {
        print_json(&json!({
            "ok": true,
            "config": config_path.display().to_string(),
            "words": vocabulary.len(),
            "instructions_chars": instructions.chars().count(),
            "model": model.label(),
            "max_attempts": max_attempts,
            "missing_clips": missing
                .iter()
                .map(|(word, path)| json!({ "word": word, "path": path.display().to_string() }))
                .collect::<Vec<_>>(),
        }))?;
    } else {
        println!(
            "OK: {} ({} words, model {}, up to {} model call(s) per sentence)",
            config_path.display(),
            vocabulary.len(),
            model.label(),
            max_attempts
        );
        if missing.is_empty() {
            println!("All clip files present in {}", config.clip_dir.display());
        } else {
            println!("Missing clip files: {}", missing.len());
            for (word, path) in &missing {
                println!("  {word}: {}", path.display());
            }
        }
    }
    Ok(())
}

/// Loading failures keep a domain code when one applies and are config errors otherwise.
fn setup_failure(error: anyhow::Error) -> CodedError {
    let coded = classify(&error);
    if coded.code == UNEXPECTED {
        CodedError::usage(CONFIG_INVALID, coded.message)
    } else {
        coded
    }
}

fn assembler_for(config: &Config) -> VideoAssembler {
    VideoAssembler::new(&config.clip_dir, &config.clip_extension, config.ffmpeg)
}

fn assemble(config: &Config, clips: &[ClipId], output: &Path) -> Result<PathBuf> {
    assembler_for(config)
        .assemble(clips, output)
        .map_err(|error| CodedError::from(&error).into())
}

fn join_clips(clips: &[ClipId]) -> String {
    clips
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize JSON output")?;
    println!("{text}");
    Ok(())
}
