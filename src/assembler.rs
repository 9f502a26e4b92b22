use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::vocabulary::ClipId;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FfmpegMode {
    #[default]
    Auto,
    System,
    Sidecar,
}

impl FfmpegMode {
    fn label(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::System => "system",
            Self::Sidecar => "sidecar",
        }
    }
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("missing clip file(s): {}", display_paths(.paths))]
    MissingClips { paths: Vec<PathBuf> },
    #[error("no clips to assemble")]
    EmptySequence,
    #[error("failed to concatenate clips into {}: {message}", .output.display())]
    Concat { output: PathBuf, message: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone)]
pub struct VideoAssembler {
    clip_dir: PathBuf,
    extension: String,
    mode: FfmpegMode,
}

impl VideoAssembler {
    pub fn new(clip_dir: impl Into<PathBuf>, extension: impl Into<String>, mode: FfmpegMode) -> Self {
        Self {
            clip_dir: clip_dir.into(),
            extension: extension.into(),
            mode,
        }
    }

    pub fn clip_path(&self, clip: ClipId) -> PathBuf {
        self.clip_dir.join(clip.file_name(&self.extension))
    }

    /// Resolves every clip to a file, reporting all missing files at once.
    pub fn resolve(&self, clips: &[ClipId]) -> Result<Vec<PathBuf>, AssemblyError> {
        if clips.is_empty() {
            return Err(AssemblyError::EmptySequence);
        }
        let paths = clips
            .iter()
            .map(|clip| self.clip_path(*clip))
            .collect::<Vec<_>>();
        let mut missing = Vec::new();
        for path in &paths {
            if !path.is_file() && !missing.contains(path) {
                warn!(path = %path.display(), "clip file not found");
                missing.push(path.clone());
            }
        }
        if missing.is_empty() {
            Ok(paths)
        } else {
            Err(AssemblyError::MissingClips { paths: missing })
        }
    }

    /// Concatenates the clips in order into `output`. Nothing is written unless
    /// every clip exists and ffmpeg succeeds.
    pub fn assemble(&self, clips: &[ClipId], output: &Path) -> Result<PathBuf, AssemblyError> {
        let paths = self.resolve(clips)?;
        info!(
            clips = paths.len(),
            output = %output.display(),
            mode = self.mode.label(),
            "assembling clip video"
        );
        concat_clips(self.mode, &paths, output).map_err(|error| AssemblyError::Concat {
            output: output.to_path_buf(),
            message: format!("{error:#}"),
        })?;
        Ok(output.to_path_buf())
    }
}

fn concat_clips(mode: FfmpegMode, clips: &[PathBuf], output_path: &Path) -> Result<()> {
    let output_dir = output_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create output folder {}", output_dir.display()))?;

    let mut list = NamedTempFile::new().context("failed to create ffmpeg concat list")?;
    list.write_all(concat_list(clips)?.as_bytes())
        .context("failed to write ffmpeg concat list")?;
    list.flush().context("failed to flush ffmpeg concat list")?;

    let suffix = output_path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{ext}"))
        .unwrap_or_default();
    let staged = tempfile::Builder::new()
        .prefix(".signclip-")
        .suffix(&suffix)
        .tempfile_in(&output_dir)
        .with_context(|| format!("failed to stage output in {}", output_dir.display()))?
        .into_temp_path();

    let ffmpeg_path = resolve_ffmpeg_binary(mode)?;
    let args = ffmpeg_concat_args(list.path(), &staged, output_path);
    run_ffmpeg(&ffmpeg_path, &args, mode)?;

    staged
        .persist(output_path)
        .map_err(|error| anyhow!("failed to move output into {}: {}", output_path.display(), error.error))?;
    Ok(())
}

/// ffconcat list with absolute paths, single quotes escaped the way the demuxer expects.
fn concat_list(clips: &[PathBuf]) -> Result<String> {
    let mut list = String::from("ffconcat version 1.0\n");
    for clip in clips {
        let absolute = fs::canonicalize(clip)
            .with_context(|| format!("failed to resolve clip {}", clip.display()))?;
        let text = absolute.to_string_lossy();
        if text.chars().any(|c| c == '\n' || c == '\r') {
            bail!("clip path contains a line break: {}", absolute.display());
        }
        list.push_str("file '");
        list.push_str(&text.replace('\'', "'\\''"));
        list.push_str("'\n");
    }
    Ok(list)
}

pub fn ffmpeg_concat_args(list_path: &Path, staged_output: &Path, final_output: &Path) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-y".to_owned(),
        "-f".to_owned(),
        "concat".to_owned(),
        "-safe".to_owned(),
        "0".to_owned(),
        "-i".to_owned(),
        list_path.to_string_lossy().into_owned(),
        "-an".to_owned(),
        "-c:v".to_owned(),
        "libx264".to_owned(),
        "-pix_fmt".to_owned(),
        "yuv420p".to_owned(),
    ];
    args.extend(ffmpeg_container_output_args(final_output));
    args.push(staged_output.to_string_lossy().into_owned());
    args
}

/// Container flags are chosen from the final name, since the staged file's suffix mirrors it.
pub fn ffmpeg_container_output_args(output_path: &Path) -> Vec<String> {
    let ext = output_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match ext.as_str() {
        "mov" | "mp4" | "m4v" => vec!["-movflags".to_owned(), "+faststart".to_owned()],
        "" => vec!["-f".to_owned(), "mp4".to_owned()],
        _ => Vec::new(),
    }
}

fn resolve_ffmpeg_binary(mode: FfmpegMode) -> Result<PathBuf> {
    match mode {
        FfmpegMode::Auto | FfmpegMode::System => Ok(PathBuf::from("ffmpeg")),
        FfmpegMode::Sidecar => {
            #[cfg(feature = "sidecar_ffmpeg")]
            {
                let path = ffmpeg_sidecar::paths::ffmpeg_path();
                if !path.exists() {
                    ffmpeg_sidecar::download::auto_download()
                        .context("failed to auto-download ffmpeg sidecar binary")?;
                }
                Ok(path)
            }
            #[cfg(not(feature = "sidecar_ffmpeg"))]
            {
                Err(anyhow!(
                    "ffmpeg sidecar mode requested but signclip was built without `sidecar_ffmpeg`. Rebuild with `--features sidecar_ffmpeg`."
                ))
            }
        }
    }
}

fn run_ffmpeg(ffmpeg_path: &Path, args: &[String], mode: FfmpegMode) -> Result<()> {
    debug!(ffmpeg = %ffmpeg_path.display(), args = %args.join(" "), "running ffmpeg");
    let output = Command::new(ffmpeg_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                anyhow!(
                    "ffmpeg executable not found (mode={}, resolved_path={}). Install ffmpeg (system mode) or use sidecar mode with `--features sidecar_ffmpeg`.",
                    mode.label(),
                    ffmpeg_path.display()
                )
            } else {
                anyhow!(
                    "failed to spawn ffmpeg process (mode={}, resolved_path={}): {error}",
                    mode.label(),
                    ffmpeg_path.display()
                )
            }
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "ffmpeg failed with status {} (mode={}, args='{}', stderr_tail='{}')",
            output.status,
            mode.label(),
            args.join(" "),
            last_n_chars(&stderr, 500)
        );
    }
    Ok(())
}

pub(crate) fn last_n_chars(s: &str, max_chars: usize) -> String {
    let chars = s.chars().collect::<Vec<_>>();
    let start = chars.len().saturating_sub(max_chars);
    chars[start..].iter().collect::<String>().trim().to_owned()
}
