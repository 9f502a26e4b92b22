use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};

use anyhow::{anyhow, bail, Result};
use tracing::info;

/// Plays a video in a local `ffplay` window and blocks until it closes.
/// Press `q` or close the window to stop early.
pub fn play_video(path: &Path) -> Result<()> {
    if !path.is_file() {
        bail!("cannot play {}: file does not exist", path.display());
    }
    info!(path = %path.display(), "playing video");

    let status = Command::new("ffplay")
        .args(ffplay_args(path))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .status()
        .map_err(|error| {
            if error.kind() == ErrorKind::NotFound {
                anyhow!("ffplay executable not found. Install ffmpeg (it ships ffplay) or open {} in any video player.", path.display())
            } else {
                anyhow!("failed to spawn ffplay: {error}")
            }
        })?;

    if !status.success() {
        bail!("ffplay exited with status {status}");
    }
    Ok(())
}

fn ffplay_args(path: &Path) -> Vec<String> {
    vec![
        "-hide_banner".to_owned(),
        "-loglevel".to_owned(),
        "error".to_owned(),
        "-autoexit".to_owned(),
        "-window_title".to_owned(),
        "signclip".to_owned(),
        path.to_string_lossy().into_owned(),
    ]
}
