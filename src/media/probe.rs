//! Duration Probe
//!
//! Reads the total duration of a media file with ffprobe.

use super::MediaError;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Probe the duration of `source` in seconds
pub async fn probe_duration(ffprobe_path: &str, source: &Path) -> Result<f64, MediaError> {
    let mut command = Command::new(ffprobe_path);
    command
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(source)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!("ffprobe command: {:?}", command);

    let output = command.output().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MediaError::ToolNotFound(ffprobe_path.to_string())
        } else {
            MediaError::Probe(format!("failed to run ffprobe: {}", e))
        }
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaError::Probe(format!(
            "ffprobe exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

/// Parse ffprobe's bare `format=duration` output
pub fn parse_duration(output: &str) -> Result<f64, MediaError> {
    let value = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| MediaError::Probe("ffprobe reported no duration".to_string()))?;

    let duration: f64 = value
        .parse()
        .map_err(|_| MediaError::Probe(format!("unreadable duration: {:?}", value)))?;

    if !duration.is_finite() || duration < 0.0 {
        return Err(MediaError::Probe(format!("invalid duration: {}", duration)));
    }

    Ok(duration)
}
