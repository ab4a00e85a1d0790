//! Audio Segmenter
//!
//! Splits a source media file into fixed-length compressed audio segments.
//! Segments are produced lazily, one per call, so at most one segment file
//! exists per job at any time. A stream is not restartable: a fresh call to
//! [`Segmenter::segment`] re-probes and re-slices from the start.

use super::probe::probe_duration;
use crate::config::SegmentationSettings;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Media errors
#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("Failed to probe media: {0}")]
    Probe(String),

    #[error("Failed to slice segment {index}: {reason}")]
    Slice { index: usize, reason: String },

    #[error("Media tool not found: {0}")]
    ToolNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Segment layout derived from the probed duration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentPlan {
    segment_length: Duration,
    count: usize,
}

impl SegmentPlan {
    /// Plan `ceil(duration / segment_length)` segments
    pub fn new(duration_secs: f64, segment_length: Duration) -> Self {
        let length = segment_length.as_secs_f64();
        let count = if duration_secs <= 0.0 || length <= 0.0 {
            0
        } else {
            (duration_secs / length).ceil() as usize
        };

        Self {
            segment_length,
            count,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn segment_length(&self) -> Duration {
        self.segment_length
    }

    /// Start offset of segment `index`, saturating at `Duration::MAX`
    pub fn start(&self, index: usize) -> Duration {
        u32::try_from(index)
            .ok()
            .and_then(|index| self.segment_length.checked_mul(index))
            .unwrap_or(Duration::MAX)
    }
}

/// One bounded slice of the source audio on disk
///
/// The file is removed by [`Segment::discard`], or on drop as a fallback.
#[derive(Debug)]
pub struct Segment {
    index: usize,
    start: Duration,
    path: PathBuf,
    discarded: bool,
}

impl Segment {
    pub fn new(index: usize, start: Duration, path: PathBuf) -> Self {
        Self {
            index,
            start,
            path,
            discarded: false,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the segment file
    pub async fn discard(mut self) {
        self.discarded = true;
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => tracing::debug!("Removed segment file {:?}", self.path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove segment file {:?}: {}", self.path, e),
        }
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if !self.discarded && self.path.exists() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!("Failed to remove segment file {:?}: {}", self.path, e);
            }
        }
    }
}

/// Lazy sequence of segments for one source file
#[async_trait]
pub trait SegmentStream: Send {
    /// Number of segments planned (skipped segments included)
    fn total(&self) -> usize;

    /// Produce the next segment, skipping any that fail to slice
    async fn next_segment(&mut self) -> Option<Segment>;
}

/// Produces segment streams from source files
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Probe `source` and prepare a lazy segment stream
    async fn segment(
        &self,
        source: &Path,
        segment_length: Duration,
    ) -> Result<Box<dyn SegmentStream>, MediaError>;
}

/// Segmenter backed by the ffprobe and ffmpeg binaries
pub struct FfmpegSegmenter {
    settings: SegmentationSettings,
}

impl FfmpegSegmenter {
    pub fn new(settings: SegmentationSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Segmenter for FfmpegSegmenter {
    async fn segment(
        &self,
        source: &Path,
        segment_length: Duration,
    ) -> Result<Box<dyn SegmentStream>, MediaError> {
        tracing::info!("Splitting audio file: {:?}", source);

        let duration = probe_duration(&self.settings.ffprobe_path, source).await?;
        if duration > self.settings.max_duration_seconds as f64 {
            return Err(MediaError::Probe(format!(
                "duration {:.0}s exceeds the {}s limit",
                duration, self.settings.max_duration_seconds
            )));
        }
        let plan = SegmentPlan::new(duration, segment_length);
        tracing::info!(
            "Audio duration: {:.2}s, {} segment(s) of {}s",
            duration,
            plan.count(),
            segment_length.as_secs()
        );

        let work_dir = self.settings.work_dir();
        tokio::fs::create_dir_all(&work_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix("chunkscribe-")
            .tempdir_in(&work_dir)?;

        Ok(Box::new(FfmpegSegmentStream {
            source: source.to_path_buf(),
            plan,
            next_index: 0,
            scratch,
            settings: self.settings.clone(),
        }))
    }
}

/// Segment stream slicing one index at a time with ffmpeg
pub struct FfmpegSegmentStream {
    source: PathBuf,
    plan: SegmentPlan,
    next_index: usize,
    /// Job-private directory; removed with any leftovers on drop
    scratch: tempfile::TempDir,
    settings: SegmentationSettings,
}

impl FfmpegSegmentStream {
    async fn slice(&self, index: usize) -> Result<Segment, MediaError> {
        let start = self.plan.start(index);
        let output = self.scratch.path().join(format!(
            "segment_{:04}.{}",
            index, self.settings.extension
        ));

        let mut command = Command::new(&self.settings.ffmpeg_path);
        command
            .arg("-y")
            .arg("-v")
            .arg("error")
            .arg("-ss")
            .arg(format!("{:.3}", start.as_secs_f64()))
            .arg("-t")
            .arg(format!("{:.3}", self.plan.segment_length().as_secs_f64()))
            .arg("-i")
            .arg(&self.source)
            .arg("-vn")
            .arg("-c:a")
            .arg(&self.settings.codec)
            .arg("-q:a")
            .arg(self.settings.quality.to_string())
            .arg(&output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!("ffmpeg command: {:?}", command);

        let result = command.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MediaError::ToolNotFound(self.settings.ffmpeg_path.clone())
            } else {
                MediaError::Slice {
                    index,
                    reason: format!("failed to run ffmpeg: {}", e),
                }
            }
        })?;

        if !result.status.success() {
            let _ = tokio::fs::remove_file(&output).await;
            return Err(MediaError::Slice {
                index,
                reason: format!(
                    "ffmpeg exited with {}: {}",
                    result.status,
                    String::from_utf8_lossy(&result.stderr).trim()
                ),
            });
        }

        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            return Err(MediaError::Slice {
                index,
                reason: "output file was not created".to_string(),
            });
        }

        tracing::info!("Segment file created: {:?}", output);
        Ok(Segment::new(index, start, output))
    }
}

#[async_trait]
impl SegmentStream for FfmpegSegmentStream {
    fn total(&self) -> usize {
        self.plan.count()
    }

    async fn next_segment(&mut self) -> Option<Segment> {
        while self.next_index < self.plan.count() {
            let index = self.next_index;
            self.next_index += 1;

            match self.slice(index).await {
                Ok(segment) => return Some(segment),
                Err(e) => tracing::warn!("Skipping segment {}: {}", index, e),
            }
        }
        None
    }
}
