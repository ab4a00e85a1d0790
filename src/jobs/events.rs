//! Job Events
//!
//! Lifecycle events emitted while a job runs, in emission order:
//! `started`, then `chunk`/`error` per segment, optionally `cancel`, and
//! finally `complete` (or `failed` if the transcript could not be stored).

use super::TranscriptChunk;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// The source was probed and segmentation is about to begin
    Started {
        job_id: String,
        total_segments: usize,
    },
    /// A segment was transcribed
    Chunk(TranscriptChunk),
    /// A segment's transcription failed; the job continues
    Error {
        index: usize,
        message: String,
    },
    /// Cancellation was observed; remaining segments are skipped
    Cancel {
        job_id: String,
    },
    /// The final transcript was persisted
    Complete {
        job_id: String,
        chunks: usize,
        failed_segments: usize,
        cancelled: bool,
        transcript: String,
    },
    /// The final transcript could not be persisted
    Failed {
        job_id: String,
        message: String,
    },
}

impl JobEvent {
    /// Event name used on the wire
    pub fn name(&self) -> &'static str {
        match self {
            Self::Started { .. } => "started",
            Self::Chunk(_) => "chunk",
            Self::Error { .. } => "error",
            Self::Cancel { .. } => "cancel",
            Self::Complete { .. } => "complete",
            Self::Failed { .. } => "failed",
        }
    }
}
