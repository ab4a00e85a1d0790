//! Transcript Chunks
//!
//! Labeled per-segment text and assembly of the final transcript.

use serde::Serialize;
use std::time::Duration;

/// Separator between a chunk's timestamp label and its text
const LABEL_SEPARATOR: &str = ":   ";

/// Format a segment offset as `MM:00`
///
/// Seconds are always `00`: the label marks the segment, not the exact
/// position of the speech inside it.
pub fn format_timestamp(offset: Duration) -> String {
    let minutes = offset.as_secs() / 60;
    format!("{:02}:00", minutes)
}

/// Recognized text for one segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptChunk {
    /// Segment index within the source
    pub index: usize,
    /// `MM:00` label derived from the segment's start offset
    pub timestamp: String,
    /// Recognized text
    pub text: String,
    /// `MM:00:   text`, as written to the persisted transcript
    pub line: String,
}

impl TranscriptChunk {
    pub fn new(index: usize, start: Duration, text: impl Into<String>) -> Self {
        let text = text.into();
        let timestamp = format_timestamp(start);
        let line = format!("{}{}{}", timestamp, LABEL_SEPARATOR, text);
        Self {
            index,
            timestamp,
            text,
            line,
        }
    }
}

/// Join chunk lines in index order, newline-separated
pub fn assemble(chunks: &[TranscriptChunk]) -> String {
    let mut ordered: Vec<&TranscriptChunk> = chunks.iter().collect();
    ordered.sort_by_key(|chunk| chunk.index);
    ordered
        .iter()
        .map(|chunk| chunk.line.as_str())
        .collect::<Vec<_>>()
        .join("\n")
}
