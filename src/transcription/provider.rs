//! Transcription Provider Trait
//!
//! Common interface for remote speech-to-text backends. Each call consumes a
//! single audio segment file and returns its text.

use crate::config::ApiKey;
use async_trait::async_trait;
use std::path::Path;

/// Result of transcribing one segment
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    /// Transcribed text
    pub text: String,
    /// Request duration in milliseconds
    pub duration_ms: u64,
    /// Provider that performed the transcription
    pub provider: String,
}

/// Transcription errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum TranscriptionError {
    #[error("Invalid audio: {0}")]
    InvalidAudio(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Timed out after {0}s")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Transcription failed: {0}")]
    Failed(String),
}

impl From<std::io::Error> for TranscriptionError {
    fn from(err: std::io::Error) -> Self {
        TranscriptionError::Io(err.to_string())
    }
}

/// Trait for transcription providers
///
/// Implementations must not retry: a failure is final for that segment.
#[async_trait]
pub trait TranscriptionProvider: Send + Sync {
    /// Transcribe the audio file at `file` in the given language
    async fn transcribe_segment(
        &self,
        file: &Path,
        api_key: &ApiKey,
        language: &str,
    ) -> Result<TranscriptionResult, TranscriptionError>;

    /// Get provider name
    fn name(&self) -> &'static str;
}
