//! OpenAI-compatible API Provider
//!
//! Cloud transcription through the `/audio/transcriptions` endpoint shared by
//! OpenAI and Groq.

use super::{TranscriptionError, TranscriptionProvider, TranscriptionResult};
use crate::config::{ApiKey, ProviderKind, TranscriptionSettings};
use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};

const DEFAULT_TIMEOUT_SECONDS: u64 = 120;

/// Transcription provider speaking the OpenAI audio API
pub struct OpenAiCompatibleProvider {
    kind: ProviderKind,
    model: String,
    endpoint: String,
    client: reqwest::Client,
    timeout: Duration,
}

impl OpenAiCompatibleProvider {
    /// Create a provider for `kind` with its default endpoint and model
    pub fn new(kind: ProviderKind) -> Self {
        Self::with_config(
            kind,
            kind.default_base_url(),
            kind.default_model().to_string(),
            DEFAULT_TIMEOUT_SECONDS,
        )
    }

    /// Create a provider from transcription settings
    pub fn from_settings(settings: &TranscriptionSettings) -> Self {
        Self::with_config(
            settings.provider,
            &settings.base_url(),
            settings.model(),
            settings.timeout_seconds,
        )
    }

    /// Create a provider with full configuration
    pub fn with_config(kind: ProviderKind, base_url: &str, model: String, timeout_seconds: u64) -> Self {
        let timeout = Duration::from_secs(timeout_seconds);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            kind,
            model,
            endpoint: format!("{}/audio/transcriptions", base_url.trim_end_matches('/')),
            client,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

/// Guess the upload MIME type from a segment's extension
fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("ogg") | Some("oga") => "audio/ogg",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("flac") => "audio/flac",
        Some("m4a") | Some("mp4") => "audio/mp4",
        Some("webm") => "audio/webm",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl TranscriptionProvider for OpenAiCompatibleProvider {
    async fn transcribe_segment(
        &self,
        file: &Path,
        api_key: &ApiKey,
        language: &str,
    ) -> Result<TranscriptionResult, TranscriptionError> {
        let start = Instant::now();

        let audio = tokio::fs::read(file).await?;
        if audio.is_empty() {
            return Err(TranscriptionError::InvalidAudio(format!(
                "segment file {:?} is empty",
                file
            )));
        }

        let file_name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "segment.ogg".to_string());

        let file_part = reqwest::multipart::Part::bytes(audio)
            .file_name(file_name)
            .mime_str(mime_for(file))
            .map_err(|e| TranscriptionError::Failed(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("language", language.to_string())
            .text("response_format", "json");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.expose())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TranscriptionError::Timeout(self.timeout.as_secs())
                } else {
                    TranscriptionError::NetworkError(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            tracing::warn!("{} API rate limited", self.kind.name());
            return Err(TranscriptionError::RateLimited);
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TranscriptionError::ApiError(format!(
                "HTTP {}: {}",
                status.as_u16(),
                error_text
            )));
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| TranscriptionError::Failed(format!("invalid response body: {}", e)))?;

        Ok(TranscriptionResult {
            text: result.text.trim().to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            provider: self.kind.name().to_string(),
        })
    }

    fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// Transcription API response
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}
