//! Settings Definition
//!
//! Service configuration schema.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub segmentation: SegmentationSettings,
    pub transcription: TranscriptionSettings,
    pub fetch: FetchSettings,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Validate settings
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.server.port == 0 {
            return Err(SettingsError::Invalid("server.port must be non-zero".to_string()));
        }

        if self.segmentation.segment_seconds == 0 {
            return Err(SettingsError::Invalid(
                "segmentation.segment_seconds must be at least 1".to_string(),
            ));
        }

        if self.segmentation.max_duration_seconds == 0 {
            return Err(SettingsError::Invalid(
                "segmentation.max_duration_seconds must be at least 1".to_string(),
            ));
        }

        if self.segmentation.ffmpeg_path.trim().is_empty()
            || self.segmentation.ffprobe_path.trim().is_empty()
        {
            return Err(SettingsError::Invalid("media tool paths must not be empty".to_string()));
        }

        if self.transcription.language.trim().is_empty() {
            return Err(SettingsError::Invalid(
                "transcription.language must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Apply environment overrides on top of file settings
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid PORT value: {}", port),
            }
        }
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Maximum accepted multipart upload size in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_bytes: 200 * 1024 * 1024,
        }
    }
}

/// Audio segmentation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationSettings {
    /// Length of each segment in seconds
    pub segment_seconds: u64,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    /// Audio codec used for segment files
    pub codec: String,
    /// Codec quality (`-q:a`)
    pub quality: u8,
    /// Segment file extension
    pub extension: String,
    /// Directory for per-job scratch files (None = system temp dir)
    pub work_dir: Option<PathBuf>,
    /// Longest accepted source, in seconds
    pub max_duration_seconds: u64,
}

impl Default for SegmentationSettings {
    fn default() -> Self {
        Self {
            segment_seconds: 60,
            ffmpeg_path: "ffmpeg".to_string(),
            ffprobe_path: "ffprobe".to_string(),
            codec: "libvorbis".to_string(),
            quality: 4,
            extension: "ogg".to_string(),
            work_dir: None,
            max_duration_seconds: 12 * 60 * 60,
        }
    }
}

impl SegmentationSettings {
    pub fn segment_length(&self) -> Duration {
        Duration::from_secs(self.segment_seconds)
    }

    /// Directory for scratch files, falling back to the system temp dir
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Transcription provider selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    OpenAi,
    Groq,
}

impl ProviderKind {
    /// Base URL of the provider's OpenAI-compatible API
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
        }
    }

    /// Default speech-to-text model
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::OpenAi => "whisper-1",
            Self::Groq => "whisper-large-v3",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Groq => "groq",
        }
    }
}

/// Transcription settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    /// Active provider
    pub provider: ProviderKind,
    /// Model identifier (None = provider default)
    pub model: Option<String>,
    /// Target language code (ISO 639-1) used when a request names none
    pub language: String,
    /// Per-segment timeout in seconds
    pub timeout_seconds: u64,
    /// Environment variable holding the default API key
    pub api_key_env: String,
    /// Fail at startup when no default API key is available
    pub require_api_key: bool,
    /// Override for the provider endpoint
    pub base_url: Option<String>,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: None,
            language: "it".to_string(),
            timeout_seconds: 120,
            api_key_env: "OPENAI_API_KEY".to_string(),
            require_api_key: true,
            base_url: None,
        }
    }
}

impl TranscriptionSettings {
    pub fn model(&self) -> String {
        self.model
            .clone()
            .unwrap_or_else(|| self.provider.default_model().to_string())
    }

    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| self.provider.default_base_url().to_string())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Remote source download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub timeout_seconds: u64,
    /// Maximum accepted download size in bytes
    pub max_bytes: u64,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 120,
            max_bytes: 500 * 1024 * 1024,
        }
    }
}

/// Transcript persistence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub transcripts_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            transcripts_dir: super::store::data_dir().join("transcripts"),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Default filter directive when RUST_LOG is unset
    pub level: String,
    /// Write daily-rolling log files here in addition to stdout
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "chunkscribe=info,tower_http=info".to_string(),
            directory: None,
        }
    }
}

/// Settings errors
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid setting: {0}")]
    Invalid(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Deserialization error: {0}")]
    Deserialization(#[from] toml::de::Error),
}
