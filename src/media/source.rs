//! Source Media
//!
//! Temporary files holding the caller's audio, either uploaded directly or
//! downloaded from a URL. The file is deleted when the [`SourceMedia`] drops.

use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;

const DEFAULT_SUFFIX: &str = ".ogg";

/// Source acquisition errors
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Remote source returned HTTP {0}")]
    Status(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Source exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Caller-supplied audio stored in a temporary file
#[derive(Debug)]
pub struct SourceMedia {
    path: TempPath,
    origin: String,
    size_bytes: u64,
}

impl SourceMedia {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Upload file name or source URL
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Streams incoming bytes into a new [`SourceMedia`] temp file
///
/// Dropping the writer before [`SourceWriter::finish`] deletes the partial
/// file.
pub struct SourceWriter {
    file: tokio::fs::File,
    path: TempPath,
    origin: String,
    written: u64,
    max_bytes: u64,
}

impl SourceWriter {
    /// Open a temp file under `work_dir`; `origin` supplies the suffix
    pub async fn create(
        work_dir: &Path,
        origin: Option<&str>,
        max_bytes: u64,
    ) -> Result<Self, FetchError> {
        let path = create_temp_path(work_dir, &suffix_for(origin)).await?;
        let file = tokio::fs::File::create(&path).await?;
        Ok(Self {
            path,
            file,
            origin: origin.unwrap_or("upload").to_string(),
            written: 0,
            max_bytes,
        })
    }

    /// Append a chunk, failing once the total passes `max_bytes`
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), FetchError> {
        self.written += chunk.len() as u64;
        if self.written > self.max_bytes {
            return Err(FetchError::TooLarge {
                limit: self.max_bytes,
            });
        }
        self.file.write_all(chunk).await?;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn finish(mut self) -> Result<SourceMedia, FetchError> {
        self.file.flush().await?;
        tracing::debug!("Stored {} bytes from {} at {:?}", self.written, self.origin, &*self.path);
        Ok(SourceMedia {
            path: self.path,
            origin: self.origin,
            size_bytes: self.written,
        })
    }
}

async fn create_temp_path(work_dir: &Path, suffix: &str) -> Result<TempPath, std::io::Error> {
    tokio::fs::create_dir_all(work_dir).await?;
    let file = tempfile::Builder::new()
        .prefix("source-")
        .suffix(suffix)
        .tempfile_in(work_dir)?;
    Ok(file.into_temp_path())
}

/// Derive a safe temp-file suffix from a file name or URL path
fn suffix_for(name: Option<&str>) -> String {
    name.and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| DEFAULT_SUFFIX.to_string())
}

/// Downloads remote audio sources into temporary files
pub struct SourceFetcher {
    client: reqwest::Client,
    work_dir: PathBuf,
    max_bytes: u64,
}

impl SourceFetcher {
    pub fn new(work_dir: PathBuf, timeout_seconds: u64, max_bytes: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            work_dir,
            max_bytes,
        }
    }

    /// Download `url` into a temporary file
    pub async fn fetch(&self, url: &str) -> Result<SourceMedia, FetchError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        tracing::info!("Fetching remote source: {}", parsed);

        let response = self
            .client
            .get(parsed.clone())
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        if let Some(length) = response.content_length() {
            if length > self.max_bytes {
                return Err(FetchError::TooLarge { limit: self.max_bytes });
            }
        }

        let file_name = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let mut writer =
            SourceWriter::create(&self.work_dir, file_name.as_deref(), self.max_bytes).await?;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Network(e.to_string()))?;
            writer.write_chunk(&chunk).await?;
        }

        let mut media = writer.finish().await?;
        tracing::info!("Fetched {} bytes from {}", media.size_bytes, parsed);
        media.origin = parsed.to_string();
        Ok(media)
    }
}
