//! Transcript Store
//!
//! One plain-text file per job, named by job id.

use std::path::{Path, PathBuf};

const MAX_JOB_ID_LENGTH: usize = 64;

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Invalid job id: {0:?}")]
    InvalidJobId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Check that a job id is safe to use as a file name
pub fn is_valid_job_id(job_id: &str) -> bool {
    !job_id.is_empty()
        && job_id.len() <= MAX_JOB_ID_LENGTH
        && job_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Durable store for final transcripts
pub struct TranscriptStore {
    dir: PathBuf,
}

impl TranscriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the transcript file for a job
    pub fn path_for(&self, job_id: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_job_id(job_id) {
            return Err(StoreError::InvalidJobId(job_id.to_string()));
        }
        Ok(self.dir.join(format!("{}.txt", job_id)))
    }

    /// Write the transcript for `job_id`, replacing any previous one
    pub async fn save(&self, job_id: &str, text: &str) -> Result<PathBuf, StoreError> {
        let path = self.path_for(job_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        // Write then rename so readers never see a partial file
        let partial = path.with_extension("txt.partial");
        tokio::fs::write(&partial, text).await?;
        tokio::fs::rename(&partial, &path).await?;

        tracing::info!("Transcript for job {} saved to {:?}", job_id, path);
        Ok(path)
    }

    /// Read a stored transcript; `None` if the job has none
    pub async fn load(&self, job_id: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(job_id)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
