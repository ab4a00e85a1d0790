//! Job Registry
//!
//! In-process state for running jobs: the cancellation flag and the buffer
//! of chunks not yet collected by a polling caller. Every operation takes
//! the registry lock once, so operations on the same job are serialized.

use super::TranscriptChunk;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already exists: {0}")]
    DuplicateJob(String),
}

#[derive(Debug)]
struct JobEntry {
    cancelled: bool,
    pending: Vec<TranscriptChunk>,
    created_at: Instant,
}

/// State of a job at the moment it left the registry
#[derive(Debug)]
pub struct RemovedJob {
    pub cancelled: bool,
    /// Chunks that were never collected by a poll
    pub undelivered: usize,
    pub age: std::time::Duration,
}

/// Tracks running jobs by id
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new job with a clear cancellation flag and empty buffer
    pub fn create(&self, job_id: &str) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.lock();
        if jobs.contains_key(job_id) {
            return Err(RegistryError::DuplicateJob(job_id.to_string()));
        }

        jobs.insert(
            job_id.to_string(),
            JobEntry {
                cancelled: false,
                pending: Vec::new(),
                created_at: Instant::now(),
            },
        );
        tracing::debug!("Job registered: {}", job_id);
        Ok(())
    }

    /// Flag a job for cancellation
    pub fn request_cancel(&self, job_id: &str) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))?;

        entry.cancelled = true;
        tracing::info!("Cancellation requested for job {}", job_id);
        Ok(())
    }

    pub fn is_cancelled(&self, job_id: &str) -> Result<bool, RegistryError> {
        let jobs = self.jobs.lock();
        jobs.get(job_id)
            .map(|entry| entry.cancelled)
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))
    }

    /// Buffer a chunk for the next poll
    pub fn append(&self, job_id: &str, chunk: TranscriptChunk) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))?;

        entry.pending.push(chunk);
        Ok(())
    }

    /// Return and clear the buffered chunks
    pub fn drain(&self, job_id: &str) -> Result<Vec<TranscriptChunk>, RegistryError> {
        let mut jobs = self.jobs.lock();
        let entry = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::NotFound(job_id.to_string()))?;

        Ok(std::mem::take(&mut entry.pending))
    }

    /// Remove a job, reporting its final state
    pub fn take(&self, job_id: &str) -> Option<RemovedJob> {
        let entry = self.jobs.lock().remove(job_id)?;
        tracing::debug!("Job removed from registry: {}", job_id);
        Some(RemovedJob {
            cancelled: entry.cancelled,
            undelivered: entry.pending.len(),
            age: entry.created_at.elapsed(),
        })
    }

    /// Remove all state for a job; idempotent
    pub fn delete(&self, job_id: &str) {
        self.take(job_id);
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.lock().contains_key(job_id)
    }

    /// Number of jobs currently registered
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}
