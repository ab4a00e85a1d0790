//! Job Orchestrator
//!
//! Drives one transcription job end to end. A job is a state machine:
//!
//! ```text
//! Pending -> Processing(n) -> { Chunk | Error } -> Processing(n + 1)
//!                          \-> Cancelled | Completed | Failed
//! ```
//!
//! Each call to [`JobRun::next_event`] performs at most one unit of work
//! (one segment) and returns the event it produced. Cancellation is checked
//! between segments only; a provider call already in flight runs to
//! completion.

use super::{assemble, JobEvent, JobRegistry, RegistryError, StoreError, TranscriptChunk, TranscriptStore};
use crate::config::ApiKey;
use crate::media::{MediaError, SegmentStream, Segmenter, SourceMedia};
use crate::transcription::{TranscriptionError, TranscriptionProvider};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Job errors
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Probe(#[from] MediaError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Per-job parameters supplied by the caller
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub api_key: ApiKey,
    /// Target language code passed to the provider
    pub language: String,
    pub segment_length: Duration,
    /// Buffer chunks in the registry for polling callers
    pub buffer_chunks: bool,
}

/// Lifecycle phase of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    /// Number of segments handled so far
    Processing(usize),
    Cancelled,
    Completed,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed | Self::Failed)
    }
}

/// Generate a fresh job id
pub fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Starts jobs and wires them to the shared registry, store and provider
pub struct JobOrchestrator {
    registry: Arc<JobRegistry>,
    store: Arc<TranscriptStore>,
    segmenter: Arc<dyn Segmenter>,
    provider: Arc<dyn TranscriptionProvider>,
    segment_timeout: Duration,
}

impl JobOrchestrator {
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<TranscriptStore>,
        segmenter: Arc<dyn Segmenter>,
        provider: Arc<dyn TranscriptionProvider>,
        segment_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            segmenter,
            provider,
            segment_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<TranscriptStore> {
        &self.store
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Register `job_id` and probe its source
    ///
    /// A probe failure removes the registry entry again and deletes the
    /// source file; nothing is persisted.
    pub async fn start(
        &self,
        job_id: String,
        source: SourceMedia,
        request: JobRequest,
    ) -> Result<JobRun, JobError> {
        self.registry.create(&job_id)?;
        tracing::info!(
            "Job {} started for {} ({} bytes) via {}",
            job_id,
            source.origin(),
            source.size_bytes(),
            self.provider.name()
        );

        let segments = match self.segmenter.segment(source.path(), request.segment_length).await {
            Ok(segments) => segments,
            Err(e) => {
                tracing::error!("Job {} aborted: {}", job_id, e);
                self.registry.delete(&job_id);
                return Err(e.into());
            }
        };

        Ok(JobRun {
            job_id,
            request,
            registry: self.registry.clone(),
            store: self.store.clone(),
            provider: self.provider.clone(),
            segment_timeout: self.segment_timeout,
            total_segments: segments.total(),
            segments: Some(segments),
            source: Some(source),
            chunks: Vec::new(),
            failed_segments: 0,
            phase: JobPhase::Pending,
            queued: VecDeque::new(),
        })
    }

    /// Start a job and drive it to the end on the current task
    pub async fn run(
        &self,
        job_id: String,
        source: SourceMedia,
        request: JobRequest,
        events: Option<mpsc::Sender<JobEvent>>,
    ) -> Result<JobPhase, JobError> {
        let run = self.start(job_id, source, request).await?;
        Ok(run.run_to_end(events).await)
    }

    /// Drive a started job on its own task
    pub fn spawn(
        &self,
        run: JobRun,
        events: Option<mpsc::Sender<JobEvent>>,
    ) -> tokio::task::JoinHandle<JobPhase> {
        tokio::spawn(run.run_to_end(events))
    }
}

/// A started job
pub struct JobRun {
    job_id: String,
    request: JobRequest,
    registry: Arc<JobRegistry>,
    store: Arc<TranscriptStore>,
    provider: Arc<dyn TranscriptionProvider>,
    segment_timeout: Duration,
    total_segments: usize,
    segments: Option<Box<dyn SegmentStream>>,
    source: Option<SourceMedia>,
    chunks: Vec<TranscriptChunk>,
    failed_segments: usize,
    phase: JobPhase,
    queued: VecDeque<JobEvent>,
}

impl JobRun {
    pub fn total_segments(&self) -> usize {
        self.total_segments
    }

    /// Advance the job by one step; `None` once the job has finished
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        if let Some(event) = self.queued.pop_front() {
            return Some(event);
        }

        match self.phase {
            JobPhase::Pending => {
                self.phase = JobPhase::Processing(0);
                Some(JobEvent::Started {
                    job_id: self.job_id.clone(),
                    total_segments: self.total_segments,
                })
            }
            JobPhase::Processing(handled) => Some(self.step(handled).await),
            JobPhase::Cancelled | JobPhase::Completed | JobPhase::Failed => None,
        }
    }

    /// Drive the job to completion, forwarding events to `events`
    ///
    /// A listener that goes away does not stop the job.
    pub async fn run_to_end(mut self, mut events: Option<mpsc::Sender<JobEvent>>) -> JobPhase {
        while let Some(event) = self.next_event().await {
            if let Some(tx) = &events {
                if tx.send(event).await.is_err() {
                    tracing::info!("Listener for job {} disconnected; job continues", self.job_id);
                    events = None;
                }
            }
        }
        self.phase
    }

    fn cancel_requested(&self) -> bool {
        match self.registry.is_cancelled(&self.job_id) {
            Ok(cancelled) => cancelled,
            Err(e) => {
                tracing::warn!("Job {} lost its registry entry ({}); stopping", self.job_id, e);
                true
            }
        }
    }

    async fn step(&mut self, handled: usize) -> JobEvent {
        if self.cancel_requested() {
            tracing::info!("Job {} cancelled after {} segment(s)", self.job_id, handled);
            self.release_inputs();
            let completion = self.finish(JobPhase::Cancelled).await;
            self.queued.push_back(completion);
            return JobEvent::Cancel {
                job_id: self.job_id.clone(),
            };
        }

        let next = match self.segments.as_mut() {
            Some(segments) => segments.next_segment().await,
            None => None,
        };
        let Some(segment) = next else {
            self.release_inputs();
            return self.finish(JobPhase::Completed).await;
        };

        let index = segment.index();
        let start = segment.start();
        tracing::info!("Job {}: transcribing segment {}", self.job_id, index);

        let outcome = tokio::time::timeout(
            self.segment_timeout,
            self.provider.transcribe_segment(
                segment.path(),
                &self.request.api_key,
                &self.request.language,
            ),
        )
        .await
        .unwrap_or(Err(TranscriptionError::Timeout(self.segment_timeout.as_secs())));

        segment.discard().await;
        self.phase = JobPhase::Processing(handled + 1);

        let event = match outcome {
            Ok(result) => {
                let chunk = TranscriptChunk::new(index, start, result.text);
                tracing::info!(
                    "Job {}: segment {} transcribed at {} in {}ms",
                    self.job_id,
                    index,
                    chunk.timestamp,
                    result.duration_ms
                );
                if self.request.buffer_chunks {
                    if let Err(e) = self.registry.append(&self.job_id, chunk.clone()) {
                        tracing::warn!("Job {}: chunk {} not buffered: {}", self.job_id, index, e);
                    }
                }
                self.chunks.push(chunk.clone());
                JobEvent::Chunk(chunk)
            }
            Err(e) => {
                tracing::warn!("Job {}: segment {} failed: {}", self.job_id, index, e);
                self.failed_segments += 1;
                JobEvent::Error {
                    index,
                    message: e.to_string(),
                }
            }
        };

        tokio::task::yield_now().await;
        event
    }

    /// Drop the segment stream (and its scratch dir) and the source file
    fn release_inputs(&mut self) {
        self.segments = None;
        self.source = None;
    }

    /// Tear down the registry entry and persist the final transcript
    async fn finish(&mut self, outcome: JobPhase) -> JobEvent {
        let removed = self.registry.take(&self.job_id);
        let cancelled = outcome == JobPhase::Cancelled
            || removed.as_ref().map(|job| job.cancelled).unwrap_or(false);
        if let Some(job) = &removed {
            tracing::debug!(
                "Job {} left the registry after {:.1}s",
                self.job_id,
                job.age.as_secs_f64()
            );
            if job.undelivered > 0 {
                tracing::debug!(
                    "Job {}: {} buffered chunk(s) were never polled",
                    self.job_id,
                    job.undelivered
                );
            }
        }

        let transcript = assemble(&self.chunks);
        match self.store.save(&self.job_id, &transcript).await {
            Ok(_) => {
                self.phase = outcome;
                tracing::info!(
                    "Transcription completed for job {}. Total chunks transcribed: {}, failed: {}",
                    self.job_id,
                    self.chunks.len(),
                    self.failed_segments
                );
                JobEvent::Complete {
                    job_id: self.job_id.clone(),
                    chunks: self.chunks.len(),
                    failed_segments: self.failed_segments,
                    cancelled,
                    transcript,
                }
            }
            Err(e) => {
                self.phase = JobPhase::Failed;
                tracing::error!("Job {}: failed to persist transcript: {}", self.job_id, e);
                JobEvent::Failed {
                    job_id: self.job_id.clone(),
                    message: e.to_string(),
                }
            }
        }
    }
}

impl Drop for JobRun {
    fn drop(&mut self) {
        if !self.phase.is_terminal() {
            tracing::warn!("Job {} dropped before finishing; removing registry entry", self.job_id);
            self.registry.delete(&self.job_id);
        }
    }
}
