//! Integration Tests for the Transcription Job Pipeline
//!
//! Tests the complete flow: SourceMedia -> Segmenter -> Provider -> Registry -> TranscriptStore
//!
//! These tests verify:
//! 1. Segment labels, ordering and the persisted transcript
//! 2. Cancellation at segment boundaries
//! 3. Per-segment failures leave gaps without stopping the job
//! 4. The HTTP surface (streaming, polling, 404s)
//!
//! No ffmpeg or network access is needed: segmentation and the provider are
//! replaced by scripted fakes.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use chunkscribe::config::{ApiKey, ProviderKind, Settings};
use chunkscribe::jobs::{
    JobError, JobEvent, JobOrchestrator, JobPhase, JobRegistry, JobRequest, JobRun,
    TranscriptStore,
};
use chunkscribe::media::{MediaError, Segment, SegmentPlan, SegmentStream, Segmenter, SourceFetcher, SourceMedia, SourceWriter};
use chunkscribe::transcription::{TranscriptionError, TranscriptionProvider, TranscriptionResult};
use chunkscribe::{router, AppState};

const TEST_KEY: &str = "sk-test-abcdefghijklmnopqrstuvwxyz";

// ============================================================================
// Test Fixtures, Fake Segmenter and Mock Provider
// ============================================================================

/// Segmenter that plans like the real one but writes placeholder files
struct FakeSegmenter {
    duration_secs: f64,
    /// Indices whose slice "fails" and is skipped
    unsliceable: Vec<usize>,
    fail_probe: bool,
}

impl FakeSegmenter {
    fn new(duration_secs: f64) -> Self {
        Self {
            duration_secs,
            unsliceable: Vec::new(),
            fail_probe: false,
        }
    }

    fn skipping(mut self, index: usize) -> Self {
        self.unsliceable.push(index);
        self
    }

    fn failing_probe(mut self) -> Self {
        self.fail_probe = true;
        self
    }
}

struct FakeStream {
    plan: SegmentPlan,
    next: usize,
    unsliceable: Vec<usize>,
    dir: tempfile::TempDir,
}

#[async_trait]
impl SegmentStream for FakeStream {
    fn total(&self) -> usize {
        self.plan.count()
    }

    async fn next_segment(&mut self) -> Option<Segment> {
        while self.next < self.plan.count() {
            let index = self.next;
            self.next += 1;
            if self.unsliceable.contains(&index) {
                continue;
            }
            let path = self.dir.path().join(format!("segment_{:04}.ogg", index));
            std::fs::write(&path, b"OggS").ok()?;
            return Some(Segment::new(index, self.plan.start(index), path));
        }
        None
    }
}

#[async_trait]
impl Segmenter for FakeSegmenter {
    async fn segment(
        &self,
        source: &Path,
        segment_length: Duration,
    ) -> Result<Box<dyn SegmentStream>, MediaError> {
        assert!(source.exists(), "source must exist while probing");
        if self.fail_probe {
            return Err(MediaError::Probe("Invalid data found when processing input".to_string()));
        }
        Ok(Box::new(FakeStream {
            plan: SegmentPlan::new(self.duration_secs, segment_length),
            next: 0,
            unsliceable: self.unsliceable.clone(),
            dir: tempfile::tempdir().map_err(MediaError::Io)?,
        }))
    }
}

/// Segment index encoded in a fake segment's file name
fn segment_index(path: &Path) -> usize {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.rsplit('_').next())
        .and_then(|index| index.parse().ok())
        .unwrap_or(usize::MAX)
}

/// Mock transcription provider with configurable behavior
struct MockTranscriptionProvider {
    fail_indices: Vec<usize>,
    fail_error: Option<TranscriptionError>,
    delay_ms: Option<u64>,
    /// Request cancellation of a job when this index is being transcribed
    cancel_on: Option<(usize, Arc<JobRegistry>, String)>,
    call_count: Arc<AtomicU32>,
    seen_files: Arc<Mutex<Vec<PathBuf>>>,
}

impl MockTranscriptionProvider {
    fn new() -> Self {
        Self {
            fail_indices: Vec::new(),
            fail_error: None,
            delay_ms: None,
            cancel_on: None,
            call_count: Arc::new(AtomicU32::new(0)),
            seen_files: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing_on(mut self, index: usize) -> Self {
        self.fail_indices.push(index);
        self
    }

    fn with_error(mut self, error: TranscriptionError) -> Self {
        self.fail_error = Some(error);
        self
    }

    fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay_ms = Some(delay_ms);
        self
    }

    fn cancelling(mut self, index: usize, registry: Arc<JobRegistry>, job_id: &str) -> Self {
        self.cancel_on = Some((index, registry, job_id.to_string()));
        self
    }

    fn with_call_counter(mut self, counter: Arc<AtomicU32>) -> Self {
        self.call_count = counter;
        self
    }

    fn with_file_tracker(mut self, tracker: Arc<Mutex<Vec<PathBuf>>>) -> Self {
        self.seen_files = tracker;
        self
    }
}

#[async_trait]
impl TranscriptionProvider for MockTranscriptionProvider {
    async fn transcribe_segment(
        &self,
        file: &Path,
        api_key: &ApiKey,
        _language: &str,
    ) -> Result<TranscriptionResult, TranscriptionError> {
        assert_eq!(api_key.expose(), TEST_KEY);
        assert!(file.exists(), "segment file must exist during the call");

        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.seen_files.lock().push(file.to_path_buf());
        let index = segment_index(file);

        if let Some((cancel_index, registry, job_id)) = &self.cancel_on {
            if *cancel_index == index {
                registry.request_cancel(job_id).unwrap();
            }
        }

        if let Some(delay) = self.delay_ms {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.fail_indices.contains(&index) {
            return Err(self
                .fail_error
                .clone()
                .unwrap_or_else(|| TranscriptionError::ApiError("HTTP 500: upstream".to_string())));
        }

        Ok(TranscriptionResult {
            text: format!("testo {}", index),
            duration_ms: self.delay_ms.unwrap_or(5),
            provider: "mock".to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct TestEnv {
    orchestrator: Arc<JobOrchestrator>,
    registry: Arc<JobRegistry>,
    dir: tempfile::TempDir,
}

fn test_env(segmenter: FakeSegmenter, provider: MockTranscriptionProvider) -> TestEnv {
    test_env_with_registry(Arc::new(JobRegistry::new()), segmenter, provider)
}

fn test_env_with_registry(
    registry: Arc<JobRegistry>,
    segmenter: FakeSegmenter,
    provider: MockTranscriptionProvider,
) -> TestEnv {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Arc::new(JobOrchestrator::new(
        registry.clone(),
        Arc::new(TranscriptStore::new(dir.path().join("transcripts"))),
        Arc::new(segmenter),
        Arc::new(provider),
        Duration::from_secs(5),
    ));
    TestEnv {
        orchestrator,
        registry,
        dir,
    }
}

fn job_request() -> JobRequest {
    JobRequest {
        api_key: ApiKey::parse(ProviderKind::OpenAi, TEST_KEY).unwrap(),
        language: "it".to_string(),
        segment_length: Duration::from_secs(60),
        buffer_chunks: true,
    }
}

async fn upload(env: &TestEnv) -> SourceMedia {
    let mut writer = SourceWriter::create(&env.dir.path().join("work"), Some("lezione.mp3"), 1024)
        .await
        .unwrap();
    writer.write_chunk(b"ID3 ").await.unwrap();
    writer.write_chunk(b"fake audio").await.unwrap();
    writer.finish().await.unwrap()
}

fn work_files(env: &TestEnv) -> usize {
    std::fs::read_dir(env.dir.path().join("work"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

async fn start(env: &TestEnv, job_id: &str) -> JobRun {
    env.orchestrator
        .start(job_id.to_string(), upload(env).await, job_request())
        .await
        .unwrap()
}

async fn collect(mut run: JobRun) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Some(event) = run.next_event().await {
        events.push(event);
    }
    events
}

fn count(events: &[JobEvent], name: &str) -> usize {
    events.iter().filter(|event| event.name() == name).count()
}

// ============================================================================
// SECTION 1: End-to-End Transcript Tests
// ============================================================================

mod end_to_end {
    use super::*;

    #[tokio::test]
    async fn test_150s_source_with_failed_middle_segment() {
        let env = test_env(FakeSegmenter::new(150.0), MockTranscriptionProvider::new().failing_on(1));

        let run = start(&env, "job-150").await;
        assert_eq!(run.total_segments(), 3);

        let events = collect(run).await;
        let chunk_labels: Vec<String> = events
            .iter()
            .filter_map(|event| match event {
                JobEvent::Chunk(chunk) => Some(chunk.timestamp.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(chunk_labels, ["00:00", "02:00"]);
        assert!(matches!(events[2], JobEvent::Error { index: 1, .. }));

        let stored = env.orchestrator.store().load("job-150").await.unwrap().unwrap();
        let lines: Vec<&str> = stored.lines().collect();
        assert_eq!(lines, ["00:00:   testo 0", "02:00:   testo 2"]);
    }

    #[tokio::test]
    async fn test_all_segments_succeed_in_index_order() {
        let env = test_env(FakeSegmenter::new(150.0), MockTranscriptionProvider::new());

        let events = collect(start(&env, "job-ok").await).await;
        assert_eq!(count(&events, "chunk"), 3);

        let expected = "00:00:   testo 0\n01:00:   testo 1\n02:00:   testo 2";
        match events.last().unwrap() {
            JobEvent::Complete { transcript, cancelled, .. } => {
                assert_eq!(transcript, expected);
                assert!(!cancelled);
            }
            other => panic!("expected complete, got {:?}", other),
        }

        // Reading the artifact does not consume it
        for _ in 0..2 {
            let stored = env.orchestrator.store().load("job-ok").await.unwrap();
            assert_eq!(stored.as_deref(), Some(expected));
        }
    }

    #[tokio::test]
    async fn test_segment_count_is_ceiling() {
        for (duration, expected) in [(59.0, 1), (60.0, 1), (60.5, 2), (180.0, 3), (181.0, 4)] {
            let env = test_env(FakeSegmenter::new(duration), MockTranscriptionProvider::new());
            let run = start(&env, "job-count").await;
            assert_eq!(run.total_segments(), expected, "duration {}", duration);
            collect(run).await;
        }
    }

    #[tokio::test]
    async fn test_segment_files_deleted_after_processing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let provider = MockTranscriptionProvider::new()
            .failing_on(0)
            .with_file_tracker(seen.clone());
        let env = test_env(FakeSegmenter::new(150.0), provider);

        collect(start(&env, "job-files").await).await;

        let seen = seen.lock();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|path| !path.exists()));
    }

    #[tokio::test]
    async fn test_registry_entry_removed_on_completion() {
        let env = test_env(FakeSegmenter::new(60.0), MockTranscriptionProvider::new());

        let run = start(&env, "job-done").await;
        assert!(env.registry.contains("job-done"));

        collect(run).await;
        assert!(!env.registry.contains("job-done"));
        assert!(env.registry.is_empty());
    }
}

// ============================================================================
// SECTION 2: Cancellation Tests
// ============================================================================

mod cancellation_tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_before_processing_yields_no_chunks() {
        let counter = Arc::new(AtomicU32::new(0));
        let provider = MockTranscriptionProvider::new().with_call_counter(counter.clone());
        let env = test_env(FakeSegmenter::new(150.0), provider);

        let run = start(&env, "job-cancel").await;
        env.registry.request_cancel("job-cancel").unwrap();

        let events = collect(run).await;
        assert_eq!(count(&events, "chunk"), 0);
        assert_eq!(count(&events, "cancel"), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!env.registry.contains("job-cancel"));
    }

    #[tokio::test]
    async fn test_cancel_during_call_takes_effect_at_next_boundary() {
        let registry = Arc::new(JobRegistry::new());
        let counter = Arc::new(AtomicU32::new(0));
        let provider = MockTranscriptionProvider::new()
            .cancelling(1, registry.clone(), "job-mid")
            .with_call_counter(counter.clone());
        let env = test_env_with_registry(registry, FakeSegmenter::new(300.0), provider);

        let events = collect(start(&env, "job-mid").await).await;

        // The in-flight call for index 1 completes, nothing after it starts
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(count(&events, "chunk"), 2);
        assert_eq!(count(&events, "cancel"), 1);

        let stored = env.orchestrator.store().load("job-mid").await.unwrap().unwrap();
        assert_eq!(stored, "00:00:   testo 0\n01:00:   testo 1");
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_mutates_nothing() {
        let env = test_env(FakeSegmenter::new(60.0), MockTranscriptionProvider::new());
        let _run = start(&env, "job-real").await;

        assert!(env.registry.request_cancel("job-ghost").is_err());
        assert_eq!(env.registry.len(), 1);
        assert_eq!(env.registry.is_cancelled("job-real"), Ok(false));
    }
}

// ============================================================================
// SECTION 3: Error Cascade Tests
// ============================================================================

mod error_cascade_tests {
    use super::*;

    #[tokio::test]
    async fn test_provider_error_does_not_stop_later_segments() {
        let provider = MockTranscriptionProvider::new()
            .failing_on(2)
            .with_error(TranscriptionError::RateLimited);
        let env = test_env(FakeSegmenter::new(300.0), provider);

        let events = collect(start(&env, "job-k").await).await;

        let chunk_indices: Vec<usize> = events
            .iter()
            .filter_map(|event| match event {
                JobEvent::Chunk(chunk) => Some(chunk.index),
                _ => None,
            })
            .collect();
        assert_eq!(chunk_indices, [0, 1, 3, 4]);

        let errors: Vec<&JobEvent> = events.iter().filter(|e| e.name() == "error").collect();
        assert_eq!(errors.len(), 1);
        match errors[0] {
            JobEvent::Error { index, message } => {
                assert_eq!(*index, 2);
                assert_eq!(message, "Rate limited");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_every_segment_fails_still_completes() {
        let provider = MockTranscriptionProvider::new().failing_on(0).failing_on(1);
        let env = test_env(FakeSegmenter::new(120.0), provider);

        let events = collect(start(&env, "job-gaps").await).await;
        assert_eq!(count(&events, "error"), 2);

        match events.last().unwrap() {
            JobEvent::Complete { chunks, failed_segments, .. } => {
                assert_eq!(*chunks, 0);
                assert_eq!(*failed_segments, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
        let stored = env.orchestrator.store().load("job-gaps").await.unwrap();
        assert_eq!(stored.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_slice_failure_skips_index_and_keeps_labels() {
        let env = test_env(FakeSegmenter::new(180.0).skipping(1), MockTranscriptionProvider::new());

        let events = collect(start(&env, "job-slice").await).await;
        assert_eq!(count(&events, "chunk"), 2);
        assert_eq!(count(&events, "error"), 0);

        let stored = env.orchestrator.store().load("job-slice").await.unwrap().unwrap();
        assert_eq!(stored, "00:00:   testo 0\n02:00:   testo 2");
    }

    #[tokio::test]
    async fn test_probe_failure_aborts_and_cleans_registry() {
        let counter = Arc::new(AtomicU32::new(0));
        let provider = MockTranscriptionProvider::new().with_call_counter(counter.clone());
        let env = test_env(FakeSegmenter::new(60.0).failing_probe(), provider);

        let result = env
            .orchestrator
            .start("job-probe".to_string(), upload(&env).await, job_request())
            .await;

        assert!(matches!(result, Err(JobError::Probe(_))));
        assert!(!env.registry.contains("job-probe"));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(env.orchestrator.store().load("job-probe").await.unwrap().is_none());
    }
}

// ============================================================================
// SECTION 4: Polling Buffer Tests
// ============================================================================

mod polling_tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_twice_returns_then_empty() {
        let env = test_env(FakeSegmenter::new(180.0), MockTranscriptionProvider::new());
        let mut run = start(&env, "job-poll").await;

        // started + two chunks
        for _ in 0..3 {
            run.next_event().await.unwrap();
        }

        let first = env.registry.drain("job-poll").unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].line, "00:00:   testo 0");
        assert!(env.registry.drain("job-poll").unwrap().is_empty());

        run.next_event().await.unwrap();
        let third = env.registry.drain("job-poll").unwrap();
        assert_eq!(third.len(), 1);
        assert_eq!(third[0].index, 2);

        collect(run).await;
    }

    #[tokio::test]
    async fn test_streamed_job_leaves_buffer_empty() {
        let env = test_env(FakeSegmenter::new(120.0), MockTranscriptionProvider::new());
        let mut request = job_request();
        request.buffer_chunks = false;
        let mut run = env
            .orchestrator
            .start("job-stream".to_string(), upload(&env).await, request)
            .await
            .unwrap();

        for _ in 0..3 {
            run.next_event().await.unwrap();
        }
        assert!(env.registry.drain("job-stream").unwrap().is_empty());

        let events = collect(run).await;
        assert_eq!(count(&events, "complete"), 1);
    }

    #[tokio::test]
    async fn test_failed_segments_never_buffered() {
        let env = test_env(FakeSegmenter::new(120.0), MockTranscriptionProvider::new().failing_on(0));
        let mut run = start(&env, "job-poll-gap").await;

        for _ in 0..3 {
            run.next_event().await.unwrap();
        }
        let buffered = env.registry.drain("job-poll-gap").unwrap();
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].index, 1);

        collect(run).await;
    }
}

// ============================================================================
// SECTION 5: HTTP API Tests
// ============================================================================

mod http_api_tests {
    use super::*;

    const BOUNDARY: &str = "chunkscribe-test-boundary";

    fn app_state(env: &TestEnv) -> AppState {
        let mut settings = Settings::default();
        settings.segmentation.work_dir = Some(env.dir.path().join("work"));
        settings.storage.transcripts_dir = env.dir.path().join("transcripts");

        AppState {
            settings: Arc::new(settings),
            orchestrator: env.orchestrator.clone(),
            fetcher: Arc::new(SourceFetcher::new(env.dir.path().join("work"), 5, 1024 * 1024)),
            default_api_key: Some(ApiKey::parse(ProviderKind::OpenAi, TEST_KEY).unwrap()),
        }
    }

    fn multipart_body(fields: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (name, file_name, content) in fields {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            match file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: audio/mpeg\r\n\r\n",
                        name, file_name
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(content);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn upload_request(uri: &str, fields: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(fields)))
            .unwrap()
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn get(app: axum::Router, uri: &str) -> axum::response::Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let env = test_env(FakeSegmenter::new(60.0), MockTranscriptionProvider::new());
        let response = get(router(app_state(&env)), "/health").await;

        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["provider"], "mock");
        assert_eq!(json["active_jobs"], 0);
    }

    #[tokio::test]
    async fn test_unknown_job_routes_return_404() {
        let env = test_env(FakeSegmenter::new(60.0), MockTranscriptionProvider::new());
        let app = router(app_state(&env));

        let cancel = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/cancel_transcription/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(cancel.status(), StatusCode::NOT_FOUND);
        let json: serde_json::Value = serde_json::from_str(&body_string(cancel).await).unwrap();
        assert_eq!(json["detail"], "Job not found");

        assert_eq!(get(app.clone(), "/get_transcript/nope").await.status(), StatusCode::NOT_FOUND);
        assert_eq!(get(app, "/transcripts/nope").await.status(), StatusCode::NOT_FOUND);
        assert!(env.registry.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_field_is_bad_request() {
        let env = test_env(FakeSegmenter::new(60.0), MockTranscriptionProvider::new());
        let request = upload_request("/transcribe/file", &[("language", None, b"it")]);

        let response = router(app_state(&env)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_api_key_is_bad_request() {
        let env = test_env(FakeSegmenter::new(60.0), MockTranscriptionProvider::new());
        let request = upload_request(
            "/transcribe/file",
            &[("file", Some("a.mp3"), b"ID3"), ("api_key", None, b"not-a-key")],
        );

        let response = router(app_state(&env)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(env.registry.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let env = test_env(FakeSegmenter::new(60.0), MockTranscriptionProvider::new());
        let mut state = app_state(&env);
        let mut settings = (*state.settings).clone();
        settings.server.max_upload_bytes = 256;
        state.settings = Arc::new(settings);

        let audio = vec![0u8; 4096];
        let request = upload_request("/transcribe/file", &[("file", Some("big.mp3"), &audio)]);

        let response = router(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(env.registry.is_empty());
        assert_eq!(work_files(&env), 0);
    }

    #[tokio::test]
    async fn test_stream_mode_emits_ordered_events() {
        let env = test_env(FakeSegmenter::new(150.0), MockTranscriptionProvider::new().failing_on(1));
        let request = upload_request("/transcribe/file", &[("file", Some("a.mp3"), b"ID3 data")]);

        let response = router(app_state(&env)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "text/event-stream"
        );

        let body = body_string(response).await;
        let names: Vec<&str> = body
            .lines()
            .filter_map(|line| line.strip_prefix("event: "))
            .collect();
        assert_eq!(names, ["started", "chunk", "error", "chunk", "complete"]);
        assert!(body.contains("02:00:   testo 2"));
    }

    #[tokio::test]
    async fn test_poll_mode_returns_job_id_and_persists() {
        let env = test_env(FakeSegmenter::new(120.0), MockTranscriptionProvider::new());
        let app = router(app_state(&env));
        let request = upload_request("/transcribe/file?mode=poll", &[("file", Some("a.mp3"), b"ID3 data")]);

        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let mut transcript = None;
        for _ in 0..100 {
            let response = get(app.clone(), &format!("/transcripts/{}", job_id)).await;
            if response.status() == StatusCode::OK {
                transcript = Some(body_string(response).await);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert_eq!(
            transcript.as_deref(),
            Some("00:00:   testo 0\n01:00:   testo 1")
        );
        assert!(!env.registry.contains(&job_id));
    }

    #[tokio::test]
    async fn test_poll_then_cancel_over_http() {
        let env = test_env(
            FakeSegmenter::new(600.0),
            MockTranscriptionProvider::new().with_delay(50),
        );
        let app = router(app_state(&env));
        let request = upload_request("/transcribe/file?mode=poll", &[("file", Some("a.mp3"), b"ID3 data")]);

        let response = app.clone().oneshot(request).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let cancel = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/cancel_transcription/{}", job_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(cancel.status(), StatusCode::OK);

        let mut stored = None;
        for _ in 0..100 {
            if let Some(text) = env.orchestrator.store().load(&job_id).await.unwrap() {
                stored = Some(text);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let stored = stored.expect("cancelled job should still persist its transcript");
        assert!(stored.lines().count() < 10);
    }

    #[tokio::test]
    async fn test_url_fetch_failure_registers_nothing() {
        let env = test_env(FakeSegmenter::new(60.0), MockTranscriptionProvider::new());
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.mp3")
            .with_status(404)
            .create_async()
            .await;

        let request = Request::builder()
            .method("POST")
            .uri("/transcribe/url")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "url": format!("{}/missing.mp3", server.url()) }).to_string(),
            ))
            .unwrap();

        let response = router(app_state(&env)).oneshot(request).await.unwrap();
        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["detail"], "Transcription failed");
        assert!(env.registry.is_empty());
    }

    #[tokio::test]
    async fn test_url_source_transcribed_in_poll_mode() {
        let env = test_env(FakeSegmenter::new(60.0), MockTranscriptionProvider::new());
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/talk.mp3")
            .with_status(200)
            .with_body("ID3 remote audio")
            .create_async()
            .await;

        let request = Request::builder()
            .method("POST")
            .uri(format!("/transcribe/url?mode=poll&api_key={}", TEST_KEY))
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "url": format!("{}/talk.mp3", server.url()) }).to_string(),
            ))
            .unwrap();

        let response = router(app_state(&env)).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        let job_id = json["job_id"].as_str().unwrap().to_string();

        let mut stored = None;
        for _ in 0..100 {
            if let Some(text) = env.orchestrator.store().load(&job_id).await.unwrap() {
                stored = Some(text);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(stored.as_deref(), Some("00:00:   testo 0"));
    }
}

// ============================================================================
// SECTION 6: Concurrency Tests
// ============================================================================

mod concurrency_tests {
    use super::*;

    #[tokio::test]
    async fn test_concurrent_jobs_are_independent() {
        let env = test_env(FakeSegmenter::new(180.0), MockTranscriptionProvider::new().with_delay(5));

        let first = start(&env, "job-a").await;
        let second = start(&env, "job-b").await;
        env.registry.request_cancel("job-b").unwrap();

        let a = env.orchestrator.spawn(first, None);
        let b = env.orchestrator.spawn(second, None);
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        assert_eq!(a, JobPhase::Completed);
        assert_eq!(b, JobPhase::Cancelled);

        let a_text = env.orchestrator.store().load("job-a").await.unwrap().unwrap();
        let b_text = env.orchestrator.store().load("job-b").await.unwrap().unwrap();
        assert_eq!(a_text.lines().count(), 3);
        assert!(b_text.is_empty());
        assert!(env.registry.is_empty());
    }

    #[tokio::test]
    async fn test_job_finishes_after_listener_drops() {
        let env = test_env(FakeSegmenter::new(180.0), MockTranscriptionProvider::new().with_delay(5));
        let run = start(&env, "job-orphan").await;

        let (tx, mut rx) = tokio::sync::mpsc::channel(1);
        let handle = env.orchestrator.spawn(run, Some(tx));

        // Read the first event, then walk away
        assert_eq!(rx.recv().await.unwrap().name(), "started");
        drop(rx);

        assert_eq!(handle.await.unwrap(), JobPhase::Completed);
        let stored = env.orchestrator.store().load("job-orphan").await.unwrap().unwrap();
        assert_eq!(stored.lines().count(), 3);
    }
}
