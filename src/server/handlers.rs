//! Request handlers

use super::{ApiError, AppState};
use crate::config::ApiKey;
use crate::jobs::{new_job_id, JobEvent, JobRequest, TranscriptChunk};
use crate::media::{SourceMedia, SourceWriter};
use axum::extract::{Multipart, Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;

/// Events buffered between a job task and its SSE listener
const EVENT_BUFFER: usize = 32;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const MAX_LANGUAGE_LENGTH: usize = 8;

/// How job results reach the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Server-sent events for the whole job
    #[default]
    Stream,
    /// Return the job id at once; chunks are collected via `get_transcript`
    Poll,
}

#[derive(Debug, Default, Deserialize)]
pub struct TranscribeQuery {
    #[serde(default)]
    pub mode: DeliveryMode,
    pub api_key: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UrlRequest {
    pub url: String,
    pub api_key: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobCreated {
    pub job_id: String,
}

#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub job_id: String,
    pub chunks: Vec<TranscriptChunk>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: &'static str,
    pub active_jobs: usize,
}

/// POST /transcribe/file
pub async fn transcribe_file(
    State(state): State<AppState>,
    Query(query): Query<TranscribeQuery>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let work_dir = state.settings.segmentation.work_dir();
    let max_bytes = state.settings.server.max_upload_bytes as u64;
    let mut upload: Option<SourceMedia> = None;
    let mut api_key = query.api_key;
    let mut language = query.language;

    while let Some(mut field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().map(str::to_string);
                let mut writer =
                    SourceWriter::create(&work_dir, file_name.as_deref(), max_bytes)
                        .await
                        .map_err(ApiError::upload)?;
                while let Some(chunk) = field.chunk().await? {
                    writer.write_chunk(&chunk).await.map_err(ApiError::upload)?;
                }
                upload = Some(writer.finish().await.map_err(ApiError::upload)?);
            }
            Some("api_key") => api_key = Some(field.text().await?),
            Some("language") => language = Some(field.text().await?),
            other => tracing::debug!("Ignoring multipart field {:?}", other),
        }
    }

    let source = upload.ok_or_else(|| ApiError::BadRequest("Missing file field".to_string()))?;
    if source.size_bytes() == 0 {
        return Err(ApiError::BadRequest("Uploaded file is empty".to_string()));
    }

    let request = job_request(&state, api_key, language, query.mode)?;

    start_job(&state, source, request, query.mode).await
}

/// POST /transcribe/url
pub async fn transcribe_url(
    State(state): State<AppState>,
    Query(query): Query<TranscribeQuery>,
    Json(body): Json<UrlRequest>,
) -> Result<Response, ApiError> {
    let request = job_request(
        &state,
        body.api_key.or(query.api_key),
        body.language.or(query.language),
        query.mode,
    )?;

    // Fetch failures abort before any job is registered
    let source = state.fetcher.fetch(&body.url).await?;

    start_job(&state, source, request, query.mode).await
}

/// POST /cancel_transcription/:job_id
pub async fn cancel_transcription(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.orchestrator.registry().request_cancel(&job_id)?;
    Ok(Json(serde_json::json!({
        "job_id": job_id,
        "status": "cancelling",
    })))
}

/// GET /get_transcript/:job_id
///
/// Returns the chunks produced since the previous call.
pub async fn get_transcript(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<PollResponse>, ApiError> {
    let chunks = state.orchestrator.registry().drain(&job_id)?;
    Ok(Json(PollResponse { job_id, chunks }))
}

/// GET /transcripts/:job_id
pub async fn stored_transcript(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<String, ApiError> {
    state
        .orchestrator
        .store()
        .load(&job_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Transcript not found".to_string()))
}

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.orchestrator.provider_name(),
        active_jobs: state.orchestrator.registry().len(),
    })
}

/// Resolve the per-request key and language, falling back to defaults
fn job_request(
    state: &AppState,
    api_key: Option<String>,
    language: Option<String>,
    mode: DeliveryMode,
) -> Result<JobRequest, ApiError> {
    let transcription = &state.settings.transcription;

    let api_key = match api_key.filter(|key| !key.trim().is_empty()) {
        Some(raw) => ApiKey::parse(transcription.provider, &raw)?,
        None => state
            .default_api_key
            .clone()
            .ok_or_else(|| ApiError::BadRequest("api_key is required".to_string()))?,
    };

    let language = match language.map(|l| l.trim().to_ascii_lowercase()) {
        Some(l) if !l.is_empty() => {
            if !is_valid_language(&l) {
                return Err(ApiError::BadRequest(format!("Invalid language code: {}", l)));
            }
            l
        }
        _ => transcription.language.clone(),
    };

    Ok(JobRequest {
        api_key,
        language,
        segment_length: state.settings.segmentation.segment_length(),
        buffer_chunks: mode == DeliveryMode::Poll,
    })
}

fn is_valid_language(code: &str) -> bool {
    code.len() <= MAX_LANGUAGE_LENGTH && code.chars().all(|c| c.is_ascii_alphabetic() || c == '-')
}

async fn start_job(
    state: &AppState,
    source: SourceMedia,
    request: JobRequest,
    mode: DeliveryMode,
) -> Result<Response, ApiError> {
    let job_id = new_job_id();
    let run = state.orchestrator.start(job_id.clone(), source, request).await?;

    match mode {
        DeliveryMode::Poll => {
            state.orchestrator.spawn(run, None);
            Ok(Json(JobCreated { job_id }).into_response())
        }
        DeliveryMode::Stream => {
            let (tx, mut rx) = mpsc::channel::<JobEvent>(EVENT_BUFFER);
            state.orchestrator.spawn(run, Some(tx));

            let stream = async_stream::stream! {
                while let Some(event) = rx.recv().await {
                    yield Ok::<_, Infallible>(sse_event(&event));
                }
            };
            let keep_alive = KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("keepalive");
            Ok(Sse::new(stream).keep_alive(keep_alive).into_response())
        }
    }
}

fn sse_event(event: &JobEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}
