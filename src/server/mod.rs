//! HTTP Server
//!
//! axum router exposing job submission, cancellation and retrieval.

mod error;
mod handlers;

pub use error::ApiError;
pub use handlers::{DeliveryMode, HealthResponse, JobCreated, TranscribeQuery, UrlRequest};

use crate::config::{ApiKey, Settings};
use crate::jobs::JobOrchestrator;
use crate::media::SourceFetcher;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub fetcher: Arc<SourceFetcher>,
    /// Used when a request carries no `api_key`
    pub default_api_key: Option<ApiKey>,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.settings.server.max_upload_bytes;

    Router::new()
        .route("/transcribe/file", post(handlers::transcribe_file))
        .route("/transcribe/url", post(handlers::transcribe_url))
        .route("/cancel_transcription/:job_id", post(handlers::cancel_transcription))
        .route("/get_transcript/:job_id", get(handlers::get_transcript))
        .route("/transcripts/:job_id", get(handlers::stored_transcript))
        .route("/health", get(handlers::health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
