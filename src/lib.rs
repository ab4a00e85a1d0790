//! Chunkscribe Library
//!
//! Chunked, cancellable speech-to-text transcription of audio files over
//! HTTP. Sources are split into fixed-length segments, each segment is sent
//! to a remote provider in order, and labeled chunks are delivered as they
//! arrive. The final transcript is persisted per job.

pub mod config;
pub mod jobs;
pub mod media;
pub mod server;
pub mod transcription;

pub use server::{router, AppState};

use anyhow::Context;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Install the global tracing subscriber
///
/// Logs go to stdout and, when a directory is configured, to a daily
/// rolling file. The returned guard must be held until exit.
pub fn init_tracing(settings: &config::LoggingSettings) -> Option<WorkerGuard> {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| settings.level.as_str().into())
    };

    let (file_layer, guard) = match &settings.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "chunkscribe.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter()))
        .with(file_layer)
        .init();

    guard
}

/// Build the shared application state from settings
pub fn build_state(
    settings: config::Settings,
    default_api_key: Option<config::ApiKey>,
) -> AppState {
    let work_dir = settings.segmentation.work_dir();

    let orchestrator = jobs::JobOrchestrator::new(
        Arc::new(jobs::JobRegistry::new()),
        Arc::new(jobs::TranscriptStore::new(settings.storage.transcripts_dir.clone())),
        Arc::new(media::FfmpegSegmenter::new(settings.segmentation.clone())),
        Arc::new(transcription::OpenAiCompatibleProvider::from_settings(
            &settings.transcription,
        )),
        settings.transcription.timeout(),
    );

    let fetcher = media::SourceFetcher::new(
        work_dir,
        settings.fetch.timeout_seconds,
        settings.fetch.max_bytes,
    );

    AppState {
        settings: Arc::new(settings),
        orchestrator: Arc::new(orchestrator),
        fetcher: Arc::new(fetcher),
        default_api_key,
    }
}

/// Load configuration and serve until Ctrl-C
pub async fn run() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let mut settings = config::load_settings().context("Failed to load settings")?;
    settings.apply_env_overrides();

    let _log_guard = init_tracing(&settings.logging);
    tracing::info!("Starting Chunkscribe v{}", env!("CARGO_PKG_VERSION"));

    settings.validate().context("Invalid settings")?;

    let transcription = &settings.transcription;
    let default_api_key =
        match config::SecretsManager::default_api_key(transcription.provider, &transcription.api_key_env) {
            Ok(key) => Some(key),
            Err(e) if transcription.require_api_key => {
                return Err(e).with_context(|| {
                    format!("A {} API key is required at startup", transcription.provider.name())
                });
            }
            Err(e) => {
                tracing::warn!("No default API key ({}); requests must supply one", e);
                None
            }
        };

    tracing::info!(
        "Provider: {} ({}), segments of {}s, transcripts in {:?}",
        transcription.provider.name(),
        transcription.model(),
        settings.segmentation.segment_seconds,
        settings.storage.transcripts_dir
    );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let state = build_state(settings, default_api_key);
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Chunkscribe stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
