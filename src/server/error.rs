//! API error responses

use crate::config::SecretsError;
use crate::jobs::{JobError, RegistryError, StoreError};
use crate::media::FetchError;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

/// Errors surfaced to HTTP callers as `{"detail": "..."}`
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Upload exceeds {limit} bytes")]
    PayloadTooLarge { limit: u64 },

    #[error(transparent)]
    Multipart(#[from] MultipartError),

    /// Source acquisition or probing failed; the cause is only logged
    #[error("Transcription failed")]
    TranscriptionFailed(String),

    #[error("Internal error")]
    Internal(String),
}

impl ApiError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    /// Map a failure while storing an uploaded file
    pub fn upload(err: FetchError) -> Self {
        match err {
            FetchError::TooLarge { limit } => Self::PayloadTooLarge { limit },
            other => Self::internal(other),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Multipart(e) => e.status(),
            Self::TranscriptionFailed(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> String {
        match self {
            Self::Multipart(e) => e.body_text(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            Self::TranscriptionFailed(cause) | Self::Internal(cause) => {
                tracing::error!("Request failed: {}", cause);
            }
            other => tracing::debug!("Request rejected: {}", other.detail()),
        }

        let body = Json(serde_json::json!({ "detail": self.detail() }));
        (self.status(), body).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => Self::NotFound("Job not found".to_string()),
            RegistryError::DuplicateJob(_) => Self::internal(err),
        }
    }
}

impl From<JobError> for ApiError {
    fn from(err: JobError) -> Self {
        match err {
            JobError::Registry(e) => e.into(),
            JobError::Probe(e) => Self::TranscriptionFailed(e.to_string()),
            JobError::Storage(e) => Self::internal(e),
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::InvalidUrl(_) => Self::BadRequest(err.to_string()),
            other => Self::TranscriptionFailed(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidJobId(_) => Self::NotFound("Transcript not found".to_string()),
            StoreError::Io(e) => Self::internal(e),
        }
    }
}

impl From<SecretsError> for ApiError {
    fn from(err: SecretsError) -> Self {
        Self::BadRequest(err.to_string())
    }
}
