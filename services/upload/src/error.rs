use crate::ingest::IngestError;
use crate::probe::ProbeError;
use crate::remux::RemuxError;
use crate::s3_uploader::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

/// Caller-facing failure of an upload or retrieval request.
///
/// Every variant maps to exactly one HTTP status. `Dependency` keeps the
/// underlying cause for server-side logging; only `context` is returned.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("payload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    #[error("{context}")]
    Dependency {
        context: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("video {0} not found")]
    NotFound(Uuid),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl UploadError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    pub fn dependency(
        context: &'static str,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Dependency {
            context,
            source: source.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            // Missing records are not distinguished from other store failures.
            Self::Dependency { .. } | Self::NotFound(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::Dependency { .. } => "DEPENDENCY_FAILURE",
            Self::NotFound(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to the caller
    fn public_message(&self) -> String {
        match self {
            Self::NotFound(_) => "Unable to get video from the database".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let status = self.status();

        match &self {
            Self::Dependency { context, source } => {
                error!(context = %context, error = format!("{source:#}"), "Request failed");
            }
            Self::NotFound(video_id) => {
                error!(video_id = %video_id, "Video record not found");
            }
            other => {
                warn!(status = status.as_u16(), error = %other, "Request rejected");
            }
        }

        (
            status,
            Json(ErrorResponse {
                error: self.public_message(),
                code: self.code().to_string(),
            }),
        )
            .into_response()
    }
}

impl From<IngestError> for UploadError {
    fn from(e: IngestError) -> Self {
        match e {
            IngestError::TooLarge { limit } => Self::PayloadTooLarge { limit },
            IngestError::Stream(message) => {
                Self::BadRequest(format!("Unable to read form file: {message}"))
            }
            IngestError::Io(source) => Self::dependency("Failed to spool upload", source),
        }
    }
}

impl From<ProbeError> for UploadError {
    fn from(e: ProbeError) -> Self {
        Self::dependency("Error determining video aspect ratio", e)
    }
}

impl From<RemuxError> for UploadError {
    fn from(e: RemuxError) -> Self {
        Self::dependency("Failed to preprocess video", e)
    }
}

impl From<StoreError> for UploadError {
    fn from(e: StoreError) -> Self {
        let context = match &e {
            StoreError::UploadFailed(_) => "Failed to upload video to object storage",
            StoreError::PresignFailed(_) => "Failed to generate signed URL for video",
            StoreError::DeleteFailed(_) => "Failed to delete stored object",
        };
        Self::dependency(context, e)
    }
}
