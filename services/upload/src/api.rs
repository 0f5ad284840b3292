use crate::assets::ASSETS_ROUTE;
use crate::auth::{JwtAuthenticator, Principal};
use crate::config::ApiConfig;
use crate::error::UploadError;
use crate::ingest::IngestError;
use crate::metadata_store::{VideoRecord, VideoStore};
use crate::pipeline::UploadPipeline;
use anyhow::{Context, Result};
use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, FromRef, Multipart, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::TryStreamExt;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};
use uuid::Uuid;

/// Form field carrying the video file
pub const VIDEO_FIELD: &str = "video";
/// Form field carrying the thumbnail image
pub const THUMBNAIL_FIELD: &str = "thumbnail";

/// Allowance for multipart boundaries and part headers on top of a file ceiling
const MULTIPART_OVERHEAD_BYTES: u64 = 1 << 20;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<UploadPipeline>,
    pub authenticator: Arc<JwtAuthenticator>,
    pub videos: Arc<dyn VideoStore>,
}

impl FromRef<AppState> for Arc<JwtAuthenticator> {
    fn from_ref(state: &AppState) -> Self {
        state.authenticator.clone()
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    let settings = state.pipeline.settings();
    let video_limit = DefaultBodyLimit::max(body_limit(settings.max_video_bytes));
    let thumbnail_limit = DefaultBodyLimit::max(body_limit(settings.max_thumbnail_bytes));
    let assets = ServeDir::new(state.pipeline.assets().root());

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route(
            "/api/video_upload/:video_id",
            post(upload_video).layer(video_limit),
        )
        .route(
            "/api/thumbnail_upload/:video_id",
            post(upload_thumbnail).layer(thumbnail_limit),
        )
        .route("/api/videos/:video_id", get(get_video))
        .nest_service(ASSETS_ROUTE, assets)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Whole-request limit for a form carrying one file of at most `ceiling` bytes
fn body_limit(ceiling: u64) -> usize {
    usize::try_from(ceiling.saturating_add(MULTIPART_OVERHEAD_BYTES)).unwrap_or(usize::MAX)
}

fn parse_video_id(raw: &str) -> Result<Uuid, UploadError> {
    raw.parse()
        .map_err(|_| UploadError::bad_request("Invalid ID"))
}

/// Body errors surface as 413 once the router limit is crossed
fn multipart_error(e: MultipartError, limit: u64) -> IngestError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        IngestError::TooLarge { limit }
    } else {
        IngestError::Stream(e.body_text())
    }
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "media-upload"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.videos.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Upload the video file for a record
#[instrument(skip(state, multipart))]
async fn upload_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Principal(principal): Principal,
    mut multipart: Multipart,
) -> Result<Json<VideoRecord>, UploadError> {
    let video_id = parse_video_id(&video_id)?;
    let limit = state.pipeline.settings().max_video_bytes;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(VIDEO_FIELD) {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        let body = field.map_err(move |e| multipart_error(e, limit));
        let video = state
            .pipeline
            .upload_video(principal, video_id, &content_type, body)
            .await?;

        return Ok(Json(state.pipeline.sign_video(video).await?));
    }

    Err(UploadError::bad_request("Unable to parse form file"))
}

/// Upload the thumbnail image for a record
#[instrument(skip(state, multipart))]
async fn upload_thumbnail(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Principal(principal): Principal,
    mut multipart: Multipart,
) -> Result<Json<VideoRecord>, UploadError> {
    let video_id = parse_video_id(&video_id)?;
    let limit = state.pipeline.settings().max_thumbnail_bytes;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| multipart_error(e, limit))?
    {
        if field.name() != Some(THUMBNAIL_FIELD) {
            continue;
        }

        let content_type = field.content_type().unwrap_or_default().to_string();
        let body = field.map_err(move |e| multipart_error(e, limit));
        let video = state
            .pipeline
            .upload_thumbnail(principal, video_id, &content_type, body)
            .await?;

        return Ok(Json(state.pipeline.sign_video(video).await?));
    }

    Err(UploadError::bad_request("Unable to parse form file"))
}

/// Get a video record with a freshly signed URL
#[instrument(skip(state))]
async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Principal(_principal): Principal,
) -> Result<Json<VideoRecord>, UploadError> {
    let video_id = parse_video_id(&video_id)?;
    Ok(Json(state.pipeline.get_video(video_id).await?))
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting upload API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
