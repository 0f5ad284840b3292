//! Upload orchestration.
//!
//! Each request runs one strictly forward sequence of stages:
//!
//! ```text
//! Received -> Validated -> Spooled -> Classified -> Remuxed -> Uploaded -> Recorded -> Done
//!                                     (video only)  (video only)
//! ```
//!
//! The first error ends the run. Validation (content type and ownership)
//! completes before any file is created, and every temporary file is held
//! by a guard that removes it on every exit path.

use crate::assets::LocalAssetStore;
use crate::config::Config;
use crate::error::UploadError;
use crate::ingest::{spool_stream, IngestError, SpooledFile};
use crate::keys::{thumbnail_key, video_key, MediaKind};
use crate::locator::StorageLocator;
use crate::metadata_store::{VideoRecord, VideoStore};
use crate::presigned_urls;
use crate::probe::MediaInspector;
use crate::remux::{faststart_path, MediaTranscoder};
use crate::s3_uploader::ObjectStore;
use bytes::Bytes;
use chrono::Utc;
use futures::Stream;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Progress of one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Received,
    Validated,
    Spooled,
    Classified,
    Remuxed,
    Uploaded,
    Recorded,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Validated => "validated",
            Stage::Spooled => "spooled",
            Stage::Classified => "classified",
            Stage::Remuxed => "remuxed",
            Stage::Uploaded => "uploaded",
            Stage::Recorded => "recorded",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal failure of a run: the last stage reached and the first error
#[derive(Debug, Error)]
#[error("upload failed after {stage}: {error}")]
pub struct PipelineFailure {
    pub stage: Stage,
    #[source]
    pub error: UploadError,
}

impl From<PipelineFailure> for UploadError {
    fn from(failure: PipelineFailure) -> Self {
        failure.error
    }
}

/// Bookkeeping for a single run
struct Run {
    kind: &'static str,
    video_id: Uuid,
    stage: Stage,
}

impl Run {
    fn new(kind: &'static str, video_id: Uuid) -> Self {
        Self {
            kind,
            video_id,
            stage: Stage::Received,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "stage went from {} to {}", self.stage, next);
        self.stage = next;
        debug!(kind = self.kind, video_id = %self.video_id, stage = %next, "Upload advanced");
    }

    fn fail(&self, error: impl Into<UploadError>) -> PipelineFailure {
        let error = error.into();
        warn!(
            kind = self.kind,
            video_id = %self.video_id,
            stage = %self.stage,
            error = %error,
            "Upload failed"
        );
        metrics::counter!(
            "upload.failed",
            "kind" => self.kind,
            "stage" => self.stage.as_str(),
            "code" => error.code()
        )
        .increment(1);

        PipelineFailure {
            stage: self.stage,
            error,
        }
    }

    fn complete(&mut self, bytes: u64) {
        self.advance(Stage::Done);
        metrics::counter!("upload.completed", "kind" => self.kind).increment(1);
        metrics::counter!("upload.bytes", "kind" => self.kind).increment(bytes);
    }
}

/// Values the pipeline needs from [`Config`]
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub bucket: String,
    pub spool_dir: PathBuf,
    pub max_video_bytes: u64,
    pub max_thumbnail_bytes: u64,
    pub presign_ttl: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bucket: config.s3.bucket.clone(),
            spool_dir: config.media.spool_dir(),
            max_video_bytes: config.media.max_video_bytes,
            max_thumbnail_bytes: config.media.max_thumbnail_bytes,
            presign_ttl: config.presigned_url_expiry(),
        }
    }
}

/// Sequences ingestion, inspection, remuxing, storage and recording
pub struct UploadPipeline {
    settings: PipelineSettings,
    inspector: Arc<dyn MediaInspector>,
    transcoder: Arc<dyn MediaTranscoder>,
    store: Arc<dyn ObjectStore>,
    videos: Arc<dyn VideoStore>,
    assets: LocalAssetStore,
}

impl UploadPipeline {
    pub fn new(
        settings: PipelineSettings,
        inspector: Arc<dyn MediaInspector>,
        transcoder: Arc<dyn MediaTranscoder>,
        store: Arc<dyn ObjectStore>,
        videos: Arc<dyn VideoStore>,
        assets: LocalAssetStore,
    ) -> Self {
        Self {
            settings,
            inspector,
            transcoder,
            store,
            videos,
            assets,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn assets(&self) -> &LocalAssetStore {
        &self.assets
    }

    /// Fetch the target record and check that `principal` owns it
    async fn authorize(&self, principal: Uuid, video_id: Uuid) -> Result<VideoRecord, UploadError> {
        let video = self
            .videos
            .get_video(video_id)
            .await
            .map_err(|e| UploadError::dependency("Unable to get video from the database", e))?
            .ok_or(UploadError::NotFound(video_id))?;

        if video.user_id != principal {
            return Err(UploadError::unauthorized(
                "Authenticated user is not the video owner",
            ));
        }

        Ok(video)
    }

    /// Store a video: spool, classify, remux, upload, record.
    #[instrument(skip(self, body), fields(principal = %principal, video_id = %video_id))]
    pub async fn upload_video<S, E>(
        &self,
        principal: Uuid,
        video_id: Uuid,
        content_type: &str,
        body: S,
    ) -> Result<VideoRecord, PipelineFailure>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<IngestError>,
    {
        let mut run = Run::new("video", video_id);

        let kind = MediaKind::parse(content_type, MediaKind::VIDEO)
            .ok_or_else(|| run.fail(UploadError::bad_request("Unsupported media type")))?;
        let mut video = self
            .authorize(principal, video_id)
            .await
            .map_err(|e| run.fail(e))?;
        run.advance(Stage::Validated);

        let original = spool_stream(body, self.settings.max_video_bytes, &self.settings.spool_dir)
            .await
            .map_err(|e| run.fail(e))?;
        run.advance(Stage::Spooled);

        let geometry = self
            .inspector
            .probe(original.path())
            .await
            .map_err(|e| run.fail(e))?;
        let orientation = geometry.orientation();
        run.advance(Stage::Classified);

        // Guard the output before the tool can create it.
        let output = TempPath::from_path(faststart_path(original.path()));
        self.transcoder
            .remux_faststart(original.path(), &output)
            .await
            .map_err(|e| run.fail(e))?;
        let processed = SpooledFile::adopt(output).await.map_err(|e| {
            run.fail(UploadError::dependency("Failed to open preprocessed video", e))
        })?;
        release(original);
        run.advance(Stage::Remuxed);

        let locator = StorageLocator::new(&self.settings.bucket, video_key(orientation));
        self.store
            .put_file(&locator.bucket, &locator.key, &processed, kind.content_type())
            .await
            .map_err(|e| run.fail(e))?;
        let size = processed.len();
        release(processed);
        run.advance(Stage::Uploaded);

        video.set_video_locator(&locator);
        video.updated_at = Utc::now();
        if let Err(e) = self.videos.update_video(&video).await {
            if let Err(delete_err) = self.store.delete_object(&locator.bucket, &locator.key).await {
                warn!(error = %delete_err, locator = %locator, "Failed to roll back stored object");
            }
            return Err(run.fail(UploadError::dependency("Failed to update database record", e)));
        }
        run.advance(Stage::Recorded);

        info!(
            locator = %locator,
            orientation = orientation.as_str(),
            size_bytes = size,
            "Video uploaded"
        );
        run.complete(size);

        Ok(video)
    }

    /// Store a thumbnail in the local asset root and point the record at it.
    #[instrument(skip(self, body), fields(principal = %principal, video_id = %video_id))]
    pub async fn upload_thumbnail<S, E>(
        &self,
        principal: Uuid,
        video_id: Uuid,
        content_type: &str,
        body: S,
    ) -> Result<VideoRecord, PipelineFailure>
    where
        S: Stream<Item = Result<Bytes, E>> + Send,
        E: Into<IngestError>,
    {
        let mut run = Run::new("thumbnail", video_id);

        let kind = MediaKind::parse(content_type, MediaKind::THUMBNAIL).ok_or_else(|| {
            run.fail(UploadError::bad_request("Thumbnail must be a JPEG or PNG image"))
        })?;
        let mut video = self
            .authorize(principal, video_id)
            .await
            .map_err(|e| run.fail(e))?;
        run.advance(Stage::Validated);

        let spooled = spool_stream(
            body,
            self.settings.max_thumbnail_bytes,
            &self.settings.spool_dir,
        )
        .await
        .map_err(|e| run.fail(e))?;
        run.advance(Stage::Spooled);

        let file_name = thumbnail_key(kind);
        self.assets
            .persist(&spooled, &file_name)
            .await
            .map_err(|e| run.fail(UploadError::dependency("Couldn't create thumbnail file", e)))?;
        let size = spooled.len();
        release(spooled);
        run.advance(Stage::Uploaded);

        video.thumbnail_url = Some(self.assets.url_for(&file_name));
        video.updated_at = Utc::now();
        if let Err(e) = self.videos.update_video(&video).await {
            self.assets.remove(&file_name).await;
            return Err(run.fail(UploadError::dependency("Failed to update database record", e)));
        }
        run.advance(Stage::Recorded);

        info!(file_name = %file_name, size_bytes = size, "Thumbnail uploaded");
        run.complete(size);

        Ok(video)
    }

    /// Record for `video_id` with a freshly signed video URL
    pub async fn get_video(&self, video_id: Uuid) -> Result<VideoRecord, UploadError> {
        let video = self
            .videos
            .get_video(video_id)
            .await
            .map_err(|e| UploadError::dependency("Unable to get video from the database", e))?
            .ok_or(UploadError::NotFound(video_id))?;

        self.sign_video(video).await
    }

    /// Swap the stored locator for a signed URL, for responses only
    pub async fn sign_video(&self, video: VideoRecord) -> Result<VideoRecord, UploadError> {
        let signed =
            presigned_urls::sign_video(video, self.store.as_ref(), self.settings.presign_ttl)
                .await?;
        Ok(signed)
    }
}

/// Remove a spool as soon as it is no longer needed
fn release(spooled: SpooledFile) {
    let path = spooled.path().to_path_buf();
    if let Err(e) = spooled.close() {
        warn!(error = %e, path = %path.display(), "Failed to remove spool file");
    }
}
