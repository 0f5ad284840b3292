//! Signed retrieval URLs for stored videos.
//!
//! URLs are generated when a record is read, never at upload time and never
//! persisted, so the expiry window always starts at the request.

use crate::metadata_store::VideoRecord;
use crate::s3_uploader::{ObjectStore, StoreError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// A presigned GET URL and the moment it stops working
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignedUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Replace the stored locator of `video` with a presigned URL.
///
/// Records without a decodable locator are returned unchanged.
#[instrument(skip(video, store), fields(video_id = %video.id))]
pub async fn sign_video(
    mut video: VideoRecord,
    store: &dyn ObjectStore,
    ttl: Duration,
) -> Result<VideoRecord, StoreError> {
    let Some(locator) = video.video_locator() else {
        return Ok(video);
    };

    let signed = store.presign_get(&locator.bucket, &locator.key, ttl).await?;
    debug!(locator = %locator, expires_at = %signed.expires_at, "Presigned video URL");

    video.video_url = Some(signed.url);
    Ok(video)
}
