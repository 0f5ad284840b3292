//! In-memory collaborators for exercising the pipeline without S3 or Postgres.

use crate::ingest::SpooledFile;
use crate::metadata_store::{VideoRecord, VideoStore};
use crate::presigned_urls::SignedUrl;
use crate::s3_uploader::{ObjectStore, StoreError};
use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Object store keeping objects in a map.
///
/// Signed URLs look like `memory://<bucket>/<key>?expires=<unix seconds>` and
/// are checked by [`MemoryObjectStore::fetch_signed`].
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), StoredObject>>,
    puts: AtomicUsize,
    presigns: AtomicUsize,
    fail_puts: AtomicBool,
}

impl MemoryObjectStore {
    pub fn failing() -> Self {
        let store = Self::default();
        store.fail_puts.store(true, Ordering::SeqCst);
        store
    }

    pub fn insert(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: "application/octet-stream".to_string(),
            },
        );
    }

    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .map(|(_, key)| key.clone())
            .collect()
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn presign_count(&self) -> usize {
        self.presigns.load(Ordering::SeqCst)
    }

    /// Resolve a signed URL as the store would at instant `now`
    pub fn fetch_signed(&self, url: &str, now: DateTime<Utc>) -> Option<Vec<u8>> {
        let rest = url.strip_prefix("memory://")?;
        let (path, query) = rest.split_once("?expires=")?;
        let (bucket, key) = path.split_once('/')?;
        let expires_at = Utc.timestamp_opt(query.parse().ok()?, 0).single()?;

        if now > expires_at {
            return None;
        }
        self.get(bucket, key).map(|o| o.data)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        source: &SpooledFile,
        content_type: &str,
    ) -> Result<(), StoreError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::UploadFailed(anyhow!("access denied")));
        }

        let data = tokio::fs::read(source.path())
            .await
            .map_err(|e| StoreError::UploadFailed(e.into()))?;
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<SignedUrl, StoreError> {
        self.presigns.fetch_add(1, Ordering::SeqCst);
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).map_err(|e| StoreError::PresignFailed(e.into()))?;

        Ok(SignedUrl {
            url: format!(
                "memory://{bucket}/{key}?expires={}",
                expires_at.timestamp()
            ),
            expires_at,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.objects
            .lock()
            .unwrap()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// Video store keeping records in a map
#[derive(Default)]
pub struct MemoryVideoStore {
    videos: Mutex<HashMap<Uuid, VideoRecord>>,
    updates: AtomicUsize,
    fail_updates: AtomicBool,
}

impl MemoryVideoStore {
    pub fn insert(&self, video: VideoRecord) {
        self.videos.lock().unwrap().insert(video.id, video);
    }

    pub fn get(&self, video_id: Uuid) -> Option<VideoRecord> {
        self.videos.lock().unwrap().get(&video_id).cloned()
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn fail_updates(&self) {
        self.fail_updates.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn get_video(&self, video_id: Uuid) -> anyhow::Result<Option<VideoRecord>> {
        Ok(self.get(video_id))
    }

    async fn update_video(&self, video: &VideoRecord) -> anyhow::Result<()> {
        if self.fail_updates.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        self.updates.fetch_add(1, Ordering::SeqCst);

        let mut videos = self.videos.lock().unwrap();
        match videos.get_mut(&video.id) {
            Some(existing) => {
                *existing = video.clone();
                Ok(())
            }
            None => bail!("video {} does not exist", video.id),
        }
    }

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
