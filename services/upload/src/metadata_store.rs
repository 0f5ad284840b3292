use crate::config::DatabaseConfig;
use crate::locator::StorageLocator;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::time::Duration;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Stored video record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct VideoRecord {
    /// Unique video ID
    pub id: Uuid,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Last modification
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub description: Option<String>,
    /// Direct URL of a locally served thumbnail
    pub thumbnail_url: Option<String>,
    /// `"<bucket>,<key>"` when persisted; a signed URL in responses
    pub video_url: Option<String>,
    /// Owner
    pub user_id: Uuid,
}

impl VideoRecord {
    pub fn new(user_id: Uuid, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            title: title.into(),
            description: None,
            thumbnail_url: None,
            video_url: None,
            user_id,
        }
    }

    /// Decoded object locator, if the stored video URL is one
    pub fn video_locator(&self) -> Option<StorageLocator> {
        self.video_url.as_deref().and_then(StorageLocator::decode)
    }

    pub fn set_video_locator(&mut self, locator: &StorageLocator) {
        self.video_url = Some(locator.encode());
    }
}

/// Video metadata persistence used by the upload pipeline
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn get_video(&self, video_id: Uuid) -> Result<Option<VideoRecord>>;

    /// Overwrite the mutable fields of an existing record
    async fn update_video(&self, video: &VideoRecord) -> Result<()>;

    /// Connectivity check for readiness
    async fn ping(&self) -> Result<()>;
}

/// Video metadata store in PostgreSQL
pub struct PgVideoStore {
    pool: PgPool,
}

impl PgVideoStore {
    /// Create a new store with connection pool
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Some(Duration::from_secs(config.idle_timeout_secs)))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }

}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn get_video(&self, video_id: Uuid) -> Result<Option<VideoRecord>> {
        let video = sqlx::query_as::<_, VideoRecord>(
            r#"
            SELECT id, created_at, updated_at, title, description,
                   thumbnail_url, video_url, user_id
            FROM videos
            WHERE id = $1
            "#,
        )
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to query video")?;

        Ok(video)
    }

    #[instrument(skip(self, video), fields(video_id = %video.id))]
    async fn update_video(&self, video: &VideoRecord) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE videos
            SET title = $2,
                description = $3,
                thumbnail_url = $4,
                video_url = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(video.id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(&video.thumbnail_url)
        .bind(&video.video_url)
        .execute(&self.pool)
        .await
        .context("Failed to update video")?;

        if result.rows_affected() == 0 {
            bail!("video {} does not exist", video.id);
        }

        debug!("Video record updated");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database is unreachable")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_accessors() {
        let mut video = VideoRecord::new(Uuid::new_v4(), "demo");
        assert_eq!(video.video_locator(), None);

        let locator = StorageLocator::new("videos", "landscape/abc.mp4");
        video.set_video_locator(&locator);
        assert_eq!(video.video_url.as_deref(), Some("videos,landscape/abc.mp4"));
        assert_eq!(video.video_locator(), Some(locator));
    }

    #[test]
    fn test_legacy_url_is_not_a_locator() {
        let mut video = VideoRecord::new(Uuid::new_v4(), "demo");
        video.video_url = Some("http://localhost:8091/assets/old.mp4".to_string());
        assert_eq!(video.video_locator(), None);
    }
}
