use crate::config::S3Config;
use crate::ingest::SpooledFile;
use crate::presigned_urls::SignedUrl;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use chrono::Utc;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

/// Errors surfaced by an [`ObjectStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("object upload failed")]
    UploadFailed(#[source] anyhow::Error),

    #[error("presigning failed")]
    PresignFailed(#[source] anyhow::Error),

    #[error("object delete failed")]
    DeleteFailed(#[source] anyhow::Error),
}

/// Remote content store holding uploaded videos.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stream a spooled file to `bucket/key`, tagged with `content_type`.
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        source: &SpooledFile,
        content_type: &str,
    ) -> Result<(), StoreError>;

    /// Time-limited GET URL for one object.
    async fn presign_get(&self, bucket: &str, key: &str, ttl: Duration)
        -> Result<SignedUrl, StoreError>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
}

/// S3 object store with multipart uploads for large files
pub struct S3Store {
    client: S3Client,
    multipart_threshold_bytes: u64,
    part_size_bytes: usize,
}

impl S3Store {
    /// Create a new S3 store
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 store initialized"
        );

        Ok(Self {
            client,
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes,
        })
    }

    /// Single PutObject with a file-backed body
    async fn simple_upload(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<()> {
        let body = ByteStream::from_path(path)
            .await
            .context("Failed to open spooled file")?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload object to S3")?;

        Ok(())
    }

    /// Multipart upload reading one part at a time from disk
    async fn multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .context("Failed to create multipart upload")?;

        let upload_id = create_response
            .upload_id()
            .context("No upload ID in response")?
            .to_string();

        match self.upload_parts(bucket, key, &upload_id, path).await {
            Ok(completed_parts) => {
                let completed_upload = CompletedMultipartUpload::builder()
                    .set_parts(Some(completed_parts))
                    .build();

                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(completed_upload)
                    .send()
                    .await
                    .context("Failed to complete multipart upload")?;

                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!(error = %abort_err, upload_id = %upload_id, "Failed to abort multipart upload");
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        path: &Path,
    ) -> Result<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(path)
            .await
            .context("Failed to open spooled file")?;
        let mut buffer = vec![0u8; self.part_size_bytes];
        let mut completed_parts = Vec::new();
        let mut part_number = 1;

        loop {
            let filled = read_full(&mut file, &mut buffer)
                .await
                .context("Failed to read part from spooled file")?;
            if filled == 0 {
                break;
            }

            let upload_part_response = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(buffer[..filled].to_vec()))
                .send()
                .await
                .with_context(|| format!("Failed to upload part {part_number}"))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(upload_part_response.e_tag().unwrap_or_default())
                    .build(),
            );
            part_number += 1;

            if filled < buffer.len() {
                break;
            }
        }

        Ok(completed_parts)
    }
}

/// Fill `buf` from `file`, stopping early only at end of file
async fn read_full(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

#[async_trait]
impl ObjectStore for S3Store {
    #[instrument(skip(self, source), fields(size_bytes = source.len()))]
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        source: &SpooledFile,
        content_type: &str,
    ) -> Result<(), StoreError> {
        debug!("Uploading object to S3");

        let result = if source.len() > self.multipart_threshold_bytes {
            self.multipart_upload(bucket, key, source.path(), content_type)
                .await
        } else {
            self.simple_upload(bucket, key, source.path(), content_type)
                .await
        };
        result.map_err(StoreError::UploadFailed)?;

        info!(size_bytes = source.len(), "Object uploaded successfully");
        Ok(())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<SignedUrl, StoreError> {
        let presign = async {
            let presigning_config =
                PresigningConfig::expires_in(ttl).context("Failed to create presigning config")?;
            let expires_at = Utc::now()
                + chrono::Duration::from_std(ttl).context("Presign TTL out of range")?;

            let presigned = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .presigned(presigning_config)
                .await
                .context("Failed to generate presigned URL")?;

            Ok::<_, anyhow::Error>(SignedUrl {
                url: presigned.uri().to_string(),
                expires_at,
            })
        };

        presign.await.map_err(StoreError::PresignFailed)
    }

    #[instrument(skip(self))]
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .context("Failed to delete object from S3")
            .map_err(StoreError::DeleteFailed)?;

        debug!("Object deleted from S3");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::spool_stream;
    use aws_sdk_s3::config::retry::RetryConfig;
    use aws_sdk_s3::config::{Credentials, Region, StalledStreamProtectionConfig};
    use aws_smithy_runtime::client::http::test_util::{ReplayEvent, StaticReplayClient};
    use aws_smithy_types::body::SdkBody;
    use bytes::Bytes;
    use futures::stream;
    use std::io::Write;

    const BUCKET: &str = "videos";
    const KEY: &str = "landscape/abc.mp4";

    fn replay_store(
        events: Vec<ReplayEvent>,
        multipart_threshold_bytes: u64,
        part_size_bytes: usize,
    ) -> (S3Store, StaticReplayClient) {
        let http_client = StaticReplayClient::new(events);
        let config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("AKIDTEST", "secret", None, None, "test"))
            .retry_config(RetryConfig::disabled())
            .stalled_stream_protection(StalledStreamProtectionConfig::disabled())
            .http_client(http_client.clone())
            .build();

        let store = S3Store {
            client: S3Client::from_conf(config),
            multipart_threshold_bytes,
            part_size_bytes,
        };
        (store, http_client)
    }

    fn event(status: u16, etag: Option<&str>, body: &'static str) -> ReplayEvent {
        let request = http::Request::builder()
            .uri("https://videos.s3.us-east-1.amazonaws.com/")
            .body(SdkBody::empty())
            .unwrap();
        let mut response = http::Response::builder().status(status);
        if let Some(etag) = etag {
            response = response.header("ETag", etag);
        }
        ReplayEvent::new(request, response.body(SdkBody::from(body)).unwrap())
    }

    fn create_ok() -> ReplayEvent {
        event(
            200,
            None,
            r#"<?xml version="1.0" encoding="UTF-8"?>
<InitiateMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Bucket>videos</Bucket><Key>landscape/abc.mp4</Key><UploadId>upload-1</UploadId></InitiateMultipartUploadResult>"#,
        )
    }

    fn part_ok(n: u32) -> ReplayEvent {
        event(200, Some(&format!("\"etag-{n}\"")), "")
    }

    fn complete_ok() -> ReplayEvent {
        event(
            200,
            None,
            r#"<?xml version="1.0" encoding="UTF-8"?>
<CompleteMultipartUploadResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/"><Bucket>videos</Bucket><Key>landscape/abc.mp4</Key><ETag>"final"</ETag></CompleteMultipartUploadResult>"#,
        )
    }

    async fn spooled(dir: &Path, data: &'static [u8]) -> SpooledFile {
        let body = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(data))]);
        spool_stream(body, 1024, dir).await.unwrap()
    }

    /// (method, uri) of every request the client sent
    fn sent(http_client: &StaticReplayClient) -> Vec<(String, String)> {
        http_client
            .actual_requests()
            .map(|r| (r.method().to_string(), r.uri().to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_read_full_fills_parts_then_remainder() {
        let mut temp = tempfile::NamedTempFile::new().unwrap();
        temp.write_all(&[7u8; 10]).unwrap();

        let mut file = tokio::fs::File::open(temp.path()).await.unwrap();
        let mut buf = [0u8; 4];

        assert_eq!(read_full(&mut file, &mut buf).await.unwrap(), 4);
        assert_eq!(read_full(&mut file, &mut buf).await.unwrap(), 4);
        assert_eq!(read_full(&mut file, &mut buf).await.unwrap(), 2);
        assert_eq!(read_full(&mut file, &mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_construction_uses_custom_endpoint() {
        let config = S3Config {
            bucket: "test-bucket".to_string(),
            region: "us-east-1".to_string(),
            endpoint_url: Some("http://localhost:9000".to_string()),
            force_path_style: true,
            presigned_url_expiry_secs: 300,
            multipart_threshold_bytes: 64 * 1024 * 1024,
            part_size_bytes: 16 * 1024 * 1024,
        };

        let store = S3Store::new(&config).await.unwrap();
        assert_eq!(store.part_size_bytes, 16 * 1024 * 1024);
        assert_eq!(store.multipart_threshold_bytes, 64 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_small_file_uses_single_put() {
        let dir = tempfile::tempdir().unwrap();
        let source = spooled(dir.path(), b"small video").await;
        let (store, http_client) = replay_store(vec![part_ok(1)], 1024, 5);

        store.put_file(BUCKET, KEY, &source, "video/mp4").await.unwrap();

        let requests = sent(&http_client);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "PUT");
        assert!(requests[0].1.contains(KEY));
        assert!(!requests[0].1.contains("partNumber"));
    }

    #[tokio::test]
    async fn test_multipart_upload_sends_parts_in_order() {
        let dir = tempfile::tempdir().unwrap();
        // 12 bytes in 5 byte parts: 5 + 5 + 2
        let source = spooled(dir.path(), b"abcdefghijkl").await;
        let (store, http_client) = replay_store(
            vec![create_ok(), part_ok(1), part_ok(2), part_ok(3), complete_ok()],
            8,
            5,
        );

        store.put_file(BUCKET, KEY, &source, "video/mp4").await.unwrap();

        let requests = sent(&http_client);
        assert_eq!(requests.len(), 5);
        assert_eq!(requests[0].0, "POST");
        assert!(requests[0].1.contains("uploads"));
        for (i, (method, uri)) in requests[1..4].iter().enumerate() {
            assert_eq!(method, "PUT");
            assert!(uri.contains(&format!("partNumber={}", i + 1)), "{uri}");
            assert!(uri.contains("uploadId=upload-1"));
        }
        assert_eq!(requests[4].0, "POST");
        assert!(requests[4].1.contains("uploadId=upload-1"));

        let complete_body = http_client
            .actual_requests()
            .last()
            .and_then(|r| r.body().bytes().map(|b| String::from_utf8_lossy(b).into_owned()))
            .unwrap();
        assert!(complete_body.contains("<PartNumber>3</PartNumber>"));
        assert!(!complete_body.contains("<PartNumber>4</PartNumber>"));
    }

    #[tokio::test]
    async fn test_multipart_exact_multiple_has_no_empty_part() {
        let dir = tempfile::tempdir().unwrap();
        let source = spooled(dir.path(), b"abcdefghij").await;
        let (store, http_client) =
            replay_store(vec![create_ok(), part_ok(1), part_ok(2), complete_ok()], 8, 5);

        store.put_file(BUCKET, KEY, &source, "video/mp4").await.unwrap();

        let requests = sent(&http_client);
        assert_eq!(requests.len(), 4);
        assert!(requests[2].1.contains("partNumber=2"));
        assert_eq!(requests[3].0, "POST");
    }

    #[tokio::test]
    async fn test_failed_part_aborts_upload() {
        let dir = tempfile::tempdir().unwrap();
        let source = spooled(dir.path(), b"abcdefghijkl").await;
        let denied = event(
            403,
            None,
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>"#,
        );
        let (store, http_client) = replay_store(
            vec![create_ok(), part_ok(1), denied, event(204, None, "")],
            8,
            5,
        );

        let err = store
            .put_file(BUCKET, KEY, &source, "video/mp4")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UploadFailed(_)));

        let requests = sent(&http_client);
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[3].0, "DELETE");
        assert!(requests[3].1.contains("uploadId=upload-1"));
    }

    #[tokio::test]
    async fn test_presigned_url_is_bounded_by_ttl() {
        let (store, http_client) = replay_store(vec![], 1024, 5);

        let signed = store
            .presign_get(BUCKET, KEY, Duration::from_secs(300))
            .await
            .unwrap();

        assert!(signed.url.contains("X-Amz-Expires=300"), "{}", signed.url);
        assert!(signed.url.contains(BUCKET));
        assert!(signed.url.contains(KEY));
        let remaining = signed.expires_at - Utc::now();
        assert!(remaining <= chrono::Duration::seconds(300));
        assert!(remaining > chrono::Duration::seconds(290));
        assert!(sent(&http_client).is_empty());
    }
}
