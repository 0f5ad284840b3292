//! Media Upload Service
//!
//! Accepts video and thumbnail uploads for existing video records. Videos are
//! spooled to disk under a size ceiling, classified by aspect ratio with
//! `ffprobe`, remuxed for progressive playback with `ffmpeg`, stored in S3
//! under an orientation prefix and recorded in PostgreSQL. Reads return the
//! record with a short-lived presigned URL.
//!
//! ## Features
//!
//! - **Bounded Ingestion**: request bodies are copied chunk by chunk into
//!   temporary files that are removed on every exit path
//! - **Orientation Classification**: exact integer 16:9 and 9:16 checks on the
//!   first probed stream
//! - **Fast-Start Remux**: stream copy with the index moved to the front
//! - **Presigned Retrieval**: signed URLs generated per request, never stored
//!
//! ## Architecture
//!
//! ```text
//! HTTP (multipart)
//! ┌──────────────┐    ┌──────────────┐    ┌──────────────┐    ┌──────────────┐
//! │ Bounded      │───▶│ ffprobe      │───▶│ ffmpeg       │───▶│ S3 Store     │
//! │ Ingest       │    │ Classifier   │    │ Remuxer      │    │ {orient}/key │
//! └──────────────┘    └──────────────┘    └──────────────┘    └──────────────┘
//!        │                                                           │
//!        │ thumbnails                                                ▼
//!        ▼                                                    ┌──────────────┐
//! ┌──────────────┐                                            │ PostgreSQL   │
//! │ Local Assets │───────────────────────────────────────────▶│ videos       │
//! └──────────────┘                                            └──────────────┘
//!                                                                    │
//!                                                                    ▼
//!                                                             ┌──────────────┐
//!                                                             │ Presigned    │
//!                                                             │ URL Reads    │
//!                                                             └──────────────┘
//! ```

pub mod api;
pub mod assets;
pub mod auth;
pub mod config;
pub mod error;
pub mod ingest;
pub mod keys;
pub mod locator;
pub mod metadata_store;
pub mod pipeline;
pub mod presigned_urls;
pub mod probe;
pub mod remux;
pub mod s3_uploader;

#[cfg(test)]
mod testing;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::UploadError;
pub use locator::StorageLocator;
pub use metadata_store::{PgVideoStore, VideoRecord, VideoStore};
pub use pipeline::{PipelineFailure, PipelineSettings, Stage, UploadPipeline};
pub use presigned_urls::SignedUrl;
pub use probe::{FfprobeInspector, MediaInspector, Orientation};
pub use remux::{FfmpegRemuxer, MediaTranscoder};
pub use s3_uploader::{ObjectStore, S3Store};
