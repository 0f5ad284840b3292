//! Bounded ingestion of request bodies into temporary spool files.
//!
//! Bodies are copied chunk by chunk, so memory use stays at one chunk no
//! matter how large the upload is. A chunk that would cross the ceiling is
//! never written.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::io::SeekFrom;
use std::path::Path;
use std::pin::pin;
use tempfile::TempPath;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

/// Errors that can occur while spooling a request body.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("payload exceeds the {limit} byte limit")]
    TooLarge { limit: u64 },

    #[error("request body stream failed: {0}")]
    Stream(String),

    #[error("spool file I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A local temporary file exclusively owned by one upload.
///
/// The file is removed when the value is dropped, whichever way the owning
/// scope is left. [`SpooledFile::close`] removes it eagerly and reports
/// the result.
#[derive(Debug)]
pub struct SpooledFile {
    file: File,
    path: TempPath,
    len: u64,
}

impl SpooledFile {
    /// Open an existing file and take over responsibility for removing it.
    ///
    /// The guard is taken before opening, so the path is removed even if
    /// the open fails.
    pub async fn adopt(path: TempPath) -> std::io::Result<Self> {
        let file = File::open(&*path).await?;
        let len = file.metadata().await?.len();
        Ok(Self { file, path, len })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of bytes in the spool
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }

    /// Close the handle and remove the file now.
    pub fn close(self) -> std::io::Result<()> {
        drop(self.file);
        self.path.close()
    }
}

/// Copy `body` into a new temporary file under `dir`, failing with
/// [`IngestError::TooLarge`] as soon as more than `limit` bytes arrive.
///
/// On success the returned file is flushed and rewound to the start.
pub async fn spool_stream<S, E>(body: S, limit: u64, dir: &Path) -> Result<SpooledFile, IngestError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<IngestError>,
{
    let temp = tempfile::Builder::new()
        .prefix("upload-")
        .tempfile_in(dir)?;
    let (file, path) = temp.into_parts();
    let mut file = File::from_std(file);
    let mut body = pin!(body);
    let mut written: u64 = 0;

    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(Into::into)?;
        let total = written + chunk.len() as u64;

        if total > limit {
            warn!(limit, received = total, path = %path.display(), "Upload exceeds size ceiling");
            return Err(IngestError::TooLarge { limit });
        }

        file.write_all(&chunk).await?;
        written = total;
    }

    file.flush().await?;
    file.seek(SeekFrom::Start(0)).await?;

    debug!(bytes = written, path = %path.display(), "Upload spooled");

    Ok(SpooledFile {
        file,
        path,
        len: written,
    })
}
