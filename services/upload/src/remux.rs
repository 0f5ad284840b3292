//! Fast-start remuxing: move the MP4 index (`moov`) ahead of the media data
//! so playback can begin before the whole object is downloaded.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Suffix appended to the input path to name the remuxed output
pub const FASTSTART_SUFFIX: &str = ".processing";

/// Errors that can occur during remuxing.
#[derive(Debug, Error)]
pub enum RemuxError {
    #[error("failed to run ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffmpeg exited with {status}")]
    ToolFailed { status: String, stderr: String },
}

/// Output path for a remux of `input`
pub fn faststart_path(input: &Path) -> PathBuf {
    let mut path = OsString::from(input.as_os_str());
    path.push(FASTSTART_SUFFIX);
    PathBuf::from(path)
}

/// Rewrites a container without re-encoding.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaTranscoder: Send + Sync {
    /// Copy every stream of `input` into `output` with the index up front.
    async fn remux_faststart(&self, input: &Path, output: &Path) -> Result<(), RemuxError>;
}

/// [`MediaTranscoder`] backed by the `ffmpeg` binary
pub struct FfmpegRemuxer {
    ffmpeg_path: String,
}

impl FfmpegRemuxer {
    pub fn new(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
        }
    }

    fn command(&self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.args(["-nostdin", "-v", "error", "-y", "-i"])
            .arg(input)
            .args(["-c", "copy", "-movflags", "faststart", "-f", "mp4"])
            .arg(output)
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl MediaTranscoder for FfmpegRemuxer {
    #[instrument(skip(self), fields(
        process.executable.path = %self.ffmpeg_path,
        input = %input.display(),
        output = %output.display()
    ))]
    async fn remux_faststart(&self, input: &Path, output: &Path) -> Result<(), RemuxError> {
        let start = std::time::Instant::now();

        let result = self
            .command(input, output)
            .output()
            .await
            .map_err(RemuxError::Spawn)?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).into_owned();
            warn!(status = %result.status, stderr = %stderr, "ffmpeg remux failed");
            return Err(RemuxError::ToolFailed {
                status: result.status.to_string(),
                stderr,
            });
        }

        debug!(duration_ms = start.elapsed().as_millis() as u64, "Remux completed");
        Ok(())
    }
}
