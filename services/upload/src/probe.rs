//! Stream inspection and aspect-ratio classification.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Errors that can occur while inspecting a media file.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run ffprobe: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("ffprobe exited with {status}")]
    ToolFailed { status: String, stderr: String },

    #[error("could not parse ffprobe output: {0}")]
    UnparseableOutput(#[from] serde_json::Error),

    #[error("no media stream found")]
    NoMediaStream,
}

/// Coarse orientation of the first media stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Exactly 16:9
    Wide,
    /// Exactly 9:16
    Tall,
    Other,
}

impl Orientation {
    /// Key prefix for objects of this orientation
    pub fn path_segment(self) -> &'static str {
        match self {
            Orientation::Wide => "landscape",
            Orientation::Tall => "portrait",
            Orientation::Other => "other",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Orientation::Wide => "16:9",
            Orientation::Tall => "9:16",
            Orientation::Other => "other",
        }
    }
}

/// Width and height of the first stream reported by the probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamGeometry {
    pub width: i32,
    pub height: i32,
}

impl StreamGeometry {
    pub fn orientation(&self) -> Orientation {
        classify(self.width, self.height)
    }
}

/// Classify a frame size with exact integer arithmetic.
///
/// `16 * height / 9` truncates, so 1365x768 is wide while 1366x768 is not.
/// Products are taken in `i64`, so no `i32` input can overflow.
pub fn classify(width: i32, height: i32) -> Orientation {
    let (width, height) = (i64::from(width), i64::from(height));

    if width == 16 * height / 9 {
        Orientation::Wide
    } else if height == 16 * width / 9 {
        Orientation::Tall
    } else {
        Orientation::Other
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    // Audio and data streams carry no geometry.
    #[serde(default)]
    width: i32,
    #[serde(default)]
    height: i32,
}

/// Extract the first stream's geometry from ffprobe's JSON output
pub fn parse_probe_output(stdout: &[u8]) -> Result<StreamGeometry, ProbeError> {
    let output: ProbeOutput = serde_json::from_slice(stdout)?;
    let first = output.streams.first().ok_or(ProbeError::NoMediaStream)?;

    Ok(StreamGeometry {
        width: first.width,
        height: first.height,
    })
}

/// Reads stream geometry from a spooled media file.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaInspector: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<StreamGeometry, ProbeError>;
}

/// [`MediaInspector`] backed by the `ffprobe` binary
pub struct FfprobeInspector {
    ffprobe_path: String,
}

impl FfprobeInspector {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[async_trait]
impl MediaInspector for FfprobeInspector {
    #[instrument(skip(self), fields(
        process.executable.path = %self.ffprobe_path,
        path = %path.display()
    ))]
    async fn probe(&self, path: &Path) -> Result<StreamGeometry, ProbeError> {
        let start = std::time::Instant::now();

        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-print_format", "json", "-show_streams"])
            .arg(path)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(ProbeError::Spawn)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(status = %output.status, stderr = %stderr, "ffprobe failed");
            return Err(ProbeError::ToolFailed {
                status: output.status.to_string(),
                stderr,
            });
        }

        let geometry = parse_probe_output(&output.stdout)?;

        debug!(
            duration_ms = start.elapsed().as_millis() as u64,
            width = geometry.width,
            height = geometry.height,
            orientation = geometry.orientation().as_str(),
            "Probe completed"
        );

        Ok(geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_reference_sizes() {
        assert_eq!(classify(1920, 1080), Orientation::Wide);
        assert_eq!(classify(1080, 1920), Orientation::Tall);
        assert_eq!(classify(1000, 1000), Orientation::Other);
        assert_eq!(classify(1280, 720), Orientation::Wide);
        assert_eq!(classify(608, 1080), Orientation::Tall);
    }

    #[test]
    fn test_classify_uses_truncating_division() {
        // 16 * 768 / 9 = 1365.33 -> 1365
        assert_eq!(classify(1365, 768), Orientation::Wide);
        assert_eq!(classify(1366, 768), Orientation::Other);
        assert_eq!(classify(640, 480), Orientation::Other);
    }

    #[test]
    fn test_classify_extreme_sizes() {
        assert_eq!(classify(i32::MAX, i32::MAX), Orientation::Other);
        assert_eq!(classify(1, i32::MAX), Orientation::Other);
        assert_eq!(classify(i32::MIN, 1), Orientation::Other);
    }

    #[test]
    fn test_parse_rejects_out_of_range_dimensions() {
        let err = parse_probe_output(br#"{"streams": [{"width": 1, "height": 2305843009213693951}]}"#)
            .unwrap_err();
        assert!(matches!(err, ProbeError::UnparseableOutput(_)));
    }

    #[test]
    fn test_orientation_path_segments() {
        assert_eq!(Orientation::Wide.path_segment(), "landscape");
        assert_eq!(Orientation::Tall.path_segment(), "portrait");
        assert_eq!(Orientation::Other.path_segment(), "other");
    }

    #[test]
    fn test_parse_takes_first_stream() {
        let stdout = br#"{
            "streams": [
                {"index": 0, "codec_type": "video", "width": 1080, "height": 1920},
                {"index": 1, "codec_type": "audio"}
            ]
        }"#;

        let geometry = parse_probe_output(stdout).unwrap();
        assert_eq!(geometry, StreamGeometry { width: 1080, height: 1920 });
        assert_eq!(geometry.orientation(), Orientation::Tall);
    }

    #[test]
    fn test_parse_empty_streams() {
        let err = parse_probe_output(br#"{"streams": []}"#).unwrap_err();
        assert!(matches!(err, ProbeError::NoMediaStream));

        let err = parse_probe_output(b"{}").unwrap_err();
        assert!(matches!(err, ProbeError::NoMediaStream));
    }

    #[test]
    fn test_parse_garbage() {
        let err = parse_probe_output(b"Invalid data found when processing input").unwrap_err();
        assert!(matches!(err, ProbeError::UnparseableOutput(_)));
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let inspector = FfprobeInspector::new("/nonexistent/ffprobe");
        let err = inspector.probe(Path::new("/tmp/whatever.mp4")).await.unwrap_err();
        assert!(matches!(err, ProbeError::Spawn(_)));
    }
}
