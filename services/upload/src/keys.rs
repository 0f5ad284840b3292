//! Storage key derivation and accepted media types.

use crate::probe::Orientation;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};

/// Bytes of OS entropy behind every key
const TOKEN_BYTES: usize = 32;

/// Media types accepted by the upload endpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Mp4,
    Jpeg,
    Png,
}

impl MediaKind {
    pub const VIDEO: &'static [MediaKind] = &[MediaKind::Mp4];
    pub const THUMBNAIL: &'static [MediaKind] = &[MediaKind::Jpeg, MediaKind::Png];

    pub fn content_type(self) -> &'static str {
        match self {
            MediaKind::Mp4 => "video/mp4",
            MediaKind::Jpeg => "image/jpeg",
            MediaKind::Png => "image/png",
        }
    }

    /// File extension, equal to the MIME subtype
    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Mp4 => "mp4",
            MediaKind::Jpeg => "jpeg",
            MediaKind::Png => "png",
        }
    }

    /// Match a declared `Content-Type` against `allowed`.
    ///
    /// Parameters are ignored and comparison is case-insensitive, so
    /// `Video/MP4; codecs="avc1"` is an MP4. Returns `None` for malformed or
    /// disallowed types.
    pub fn parse(content_type: &str, allowed: &[MediaKind]) -> Option<MediaKind> {
        let parsed: mime::Mime = content_type.trim().parse().ok()?;
        let essence = parsed.essence_str().to_ascii_lowercase();

        allowed
            .iter()
            .copied()
            .find(|kind| kind.content_type() == essence)
    }
}

/// URL-safe random token carrying 256 bits of entropy
pub fn random_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Object key for a video: `<orientation segment>/<token>.mp4`
pub fn video_key(orientation: Orientation) -> String {
    format!(
        "{}/{}.{}",
        orientation.path_segment(),
        random_token(),
        MediaKind::Mp4.extension()
    )
}

/// File name for a locally stored thumbnail: `<token>.<ext>`
pub fn thumbnail_key(kind: MediaKind) -> String {
    format!("{}.{}", random_token(), kind.extension())
}
