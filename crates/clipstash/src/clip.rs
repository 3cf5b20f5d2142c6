//! Core clip types for clipstash.
//!
//! This module defines the in-memory result of a recording and the still
//! image derived from it, plus the display helpers the capture UI uses.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::encoder::EncodingFormat;
use crate::error::{Error, Result};

/// An encoded still image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StillImage {
    /// MIME type of `data` (`image/jpeg`).
    pub mime_type: String,
    /// Pixel width.
    pub width: u32,
    /// Pixel height.
    pub height: u32,
    /// Encoded bytes.
    pub data: Vec<u8>,
}

impl StillImage {
    /// Render as a `data:` URL usable as a preview-image reference.
    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, BASE64.encode(&self.data))
    }
}

/// A finished, in-memory recording prior to persistence.
///
/// Produced once by a capture session and consumed once, either by
/// discarding it or by saving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedClip {
    /// Encoded video bytes.
    pub payload: Bytes,
    /// Wall-clock length of the recording.
    pub duration: Duration,
    /// Negotiated container/codec.
    pub format: EncodingFormat,
    /// When recording started.
    pub recorded_at: DateTime<Utc>,
    /// First-frame preview, if extraction succeeded.
    pub preview: Option<StillImage>,
}

impl RecordedClip {
    /// Payload size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Duration in whole seconds.
    #[must_use]
    pub fn duration_secs(&self) -> u64 {
        self.duration.as_secs()
    }

    /// BLAKE3 digest of the payload.
    #[must_use]
    pub fn digest(&self) -> String {
        payload_digest(&self.payload)
    }

    /// Suggested download name, e.g. `video_2024-01-15T10-30-00.webm`.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "video_{}.{}",
            self.recorded_at.format("%Y-%m-%dT%H-%M-%S"),
            self.format.extension()
        )
    }

    /// Write the payload into `dir` under [`Self::file_name`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to_dir(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let path = dir.as_ref().join(self.file_name());
        std::fs::write(&path, &self.payload)?;
        Ok(path)
    }
}

/// Compute the BLAKE3 digest of a payload.
#[must_use]
pub fn payload_digest(payload: &[u8]) -> String {
    blake3::hash(payload).to_hex().to_string()
}

/// Format whole seconds as `mm:ss`.
#[must_use]
pub fn format_clock(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Parse `mm:ss` (or `h:mm:ss`) back into seconds.
///
/// # Errors
///
/// Returns `InvalidDuration` if any component is not a number or the total
/// does not fit in a `u64`.
pub fn parse_clock(text: &str) -> Result<u64> {
    let invalid = || Error::InvalidDuration {
        text: text.to_string(),
    };
    text.split(':').try_fold(0u64, |acc, part| {
        let value: u64 = part.trim().parse().map_err(|_| invalid())?;
        acc.checked_mul(60)
            .and_then(|total| total.checked_add(value))
            .ok_or_else(invalid)
    })
}

/// Format a byte count with binary units, e.g. `1.5 KB`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{rounded} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(payload: &'static [u8], secs: u64) -> RecordedClip {
        RecordedClip {
            payload: Bytes::from_static(payload),
            duration: Duration::from_millis(secs * 1000 + 400),
            format: EncodingFormat::new("video/webm;codecs=vp9,opus"),
            recorded_at: DateTime::parse_from_rfc3339("2024-01-15T10:30:00Z")
                .unwrap()
                .with_timezone(&Utc),
            preview: None,
        }
    }

    #[test]
    fn test_clip_size_and_duration() {
        let clip = clip(b"0123456789", 2);
        assert_eq!(clip.size(), 10);
        assert_eq!(clip.duration_secs(), 2);
    }

    #[test]
    fn test_clip_file_name() {
        let clip = clip(b"x", 1);
        assert_eq!(clip.file_name(), "video_2024-01-15T10-30-00.webm");
    }

    #[test]
    fn test_clip_digest_consistency() {
        let a = clip(b"same", 1);
        let b = clip(b"same", 3);
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), payload_digest(b"different"));
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let clip = clip(b"payload bytes", 1);

        let path = clip.write_to_dir(dir.path()).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"payload bytes");
    }

    #[test]
    fn test_still_image_data_url() {
        let image = StillImage {
            mime_type: "image/jpeg".to_string(),
            width: 1,
            height: 1,
            data: vec![0xff, 0xd8, 0xff],
        };
        assert_eq!(image.to_data_url(), "data:image/jpeg;base64,/9j/");
    }

    #[test]
    fn test_format_clock() {
        assert_eq!(format_clock(0), "00:00");
        assert_eq!(format_clock(59), "00:59");
        assert_eq!(format_clock(61), "01:01");
        assert_eq!(format_clock(932), "15:32");
    }

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("15:32").unwrap(), 932);
        assert_eq!(parse_clock("1:00:00").unwrap(), 3600);
        assert!(parse_clock("ab:cd").is_err());
    }

    #[test]
    fn test_parse_clock_rejects_overflow() {
        let err = parse_clock("307445734561825861:59").unwrap_err();
        assert!(matches!(err, Error::InvalidDuration { .. }));
        assert!(err.to_string().contains("307445734561825861:59"));

        assert!(matches!(
            parse_clock("18446744073709551616"),
            Err(Error::InvalidDuration { .. })
        ));
        assert_eq!(parse_clock("18446744073709551615").unwrap(), u64::MAX);
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 Bytes");
        assert_eq!(format_size(512), "512 Bytes");
        assert_eq!(format_size(1024), "1 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5 MB");
    }
}
