//! Still-image extraction from recorded payloads.
//!
//! A [`FrameDecoder`] rasterizes one frame of an encoded payload; the
//! [`ThumbnailExtractor`] seeks slightly past the start, downscales and
//! JPEG-encodes it. The default decoder shells out to `ffmpeg`.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, RgbaImage};
use tokio::process::Command;
use tracing::debug;

use crate::clip::StillImage;
use crate::config::ThumbnailConfig;
use crate::error::{Error, Result};

/// Rasterizes a single frame of an encoded payload.
#[async_trait]
pub trait FrameDecoder: Send + Sync + std::fmt::Debug {
    /// The name of this decoder (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Decode the frame closest to `at`.
    ///
    /// # Errors
    ///
    /// Returns a `Thumbnail` error if the payload cannot be decoded.
    async fn decode_frame(&self, payload: &[u8], at: Duration) -> Result<RgbaImage>;
}

/// Frame decoder backed by an `ffmpeg` executable.
#[derive(Debug, Clone)]
pub struct FfmpegFrameDecoder {
    binary: PathBuf,
}

impl FfmpegFrameDecoder {
    /// Use the given `ffmpeg` binary (a bare name is looked up on `PATH`).
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl FrameDecoder for FfmpegFrameDecoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    async fn decode_frame(&self, payload: &[u8], at: Duration) -> Result<RgbaImage> {
        // ffmpeg needs a seekable input for -ss
        let mut input = tempfile::Builder::new()
            .prefix("clipstash-frame-")
            .tempfile()?;
        input.write_all(payload)?;
        input.flush()?;

        let output = Command::new(&self.binary)
            .args(["-hide_banner", "-loglevel", "error", "-ss"])
            .arg(format!("{:.3}", at.as_secs_f64()))
            .arg("-i")
            .arg(input.path())
            .args(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| {
                Error::thumbnail(format!("failed to run {}: {e}", self.binary.display()))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::thumbnail(format!("ffmpeg failed: {}", stderr.trim())));
        }
        if output.stdout.is_empty() {
            return Err(Error::thumbnail(format!(
                "no frame at {:.3}s",
                at.as_secs_f64()
            )));
        }

        Ok(image::load_from_memory(&output.stdout)?.to_rgba8())
    }
}

/// Encode an image as a JPEG still.
///
/// # Errors
///
/// Returns a `Thumbnail` error if encoding fails.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> Result<StillImage> {
    let rgb = image.to_rgb8();
    let (width, height) = rgb.dimensions();

    let mut data = Vec::new();
    JpegEncoder::new_with_quality(&mut data, quality).encode(
        rgb.as_raw(),
        width,
        height,
        ColorType::Rgb8,
    )?;

    Ok(StillImage {
        mime_type: "image/jpeg".to_string(),
        width,
        height,
        data,
    })
}

/// Produces a preview image from a finished recording.
#[derive(Debug, Clone)]
pub struct ThumbnailExtractor {
    decoder: Arc<dyn FrameDecoder>,
    seek_offset: Duration,
    settle_delay: Duration,
    jpeg_quality: u8,
    max_width: u32,
}

impl ThumbnailExtractor {
    /// Create an extractor over a decoder using configured tunables.
    #[must_use]
    pub fn new(decoder: Arc<dyn FrameDecoder>, config: &ThumbnailConfig) -> Self {
        Self {
            decoder,
            seek_offset: config.seek_offset(),
            settle_delay: config.settle_delay(),
            jpeg_quality: config.jpeg_quality,
            max_width: config.max_width,
        }
    }

    /// Create an extractor using the configured `ffmpeg` binary.
    #[must_use]
    pub fn with_ffmpeg(config: &ThumbnailConfig) -> Self {
        Self::new(
            Arc::new(FfmpegFrameDecoder::new(config.ffmpeg_path.clone())),
            config,
        )
    }

    /// Extract a JPEG still from slightly after the start of `payload`.
    ///
    /// # Errors
    ///
    /// Returns a `Thumbnail` error if the payload is empty or cannot be
    /// decoded. Callers treat this as non-fatal.
    pub async fn extract(&self, payload: &[u8]) -> Result<StillImage> {
        if payload.is_empty() {
            return Err(Error::thumbnail("payload is empty"));
        }

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        let frame = self.decoder.decode_frame(payload, self.seek_offset).await?;
        let mut image = DynamicImage::ImageRgba8(frame);
        if self.max_width > 0 && image.width() > self.max_width {
            image = image.thumbnail(self.max_width, u32::MAX);
        }

        let still = encode_jpeg(&image, self.jpeg_quality)?;
        debug!(
            "Extracted {}x{} thumbnail ({} bytes) with {}",
            still.width,
            still.height,
            still.data.len(),
            self.decoder.name()
        );
        Ok(still)
    }
}
