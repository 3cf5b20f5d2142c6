//! Stream-recording capability and encoded chunk buffering.
//!
//! An encoder is started on a live [`MediaStream`] and emits binary
//! increments over a channel until it is stopped. The session negotiates
//! the container/codec with [`negotiate_format`] and collects increments in
//! a [`ChunkBuffer`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CaptureConfig;
use crate::device::MediaStream;
use crate::error::{Error, Result};

/// Capacity of the channel between encoder and collector.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Default container/codec preferences, most efficient first.
pub const DEFAULT_FORMAT_PREFERENCES: &[&str] = &[
    "video/webm;codecs=vp9,opus",
    "video/webm;codecs=vp8,opus",
    "video/webm;codecs=vp9",
    "video/webm;codecs=vp8",
    "video/webm",
    "video/mp4",
];

/// A negotiated container/codec combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncodingFormat {
    mime_type: String,
}

impl EncodingFormat {
    /// Wrap a MIME type such as `video/webm;codecs=vp9,opus`.
    #[must_use]
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
        }
    }

    /// The full MIME type including codec parameters.
    #[must_use]
    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// The MIME type without codec parameters.
    #[must_use]
    pub fn container(&self) -> &str {
        self.mime_type
            .split(';')
            .next()
            .unwrap_or(&self.mime_type)
            .trim()
    }

    /// File extension for exported payloads.
    #[must_use]
    pub fn extension(&self) -> &'static str {
        match self.container() {
            "video/mp4" => "mp4",
            "video/quicktime" => "mov",
            _ => "webm",
        }
    }
}

impl std::fmt::Display for EncodingFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mime_type)
    }
}

/// Pick the first preference the encoder supports.
///
/// # Errors
///
/// Returns `UnsupportedFormat` listing every candidate when none matches.
pub fn negotiate_format<S: AsRef<str>>(
    preferences: &[S],
    is_supported: impl Fn(&str) -> bool,
) -> Result<EncodingFormat> {
    preferences
        .iter()
        .map(AsRef::as_ref)
        .find(|mime| is_supported(mime))
        .map(EncodingFormat::new)
        .ok_or_else(|| Error::UnsupportedFormat {
            tried: preferences.iter().map(|p| p.as_ref().to_string()).collect(),
        })
}

/// Options handed to the encoder on start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderOptions {
    /// Negotiated format.
    pub format: EncodingFormat,
    /// Target audio bitrate.
    pub audio_bits_per_second: u32,
    /// Target video bitrate.
    pub video_bits_per_second: u32,
    /// How often the encoder should flush an increment.
    pub timeslice: Duration,
}

impl EncoderOptions {
    /// Build options for a negotiated format from capture configuration.
    #[must_use]
    pub fn from_config(config: &CaptureConfig, format: EncodingFormat) -> Self {
        Self {
            format,
            audio_bits_per_second: config.audio_bits_per_second,
            video_bits_per_second: config.video_bits_per_second,
            timeslice: config.timeslice(),
        }
    }
}

/// Output of a running encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderEvent {
    /// A binary increment, possibly empty.
    Data(Bytes),
    /// The encoder failed; no further data follows.
    Error(String),
}

/// Stream-recording capability.
///
/// `start` begins emitting [`EncoderEvent`]s on `sink`; `stop` flushes any
/// pending data and drops the sink so the receiving side observes the end
/// of the recording.
#[async_trait]
pub trait MediaEncoder: Send + std::fmt::Debug {
    /// The name of this encoder (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Whether the encoder can produce the given MIME type.
    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Start encoding the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the encoder cannot attach to the stream.
    fn start(
        &mut self,
        stream: &MediaStream,
        options: &EncoderOptions,
        sink: mpsc::Sender<EncoderEvent>,
    ) -> Result<()>;

    /// Flush and stop. The sink must be dropped before this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    async fn stop(&mut self) -> Result<()>;

    /// Tear down immediately without flushing.
    fn abort(&mut self);
}

/// Ordered, non-empty binary increments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkBuffer {
    chunks: Vec<Bytes>,
    total_bytes: usize,
}

impl ChunkBuffer {
    /// Create an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an increment. Empty increments are dropped.
    ///
    /// Returns `true` if the increment was kept.
    pub fn push(&mut self, chunk: Bytes) -> bool {
        if chunk.is_empty() {
            return false;
        }
        self.total_bytes += chunk.len();
        self.chunks.push(chunk);
        true
    }

    /// Number of kept increments.
    #[must_use]
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Total bytes across all increments.
    #[must_use]
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Whether nothing has been kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.total_bytes == 0
    }

    /// Concatenate all increments into a single payload.
    #[must_use]
    pub fn concat(self) -> Bytes {
        if self.chunks.len() == 1 {
            return self.chunks.into_iter().next().unwrap_or_default();
        }
        let mut out = BytesMut::with_capacity(self.total_bytes);
        for chunk in self.chunks {
            out.extend_from_slice(&chunk);
        }
        out.freeze()
    }
}

/// What the collector saw by the time the encoder closed its sink.
#[derive(Debug, Default)]
pub struct CollectedOutput {
    /// Every non-empty increment, in arrival order.
    pub buffer: ChunkBuffer,
    /// Encoder failure, if one was reported.
    pub fault: Option<String>,
}

/// Spawn a task draining encoder events into a [`ChunkBuffer`].
///
/// The task ends when every sender is dropped or an error event arrives.
#[must_use]
pub fn spawn_collector(mut events: mpsc::Receiver<EncoderEvent>) -> JoinHandle<CollectedOutput> {
    tokio::spawn(async move {
        let mut output = CollectedOutput::default();
        while let Some(event) = events.recv().await {
            match event {
                EncoderEvent::Data(chunk) => {
                    let size = chunk.len();
                    if output.buffer.push(chunk) {
                        debug!(
                            "Buffered {} bytes ({} chunks, {} total)",
                            size,
                            output.buffer.chunk_count(),
                            output.buffer.total_bytes()
                        );
                    }
                }
                EncoderEvent::Error(message) => {
                    warn!("Encoder reported an error: {}", message);
                    output.fault = Some(message);
                    break;
                }
            }
        }
        output
    })
}
