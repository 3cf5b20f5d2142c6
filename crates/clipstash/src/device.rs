//! Camera and microphone stream acquisition.
//!
//! A [`MediaStream`] exclusively reserves the physical device until it is
//! released. Release is idempotent and also happens on drop, so every exit
//! path (stop, switch, error, teardown) gives the device back.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::CaptureConfig;
use crate::error::{Error, Result};

/// Which physical camera to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    /// The user-facing camera.
    #[default]
    Front,
    /// The environment-facing camera.
    Back,
}

impl Facing {
    /// The other camera.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Front => Self::Back,
            Self::Back => Self::Front,
        }
    }
}

impl std::fmt::Display for Facing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Front => write!(f, "front"),
            Self::Back => write!(f, "back"),
        }
    }
}

/// Requested stream properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConstraints {
    /// Ideal frame width.
    pub width: u32,
    /// Ideal frame height.
    pub height: u32,
    /// Camera to open.
    pub facing: Facing,
    /// Whether a microphone track is requested.
    pub audio: bool,
}

impl StreamConstraints {
    /// Build constraints from capture configuration for the given camera.
    #[must_use]
    pub fn from_config(config: &CaptureConfig, facing: Facing) -> Self {
        Self {
            width: config.width,
            height: config.height,
            facing,
            audio: config.audio_enabled,
        }
    }
}

/// Kind of media carried by a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    /// Microphone audio.
    Audio,
    /// Camera video.
    Video,
}

/// Description of a single live track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
    /// Backend-assigned track identifier.
    pub id: Uuid,
    /// Audio or video.
    pub kind: TrackKind,
    /// Human-readable device label.
    pub label: String,
    /// Negotiated frame width (video only).
    pub width: Option<u32>,
    /// Negotiated frame height (video only).
    pub height: Option<u32>,
    /// Negotiated sample rate (audio only).
    pub sample_rate: Option<u32>,
}

/// Categorized failure reported by a device backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceFailure {
    /// Access refused.
    PermissionDenied,
    /// No device satisfies the constraints.
    NotFound,
    /// The device exists but cannot be read (usually held elsewhere).
    NotReadable,
    /// Anything else.
    Other(String),
}

impl DeviceFailure {
    /// Map onto the crate error for the camera that was requested.
    #[must_use]
    pub fn into_error(self, facing: Facing) -> Error {
        match self {
            Self::PermissionDenied => Error::PermissionDenied { facing },
            Self::NotFound => Error::NoDevice { facing },
            Self::NotReadable => Error::DeviceBusy,
            Self::Other(message) => Error::DeviceUnknown(message),
        }
    }
}

/// Device-media-capture capability.
///
/// Implementors open the physical camera/microphone and stop individual
/// tracks. Reservation bookkeeping lives in the backend; callers only see
/// [`MediaStream`]s.
#[async_trait]
pub trait MediaDevices: Send + Sync + std::fmt::Debug {
    /// The name of this backend (for logging/debugging).
    fn name(&self) -> &'static str;

    /// Open a live stream satisfying the constraints.
    ///
    /// # Errors
    ///
    /// Returns a categorized [`DeviceFailure`] if the device cannot be opened.
    async fn open(
        &self,
        constraints: &StreamConstraints,
    ) -> std::result::Result<Vec<TrackInfo>, DeviceFailure>;

    /// Stop a single track, giving back its share of the device reservation.
    fn stop_track(&self, track: &TrackInfo);
}

/// A live audio+video stream holding the device reservation.
pub struct MediaStream {
    id: Uuid,
    facing: Facing,
    tracks: Vec<TrackInfo>,
    acquired_at: DateTime<Utc>,
    live: bool,
    devices: Arc<dyn MediaDevices>,
}

impl std::fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("facing", &self.facing)
            .field("tracks", &self.tracks.len())
            .field("live", &self.live)
            .field("backend", &self.devices.name())
            .finish()
    }
}

impl MediaStream {
    /// Stream identifier.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Camera this stream was opened on.
    #[must_use]
    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// When the stream was acquired.
    #[must_use]
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// All tracks of the stream.
    #[must_use]
    pub fn tracks(&self) -> &[TrackInfo] {
        &self.tracks
    }

    /// Audio tracks only.
    pub fn audio_tracks(&self) -> impl Iterator<Item = &TrackInfo> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Audio)
    }

    /// Video tracks only.
    pub fn video_tracks(&self) -> impl Iterator<Item = &TrackInfo> {
        self.tracks.iter().filter(|t| t.kind == TrackKind::Video)
    }

    /// Whether the tracks are still running.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Stop every track. Safe to call any number of times.
    pub fn release(&mut self) {
        if !self.live {
            return;
        }
        for track in &self.tracks {
            self.devices.stop_track(track);
        }
        self.live = false;
        debug!("Released stream {} ({} camera)", self.id, self.facing);
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.release();
    }
}

/// Result of [`DeviceStreamProvider::switch`].
#[derive(Debug)]
pub enum SwitchOutcome {
    /// The opposite camera is now streaming.
    Switched(MediaStream),
    /// The opposite camera failed; the original camera was re-acquired.
    Restored {
        /// Stream on the original camera.
        stream: MediaStream,
        /// Why the opposite camera could not be opened.
        cause: Error,
    },
}

impl SwitchOutcome {
    /// The stream the caller now holds, whichever way the switch went.
    #[must_use]
    pub fn into_stream(self) -> MediaStream {
        match self {
            Self::Switched(stream) | Self::Restored { stream, .. } => stream,
        }
    }
}

/// Acquires, releases and switches camera streams.
#[derive(Debug, Clone)]
pub struct DeviceStreamProvider {
    devices: Arc<dyn MediaDevices>,
    config: CaptureConfig,
}

impl DeviceStreamProvider {
    /// Create a provider over a device backend.
    #[must_use]
    pub fn new(devices: Arc<dyn MediaDevices>, config: CaptureConfig) -> Self {
        Self { devices, config }
    }

    /// The underlying backend.
    #[must_use]
    pub fn devices(&self) -> &Arc<dyn MediaDevices> {
        &self.devices
    }

    /// Acquire a stream on the given camera.
    ///
    /// # Errors
    ///
    /// Returns `PermissionDenied`, `NoDevice`, `DeviceBusy` or
    /// `DeviceUnknown` when the backend refuses.
    pub async fn acquire(&self, facing: Facing) -> Result<MediaStream> {
        let constraints = StreamConstraints::from_config(&self.config, facing);
        debug!(
            "Requesting {} camera at {}x{} (audio: {}) from {}",
            facing,
            constraints.width,
            constraints.height,
            constraints.audio,
            self.devices.name()
        );

        let tracks = self
            .devices
            .open(&constraints)
            .await
            .map_err(|failure| failure.into_error(facing))?;

        let stream = MediaStream {
            id: Uuid::new_v4(),
            facing,
            tracks,
            acquired_at: Utc::now(),
            live: true,
            devices: Arc::clone(&self.devices),
        };

        if constraints.audio && stream.audio_tracks().next().is_none() {
            warn!("Stream {} has no audio track; check microphone permissions", stream.id);
        }
        info!(
            "Acquired stream {} on {} camera ({} audio, {} video tracks)",
            stream.id,
            facing,
            stream.audio_tracks().count(),
            stream.video_tracks().count()
        );
        Ok(stream)
    }

    /// Release a stream. Idempotent.
    pub fn release(&self, stream: &mut MediaStream) {
        stream.release();
    }

    /// Release the current stream and open the opposite camera.
    ///
    /// If the opposite camera cannot be opened, the original camera is
    /// re-acquired and returned as [`SwitchOutcome::Restored`].
    ///
    /// # Errors
    ///
    /// Returns the restore error if neither camera can be opened; the caller
    /// then holds no stream.
    pub async fn switch(&self, mut current: MediaStream) -> Result<SwitchOutcome> {
        let original = current.facing();
        current.release();
        drop(current);

        match self.acquire(original.opposite()).await {
            Ok(stream) => Ok(SwitchOutcome::Switched(stream)),
            Err(cause) => {
                warn!(
                    "Switching to {} camera failed ({}); restoring {} camera",
                    original.opposite(),
                    cause,
                    original
                );
                let stream = self.acquire(original).await?;
                Ok(SwitchOutcome::Restored { stream, cause })
            }
        }
    }
}
