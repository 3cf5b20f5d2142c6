//! Capture session state machine.
//!
//! A [`CaptureSession`] drives one camera from preview through recording to a
//! finished [`RecordedClip`]. Each state owns exactly the resources valid in
//! it: the live stream, the elapsed-time ticker and the chunk collector. Any
//! transition out of a state drops what it no longer needs, which releases
//! the device and stops background tasks.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

use crate::clip::RecordedClip;
use crate::config::CaptureConfig;
use crate::device::{DeviceStreamProvider, Facing, MediaStream, SwitchOutcome};
use crate::encoder::{
    negotiate_format, spawn_collector, CollectedOutput, EncoderOptions, EncodingFormat,
    MediaEncoder, EVENT_CHANNEL_CAPACITY,
};
use crate::error::{Error, Result, SessionFault};
use crate::thumbnail::ThumbnailExtractor;

/// Observable state of a capture session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No stream held.
    Idle,
    /// Camera is live, nothing is being recorded.
    PreviewActive,
    /// Encoder is running.
    Recording,
    /// A clip was produced; the camera is still live.
    Stopped,
    /// Something went wrong; see [`CaptureSession::fault`].
    Errored,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::PreviewActive => "previewing",
            Self::Recording => "recording",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Request from the UI to abandon an in-flight start.
///
/// Clones share the same flag. When a device acquisition resolves while the
/// flag is raised, the new stream is released and the session stays idle.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    requested: Arc<AtomicBool>,
}

impl StopSignal {
    /// Create a new, lowered signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal.
    pub fn request_stop(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Whether the signal is raised.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Lower the signal.
    pub fn clear(&self) {
        self.requested.store(false, Ordering::SeqCst);
    }
}

/// Periodic elapsed-time counter. Aborted on drop.
#[derive(Debug)]
struct Ticker {
    elapsed_ms: Arc<AtomicU64>,
    task: JoinHandle<()>,
}

impl Ticker {
    fn start(period: Duration) -> Self {
        let elapsed_ms = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&elapsed_ms);
        let step = u64::try_from(period.as_millis()).unwrap_or(u64::MAX);

        let task = tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                counter.fetch_add(step, Ordering::Relaxed);
            }
        });

        Self { elapsed_ms, task }
    }

    fn secs(&self) -> u64 {
        self.elapsed_ms.load(Ordering::Relaxed) / 1000
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Debug)]
struct ActiveRecording {
    stream: MediaStream,
    format: EncodingFormat,
    started_at: Instant,
    recorded_at: DateTime<Utc>,
    ticker: Ticker,
    collector: JoinHandle<CollectedOutput>,
}

#[derive(Debug)]
enum Phase {
    Idle,
    PreviewActive { stream: MediaStream },
    Recording(Box<ActiveRecording>),
    Stopped { stream: MediaStream },
    Errored {
        fault: SessionFault,
        stream: Option<MediaStream>,
    },
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Self::Idle => SessionState::Idle,
            Self::PreviewActive { .. } => SessionState::PreviewActive,
            Self::Recording(_) => SessionState::Recording,
            Self::Stopped { .. } => SessionState::Stopped,
            Self::Errored { .. } => SessionState::Errored,
        }
    }
}

/// One camera, one recording attempt at a time.
#[derive(Debug)]
pub struct CaptureSession {
    provider: DeviceStreamProvider,
    encoder: Box<dyn MediaEncoder>,
    thumbnails: Option<ThumbnailExtractor>,
    config: CaptureConfig,
    facing: Facing,
    phase: Phase,
    stop_signal: StopSignal,
}

impl CaptureSession {
    /// Create an idle session.
    #[must_use]
    pub fn new(
        provider: DeviceStreamProvider,
        encoder: Box<dyn MediaEncoder>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            provider,
            encoder,
            thumbnails: None,
            facing: config.facing,
            config,
            phase: Phase::Idle,
            stop_signal: StopSignal::new(),
        }
    }

    /// Extract a preview image from each finished clip.
    #[must_use]
    pub fn with_thumbnails(mut self, extractor: ThumbnailExtractor) -> Self {
        self.thumbnails = Some(extractor);
        self
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.phase.state()
    }

    /// The fault that put the session in `Errored`, if any.
    #[must_use]
    pub fn fault(&self) -> Option<&SessionFault> {
        match &self.phase {
            Phase::Errored { fault, .. } => Some(fault),
            _ => None,
        }
    }

    /// Camera the session opens (or has open).
    #[must_use]
    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// The live stream, for rendering a preview.
    #[must_use]
    pub fn stream(&self) -> Option<&MediaStream> {
        match &self.phase {
            Phase::PreviewActive { stream } | Phase::Stopped { stream } => Some(stream),
            Phase::Recording(active) => Some(&active.stream),
            Phase::Errored { stream, .. } => stream.as_ref(),
            Phase::Idle => None,
        }
    }

    /// Format negotiated for the running recording.
    #[must_use]
    pub fn format(&self) -> Option<&EncodingFormat> {
        match &self.phase {
            Phase::Recording(active) => Some(&active.format),
            _ => None,
        }
    }

    /// Whole seconds counted by the ticker; zero outside `Recording`.
    #[must_use]
    pub fn elapsed_secs(&self) -> u64 {
        match &self.phase {
            Phase::Recording(active) => active.ticker.secs(),
            _ => 0,
        }
    }

    /// A handle the UI can raise to abandon an in-flight start.
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop_signal.clone()
    }

    /// Open the camera and show a preview.
    ///
    /// Does nothing if already previewing.
    ///
    /// # Errors
    ///
    /// Returns the categorized device error; the session is then `Errored`
    /// and holds no stream. Returns `InvalidState` from any other state.
    pub async fn start_preview(&mut self) -> Result<()> {
        match self.phase {
            Phase::Idle => {}
            Phase::PreviewActive { .. } => return Ok(()),
            _ => return Err(self.invalid("start preview")),
        }

        if let Some(stream) = self.acquire_stream().await? {
            self.phase = Phase::PreviewActive { stream };
        }
        Ok(())
    }

    /// Begin recording, opening the camera first if needed.
    ///
    /// A second call while recording is a no-op. Allowed from `Stopped` and
    /// from a retryable `Errored` state that still holds the stream.
    ///
    /// # Errors
    ///
    /// Returns a device error, `UnsupportedFormat`, or an encoder error; the
    /// session is then `Errored`. Returns `InvalidState` if a non-retryable
    /// fault must be reset first.
    pub async fn start_recording(&mut self) -> Result<()> {
        let stream = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Recording(active) => {
                self.phase = Phase::Recording(active);
                debug!("Already recording; start ignored");
                return Ok(());
            }
            Phase::PreviewActive { stream } | Phase::Stopped { stream } => stream,
            Phase::Errored {
                fault,
                stream: Some(stream),
            } if fault.is_retryable() => stream,
            Phase::Idle => match self.acquire_stream().await? {
                Some(stream) => stream,
                None => return Ok(()),
            },
            errored @ Phase::Errored { .. } => {
                self.phase = errored;
                return Err(self.invalid("start recording"));
            }
        };

        let format = match negotiate_format(&self.config.format_preferences, |mime| {
            self.encoder.is_type_supported(mime)
        }) {
            Ok(format) => format,
            Err(e) => return Err(self.fail(e, Some(stream))),
        };

        let options = EncoderOptions::from_config(&self.config, format.clone());
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let collector = spawn_collector(rx);
        if let Err(e) = self.encoder.start(&stream, &options, tx) {
            collector.abort();
            return Err(self.fail(e, Some(stream)));
        }

        info!(
            "Recording started on {} camera with {} ({})",
            stream.facing(),
            format,
            self.encoder.name()
        );
        self.phase = Phase::Recording(Box::new(ActiveRecording {
            stream,
            format,
            started_at: Instant::now(),
            recorded_at: Utc::now(),
            ticker: Ticker::start(self.config.tick_interval()),
            collector,
        }));
        Ok(())
    }

    /// Stop recording and produce the clip.
    ///
    /// Returns `Ok(None)` if nothing is being recorded.
    ///
    /// # Errors
    ///
    /// Returns `RecordingTooShort` if stopped before the minimum duration,
    /// `EmptyRecording` if the encoder produced no bytes, or an encoder
    /// error. The first two leave the stream held so recording can be
    /// retried directly.
    pub async fn stop_recording(&mut self) -> Result<Option<RecordedClip>> {
        let active = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Recording(active) => *active,
            other => {
                self.phase = other;
                return Ok(None);
            }
        };
        let ActiveRecording {
            stream,
            format,
            started_at,
            recorded_at,
            ticker,
            collector,
        } = active;

        let elapsed = started_at.elapsed();
        drop(ticker);

        if let Err(e) = self.encoder.stop().await {
            collector.abort();
            return Err(self.fail(e, Some(stream)));
        }

        let min = self.config.min_duration();
        if elapsed < min {
            collector.abort();
            let err = Error::RecordingTooShort {
                elapsed_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                min_ms: u64::try_from(min.as_millis()).unwrap_or(u64::MAX),
            };
            return Err(self.fail(err, Some(stream)));
        }

        let output = match collector.await {
            Ok(output) => output,
            Err(e) => {
                let err = Error::internal(format!("chunk collector failed: {e}"));
                return Err(self.fail(err, Some(stream)));
            }
        };
        if let Some(message) = output.fault {
            return Err(self.fail(Error::Encoder(message), Some(stream)));
        }
        if output.buffer.is_empty() {
            return Err(self.fail(Error::EmptyRecording, Some(stream)));
        }

        let chunks = output.buffer.chunk_count();
        let payload = output.buffer.concat();
        let preview = match &self.thumbnails {
            Some(extractor) => match extractor.extract(&payload).await {
                Ok(still) => Some(still),
                Err(e) => {
                    warn!("Thumbnail extraction failed: {}", e);
                    None
                }
            },
            None => None,
        };

        info!(
            "Recording stopped after {:.1}s: {} bytes in {} chunks",
            elapsed.as_secs_f64(),
            payload.len(),
            chunks
        );
        self.phase = Phase::Stopped { stream };
        Ok(Some(RecordedClip {
            payload,
            duration: elapsed,
            format,
            recorded_at,
            preview,
        }))
    }

    /// Swap to the opposite camera while previewing or stopped.
    ///
    /// Returns the camera now streaming.
    ///
    /// # Errors
    ///
    /// If the opposite camera fails but the original is restored, returns
    /// that failure with the session still previewing on the original
    /// camera. If neither camera opens, the session becomes `Errored`.
    /// Returns `InvalidState` outside `PreviewActive`/`Stopped`.
    pub async fn switch_camera(&mut self) -> Result<Facing> {
        let (stream, was_stopped) = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::PreviewActive { stream } => (stream, false),
            Phase::Stopped { stream } => (stream, true),
            other => {
                self.phase = other;
                return Err(self.invalid("switch camera"));
            }
        };

        let (stream, cause) = match self.provider.switch(stream).await {
            Ok(SwitchOutcome::Switched(stream)) => (stream, None),
            Ok(SwitchOutcome::Restored { stream, cause }) => (stream, Some(cause)),
            Err(e) => return Err(self.fail(e, None)),
        };

        self.facing = stream.facing();
        self.phase = if was_stopped {
            Phase::Stopped { stream }
        } else {
            Phase::PreviewActive { stream }
        };

        match cause {
            Some(cause) => Err(cause),
            None => {
                info!("Switched to {} camera", self.facing);
                Ok(self.facing)
            }
        }
    }

    /// Detect an encoder that died mid-recording.
    ///
    /// Returns the new fault if the session just moved to `Errored`.
    pub async fn poll_faults(&mut self) -> Option<SessionFault> {
        let finished = matches!(&self.phase, Phase::Recording(active) if active.collector.is_finished());
        if !finished {
            return None;
        }

        let Phase::Recording(active) = std::mem::replace(&mut self.phase, Phase::Idle) else {
            return None;
        };
        let ActiveRecording {
            stream, collector, ..
        } = *active;
        self.encoder.abort();

        let message = match collector.await {
            Ok(output) => output
                .fault
                .unwrap_or_else(|| "encoder stopped unexpectedly".to_string()),
            Err(e) => format!("chunk collector failed: {e}"),
        };
        self.fail(Error::Encoder(message), Some(stream));
        self.fault().cloned()
    }

    /// Return to `Idle`, releasing the stream and discarding any chunks.
    pub fn reset(&mut self) {
        if let Phase::Recording(active) = &self.phase {
            active.collector.abort();
            self.encoder.abort();
        }
        self.phase = Phase::Idle;
        self.stop_signal.clear();
        debug!("Capture session reset");
    }

    async fn acquire_stream(&mut self) -> Result<Option<MediaStream>> {
        self.stop_signal.clear();
        match self.provider.acquire(self.facing).await {
            Ok(stream) if self.stop_signal.is_requested() => {
                info!("Stop requested during acquisition; releasing stream {}", stream.id());
                drop(stream);
                self.stop_signal.clear();
                Ok(None)
            }
            Ok(stream) => Ok(Some(stream)),
            Err(e) => Err(self.fail(e, None)),
        }
    }

    fn fail(&mut self, err: Error, stream: Option<MediaStream>) -> Error {
        let fault = err.fault();
        warn!("Capture session failed: {}", fault);
        self.phase = Phase::Errored { fault, stream };
        err
    }

    fn invalid(&self, operation: &'static str) -> Error {
        Error::InvalidState {
            operation,
            state: self.state(),
        }
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThumbnailConfig;
    use crate::device::{DeviceFailure, MediaDevices};
    use crate::error::FaultKind;
    use crate::synthetic::{
        EncoderBehavior, SyntheticDecoder, SyntheticDevices, SyntheticEncoder, WEBM_MAGIC,
    };

    fn session_with(devices: &Arc<SyntheticDevices>, encoder: SyntheticEncoder) -> CaptureSession {
        let config = CaptureConfig::default();
        let provider = DeviceStreamProvider::new(
            Arc::clone(devices) as Arc<dyn MediaDevices>,
            config.clone(),
        );
        CaptureSession::new(provider, Box::new(encoder), config)
    }

    fn session(devices: &Arc<SyntheticDevices>) -> CaptureSession {
        session_with(devices, SyntheticEncoder::new())
    }

    #[test]
    fn test_state_display() {
        assert_eq!(SessionState::Recording.to_string(), "recording");
        assert_eq!(SessionState::PreviewActive.to_string(), "previewing");
        assert_eq!(SessionState::Errored.to_string(), "errored");
    }

    #[test]
    fn test_stop_signal_is_shared() {
        let signal = StopSignal::new();
        let clone = signal.clone();
        clone.request_stop();
        assert!(signal.is_requested());
        signal.clear();
        assert!(!clone.is_requested());
    }

    #[tokio::test]
    async fn test_start_preview_acquires_stream() {
        let devices = Arc::new(SyntheticDevices::new());
        let mut session = session(&devices);
        assert_eq!(session.state(), SessionState::Idle);

        session.start_preview().await.unwrap();
        assert_eq!(session.state(), SessionState::PreviewActive);
        assert!(session.stream().is_some_and(MediaStream::is_live));
        assert!(devices.is_reserved());

        // Previewing again is harmless
        session.start_preview().await.unwrap();
        assert_eq!(devices.live_track_count(), 2);
    }

    #[tokio::test]
    async fn test_preview_failure_holds_no_stream() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.fail_next(DeviceFailure::PermissionDenied);
        let mut session = session(&devices);

        let err = session.start_preview().await.unwrap_err();
        assert!(matches!(err, Error::PermissionDenied { .. }));
        assert_eq!(session.state(), SessionState::Errored);
        assert!(session.stream().is_none());
        assert!(!devices.is_reserved());

        let fault = session.fault().unwrap();
        assert_eq!(fault.kind, FaultKind::PermissionDenied);
        assert!(fault.user_message().contains("Allow access"));

        session.reset();
        session.start_preview().await.unwrap();
        assert_eq!(session.state(), SessionState::PreviewActive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_two_seconds() {
        let devices = Arc::new(SyntheticDevices::new());
        let config = ThumbnailConfig::default();
        let mut session = session(&devices).with_thumbnails(ThumbnailExtractor::new(
            Arc::new(SyntheticDecoder::new()),
            &config,
        ));

        session.start_preview().await.unwrap();
        session.start_recording().await.unwrap();
        assert_eq!(session.state(), SessionState::Recording);
        assert_eq!(
            session.format().map(EncodingFormat::mime_type),
            Some("video/webm;codecs=vp9,opus")
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        let clip = session.stop_recording().await.unwrap().unwrap();

        assert_eq!(clip.duration_secs(), 2);
        assert!(clip.size() > 0);
        assert!(clip.payload.starts_with(&WEBM_MAGIC));
        let preview = clip.preview.unwrap();
        assert_eq!(preview.mime_type, "image/jpeg");
        assert_eq!(session.state(), SessionState::Stopped);
        assert!(devices.is_reserved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_too_soon_is_rejected() {
        let devices = Arc::new(SyntheticDevices::new());
        let mut session = session(&devices);

        session.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let err = session.stop_recording().await.unwrap_err();
        assert!(matches!(
            err,
            Error::RecordingTooShort {
                elapsed_ms: 200,
                min_ms: 500
            }
        ));
        assert_eq!(session.state(), SessionState::Errored);
        let fault = session.fault().unwrap();
        assert!(fault.is_retryable());
        assert!(fault.user_message().contains("too short"));
        assert!(devices.is_reserved());

        // Retry directly on the same stream
        session.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let clip = session.stop_recording().await.unwrap().unwrap();
        assert_eq!(clip.duration_secs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_recording_twice_is_noop() {
        let devices = Arc::new(SyntheticDevices::new());
        let mut session = session(&devices);

        session.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        session.start_recording().await.unwrap();
        assert_eq!(session.state(), SessionState::Recording);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let clip = session.stop_recording().await.unwrap().unwrap();
        assert_eq!(clip.duration, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_stop_when_not_recording() {
        let devices = Arc::new(SyntheticDevices::new());
        let mut session = session(&devices);

        assert!(session.stop_recording().await.unwrap().is_none());
        session.start_preview().await.unwrap();
        assert!(session.stop_recording().await.unwrap().is_none());
        assert_eq!(session.state(), SessionState::PreviewActive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_recording() {
        let devices = Arc::new(SyntheticDevices::new());
        let encoder = SyntheticEncoder::new().with_behavior(EncoderBehavior::Silent);
        let mut session = session_with(&devices, encoder);

        session.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let err = session.stop_recording().await.unwrap_err();
        assert!(matches!(err, Error::EmptyRecording));
        assert_eq!(session.fault().unwrap().kind, FaultKind::EmptyRecording);
    }

    #[tokio::test]
    async fn test_unsupported_format_requires_reset() {
        let devices = Arc::new(SyntheticDevices::new());
        let encoder = SyntheticEncoder::new().with_supported_types(["video/x-matroska"]);
        let mut session = session_with(&devices, encoder);

        let err = session.start_recording().await.unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
        assert_eq!(session.state(), SessionState::Errored);

        let err = session.start_recording().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        assert!(err.to_string().contains("errored"));

        session.reset();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!devices.is_reserved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_releases_everything() {
        let devices = Arc::new(SyntheticDevices::new());
        let mut session = session(&devices);

        session.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        session.reset();

        assert_eq!(session.state(), SessionState::Idle);
        assert!(!devices.is_reserved());
        assert_eq!(session.elapsed_secs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_ticks_and_stops() {
        let devices = Arc::new(SyntheticDevices::new());
        let mut session = session(&devices);

        session.start_recording().await.unwrap();
        let counter = match &session.phase {
            Phase::Recording(active) => Arc::clone(&active.ticker.elapsed_ms),
            _ => panic!("expected recording"),
        };

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(session.elapsed_secs(), 3);

        session.stop_recording().await.unwrap();
        let frozen = counter.load(Ordering::Relaxed);
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(counter.load(Ordering::Relaxed), frozen);
        assert_eq!(session.elapsed_secs(), 0);
    }

    #[tokio::test]
    async fn test_switch_camera_in_preview() {
        let devices = Arc::new(SyntheticDevices::new());
        let mut session = session(&devices);

        session.start_preview().await.unwrap();
        assert_eq!(session.switch_camera().await.unwrap(), Facing::Back);
        assert_eq!(session.facing(), Facing::Back);
        assert_eq!(session.state(), SessionState::PreviewActive);
        assert_eq!(devices.live_track_count(), 2);
    }

    #[tokio::test]
    async fn test_switch_camera_restores_original() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.remove_camera(Facing::Back);
        let mut session = session(&devices);

        session.start_preview().await.unwrap();
        let err = session.switch_camera().await.unwrap_err();
        assert!(matches!(err, Error::NoDevice { .. }));
        assert_eq!(session.state(), SessionState::PreviewActive);
        assert_eq!(session.facing(), Facing::Front);
        assert!(devices.is_reserved());
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_camera_rejected_while_recording() {
        let devices = Arc::new(SyntheticDevices::new());
        let mut session = session(&devices);

        session.start_recording().await.unwrap();
        let err = session.switch_camera().await.unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidState {
                state: SessionState::Recording,
                ..
            }
        ));
        assert_eq!(session.state(), SessionState::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_suppresses_preview() {
        let devices =
            Arc::new(SyntheticDevices::new().with_acquire_delay(Duration::from_secs(1)));
        let mut session = session(&devices);
        let signal = session.stop_signal();

        let (result, ()) = tokio::join!(session.start_preview(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            signal.request_stop();
        });

        result.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!devices.is_reserved());
        assert!(!signal.is_requested());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_signal_suppresses_auto_recording() {
        let devices =
            Arc::new(SyntheticDevices::new().with_acquire_delay(Duration::from_secs(1)));
        let encoder = SyntheticEncoder::new();
        let starts = encoder.start_count();
        let mut session = session_with(&devices, encoder);
        let signal = session.stop_signal();

        let (result, ()) = tokio::join!(session.start_recording(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            signal.request_stop();
        });

        result.unwrap();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.stream().is_none());
        assert!(session.format().is_none());
        assert!(!devices.is_reserved());
        assert_eq!(devices.stopped_track_count(), 2);
        assert_eq!(starts.load(Ordering::SeqCst), 0);
        assert!(session.stop_recording().await.unwrap().is_none());

        // The signal is consumed; the next attempt records normally
        session.start_recording().await.unwrap();
        assert_eq!(session.state(), SessionState::Recording);
        assert_eq!(starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_faults_detects_dead_encoder() {
        let devices = Arc::new(SyntheticDevices::new());
        let encoder = SyntheticEncoder::new().with_behavior(EncoderBehavior::FailAfter(1));
        let mut session = session_with(&devices, encoder);

        session.start_recording().await.unwrap();
        assert!(session.poll_faults().await.is_none());

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let fault = session.poll_faults().await.unwrap();
        assert_eq!(fault.kind, FaultKind::Encoder);
        assert!(!fault.is_retryable());
        assert_eq!(session.state(), SessionState::Errored);
        assert!(session.start_recording().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_again_after_stop() {
        let devices = Arc::new(SyntheticDevices::new());
        let mut session = session(&devices);

        session.start_recording().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let first = session.stop_recording().await.unwrap().unwrap();

        session.start_recording().await.unwrap();
        assert_eq!(session.state(), SessionState::Recording);
        tokio::time::sleep(Duration::from_secs(2)).await;
        let second = session.stop_recording().await.unwrap().unwrap();

        assert!(second.size() > first.size());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_releases_device() {
        let devices = Arc::new(SyntheticDevices::new());
        {
            let mut session = session(&devices);
            session.start_recording().await.unwrap();
            assert!(devices.is_reserved());
        }
        assert!(!devices.is_reserved());
    }
}
