//! Synthetic capture backends.
//!
//! In-process stand-ins for a camera, a stream encoder and a frame decoder.
//! They drive the CLI's `record` command on machines without a camera and
//! give tests deterministic control over device failures and timing.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::device::{
    DeviceFailure, Facing, MediaDevices, MediaStream, StreamConstraints, TrackInfo, TrackKind,
};
use crate::encoder::{EncoderEvent, EncoderOptions, EncodingFormat, MediaEncoder};
use crate::error::{Error, Result};
use crate::thumbnail::FrameDecoder;

/// EBML header magic that opens every WebM payload.
pub const WEBM_MAGIC: [u8; 4] = [0x1A, 0x45, 0xDF, 0xA3];

/// `ftyp` box header that opens an MP4 payload.
pub const MP4_MAGIC: [u8; 8] = [0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p'];

/// Default audio sample rate of synthetic microphone tracks.
const SAMPLE_RATE: u32 = 48_000;

#[derive(Debug, Default)]
struct DeviceState {
    live: HashSet<Uuid>,
    removed: HashSet<Facing>,
    failures: VecDeque<DeviceFailure>,
    stopped: usize,
}

/// A fake camera and microphone.
///
/// Only one stream may be live at a time; a second open while any track is
/// running fails with [`DeviceFailure::NotReadable`].
#[derive(Debug)]
pub struct SyntheticDevices {
    state: Mutex<DeviceState>,
    microphone: bool,
    acquire_delay: Duration,
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDevices {
    /// Both cameras and a microphone present, opening instantly.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeviceState::default()),
            microphone: true,
            acquire_delay: Duration::ZERO,
        }
    }

    /// Open streams without an audio track.
    #[must_use]
    pub fn without_microphone(mut self) -> Self {
        self.microphone = false;
        self
    }

    /// Wait this long inside every open.
    #[must_use]
    pub fn with_acquire_delay(mut self, delay: Duration) -> Self {
        self.acquire_delay = delay;
        self
    }

    /// Make the next open fail with `failure`.
    pub fn fail_next(&self, failure: DeviceFailure) {
        self.state.lock().failures.push_back(failure);
    }

    /// Unplug a camera; opens on it fail with `NotFound`.
    pub fn remove_camera(&self, facing: Facing) {
        self.state.lock().removed.insert(facing);
    }

    /// Whether any track is currently live.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        !self.state.lock().live.is_empty()
    }

    /// Number of currently live tracks.
    #[must_use]
    pub fn live_track_count(&self) -> usize {
        self.state.lock().live.len()
    }

    /// Total tracks stopped so far.
    #[must_use]
    pub fn stopped_track_count(&self) -> usize {
        self.state.lock().stopped
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn open(
        &self,
        constraints: &StreamConstraints,
    ) -> std::result::Result<Vec<TrackInfo>, DeviceFailure> {
        if !self.acquire_delay.is_zero() {
            tokio::time::sleep(self.acquire_delay).await;
        }

        let mut state = self.state.lock();
        if let Some(failure) = state.failures.pop_front() {
            return Err(failure);
        }
        if state.removed.contains(&constraints.facing) {
            return Err(DeviceFailure::NotFound);
        }
        if !state.live.is_empty() {
            return Err(DeviceFailure::NotReadable);
        }

        let mut tracks = vec![TrackInfo {
            id: Uuid::new_v4(),
            kind: TrackKind::Video,
            label: format!("Synthetic {} camera", constraints.facing),
            width: Some(constraints.width),
            height: Some(constraints.height),
            sample_rate: None,
        }];
        if constraints.audio && self.microphone {
            tracks.push(TrackInfo {
                id: Uuid::new_v4(),
                kind: TrackKind::Audio,
                label: "Synthetic microphone".to_string(),
                width: None,
                height: None,
                sample_rate: Some(SAMPLE_RATE),
            });
        }

        state.live.extend(tracks.iter().map(|t| t.id));
        Ok(tracks)
    }

    fn stop_track(&self, track: &TrackInfo) {
        let mut state = self.state.lock();
        if state.live.remove(&track.id) {
            state.stopped += 1;
        }
    }
}

/// How a [`SyntheticEncoder`] misbehaves, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncoderBehavior {
    /// Emit data proportional to elapsed time.
    #[default]
    Normal,
    /// Emit only empty increments.
    Silent,
    /// Report an error after this many increments.
    FailAfter(usize),
}

#[derive(Debug)]
struct RunningEncoder {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// An encoder producing filler bytes at a fixed rate.
///
/// The first increment starts with the container magic of the negotiated
/// format so the payload is recognizable by [`SyntheticDecoder`].
#[derive(Debug)]
pub struct SyntheticEncoder {
    supported: Vec<String>,
    bytes_per_second: usize,
    behavior: EncoderBehavior,
    running: Option<RunningEncoder>,
    starts: Arc<AtomicUsize>,
}

impl Default for SyntheticEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticEncoder {
    /// Supports the WebM formats at 32 KiB/s.
    #[must_use]
    pub fn new() -> Self {
        Self {
            supported: vec![
                "video/webm;codecs=vp9,opus".to_string(),
                "video/webm;codecs=vp8,opus".to_string(),
                "video/webm".to_string(),
            ],
            bytes_per_second: 32 * 1024,
            behavior: EncoderBehavior::Normal,
            running: None,
            starts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Replace the supported MIME types.
    #[must_use]
    pub fn with_supported_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported = types.into_iter().map(Into::into).collect();
        self
    }

    /// Change the output rate.
    #[must_use]
    pub fn with_bytes_per_second(mut self, bytes_per_second: usize) -> Self {
        self.bytes_per_second = bytes_per_second;
        self
    }

    /// Change how the encoder behaves.
    #[must_use]
    pub fn with_behavior(mut self, behavior: EncoderBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Whether an encoding task is attached.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Shared count of successful `start` calls; stays readable after the
    /// encoder is boxed into a session.
    #[must_use]
    pub fn start_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.starts)
    }
}

fn container_magic(format: &EncodingFormat) -> &'static [u8] {
    match format.container() {
        "video/mp4" => &MP4_MAGIC,
        _ => &WEBM_MAGIC,
    }
}

/// Filler bytes for `elapsed` of recording.
#[allow(clippy::cast_possible_truncation)]
fn filler(bytes_per_second: usize, elapsed: Duration, seed: usize) -> Vec<u8> {
    let len = (bytes_per_second as u128 * elapsed.as_millis() / 1000) as usize;
    (0..len).map(|i| ((seed + i) % 251) as u8).collect()
}

struct Emitter {
    sink: mpsc::Sender<EncoderEvent>,
    magic: &'static [u8],
    bytes_per_second: usize,
    behavior: EncoderBehavior,
    sent: usize,
    wrote_header: bool,
}

impl Emitter {
    /// Emit one increment covering `elapsed`. Returns false once finished.
    async fn emit(&mut self, elapsed: Duration) -> bool {
        if let EncoderBehavior::FailAfter(limit) = self.behavior {
            if self.sent >= limit {
                let _ = self
                    .sink
                    .send(EncoderEvent::Error("synthetic encoder failure".to_string()))
                    .await;
                return false;
            }
        }

        let chunk = match self.behavior {
            EncoderBehavior::Silent => Vec::new(),
            _ => {
                let mut body = filler(self.bytes_per_second, elapsed, self.sent);
                if !self.wrote_header && !body.is_empty() {
                    let mut framed = self.magic.to_vec();
                    framed.append(&mut body);
                    body = framed;
                    self.wrote_header = true;
                }
                body
            }
        };

        self.sent += 1;
        self.sink
            .send(EncoderEvent::Data(Bytes::from(chunk)))
            .await
            .is_ok()
    }
}

#[async_trait]
impl MediaEncoder for SyntheticEncoder {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        self.supported.iter().any(|m| m == mime_type)
    }

    fn start(
        &mut self,
        stream: &MediaStream,
        options: &EncoderOptions,
        sink: mpsc::Sender<EncoderEvent>,
    ) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::encoder("encoder already running"));
        }
        if !stream.is_live() {
            return Err(Error::encoder("stream has been released"));
        }
        if options.timeslice.is_zero() {
            return Err(Error::encoder("timeslice must be non-zero"));
        }

        let (stop_tx, mut stop_rx) = oneshot::channel();
        let timeslice = options.timeslice;
        let mut emitter = Emitter {
            sink,
            magic: container_magic(&options.format),
            bytes_per_second: self.bytes_per_second,
            behavior: self.behavior,
            sent: 0,
            wrote_header: false,
        };

        info!(
            "Synthetic encoder started ({}, flush every {:?})",
            options.format, timeslice
        );

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + timeslice, timeslice);
            let mut last_flush = Instant::now();
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now = Instant::now();
                        if !emitter.emit(now - last_flush).await {
                            return;
                        }
                        last_flush = now;
                    }
                    _ = &mut stop_rx => {
                        emitter.emit(Instant::now() - last_flush).await;
                        debug!("Synthetic encoder flushed {} increments", emitter.sent);
                        return;
                    }
                }
            }
        });

        self.running = Some(RunningEncoder {
            stop: stop_tx,
            task,
        });
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        // The task may already have ended on its own (FailAfter)
        let _ = running.stop.send(());
        running
            .task
            .await
            .map_err(|e| Error::encoder(format!("encoder task failed: {e}")))
    }

    fn abort(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
        }
    }
}

impl Drop for SyntheticEncoder {
    fn drop(&mut self) {
        self.abort();
    }
}

/// Decodes payloads produced by [`SyntheticEncoder`] into a gradient frame.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticDecoder {
    width: u32,
    height: u32,
}

impl Default for SyntheticDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticDecoder {
    /// 1280x720 frames.
    #[must_use]
    pub fn new() -> Self {
        Self::with_size(1280, 720)
    }

    /// Frames of the given size.
    #[must_use]
    pub fn with_size(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[async_trait]
impl FrameDecoder for SyntheticDecoder {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    #[allow(clippy::cast_possible_truncation)]
    async fn decode_frame(&self, payload: &[u8], at: Duration) -> Result<RgbaImage> {
        if !payload.starts_with(&WEBM_MAGIC) && !payload.starts_with(&MP4_MAGIC) {
            return Err(Error::thumbnail("unrecognized container"));
        }
        let shade = (at.as_millis() % 256) as u8;
        let (width, height) = (self.width.max(1), self.height.max(1));
        Ok(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([
                (x * 255 / width) as u8,
                (y * 255 / height) as u8,
                shade,
                255,
            ])
        }))
    }
}
