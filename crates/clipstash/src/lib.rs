//! `clipstash` - Capture short video clips and keep them in a local library
//!
//! This library provides camera stream acquisition, a recording session
//! state machine, thumbnail extraction, and durable local storage for
//! recorded clips together with their metadata.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod clip;
pub mod config;
pub mod device;
pub mod encoder;
pub mod error;
pub mod library;
pub mod logging;
pub mod playback;
pub mod session;
pub mod storage;
pub mod synthetic;
pub mod thumbnail;

pub use clip::{RecordedClip, StillImage};
pub use config::Config;
pub use device::{DeviceStreamProvider, Facing, MediaDevices, MediaStream};
pub use encoder::{EncodingFormat, MediaEncoder};
pub use error::{Error, FaultKind, Result, SessionFault};
pub use library::{MediaLibrary, VideoDraft, VideoEntry};
pub use logging::init_logging;
pub use playback::{ObjectUrlRegistry, PlaybackHandle, PlaybackManager, PlaybackSource};
pub use session::{CaptureSession, SessionState, StopSignal};
pub use storage::{LocalMediaStore, LocalVideoRecord, NewVideoRecord, StoreStats};
pub use thumbnail::{FrameDecoder, ThumbnailExtractor};
