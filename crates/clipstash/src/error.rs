//! Error types for clipstash.
//!
//! This module defines all error types used throughout the clipstash crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::Facing;
use crate::session::SessionState;

/// The main error type for clipstash operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Device Errors ===
    /// The user (or platform policy) refused camera/microphone access.
    #[error("camera access denied for the {facing} camera")]
    PermissionDenied {
        /// Facing mode that was requested.
        facing: Facing,
    },

    /// No capture device matches the requested constraints.
    #[error("no {facing} camera found")]
    NoDevice {
        /// Facing mode that was requested.
        facing: Facing,
    },

    /// The device is reserved by another stream or application.
    #[error("camera is busy")]
    DeviceBusy,

    /// The device failed for an uncategorized reason.
    #[error("device error: {0}")]
    DeviceUnknown(String),

    // === Recording Errors ===
    /// None of the preferred container/codec combinations is supported.
    #[error("no supported recording format (tried {})", tried.join(", "))]
    UnsupportedFormat {
        /// MIME types that were probed, in preference order.
        tried: Vec<String>,
    },

    /// Stop was requested before the minimum recording duration elapsed.
    #[error("recording too short: {elapsed_ms} ms (minimum {min_ms} ms)")]
    RecordingTooShort {
        /// Milliseconds recorded before stop.
        elapsed_ms: u64,
        /// Configured minimum in milliseconds.
        min_ms: u64,
    },

    /// The encoder produced no bytes at all.
    #[error("recording is empty: the encoder produced no data")]
    EmptyRecording,

    /// The encoder failed while starting, running or stopping.
    #[error("encoder error: {0}")]
    Encoder(String),

    /// An operation was invoked in a session state that does not allow it.
    #[error("cannot {operation} while session is {state}")]
    InvalidState {
        /// The rejected operation.
        operation: &'static str,
        /// The state the session was in.
        state: SessionState,
    },

    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// One of the two writes of a save failed.
    #[error("failed to write {stage} for video {id}: {source}")]
    StorageWrite {
        /// The id generated for the save.
        id: String,
        /// Which keyspace was being written (`metadata` or `payload`).
        stage: &'static str,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// No payload is stored under the requested id.
    #[error("no payload stored for video {id}")]
    PayloadMissing {
        /// The requested id.
        id: String,
    },

    // === Thumbnail Errors ===
    /// Frame decoding or still-image encoding failed.
    #[error("thumbnail extraction failed: {0}")]
    Thumbnail(String),

    // === Input Errors ===
    /// A clock value such as `mm:ss` could not be read.
    #[error("invalid duration '{text}': expected seconds, mm:ss or h:mm:ss")]
    InvalidDuration {
        /// The rejected text.
        text: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for clipstash operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Self::Thumbnail(err.to_string())
    }
}

impl Error {
    /// Create a new encoder error.
    #[must_use]
    pub fn encoder(message: impl Into<String>) -> Self {
        Self::Encoder(message.into())
    }

    /// Create a new thumbnail error.
    #[must_use]
    pub fn thumbnail(message: impl Into<String>) -> Self {
        Self::Thumbnail(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a payload missing error.
    #[must_use]
    pub fn payload_missing(id: impl Into<String>) -> Self {
        Self::PayloadMissing { id: id.into() }
    }

    /// Check if this error came from the capture device.
    #[must_use]
    pub fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied { .. }
                | Self::NoDevice { .. }
                | Self::DeviceBusy
                | Self::DeviceUnknown(_)
        )
    }

    /// Check if the caller may simply try recording again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RecordingTooShort { .. } | Self::EmptyRecording)
    }

    /// Project this error onto the fault a capture session reports.
    #[must_use]
    pub fn fault(&self) -> SessionFault {
        let kind = match self {
            Self::PermissionDenied { .. } => FaultKind::PermissionDenied,
            Self::NoDevice { .. } => FaultKind::NoDevice,
            Self::DeviceBusy => FaultKind::DeviceBusy,
            Self::DeviceUnknown(_) => FaultKind::DeviceUnknown,
            Self::UnsupportedFormat { .. } => FaultKind::UnsupportedFormat,
            Self::RecordingTooShort { .. } => FaultKind::RecordingTooShort,
            Self::EmptyRecording => FaultKind::EmptyRecording,
            Self::Encoder(_) => FaultKind::Encoder,
            _ => FaultKind::Other,
        };
        SessionFault {
            kind,
            message: self.to_string(),
        }
    }
}

/// Category of a capture session fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    /// Camera or microphone access was refused.
    PermissionDenied,
    /// No matching camera exists.
    NoDevice,
    /// The camera is held elsewhere.
    DeviceBusy,
    /// Uncategorized device failure.
    DeviceUnknown,
    /// No recording format is supported.
    UnsupportedFormat,
    /// Stopped before the minimum duration.
    RecordingTooShort,
    /// The encoder produced nothing.
    EmptyRecording,
    /// The encoder failed.
    Encoder,
    /// Anything else.
    Other,
}

impl FaultKind {
    /// Message suitable for showing to the person holding the camera.
    #[must_use]
    pub fn user_message(self) -> &'static str {
        match self {
            Self::PermissionDenied => "Camera access denied. Allow access to record videos.",
            Self::NoDevice => "No camera found on this device.",
            Self::DeviceBusy => "The camera is being used by another application.",
            Self::DeviceUnknown => "Could not access the camera. Try again.",
            Self::UnsupportedFormat => "This device cannot record in any supported video format.",
            Self::RecordingTooShort => "Recording too short. Record a little longer and try again.",
            Self::EmptyRecording => "Nothing was recorded. Try again.",
            Self::Encoder => "Something went wrong while recording. Try again.",
            Self::Other => "Unexpected error while recording.",
        }
    }

    /// Whether recording may be retried without a reset.
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RecordingTooShort | Self::EmptyRecording)
    }
}

/// A fault recorded by a capture session in its `Errored` state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFault {
    /// Category of the fault.
    pub kind: FaultKind,
    /// Technical description (from the originating error).
    pub message: String,
}

impl SessionFault {
    /// Message suitable for showing to the person holding the camera.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        self.kind.user_message()
    }

    /// Whether recording may be retried without a reset.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl std::fmt::Display for SessionFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::DeviceBusy;
        assert_eq!(err.to_string(), "camera is busy");

        let err = Error::encoder("pipeline stalled");
        assert_eq!(err.to_string(), "encoder error: pipeline stalled");
    }

    #[test]
    fn test_permission_denied_display() {
        let err = Error::PermissionDenied {
            facing: Facing::Front,
        };
        assert!(err.to_string().contains("front"));
        assert!(err.is_device_error());
    }

    #[test]
    fn test_unsupported_format_lists_candidates() {
        let err = Error::UnsupportedFormat {
            tried: vec!["video/webm".to_string(), "video/mp4".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("video/webm"));
        assert!(msg.contains("video/mp4"));
    }

    #[test]
    fn test_too_short_is_retryable() {
        let err = Error::RecordingTooShort {
            elapsed_ms: 200,
            min_ms: 500,
        };
        assert!(err.is_retryable());
        assert!(err.to_string().contains("200 ms"));
        assert!(Error::EmptyRecording.is_retryable());
        assert!(!Error::DeviceBusy.is_retryable());
    }

    #[test]
    fn test_fault_projection() {
        let fault = Error::NoDevice {
            facing: Facing::Back,
        }
        .fault();
        assert_eq!(fault.kind, FaultKind::NoDevice);
        assert!(!fault.is_retryable());
        assert!(fault.user_message().contains("No camera"));

        let fault = Error::EmptyRecording.fault();
        assert_eq!(fault.kind, FaultKind::EmptyRecording);
        assert!(fault.is_retryable());
        assert!(fault.user_message().contains("try again") || fault.user_message().contains("Try again"));

        let fault = Error::internal("oops").fault();
        assert_eq!(fault.kind, FaultKind::Other);
    }

    #[test]
    fn test_short_recording_message_is_actionable() {
        let msg = FaultKind::RecordingTooShort.user_message();
        assert!(msg.contains("too short"));
        assert!(msg.contains("try again"));
    }

    #[test]
    fn test_payload_missing_display() {
        let err = Error::payload_missing("video_1_abc");
        assert!(err.to_string().contains("video_1_abc"));
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let result = rusqlite::Connection::open_with_flags(
            "/nonexistent/path/db.sqlite",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        );
        if let Err(sqlite_err) = result {
            let err: Error = sqlite_err.into();
            assert!(matches!(err, Error::DatabaseQuery(_)));
        }
    }

    #[test]
    fn test_from_json_error() {
        let json_result: std::result::Result<i32, serde_json::Error> =
            serde_json::from_str("not valid json");
        if let Err(json_err) = json_result {
            let err: Error = json_err.into();
            assert!(matches!(err, Error::Json(_)));
        }
    }

    #[test]
    fn test_invalid_state_display() {
        let err = Error::InvalidState {
            operation: "switch camera",
            state: SessionState::Recording,
        };
        assert_eq!(err.to_string(), "cannot switch camera while session is recording");
    }

    #[test]
    fn test_config_validation_error_display() {
        let err = Error::ConfigValidation {
            message: "jpeg_quality out of range".to_string(),
        };
        assert!(err.to_string().contains("jpeg_quality"));
    }
}
