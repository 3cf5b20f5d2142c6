//! Configuration management for clipstash.
//!
//! This module provides configuration loading and validation using figment,
//! supporting TOML config files, environment variables, and defaults.

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::device::Facing;
use crate::encoder::DEFAULT_FORMAT_PREFERENCES;
use crate::error::{Error, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Default data directory name.
const DATA_DIR_NAME: &str = "clipstash";

/// Default database file name.
const DATABASE_FILE_NAME: &str = "clips.db";

/// Shortest recording a configuration may allow.
pub const MIN_RECORDING_MS: u64 = 500;

/// Accepted shape of a recording MIME type.
const MIME_PATTERN: &str = r"^video/[a-z0-9.+-]+(;\s*codecs=[a-z0-9.,+-]+)?$";

/// Application configuration.
///
/// Configuration is loaded from (in order of precedence, highest first):
/// 1. Environment variables (prefixed with `CLIPSTASH_`, sections split by `__`)
/// 2. TOML config file at `~/.config/clipstash/config.toml`
/// 3. Default values
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Storage configuration.
    pub storage: StorageConfig,
    /// Capture configuration.
    pub capture: CaptureConfig,
    /// Thumbnail configuration.
    pub thumbnail: ThumbnailConfig,
    /// Library defaults.
    pub library: LibraryConfig,
}

/// Storage-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the database file.
    /// Defaults to `~/.local/share/clipstash/clips.db`
    pub database_path: Option<PathBuf>,
    /// Remove metadata left behind by interrupted saves when opening.
    pub sweep_orphans_on_open: bool,
}

/// Capture-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Camera opened by default.
    pub facing: Facing,
    /// Ideal frame width.
    pub width: u32,
    /// Ideal frame height.
    pub height: u32,
    /// Request a microphone track.
    pub audio_enabled: bool,
    /// Recordings shorter than this are rejected. May be raised above
    /// [`MIN_RECORDING_MS`], never lowered.
    pub min_duration_ms: u64,
    /// How often the encoder flushes an increment.
    pub timeslice_ms: u64,
    /// Period of the elapsed-time counter.
    pub tick_interval_ms: u64,
    /// Target audio bitrate.
    pub audio_bits_per_second: u32,
    /// Target video bitrate.
    pub video_bits_per_second: u32,
    /// Container/codec preferences, most preferred first.
    pub format_preferences: Vec<String>,
}

/// Thumbnail-related configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    /// Extract a preview image after each recording.
    pub enabled: bool,
    /// Seek position of the captured frame, to skip black leading frames.
    pub seek_offset_ms: u64,
    /// Pause before decoding, giving the payload time to settle.
    pub settle_delay_ms: u64,
    /// JPEG quality (1-100).
    pub jpeg_quality: u8,
    /// Downscale wider frames to this width. Set to 0 to keep full size.
    pub max_width: u32,
    /// `ffmpeg` executable used to rasterize frames.
    pub ffmpeg_path: PathBuf,
}

/// Defaults applied to videos added without explicit values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Channel/author label.
    pub default_channel: String,
    /// Category.
    pub default_category: String,
    /// Description used when none is given.
    pub default_description: String,
    /// Visibility flag.
    pub default_public: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None, // Will be resolved to default at runtime
            sweep_orphans_on_open: true,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            facing: Facing::Front,
            width: 1280,
            height: 720,
            audio_enabled: true,
            min_duration_ms: MIN_RECORDING_MS,
            timeslice_ms: 1000,
            tick_interval_ms: 1000,
            audio_bits_per_second: 128_000,
            video_bits_per_second: 2_500_000,
            format_preferences: DEFAULT_FORMAT_PREFERENCES
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            seek_offset_ms: 100,
            settle_delay_ms: 500,
            jpeg_quality: 80,
            max_width: 640,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            default_channel: "My Channel".to_string(),
            default_category: "General".to_string(),
            default_description: "Recorded with clipstash".to_string(),
            default_public: true,
        }
    }
}

impl CaptureConfig {
    /// Minimum recording length as a Duration.
    #[must_use]
    pub fn min_duration(&self) -> Duration {
        Duration::from_millis(self.min_duration_ms)
    }

    /// Encoder flush period as a Duration.
    #[must_use]
    pub fn timeslice(&self) -> Duration {
        Duration::from_millis(self.timeslice_ms)
    }

    /// Elapsed-counter period as a Duration.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl ThumbnailConfig {
    /// Frame seek position as a Duration.
    #[must_use]
    pub fn seek_offset(&self) -> Duration {
        Duration::from_millis(self.seek_offset_ms)
    }

    /// Settle delay as a Duration.
    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. TOML config file (if exists)
    /// 3. Environment variables (prefixed with `CLIPSTASH_`)
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration with an optional custom config path.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration loading or parsing fails.
    pub fn load_from(config_path: Option<PathBuf>) -> Result<Self> {
        let config_file = config_path.unwrap_or_else(Self::default_config_path);

        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_file).nested())
            .merge(Env::prefixed("CLIPSTASH_").split("__"));

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join(DATA_DIR_NAME)
            .join(CONFIG_FILE_NAME)
    }

    /// Get the default data directory path.
    #[must_use]
    pub fn default_data_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join(DATA_DIR_NAME)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.timeslice_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "timeslice_ms must be greater than 0".to_string(),
            });
        }

        if capture.min_duration_ms < MIN_RECORDING_MS {
            return Err(Error::ConfigValidation {
                message: format!(
                    "min_duration_ms must be at least {MIN_RECORDING_MS} (got {})",
                    capture.min_duration_ms
                ),
            });
        }

        if capture.tick_interval_ms == 0 {
            return Err(Error::ConfigValidation {
                message: "tick_interval_ms must be greater than 0".to_string(),
            });
        }

        if capture.width == 0 || capture.height == 0 {
            return Err(Error::ConfigValidation {
                message: format!(
                    "resolution hint must be non-zero (got {}x{})",
                    capture.width, capture.height
                ),
            });
        }

        if capture.format_preferences.is_empty() {
            return Err(Error::ConfigValidation {
                message: "format_preferences must list at least one MIME type".to_string(),
            });
        }

        let mime = regex::Regex::new(MIME_PATTERN)
            .map_err(|e| Error::internal(format!("bad MIME pattern: {e}")))?;
        for format in &capture.format_preferences {
            if !mime.is_match(format) {
                return Err(Error::ConfigValidation {
                    message: format!("invalid recording MIME type: {format}"),
                });
            }
        }

        if !(1..=100).contains(&self.thumbnail.jpeg_quality) {
            return Err(Error::ConfigValidation {
                message: format!(
                    "jpeg_quality must be between 1 and 100 (got {})",
                    self.thumbnail.jpeg_quality
                ),
            });
        }

        Ok(())
    }

    /// Get the database path, resolving defaults if not set.
    #[must_use]
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join(DATABASE_FILE_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert!(config.storage.sweep_orphans_on_open);
        assert!(config.capture.audio_enabled);
        assert!(config.thumbnail.enabled);
        assert!(config.library.default_public);
    }

    #[test]
    fn test_default_capture_config() {
        let capture = CaptureConfig::default();

        assert_eq!(capture.facing, Facing::Front);
        assert_eq!((capture.width, capture.height), (1280, 720));
        assert_eq!(capture.min_duration(), Duration::from_millis(500));
        assert_eq!(capture.timeslice(), Duration::from_secs(1));
        assert_eq!(capture.tick_interval(), Duration::from_secs(1));
        assert_eq!(capture.audio_bits_per_second, 128_000);
        assert_eq!(capture.video_bits_per_second, 2_500_000);
        assert_eq!(capture.format_preferences[0], "video/webm;codecs=vp9,opus");
        assert_eq!(
            capture.format_preferences.last().map(String::as_str),
            Some("video/mp4")
        );
    }

    #[test]
    fn test_default_thumbnail_config() {
        let thumbnail = ThumbnailConfig::default();

        assert_eq!(thumbnail.seek_offset(), Duration::from_millis(100));
        assert_eq!(thumbnail.settle_delay(), Duration::from_millis(500));
        assert_eq!(thumbnail.jpeg_quality, 80);
        assert_eq!(thumbnail.ffmpeg_path, PathBuf::from("ffmpeg"));
    }

    #[test]
    fn test_default_library_config() {
        let library = LibraryConfig::default();
        assert_eq!(library.default_category, "General");
        assert_eq!(library.default_channel, "My Channel");
    }

    #[test]
    fn test_validate_valid_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_timeslice() {
        let mut config = Config::default();
        config.capture.timeslice_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("timeslice_ms"));
    }

    #[test]
    fn test_validate_zero_tick_interval() {
        let mut config = Config::default();
        config.capture.tick_interval_ms = 0;

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("tick_interval_ms"));
    }

    #[test]
    fn test_validate_min_duration_floor() {
        let mut config = Config::default();
        config.capture.min_duration_ms = 0;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("min_duration_ms"));

        config.capture.min_duration_ms = MIN_RECORDING_MS - 1;
        assert!(config.validate().is_err());

        config.capture.min_duration_ms = MIN_RECORDING_MS;
        assert!(config.validate().is_ok());

        config.capture.min_duration_ms = 2000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_formats() {
        let mut config = Config::default();
        config.capture.format_preferences.clear();

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("format_preferences"));
    }

    #[test]
    fn test_validate_bad_mime() {
        let mut config = Config::default();
        config.capture.format_preferences = vec!["audio/ogg".to_string()];

        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("audio/ogg"));
    }

    #[test]
    fn test_validate_jpeg_quality() {
        let mut config = Config::default();
        config.thumbnail.jpeg_quality = 0;
        assert!(config.validate().is_err());

        config.thumbnail.jpeg_quality = 101;
        assert!(config.validate().is_err());

        config.thumbnail.jpeg_quality = 100;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_mime_list_passes_validation() {
        let mime = regex::Regex::new(MIME_PATTERN).unwrap();
        for format in DEFAULT_FORMAT_PREFERENCES {
            assert!(mime.is_match(format), "rejected default format {format}");
        }
    }

    #[test]
    fn test_database_path_default() {
        let config = Config::default();
        assert!(config.database_path().to_string_lossy().contains("clips.db"));
    }

    #[test]
    fn test_database_path_custom() {
        let mut config = Config::default();
        config.storage.database_path = Some(PathBuf::from("/custom/path/db.sqlite"));

        assert_eq!(
            config.database_path(),
            PathBuf::from("/custom/path/db.sqlite")
        );
    }

    #[test]
    fn test_default_config_path() {
        let path = Config::default_config_path();
        assert!(path.to_string_lossy().contains("clipstash"));
        assert!(path.to_string_lossy().contains("config.toml"));
    }

    #[test]
    fn test_load_nonexistent_config() {
        let result = Config::load_from(Some(PathBuf::from("/nonexistent/config.toml")));
        assert!(result.is_ok());
        assert_eq!(result.unwrap(), Config::default());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[capture]\nfacing = \"back\"\nmin_duration_ms = 750\n\n[thumbnail]\nenabled = false\n",
        )
        .unwrap();

        let config = Config::load_from(Some(path)).unwrap();
        assert_eq!(config.capture.facing, Facing::Back);
        assert_eq!(config.capture.min_duration_ms, 750);
        assert!(!config.thumbnail.enabled);
        assert_eq!(config.capture.timeslice_ms, 1000);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[capture]\ntimeslice_ms = 0\n").unwrap();

        assert!(Config::load_from(Some(path)).is_err());
    }

    #[test]
    fn test_capture_config_deserialize_partial() {
        let json = r#"{"width": 640, "height": 480}"#;
        let capture: CaptureConfig = serde_json::from_str(json).unwrap();
        assert_eq!(capture.width, 640);
        assert_eq!(capture.min_duration_ms, 500);
    }

    #[test]
    fn test_config_serialize() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("format_preferences"));
        assert!(json.contains("sweep_orphans_on_open"));
    }
}
