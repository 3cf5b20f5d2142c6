//! The video library the rest of the application talks to.
//!
//! Local clips are persisted in the [`LocalMediaStore`]; external videos
//! (known only by URL) are kept in memory for the lifetime of the library.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clip::RecordedClip;
use crate::config::LibraryConfig;
use crate::error::{Error, Result};
use crate::playback::{ObjectUrlRegistry, PlaybackHandle, PlaybackManager, PlaybackSource};
use crate::storage::{is_video_id, LocalMediaStore, LocalVideoRecord, NewVideoRecord};

/// Caller-supplied fields of a new video. Unset fields fall back to the
/// library defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoDraft {
    /// Title.
    pub title: String,
    /// Description.
    pub description: Option<String>,
    /// Preview image reference.
    pub thumbnail: String,
    /// Length in whole seconds.
    pub duration_secs: u64,
    /// Channel/author label.
    pub channel: Option<String>,
    /// Creation time; now if unset.
    pub created_at: Option<DateTime<Utc>>,
    /// Where the video lives, for external entries and imports.
    pub source_url: Option<String>,
}

impl VideoDraft {
    /// Draft for a finished recording.
    #[must_use]
    pub fn from_clip(clip: &RecordedClip, title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            thumbnail: clip
                .preview
                .as_ref()
                .map(crate::clip::StillImage::to_data_url)
                .unwrap_or_default(),
            duration_secs: clip.duration_secs(),
            created_at: Some(clip.recorded_at),
            ..Self::default()
        }
    }
}

/// A video as listed by the library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEntry {
    /// Metadata.
    #[serde(flatten)]
    pub record: LocalVideoRecord,
    /// Whether the payload is stored locally.
    pub local: bool,
}

/// Saves, lists and plays back videos.
#[derive(Debug)]
pub struct MediaLibrary {
    store: Arc<LocalMediaStore>,
    playback: PlaybackManager,
    external: Vec<LocalVideoRecord>,
    defaults: LibraryConfig,
}

impl MediaLibrary {
    /// Create a library over a store.
    #[must_use]
    pub fn new(store: Arc<LocalMediaStore>, defaults: LibraryConfig) -> Self {
        let playback = PlaybackManager::new(Arc::clone(&store), ObjectUrlRegistry::new());
        Self {
            store,
            playback,
            external: Vec::new(),
            defaults,
        }
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<LocalMediaStore> {
        &self.store
    }

    /// Registry renderers resolve playback URLs against.
    #[must_use]
    pub fn registry(&self) -> &ObjectUrlRegistry {
        self.playback.registry()
    }

    fn new_record(
        &self,
        draft: VideoDraft,
        category: Option<String>,
        is_public: Option<bool>,
    ) -> NewVideoRecord {
        NewVideoRecord {
            title: draft.title,
            description: draft
                .description
                .unwrap_or_else(|| self.defaults.default_description.clone()),
            thumbnail: draft.thumbnail,
            duration_secs: draft.duration_secs,
            channel: draft
                .channel
                .unwrap_or_else(|| self.defaults.default_channel.clone()),
            created_at: draft.created_at.unwrap_or_else(Utc::now),
            category: category.unwrap_or_else(|| self.defaults.default_category.clone()),
            is_public: is_public.unwrap_or(self.defaults.default_public),
            source_url: draft.source_url,
        }
    }

    /// Add a video.
    ///
    /// With a payload the video is saved locally; without one it becomes an
    /// in-memory external entry.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the local save fails.
    pub fn add_video(
        &mut self,
        draft: VideoDraft,
        payload: Option<Bytes>,
        category: Option<String>,
        is_public: Option<bool>,
    ) -> Result<VideoEntry> {
        let record = self.new_record(draft, category, is_public);

        match payload {
            Some(payload) => {
                let id = self.store.save(&record, &payload)?;
                Ok(VideoEntry {
                    record: record.with_id(id),
                    local: true,
                })
            }
            None => {
                let record = record.with_id(format!("external_{}", Uuid::new_v4().simple()));
                debug!("Registered external video {}", record.id);
                self.external.insert(0, record.clone());
                Ok(VideoEntry {
                    record,
                    local: false,
                })
            }
        }
    }

    /// Every video: local clips newest first, then external entries.
    ///
    /// # Errors
    ///
    /// Returns a storage error if listing fails.
    pub fn list_videos(&self) -> Result<Vec<VideoEntry>> {
        let mut videos: Vec<VideoEntry> = self
            .store
            .list_metadata()?
            .into_iter()
            .rev()
            .map(|record| VideoEntry {
                record,
                local: true,
            })
            .collect();
        videos.extend(self.external.iter().cloned().map(|record| VideoEntry {
            record,
            local: false,
        }));
        Ok(videos)
    }

    /// Open a playback URL for a locally stored clip.
    ///
    /// The URL replaces any earlier one issued for the same id. Returns
    /// `None` if the clip has no payload, including ids the store never
    /// generates (external entries, typos).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the lookup fails.
    pub fn get_local_video_url(&mut self, id: &str) -> Result<Option<PlaybackHandle>> {
        if !is_video_id(id) {
            debug!("Not a local video id: {}", id);
            return Ok(None);
        }
        match self
            .playback
            .open(id, PlaybackSource::Stored(id.to_string()))
        {
            Ok(handle) => Ok(Some(handle)),
            Err(Error::PayloadMissing { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Revoke a playback URL. Returns `false` if it was already revoked.
    pub fn release_playback(&mut self, handle: &PlaybackHandle) -> bool {
        self.playback.close(handle)
    }

    /// Delete a local or external video. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the metadata removal fails.
    pub fn delete_video(&mut self, id: &str) -> Result<bool> {
        self.playback.close_slot(id);

        if let Some(pos) = self.external.iter().position(|r| r.id == id) {
            self.external.remove(pos);
            return Ok(true);
        }
        self.store.delete(id)
    }

    /// Remove every local video. External entries are kept.
    ///
    /// # Errors
    ///
    /// Returns a storage error if clearing fails.
    pub fn clear_local(&mut self) -> Result<usize> {
        self.playback.close_all();
        let removed = self.store.clear()?;
        info!("Cleared {} local videos", removed);
        Ok(removed)
    }
}
