//! Playback references for stored and in-memory clips.
//!
//! Renderers play payloads through short-lived `blob:clipstash/<uuid>` URLs
//! registered in an [`ObjectUrlRegistry`]. A [`PlaybackManager`] issues at
//! most one URL per logical slot and revokes each URL exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::LocalMediaStore;

/// Prefix of every URL the registry issues.
pub const OBJECT_URL_PREFIX: &str = "blob:clipstash/";

/// Shared table of live object URLs.
///
/// Clones share the same table.
#[derive(Debug, Clone, Default)]
pub struct ObjectUrlRegistry {
    entries: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl ObjectUrlRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a payload and return its URL.
    #[must_use]
    pub fn create(&self, payload: Bytes) -> String {
        let url = format!("{OBJECT_URL_PREFIX}{}", Uuid::new_v4());
        self.entries.lock().insert(url.clone(), payload);
        url
    }

    /// Bytes behind a URL, if it is still live.
    #[must_use]
    pub fn resolve(&self, url: &str) -> Option<Bytes> {
        self.entries.lock().get(url).cloned()
    }

    /// Drop a URL. Returns `false` if it was not live.
    pub fn revoke(&self, url: &str) -> bool {
        self.entries.lock().remove(url).is_some()
    }

    /// Number of live URLs.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.lock().len()
    }
}

/// What to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackSource {
    /// A clip saved in the local store, by id.
    Stored(String),
    /// A remote video; its URL is passed through untouched.
    External(String),
    /// An unsaved recording held in memory.
    Clip(Bytes),
}

/// A reference a renderer can play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackHandle {
    slot: String,
    url: String,
    revocable: bool,
}

impl PlaybackHandle {
    /// Slot the handle was opened in.
    #[must_use]
    pub fn slot(&self) -> &str {
        &self.slot
    }

    /// URL to hand to the renderer.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether closing the handle revokes a registry entry.
    #[must_use]
    pub fn is_revocable(&self) -> bool {
        self.revocable
    }
}

/// Issues and revokes playback handles, one per slot.
///
/// Dropping the manager closes every handle it still tracks.
#[derive(Debug)]
pub struct PlaybackManager {
    store: Arc<LocalMediaStore>,
    registry: ObjectUrlRegistry,
    slots: HashMap<String, PlaybackHandle>,
}

impl PlaybackManager {
    /// Create a manager resolving stored clips from `store`.
    #[must_use]
    pub fn new(store: Arc<LocalMediaStore>, registry: ObjectUrlRegistry) -> Self {
        Self {
            store,
            registry,
            slots: HashMap::new(),
        }
    }

    /// The registry renderers resolve URLs against.
    #[must_use]
    pub fn registry(&self) -> &ObjectUrlRegistry {
        &self.registry
    }

    /// The handle currently open in `slot`.
    #[must_use]
    pub fn current(&self, slot: &str) -> Option<&PlaybackHandle> {
        self.slots.get(slot)
    }

    /// Open a handle in `slot`, closing the slot's previous handle first.
    ///
    /// # Errors
    ///
    /// Returns `PayloadMissing` if a stored clip has no payload, or a
    /// storage error if the lookup fails.
    pub fn open(&mut self, slot: &str, source: PlaybackSource) -> Result<PlaybackHandle> {
        self.close_slot(slot);

        let (url, revocable) = match source {
            PlaybackSource::Stored(id) => {
                let payload = self
                    .store
                    .get_payload(&id)?
                    .ok_or_else(|| Error::payload_missing(&id))?;
                (self.registry.create(payload), true)
            }
            PlaybackSource::Clip(payload) => (self.registry.create(payload), true),
            PlaybackSource::External(url) => (url, false),
        };

        let handle = PlaybackHandle {
            slot: slot.to_string(),
            url,
            revocable,
        };
        debug!("Opened playback {} in slot {}", handle.url, slot);
        self.slots.insert(slot.to_string(), handle.clone());
        Ok(handle)
    }

    /// Close a handle. Returns `true` only the first time a revocable
    /// handle is closed.
    pub fn close(&mut self, handle: &PlaybackHandle) -> bool {
        if self.slots.get(&handle.slot) == Some(handle) {
            self.slots.remove(&handle.slot);
        }
        handle.revocable && self.registry.revoke(&handle.url)
    }

    /// Close whatever is open in `slot`.
    pub fn close_slot(&mut self, slot: &str) -> bool {
        match self.slots.remove(slot) {
            Some(handle) => {
                debug!("Closing playback {} in slot {}", handle.url, slot);
                handle.revocable && self.registry.revoke(&handle.url)
            }
            None => false,
        }
    }

    /// Close every open handle. Returns how many URLs were revoked.
    pub fn close_all(&mut self) -> usize {
        let slots: Vec<String> = self.slots.keys().cloned().collect();
        let mut revoked = 0;
        for slot in slots {
            if self.close_slot(&slot) {
                revoked += 1;
            }
        }
        revoked
    }

    /// Number of slots with an open handle.
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.len()
    }
}

impl Drop for PlaybackManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewVideoRecord;

    fn manager_with_clip(payload: &[u8]) -> (PlaybackManager, String) {
        let store = Arc::new(LocalMediaStore::open_in_memory().unwrap());
        let id = store.save(&NewVideoRecord::new("clip"), payload).unwrap();
        (PlaybackManager::new(store, ObjectUrlRegistry::new()), id)
    }

    #[test]
    fn test_registry_create_resolve_revoke() {
        let registry = ObjectUrlRegistry::new();
        let url = registry.create(Bytes::from_static(b"abc"));

        assert!(url.starts_with(OBJECT_URL_PREFIX));
        assert_eq!(registry.resolve(&url), Some(Bytes::from_static(b"abc")));
        assert!(registry.revoke(&url));
        assert!(!registry.revoke(&url));
        assert!(registry.resolve(&url).is_none());
    }

    #[test]
    fn test_open_stored_and_close() {
        let (mut manager, id) = manager_with_clip(b"stored payload");

        let handle = manager.open(&id, PlaybackSource::Stored(id.clone())).unwrap();
        assert!(handle.is_revocable());
        assert_eq!(
            manager.registry().resolve(handle.url()),
            Some(Bytes::from_static(b"stored payload"))
        );

        assert!(manager.close(&handle));
        assert!(manager.registry().resolve(handle.url()).is_none());
        assert!(!manager.close(&handle));
        assert_eq!(manager.open_count(), 0);
    }

    #[test]
    fn test_reopen_slot_revokes_previous() {
        let (mut manager, id) = manager_with_clip(b"data");

        let first = manager.open("viewer", PlaybackSource::Stored(id.clone())).unwrap();
        let second = manager.open("viewer", PlaybackSource::Stored(id)).unwrap();

        assert_ne!(first.url(), second.url());
        assert!(manager.registry().resolve(first.url()).is_none());
        assert!(manager.registry().resolve(second.url()).is_some());
        assert_eq!(manager.registry().live_count(), 1);

        // Closing the stale handle leaves the current one alone
        assert!(!manager.close(&first));
        assert_eq!(manager.current("viewer"), Some(&second));
    }

    #[test]
    fn test_slots_coexist() {
        let (mut manager, id) = manager_with_clip(b"data");

        manager.open("a", PlaybackSource::Stored(id.clone())).unwrap();
        manager.open("b", PlaybackSource::Stored(id)).unwrap();
        manager
            .open("c", PlaybackSource::Clip(Bytes::from_static(b"unsaved")))
            .unwrap();

        assert_eq!(manager.registry().live_count(), 3);
        assert_eq!(manager.close_all(), 3);
        assert_eq!(manager.registry().live_count(), 0);
    }

    #[test]
    fn test_external_passthrough() {
        let (mut manager, _) = manager_with_clip(b"data");
        let url = "https://videos.example.com/clip.mp4";

        let handle = manager
            .open("remote", PlaybackSource::External(url.to_string()))
            .unwrap();
        assert_eq!(handle.url(), url);
        assert!(!handle.is_revocable());
        assert_eq!(manager.registry().live_count(), 0);
        assert!(!manager.close(&handle));
    }

    #[test]
    fn test_missing_payload() {
        let (mut manager, _) = manager_with_clip(b"data");

        let err = manager
            .open("x", PlaybackSource::Stored("video_1_missing00".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::PayloadMissing { .. }));
        assert!(manager.current("x").is_none());
    }

    #[test]
    fn test_drop_revokes_everything() {
        let (mut manager, id) = manager_with_clip(b"data");
        let registry = manager.registry().clone();

        manager.open("a", PlaybackSource::Stored(id)).unwrap();
        assert_eq!(registry.live_count(), 1);

        drop(manager);
        assert_eq!(registry.live_count(), 0);
    }
}
