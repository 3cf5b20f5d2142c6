//! Storage layer for clipstash.
//!
//! This module provides `SQLite`-based persistent storage for recorded clips:
//! one table of metadata records and one of binary payloads, keyed by the
//! same generated id.

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clip::payload_digest;
use crate::config::Config;
use crate::error::{Error, Result};

/// Shape of every id this store generates.
const ID_PATTERN: &str = r"^video_\d+_[0-9a-z]{9}$";

/// Alphabet of the random id suffix.
const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Length of the random id suffix.
const ID_SUFFIX_LEN: usize = 9;

const RECORD_COLUMNS: &str = "id, title, description, thumbnail, duration_secs, channel, \
                              created_at, category, is_public, source_url";

/// Generate a fresh id: `video_<unix-millis>_<9 base-36 chars>`.
#[must_use]
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..ID_SUFFIX_LEN)
        .map(|_| char::from(ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())]))
        .collect();
    format!("video_{}_{}", Utc::now().timestamp_millis(), suffix)
}

/// Whether `id` has the shape of a store-generated id.
#[must_use]
pub fn is_video_id(id: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(ID_PATTERN).expect("id pattern is valid"))
        .is_match(id)
}

/// Persisted metadata for one saved clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVideoRecord {
    /// Store-generated id, shared with the payload.
    pub id: String,
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Preview image reference (usually a `data:` URL).
    pub thumbnail: String,
    /// Length in whole seconds.
    pub duration_secs: u64,
    /// Channel/author label.
    pub channel: String,
    /// When the clip was created.
    pub created_at: DateTime<Utc>,
    /// Category.
    pub category: String,
    /// Visibility flag.
    pub is_public: bool,
    /// Where the clip came from, if it was imported.
    pub source_url: Option<String>,
}

/// Metadata for a clip that has not been saved yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVideoRecord {
    /// Title.
    pub title: String,
    /// Description.
    pub description: String,
    /// Preview image reference.
    pub thumbnail: String,
    /// Length in whole seconds.
    pub duration_secs: u64,
    /// Channel/author label.
    pub channel: String,
    /// When the clip was created.
    pub created_at: DateTime<Utc>,
    /// Category.
    pub category: String,
    /// Visibility flag.
    pub is_public: bool,
    /// Where the clip came from, if it was imported.
    pub source_url: Option<String>,
}

impl NewVideoRecord {
    /// A public record created now, with empty text fields.
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            thumbnail: String::new(),
            duration_secs: 0,
            channel: String::new(),
            created_at: Utc::now(),
            category: String::new(),
            is_public: true,
            source_url: None,
        }
    }

    /// Attach the generated id.
    #[must_use]
    pub fn with_id(self, id: impl Into<String>) -> LocalVideoRecord {
        LocalVideoRecord {
            id: id.into(),
            title: self.title,
            description: self.description,
            thumbnail: self.thumbnail,
            duration_secs: self.duration_secs,
            channel: self.channel,
            created_at: self.created_at,
            category: self.category,
            is_public: self.is_public,
            source_url: self.source_url,
        }
    }
}

/// Persistent clip store.
///
/// `save` writes metadata first and the payload second. A `pending_saves`
/// marker brackets the two writes so an interrupted save can be found and
/// removed by [`LocalMediaStore::sweep_orphans`].
#[derive(Debug)]
pub struct LocalMediaStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Mutex<Connection>,
}

impl LocalMediaStore {
    /// Open or create a store at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening clip store at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&conn)?;

        info!("Clip store opened at {}", path.display());
        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Mutex::new(conn),
        })
    }

    /// Open the configured store, sweeping interrupted saves if enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened or swept.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = Self::open(config.database_path())?;
        if config.storage.sweep_orphans_on_open {
            let report = store.sweep_orphans()?;
            if report.removed_records > 0 {
                warn!(
                    "Removed {} record(s) left by interrupted saves",
                    report.removed_records
                );
            }
        }
        Ok(store)
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save a record and its payload under a freshly generated id.
    ///
    /// # Errors
    ///
    /// Returns `StorageWrite` naming the write that failed. If the payload
    /// write fails, the metadata written before it is removed again.
    pub fn save(&self, record: &NewVideoRecord, payload: &[u8]) -> Result<String> {
        let conn = self.conn.lock();
        let id = Self::unused_id(&conn)?;

        Self::begin_save(&conn, &id, record)?;
        if let Err(e) = Self::finish_save(&conn, &id, payload) {
            if let Err(cleanup) = Self::remove_metadata(&conn, &id) {
                warn!(
                    "Could not roll back metadata for {} ({}); it will be swept on next open",
                    id, cleanup
                );
            }
            return Err(e);
        }

        info!("Saved video {} ({} bytes)", id, payload.len());
        Ok(id)
    }

    fn unused_id(conn: &Connection) -> Result<String> {
        loop {
            let id = generate_id();
            let taken: bool = conn.query_row(
                r"
                SELECT EXISTS(SELECT 1 FROM video_records WHERE id = ?1)
                    OR EXISTS(SELECT 1 FROM video_payloads WHERE id = ?1)
                ",
                [&id],
                |row| row.get(0),
            )?;
            if !taken {
                return Ok(id);
            }
        }
    }

    /// First write of a save: marker plus metadata.
    fn begin_save(conn: &Connection, id: &str, record: &NewVideoRecord) -> Result<()> {
        let write_err = |stage| {
            let id = id.to_string();
            move |source| Error::StorageWrite { id, stage, source }
        };

        conn.execute(
            "INSERT INTO pending_saves (id, started_at) VALUES (?1, ?2)",
            params![id, Utc::now().to_rfc3339()],
        )
        .map_err(write_err("marker"))?;

        conn.execute(
            r"
            INSERT INTO video_records
                (id, title, description, thumbnail, duration_secs, channel,
                 created_at, category, is_public, source_url)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ",
            params![
                id,
                record.title,
                record.description,
                record.thumbnail,
                i64::try_from(record.duration_secs).unwrap_or(i64::MAX),
                record.channel,
                record.created_at.to_rfc3339(),
                record.category,
                record.is_public,
                record.source_url,
            ],
        )
        .map_err(write_err("metadata"))?;
        Ok(())
    }

    /// Second write of a save: payload, then clear the marker.
    fn finish_save(conn: &Connection, id: &str, payload: &[u8]) -> Result<()> {
        let write_err = |stage| {
            let id = id.to_string();
            move |source| Error::StorageWrite { id, stage, source }
        };

        conn.execute(
            "INSERT INTO video_payloads (id, data, byte_size, digest) VALUES (?1, ?2, ?3, ?4)",
            params![
                id,
                payload,
                i64::try_from(payload.len()).unwrap_or(i64::MAX),
                payload_digest(payload),
            ],
        )
        .map_err(write_err("payload"))?;

        conn.execute("DELETE FROM pending_saves WHERE id = ?1", [id])
            .map_err(write_err("marker"))?;
        Ok(())
    }

    fn remove_metadata(conn: &Connection, id: &str) -> Result<()> {
        conn.execute("DELETE FROM video_records WHERE id = ?1", [id])?;
        conn.execute("DELETE FROM pending_saves WHERE id = ?1", [id])?;
        Ok(())
    }

    /// All records in insertion order (oldest first).
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_metadata(&self) -> Result<Vec<LocalVideoRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {RECORD_COLUMNS} FROM video_records ORDER BY seq ASC"
        ))?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Get one record by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_record(&self, id: &str) -> Result<Option<LocalVideoRecord>> {
        let conn = self.conn.lock();
        let record = conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM video_records WHERE id = ?1"),
                [id],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Get the payload stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_payload(&self, id: &str) -> Result<Option<Bytes>> {
        let conn = self.conn.lock();
        let data: Option<Vec<u8>> = conn
            .query_row(
                "SELECT data FROM video_payloads WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data.map(Bytes::from))
    }

    /// Delete a record and its payload.
    ///
    /// A failure removing the payload is logged, not returned.
    /// Returns `true` if anything was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata removal fails.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let records = conn.execute("DELETE FROM video_records WHERE id = ?1", [id])?;

        let payloads = match conn.execute("DELETE FROM video_payloads WHERE id = ?1", [id]) {
            Ok(n) => n,
            Err(e) => {
                warn!("Failed to remove payload for {}: {}", id, e);
                0
            }
        };
        if let Err(e) = conn.execute("DELETE FROM pending_saves WHERE id = ?1", [id]) {
            warn!("Failed to clear pending marker for {}: {}", id, e);
        }

        let removed = records + payloads > 0;
        if removed {
            debug!("Deleted video {}", id);
        }
        Ok(removed)
    }

    /// Remove every record and payload. Returns the number of records removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear(&self) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM video_records", [])?;
        tx.execute("DELETE FROM video_payloads", [])?;
        tx.execute("DELETE FROM pending_saves", [])?;
        tx.commit()?;

        info!("Cleared {} videos from the store", removed);
        Ok(removed)
    }

    /// Count stored records.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn count(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM video_records", [], |row| {
            row.get(0)
        })?;
        Ok(count)
    }

    /// Remove metadata whose save never completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn sweep_orphans(&self) -> Result<SweepReport> {
        let conn = self.conn.lock();
        let pending: Vec<String> = conn
            .prepare("SELECT id FROM pending_saves")?
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut report = SweepReport::default();
        for id in pending {
            let has_payload: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM video_payloads WHERE id = ?1)",
                [&id],
                |row| row.get(0),
            )?;
            if !has_payload {
                report.removed_records +=
                    conn.execute("DELETE FROM video_records WHERE id = ?1", [&id])?;
            }
            conn.execute("DELETE FROM pending_saves WHERE id = ?1", [&id])?;
            report.cleared_markers += 1;
        }

        if report.cleared_markers > 0 {
            debug!(
                "Swept {} pending save(s), removed {} record(s)",
                report.cleared_markers, report.removed_records
            );
        }
        Ok(report)
    }

    /// Check that records and payloads pair up and payload digests match.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn integrity_report(&self) -> Result<IntegrityReport> {
        let conn = self.conn.lock();
        let ids = |sql: &str| -> Result<Vec<String>> {
            let ids = conn
                .prepare(sql)?
                .query_map([], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        };

        let records_without_payload = ids(
            "SELECT id FROM video_records WHERE id NOT IN (SELECT id FROM video_payloads) ORDER BY seq",
        )?;
        let payloads_without_record = ids(
            "SELECT id FROM video_payloads WHERE id NOT IN (SELECT id FROM video_records) ORDER BY id",
        )?;
        let pending_saves = ids("SELECT id FROM pending_saves ORDER BY started_at")?;

        let mut digest_mismatches = Vec::new();
        let mut stmt = conn.prepare("SELECT id, data, byte_size, digest FROM video_payloads")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let data: Vec<u8> = row.get(1)?;
            let byte_size: i64 = row.get(2)?;
            let digest: String = row.get(3)?;
            if i64::try_from(data.len()).ok() != Some(byte_size) || payload_digest(&data) != digest
            {
                digest_mismatches.push(id);
            }
        }

        Ok(IntegrityReport {
            records_without_payload,
            payloads_without_record,
            digest_mismatches,
            pending_saves,
        })
    }

    /// Sweep interrupted saves and remove unpaired records and payloads.
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn repair(&self) -> Result<usize> {
        let swept = self.sweep_orphans()?.removed_records;

        let conn = self.conn.lock();
        let records = conn.execute(
            "DELETE FROM video_records WHERE id NOT IN (SELECT id FROM video_payloads)",
            [],
        )?;
        let payloads = conn.execute(
            "DELETE FROM video_payloads WHERE id NOT IN (SELECT id FROM video_records)",
            [],
        )?;

        let removed = swept + records + payloads;
        if removed > 0 {
            info!("Repair removed {} unpaired row(s)", removed);
        }
        Ok(removed)
    }

    /// Get store statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let record_count = self.count()?;

        let conn = self.conn.lock();
        let payload_bytes: i64 = conn.query_row(
            "SELECT COALESCE(SUM(byte_size), 0) FROM video_payloads",
            [],
            |row| row.get(0),
        )?;
        let (oldest, newest): (Option<String>, Option<String>) = conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM video_records",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        drop(conn);

        let parse = |s: Option<String>| {
            s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StoreStats {
            record_count,
            payload_bytes: u64::try_from(payload_bytes).unwrap_or(0),
            oldest_record: parse(oldest),
            newest_record: parse(newest),
            db_size_bytes,
        })
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<LocalVideoRecord> {
        let duration: i64 = row.get(4)?;
        let created_at: String = row.get(6)?;

        let created_at = DateTime::parse_from_rfc3339(&created_at).map_or_else(
            |_| {
                warn!("Unparseable created_at {:?}; using now", created_at);
                Utc::now()
            },
            |dt| dt.with_timezone(&Utc),
        );

        Ok(LocalVideoRecord {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            thumbnail: row.get(3)?,
            duration_secs: u64::try_from(duration).unwrap_or(0),
            channel: row.get(5)?,
            created_at,
            category: row.get(7)?,
            is_public: row.get(8)?,
            source_url: row.get(9)?,
        })
    }
}

/// Outcome of [`LocalMediaStore::sweep_orphans`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Records removed because their payload was never written.
    pub removed_records: usize,
    /// Pending markers cleared.
    pub cleared_markers: usize,
}

/// Outcome of [`LocalMediaStore::integrity_report`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegrityReport {
    /// Records with no payload.
    pub records_without_payload: Vec<String>,
    /// Payloads with no record.
    pub payloads_without_record: Vec<String>,
    /// Payloads whose size or digest no longer matches.
    pub digest_mismatches: Vec<String>,
    /// Saves that started but never finished.
    pub pending_saves: Vec<String>,
}

impl IntegrityReport {
    /// Whether no problem was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.records_without_payload.is_empty()
            && self.payloads_without_record.is_empty()
            && self.digest_mismatches.is_empty()
            && self.pending_saves.is_empty()
    }
}

/// Statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Number of records.
    pub record_count: i64,
    /// Total payload bytes.
    pub payload_bytes: u64,
    /// Creation time of the oldest record.
    pub oldest_record: Option<DateTime<Utc>>,
    /// Creation time of the newest record.
    pub newest_record: Option<DateTime<Utc>>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
