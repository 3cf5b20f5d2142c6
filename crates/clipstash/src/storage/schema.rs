//! `SQLite` schema definitions for clipstash.
//!
//! Metadata and payloads live in independent tables with no foreign key
//! between them; consistency across the two is maintained by the store and
//! checked by its integrity report.

/// Video metadata, one row per saved clip.
///
/// `seq` preserves insertion order; `id` is the store-generated key shared
/// with `video_payloads`.
pub const CREATE_VIDEO_RECORDS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS video_records (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    thumbnail TEXT NOT NULL,
    duration_secs INTEGER NOT NULL,
    channel TEXT NOT NULL,
    created_at TEXT NOT NULL,
    category TEXT NOT NULL,
    is_public INTEGER NOT NULL,
    source_url TEXT
)
";

/// Encoded video bytes keyed by video id.
pub const CREATE_VIDEO_PAYLOADS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS video_payloads (
    id TEXT PRIMARY KEY,
    data BLOB NOT NULL,
    byte_size INTEGER NOT NULL,
    digest TEXT NOT NULL,
    stored_at TEXT NOT NULL DEFAULT (datetime('now'))
)
";

/// Saves that wrote metadata but have not yet confirmed the payload.
pub const CREATE_PENDING_SAVES_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS pending_saves (
    id TEXT PRIMARY KEY,
    started_at TEXT NOT NULL
)
";

/// Index for listing by creation time.
pub const CREATE_CREATED_AT_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_video_records_created_at ON video_records(created_at DESC)
";

/// Index for filtering by category.
pub const CREATE_CATEGORY_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_video_records_category ON video_records(category)
";

/// Key/value table for store bookkeeping (schema version).
pub const CREATE_STORE_META_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_VIDEO_RECORDS_TABLE,
    CREATE_VIDEO_PAYLOADS_TABLE,
    CREATE_PENDING_SAVES_TABLE,
    CREATE_CREATED_AT_INDEX,
    CREATE_CATEGORY_INDEX,
    CREATE_STORE_META_TABLE,
];
