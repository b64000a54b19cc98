//! SQL schema definitions for a snapshot store file.
//!
//! One store instance is one SQLite database holding every topic:
//! 1. store_meta: format version and the key style fixed at creation.
//! 2. topics: registered topic names.
//! 3. snapshots: one header row per write (counts, checksum, commit state).
//! 4. snapshot_columns / snapshot_rows: the table body, cells as text.
//! 5. snapshot_blobs: named binary side-data, kept apart from column names.

pub const STORE_FORMAT_VERSION: i64 = 1;

pub const META_FORMAT_VERSION: &str = "format_version";
pub const META_KEY_STYLE: &str = "key_style";

/// Header state while the body is still being inserted.
pub const SNAPSHOT_STATE_PENDING: &str = "pending";
/// Header state once every body row has been written.
pub const SNAPSHOT_STATE_COMMITTED: &str = "committed";

pub const STORE_SCHEMA_META: &str = "
    CREATE TABLE IF NOT EXISTS store_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
";

pub const STORE_SCHEMA_TOPICS: &str = "
    CREATE TABLE IF NOT EXISTS topics (
        name TEXT PRIMARY KEY,
        created_at TEXT NOT NULL
    )
";

pub const STORE_SCHEMA_SNAPSHOTS: &str = "
    CREATE TABLE IF NOT EXISTS snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        topic TEXT NOT NULL,
        key TEXT NOT NULL,
        column_count INTEGER NOT NULL,
        row_count INTEGER NOT NULL,
        blob_count INTEGER NOT NULL,
        checksum TEXT NOT NULL,
        state TEXT NOT NULL,
        created_at TEXT NOT NULL,
        UNIQUE(topic, key),
        FOREIGN KEY(topic) REFERENCES topics(name)
    )
";

pub const STORE_SCHEMA_SNAPSHOT_COLUMNS: &str = "
    CREATE TABLE IF NOT EXISTS snapshot_columns (
        snapshot_id INTEGER NOT NULL,
        position INTEGER NOT NULL,
        name TEXT NOT NULL,
        PRIMARY KEY(snapshot_id, position),
        FOREIGN KEY(snapshot_id) REFERENCES snapshots(id)
    )
";

pub const STORE_SCHEMA_SNAPSHOT_ROWS: &str = "
    CREATE TABLE IF NOT EXISTS snapshot_rows (
        snapshot_id INTEGER NOT NULL,
        row_index INTEGER NOT NULL,
        cells TEXT NOT NULL, -- JSON array of strings
        PRIMARY KEY(snapshot_id, row_index),
        FOREIGN KEY(snapshot_id) REFERENCES snapshots(id)
    )
";

pub const STORE_SCHEMA_SNAPSHOT_BLOBS: &str = "
    CREATE TABLE IF NOT EXISTS snapshot_blobs (
        snapshot_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        data BLOB NOT NULL,
        sha256 TEXT NOT NULL,
        PRIMARY KEY(snapshot_id, name),
        FOREIGN KEY(snapshot_id) REFERENCES snapshots(id)
    )
";

/// Every statement needed to bring an empty file up to the current format.
pub const STORE_SCHEMA: [&str; 6] = [
    STORE_SCHEMA_META,
    STORE_SCHEMA_TOPICS,
    STORE_SCHEMA_SNAPSHOTS,
    STORE_SCHEMA_SNAPSHOT_COLUMNS,
    STORE_SCHEMA_SNAPSHOT_ROWS,
    STORE_SCHEMA_SNAPSHOT_BLOBS,
];
