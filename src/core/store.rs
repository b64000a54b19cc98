//! The snapshot store: append-only, timestamp-versioned tables grouped by topic.
//!
//! A store is one SQLite file. Producers call [`SnapshotStore::write_snapshot`]
//! to add an immutable snapshot under a topic; consumers call
//! [`SnapshotStore::read_latest_snapshot`], which resolves "latest" as the
//! lexically greatest key under the topic on every call.
//!
//! At most one process should hold a store open in [`OpenMode::Append`] at a
//! time. Nothing here locks across processes beyond SQLite's own file locks.

use crate::core::db::{self, OpenMode};
use crate::core::error::StoreError;
use crate::core::integrity;
use crate::core::journal::Journal;
use crate::core::keys::{CollisionPolicy, KeyStyle, MAX_DISAMBIGUATION, SnapshotKey};
use crate::core::schemas::{self, SNAPSHOT_STATE_COMMITTED, SNAPSHOT_STATE_PENDING};
use crate::core::table::{Blobs, Table};
use crate::core::time::{self, Clock, SystemClock};
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};

static TOPIC_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,254}$").unwrap());

/// Keys fetched per query by [`SnapshotKeys`].
pub const DEFAULT_PAGE_SIZE: usize = 256;

pub fn validate_topic(topic: &str) -> Result<(), StoreError> {
    if TOPIC_PATTERN.is_match(topic) {
        Ok(())
    } else {
        Err(StoreError::InvalidTopic(topic.to_string()))
    }
}

/// Settings applied when opening a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Key style for a newly created file. Existing files keep their own.
    pub key_style: KeyStyle,
    pub collision: CollisionPolicy,
    /// Append mutation events to `<file>.events.jsonl`.
    pub journal: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            key_style: KeyStyle::Compact,
            collision: CollisionPolicy::Fail,
            journal: true,
        }
    }
}

/// One snapshot read back from the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub topic: String,
    pub key: SnapshotKey,
    pub created_at: String,
    pub table: Table,
    /// Names of attached blobs, ascending. Fetch bytes with [`SnapshotStore::read_blob`].
    pub blob_names: Vec<String>,
}

/// A snapshot that failed its integrity checks during [`SnapshotStore::verify`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorruptSnapshot {
    pub topic: String,
    pub key: String,
    pub reason: String,
}

struct SnapshotHeader {
    id: i64,
    column_count: i64,
    row_count: i64,
    blob_count: i64,
    checksum: String,
    state: String,
    created_at: String,
}

pub struct SnapshotStore {
    path: PathBuf,
    mode: OpenMode,
    conn: Connection,
    key_style: KeyStyle,
    collision: CollisionPolicy,
    journal: Option<Journal>,
    clock: Box<dyn Clock>,
}

impl std::fmt::Debug for SnapshotStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotStore")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("key_style", &self.key_style)
            .field("collision", &self.collision)
            .finish()
    }
}

impl SnapshotStore {
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self, StoreError> {
        Self::open_with(path, mode, StoreOptions::default())
    }

    pub fn open_with(
        path: impl AsRef<Path>,
        mode: OpenMode,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let conn = db::db_connect(&path, mode)?;

        let stored_style = match mode {
            OpenMode::Append => db::initialize_store(&conn, options.key_style.as_str())?,
            OpenMode::Read => db::read_meta(&conn, schemas::META_KEY_STYLE)?.ok_or_else(|| {
                StoreError::Corrupt {
                    snapshot: "store_meta".to_string(),
                    reason: "key style missing".to_string(),
                }
            })?,
        };
        let key_style = KeyStyle::from_name(&stored_style).ok_or_else(|| StoreError::Corrupt {
            snapshot: "store_meta".to_string(),
            reason: format!("unknown key style {:?}", stored_style),
        })?;
        if mode == OpenMode::Append && key_style != options.key_style {
            warn!(
                path = %path.display(),
                stored = key_style.as_str(),
                requested = options.key_style.as_str(),
                "store keeps the key style it was created with"
            );
        }

        let journal = (options.journal && mode == OpenMode::Append).then(|| Journal::for_store(&path));
        debug!(path = %path.display(), mode = mode.as_str(), key_style = key_style.as_str(), "opened store");

        Ok(Self {
            path,
            mode,
            conn,
            key_style,
            collision: options.collision,
            journal,
            clock: Box::new(SystemClock),
        })
    }

    /// Replace the clock used to generate snapshot keys.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn key_style(&self) -> KeyStyle {
        self.key_style
    }

    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    /// Flush and release the file handle, reporting close errors.
    /// Dropping the store also closes it, silently.
    pub fn close(self) -> Result<(), StoreError> {
        let path = self.path.clone();
        self.conn.close().map_err(|(_, e)| StoreError::RusqliteError(e))?;
        debug!(path = %path.display(), "closed store");
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        match self.mode {
            OpenMode::Append => Ok(()),
            OpenMode::Read => Err(StoreError::ReadOnly(self.path.display().to_string())),
        }
    }

    fn record(&self, op: &str, topic: &str, key: Option<&str>, outcome: Result<(), &StoreError>) {
        let Some(journal) = &self.journal else {
            return;
        };
        let (status, detail) = match outcome {
            Ok(()) => ("success", None),
            Err(e) => ("error", Some(e.to_string())),
        };
        if let Err(e) = journal.record(op, topic, key, status, detail) {
            warn!(journal = %journal.path().display(), error = %e, "failed to append journal event");
        }
    }

    /// Register `topic` without writing a snapshot. Returns `true` if it was new.
    pub fn create_topic(&mut self, topic: &str) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        validate_topic(topic)?;
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO topics(name, created_at) VALUES(?1, ?2)",
            params![topic, time::now_rfc3339()],
        )?;
        if inserted > 0 {
            info!(topic, "created topic");
            self.record("topic.create", topic, None, Ok(()));
        }
        Ok(inserted > 0)
    }

    /// Append a new snapshot of `table` (and optional `blobs`) under `topic`.
    ///
    /// The key comes from the store clock. Either the whole snapshot becomes
    /// visible or, on any error, nothing does.
    pub fn write_snapshot(
        &mut self,
        topic: &str,
        table: &Table,
        blobs: &Blobs,
    ) -> Result<SnapshotKey, StoreError> {
        self.ensure_writable()?;
        validate_topic(topic)?;

        let result = table
            .validate()
            .and_then(|_| validate_blob_names(blobs))
            .and_then(|_| {
                let base = self.key_style.format(self.clock.now());
                self.commit_snapshot(topic, base, table, blobs)
            });

        match &result {
            Ok(key) => {
                info!(
                    topic,
                    key = %key,
                    rows = table.row_count(),
                    columns = table.column_count(),
                    blobs = blobs.len(),
                    "wrote snapshot"
                );
                self.record("snapshot.write", topic, Some(key.as_str()), Ok(()));
            }
            Err(e) => {
                warn!(topic, error = %e, "snapshot write rejected");
                self.record("snapshot.write", topic, None, Err(e));
            }
        }
        result
    }

    fn commit_snapshot(
        &mut self,
        topic: &str,
        base: SnapshotKey,
        table: &Table,
        blobs: &Blobs,
    ) -> Result<SnapshotKey, StoreError> {
        let blob_digests: Vec<(String, String)> = blobs
            .iter()
            .map(|(name, data)| (name.clone(), integrity::hash_bytes(data)))
            .collect();
        let checksum = integrity::snapshot_checksum(table, &blob_digests);
        let created_at = time::now_rfc3339();
        let collision = self.collision;

        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO topics(name, created_at) VALUES(?1, ?2)",
            params![topic, created_at],
        )?;

        let key = resolve_key(&tx, topic, base, collision)?;
        if let Some(current) = max_key(&tx, topic)?
            && current.as_str() > key.as_str()
        {
            warn!(topic, key = %key, latest = %current, "new key sorts before the current latest snapshot");
        }

        tx.execute(
            "INSERT INTO snapshots(topic, key, column_count, row_count, blob_count, checksum, state, created_at)
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                topic,
                key.as_str(),
                table.column_count() as i64,
                table.row_count() as i64,
                blobs.len() as i64,
                checksum,
                SNAPSHOT_STATE_PENDING,
                created_at
            ],
        )?;
        let snapshot_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO snapshot_columns(snapshot_id, position, name) VALUES(?1, ?2, ?3)",
            )?;
            for (position, name) in table.columns.iter().enumerate() {
                stmt.execute(params![snapshot_id, position as i64, name])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO snapshot_rows(snapshot_id, row_index, cells) VALUES(?1, ?2, ?3)",
            )?;
            for (index, row) in table.rows.iter().enumerate() {
                let cells = serde_json::to_string(row)?;
                stmt.execute(params![snapshot_id, index as i64, cells])?;
            }

            let mut stmt = tx.prepare(
                "INSERT INTO snapshot_blobs(snapshot_id, name, data, sha256) VALUES(?1, ?2, ?3, ?4)",
            )?;
            for ((name, data), (_, digest)) in blobs.iter().zip(&blob_digests) {
                stmt.execute(params![snapshot_id, name, data, digest])?;
            }
        }

        tx.execute(
            "UPDATE snapshots SET state = ?1 WHERE id = ?2",
            params![SNAPSHOT_STATE_COMMITTED, snapshot_id],
        )?;
        tx.commit()?;
        Ok(key)
    }

    /// All topic names, ascending.
    pub fn list_topics(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self.conn.prepare("SELECT name FROM topics ORDER BY name ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn topic_exists(&self, topic: &str) -> Result<bool, StoreError> {
        let exists = self
            .conn
            .query_row("SELECT 1 FROM topics WHERE name = ?1", params![topic], |_| Ok(()))
            .optional()?
            .is_some();
        Ok(exists)
    }

    fn require_topic(&self, topic: &str) -> Result<(), StoreError> {
        validate_topic(topic)?;
        if self.topic_exists(topic)? {
            Ok(())
        } else {
            Err(StoreError::TopicNotFound(topic.to_string()))
        }
    }

    /// Key of the newest snapshot under `topic`.
    pub fn latest_key(&self, topic: &str) -> Result<SnapshotKey, StoreError> {
        self.require_topic(topic)?;
        max_key(&self.conn, topic)?.ok_or_else(|| StoreError::EmptyTopic(topic.to_string()))
    }

    /// Read the snapshot with the lexically greatest key under `topic`.
    pub fn read_latest_snapshot(&self, topic: &str) -> Result<Snapshot, StoreError> {
        let key = self.latest_key(topic)?;
        debug!(topic, key = %key, "resolved latest snapshot");
        self.load_snapshot(topic, key)
    }

    /// Read one specific snapshot.
    pub fn read_snapshot(&self, topic: &str, key: &str) -> Result<Snapshot, StoreError> {
        self.require_topic(topic)?;
        let key = self.key_style.parse(key)?;
        self.load_snapshot(topic, key)
    }

    /// Lazily list snapshot keys under `topic` in ascending order.
    pub fn list_snapshots(&self, topic: &str) -> Result<SnapshotKeys<'_>, StoreError> {
        self.require_topic(topic)?;
        Ok(SnapshotKeys::new(&self.conn, topic))
    }

    pub fn blob_names(&self, topic: &str, key: &str) -> Result<Vec<String>, StoreError> {
        let header = self.committed_header(topic, key)?;
        blob_names(&self.conn, header.id)
    }

    /// Fetch one blob, checking it against its stored digest.
    pub fn read_blob(&self, topic: &str, key: &str, name: &str) -> Result<Vec<u8>, StoreError> {
        let header = self.committed_header(topic, key)?;
        let found: Option<(Vec<u8>, String)> = self
            .conn
            .query_row(
                "SELECT data, sha256 FROM snapshot_blobs WHERE snapshot_id = ?1 AND name = ?2",
                params![header.id, name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((data, digest)) = found else {
            return Err(StoreError::BlobNotFound {
                topic: topic.to_string(),
                key: key.to_string(),
                name: name.to_string(),
            });
        };
        if integrity::hash_bytes(&data) != digest {
            return Err(StoreError::corrupt(
                topic,
                key,
                format!("blob {:?} does not match its digest", name),
            ));
        }
        Ok(data)
    }

    /// Check every snapshot in the store and report the ones that fail.
    pub fn verify(&self) -> Result<Vec<CorruptSnapshot>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT topic, key FROM snapshots ORDER BY topic ASC, key ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        let mut all = Vec::new();
        for r in rows {
            all.push(r?);
        }

        let mut failures = Vec::new();
        for (topic, key) in all {
            let loaded = self.load_snapshot(&topic, SnapshotKey::from_stored(key.clone()));
            let blobs_ok = loaded.and_then(|snapshot| {
                for name in &snapshot.blob_names {
                    self.read_blob(&topic, &key, name)?;
                }
                Ok(())
            });
            match blobs_ok {
                Ok(()) => {}
                Err(StoreError::Corrupt { reason, .. }) => {
                    failures.push(CorruptSnapshot { topic, key, reason })
                }
                Err(e) => return Err(e),
            }
        }
        Ok(failures)
    }

    fn header(&self, topic: &str, key: &str) -> Result<SnapshotHeader, StoreError> {
        self.require_topic(topic)?;
        self.conn
            .query_row(
                "SELECT id, column_count, row_count, blob_count, checksum, state, created_at
                 FROM snapshots WHERE topic = ?1 AND key = ?2",
                params![topic, key],
                |row| {
                    Ok(SnapshotHeader {
                        id: row.get(0)?,
                        column_count: row.get(1)?,
                        row_count: row.get(2)?,
                        blob_count: row.get(3)?,
                        checksum: row.get(4)?,
                        state: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::SnapshotNotFound {
                topic: topic.to_string(),
                key: key.to_string(),
            })
    }

    /// Header of a snapshot whose write finished; anything else reads as corrupt.
    fn committed_header(&self, topic: &str, key: &str) -> Result<SnapshotHeader, StoreError> {
        let header = self.header(topic, key)?;
        if header.state != SNAPSHOT_STATE_COMMITTED {
            return Err(StoreError::corrupt(
                topic,
                key,
                format!("snapshot left in state {:?}", header.state),
            ));
        }
        Ok(header)
    }

    fn load_snapshot(&self, topic: &str, key: SnapshotKey) -> Result<Snapshot, StoreError> {
        let k = key.as_str();
        let header = self.committed_header(topic, k)?;

        let mut stmt = self.conn.prepare(
            "SELECT position, name FROM snapshot_columns WHERE snapshot_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![header.id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut columns = Vec::new();
        for r in rows {
            let (position, name) = r?;
            if position != columns.len() as i64 {
                return Err(StoreError::corrupt(topic, k, format!("column {} missing", columns.len())));
            }
            columns.push(name);
        }
        if columns.len() as i64 != header.column_count {
            return Err(StoreError::corrupt(
                topic,
                k,
                format!("expected {} columns, found {}", header.column_count, columns.len()),
            ));
        }

        let mut stmt = self.conn.prepare(
            "SELECT row_index, cells FROM snapshot_rows WHERE snapshot_id = ?1 ORDER BY row_index ASC",
        )?;
        let rows = stmt.query_map(params![header.id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut body: Vec<Vec<String>> = Vec::new();
        for r in rows {
            let (index, cells) = r?;
            if index != body.len() as i64 {
                return Err(StoreError::corrupt(topic, k, format!("row {} missing", body.len())));
            }
            let cells: Vec<String> = serde_json::from_str(&cells).map_err(|e| {
                StoreError::corrupt(topic, k, format!("row {} undecodable: {}", index, e))
            })?;
            if cells.len() != columns.len() {
                return Err(StoreError::corrupt(
                    topic,
                    k,
                    format!("row {} has {} cells, expected {}", index, cells.len(), columns.len()),
                ));
            }
            body.push(cells);
        }
        if body.len() as i64 != header.row_count {
            return Err(StoreError::corrupt(
                topic,
                k,
                format!("expected {} rows, found {}", header.row_count, body.len()),
            ));
        }

        let mut stmt = self.conn.prepare(
            "SELECT name, sha256 FROM snapshot_blobs WHERE snapshot_id = ?1 ORDER BY name ASC",
        )?;
        let rows = stmt.query_map(params![header.id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut blob_digests = Vec::new();
        for r in rows {
            blob_digests.push(r?);
        }
        if blob_digests.len() as i64 != header.blob_count {
            return Err(StoreError::corrupt(
                topic,
                k,
                format!("expected {} blobs, found {}", header.blob_count, blob_digests.len()),
            ));
        }

        let table = Table { columns, rows: body };
        if integrity::snapshot_checksum(&table, &blob_digests) != header.checksum {
            return Err(StoreError::corrupt(topic, k, "checksum mismatch"));
        }

        Ok(Snapshot {
            topic: topic.to_string(),
            key,
            created_at: header.created_at,
            table,
            blob_names: blob_digests.into_iter().map(|(name, _)| name).collect(),
        })
    }
}

fn validate_blob_names(blobs: &Blobs) -> Result<(), StoreError> {
    if blobs.keys().any(|name| name.is_empty()) {
        return Err(StoreError::SchemaMismatch(
            "blob names must be non-empty".to_string(),
        ));
    }
    Ok(())
}

fn key_exists(conn: &Connection, topic: &str, key: &SnapshotKey) -> Result<bool, StoreError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM snapshots WHERE topic = ?1 AND key = ?2",
            params![topic, key.as_str()],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(exists)
}

fn max_key(conn: &Connection, topic: &str) -> Result<Option<SnapshotKey>, StoreError> {
    let key: Option<String> = conn.query_row(
        "SELECT MAX(key) FROM snapshots WHERE topic = ?1",
        params![topic],
        |row| row.get(0),
    )?;
    Ok(key.map(SnapshotKey::from_stored))
}

fn resolve_key(
    conn: &Connection,
    topic: &str,
    base: SnapshotKey,
    policy: CollisionPolicy,
) -> Result<SnapshotKey, StoreError> {
    if !key_exists(conn, topic, &base)? {
        return Ok(base);
    }
    if policy == CollisionPolicy::Disambiguate {
        for n in 1..=MAX_DISAMBIGUATION {
            let candidate = base.disambiguated(n);
            if !key_exists(conn, topic, &candidate)? {
                debug!(topic, key = %candidate, "disambiguated colliding snapshot key");
                return Ok(candidate);
            }
        }
    }
    Err(StoreError::DuplicateSnapshot {
        topic: topic.to_string(),
        key: base.to_string(),
    })
}

fn blob_names(conn: &Connection, snapshot_id: i64) -> Result<Vec<String>, StoreError> {
    let mut stmt =
        conn.prepare("SELECT name FROM snapshot_blobs WHERE snapshot_id = ?1 ORDER BY name ASC")?;
    let rows = stmt.query_map(params![snapshot_id], |row| row.get(0))?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

/// Lazy, finite, restartable listing of snapshot keys for one topic.
///
/// Keys are fetched a page at a time with a `key > cursor` seek, so a listing
/// started before a concurrent write may or may not include the new key.
#[derive(Debug, Clone)]
pub struct SnapshotKeys<'a> {
    conn: &'a Connection,
    topic: String,
    page_size: usize,
    cursor: Option<String>,
    buffer: VecDeque<SnapshotKey>,
    exhausted: bool,
}

impl<'a> SnapshotKeys<'a> {
    fn new(conn: &'a Connection, topic: &str) -> Self {
        Self {
            conn,
            topic: topic.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Rewind to the first key.
    pub fn restart(&mut self) {
        self.cursor = None;
        self.buffer.clear();
        self.exhausted = false;
    }

    fn fill(&mut self) -> Result<(), StoreError> {
        let conn = self.conn;
        let mut stmt = conn.prepare_cached(
            "SELECT key FROM snapshots
             WHERE topic = ?1 AND (?2 IS NULL OR key > ?2)
             ORDER BY key ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(
            params![self.topic, self.cursor, self.page_size as i64],
            |row| row.get::<_, String>(0),
        )?;
        let mut fetched = 0;
        for r in rows {
            let key = r?;
            self.cursor = Some(key.clone());
            self.buffer.push_back(SnapshotKey::from_stored(key));
            fetched += 1;
        }
        if fetched < self.page_size {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for SnapshotKeys<'_> {
    type Item = Result<SnapshotKey, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
