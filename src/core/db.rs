use crate::core::error::StoreError;
use crate::core::schemas;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use std::fs;
use std::path::Path;
use std::time::Duration;

const BUSY_TIMEOUT_SECS: u64 = 5;

/// How a store file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only handle. The file must already exist.
    Read,
    /// Read-write handle. Creates the parent directories, the file and the schema.
    Append,
}

impl OpenMode {
    pub fn as_str(self) -> &'static str {
        match self {
            OpenMode::Read => "read",
            OpenMode::Append => "append",
        }
    }
}

pub fn db_connect(db_path: &Path, mode: OpenMode) -> Result<Connection, StoreError> {
    let conn = match mode {
        OpenMode::Read => {
            if !db_path.is_file() {
                return Err(StoreError::StoreMissing(db_path.display().to_string()));
            }
            Connection::open_with_flags(
                db_path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        }
        OpenMode::Append => {
            ensure_parent_dir(db_path)?;
            let conn = Connection::open(db_path)?;
            // Rollback journal: readers may open the file read-only without -shm/-wal side files.
            conn.query_row("PRAGMA journal_mode=DELETE;", [], |_| Ok(()))?;
            conn.execute("PRAGMA synchronous=FULL;", [])?;
            conn.execute("PRAGMA foreign_keys=ON;", [])?;
            conn
        }
    };
    conn.busy_timeout(Duration::from_secs(BUSY_TIMEOUT_SECS))?;
    Ok(conn)
}

/// Create the parent directory tree of `path` if it is missing. Idempotent.
pub fn ensure_parent_dir(path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if parent.as_os_str().is_empty() {
            return Ok(());
        }
        if parent.exists() && !parent.is_dir() {
            return Err(StoreError::IoError(std::io::Error::other(format!(
                "Path exists but is not a directory: {}",
                parent.display()
            ))));
        }
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Create the store tables and record format metadata. `key_style` is only
/// written when the store has none yet; the stored value is returned.
pub fn initialize_store(conn: &Connection, key_style: &str) -> Result<String, StoreError> {
    for statement in schemas::STORE_SCHEMA {
        conn.execute(statement, [])?;
    }
    conn.execute(
        "INSERT OR IGNORE INTO store_meta(key, value) VALUES(?1, ?2)",
        params![
            schemas::META_FORMAT_VERSION,
            schemas::STORE_FORMAT_VERSION.to_string()
        ],
    )?;
    conn.execute(
        "INSERT OR IGNORE INTO store_meta(key, value) VALUES(?1, ?2)",
        params![schemas::META_KEY_STYLE, key_style],
    )?;
    read_meta(conn, schemas::META_KEY_STYLE)?.ok_or_else(|| StoreError::Corrupt {
        snapshot: "store_meta".to_string(),
        reason: "key style missing after initialization".to_string(),
    })
}

/// Read one `store_meta` value. A file without the table is not a store.
pub fn read_meta(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
    let has_meta: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'store_meta'",
        [],
        |row| row.get(0),
    )?;
    if !has_meta {
        return Err(StoreError::Corrupt {
            snapshot: "store_meta".to_string(),
            reason: "file is not a snapshot store (no store_meta table)".to_string(),
        });
    }
    let value = conn
        .query_row(
            "SELECT value FROM store_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_mode_creates_nested_parent_directories() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("a").join("b").join("data.db");
        let conn = db_connect(&db_path, OpenMode::Append).unwrap();
        drop(conn);
        assert!(db_path.is_file());

        // Second open over the existing tree is fine.
        db_connect(&db_path, OpenMode::Append).unwrap();
    }

    #[test]
    fn read_mode_rejects_missing_file() {
        let tmp = TempDir::new().unwrap();
        let err = db_connect(&tmp.path().join("nope.db"), OpenMode::Read).unwrap_err();
        assert!(matches!(err, StoreError::StoreMissing(_)));
    }

    #[test]
    fn initialize_keeps_the_first_key_style() {
        let tmp = TempDir::new().unwrap();
        let conn = db_connect(&tmp.path().join("data.db"), OpenMode::Append).unwrap();
        assert_eq!(initialize_store(&conn, "underscore").unwrap(), "underscore");
        assert_eq!(initialize_store(&conn, "compact").unwrap(), "underscore");
    }

    #[test]
    fn read_meta_flags_foreign_sqlite_files() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("other.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute("CREATE TABLE t(x TEXT)", []).unwrap();
        let err = read_meta(&conn, schemas::META_KEY_STYLE).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
