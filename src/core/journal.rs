use crate::core::error::StoreError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Append-only JSONL audit trail of store mutations, kept next to the store
/// file as `<file>.events.jsonl`.
#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct JournalEvent {
    pub ts: String,
    pub event_id: String,
    pub op: String,
    pub topic: String,
    pub key: Option<String>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub fn journal_path(store_path: &Path) -> PathBuf {
    let mut name = store_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".events.jsonl");
    store_path.with_file_name(name)
}

impl Journal {
    pub fn for_store(store_path: &Path) -> Self {
        Self {
            path: journal_path(store_path),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(
        &self,
        op: &str,
        topic: &str,
        key: Option<&str>,
        status: &str,
        detail: Option<String>,
    ) -> Result<(), StoreError> {
        let ev = JournalEvent {
            ts: time::now_rfc3339(),
            event_id: time::new_event_id(),
            op: op.to_string(),
            topic: topic.to_string(),
            key: key.map(|s| s.to_string()),
            status: status.to_string(),
            detail,
        };

        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(StoreError::IoError)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?).map_err(StoreError::IoError)?;
        Ok(())
    }

    /// All recorded events, oldest first. A missing file is an empty journal.
    pub fn read_events(&self) -> Result<Vec<JournalEvent>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let mut out = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            out.push(serde_json::from_str(line)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn journal_sits_next_to_store_file() {
        let p = journal_path(Path::new("/data/raw/data.db"));
        assert_eq!(p, PathBuf::from("/data/raw/data.db.events.jsonl"));
    }

    #[test]
    fn record_appends_lines() {
        let tmp = TempDir::new().unwrap();
        let journal = Journal::for_store(&tmp.path().join("data.db"));
        assert!(journal.read_events().unwrap().is_empty());

        journal
            .record("snapshot.write", "finance", Some("20240101093000"), "success", None)
            .unwrap();
        journal
            .record(
                "snapshot.write",
                "finance",
                None,
                "error",
                Some("Schema mismatch".to_string()),
            )
            .unwrap();

        let events = journal.read_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].key.as_deref(), Some("20240101093000"));
        assert_eq!(events[1].status, "error");
        assert_ne!(events[0].event_id, events[1].event_id);
    }
}
