use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Store does not exist: {0}")]
    StoreMissing(String),
    #[error("Store is open read-only: {0}")]
    ReadOnly(String),
    #[error("Invalid topic name: {0:?}")]
    InvalidTopic(String),
    #[error("Invalid snapshot key: {0:?}")]
    InvalidKey(String),
    #[error("Topic not found: {0}")]
    TopicNotFound(String),
    #[error("Topic has no snapshots: {0}")]
    EmptyTopic(String),
    #[error("Snapshot not found: {topic}/{key}")]
    SnapshotNotFound { topic: String, key: String },
    #[error("Blob not found: {topic}/{key} [{name}]")]
    BlobNotFound {
        topic: String,
        key: String,
        name: String,
    },
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error("Duplicate snapshot: {topic}/{key} already exists")]
    DuplicateSnapshot { topic: String, key: String },
    #[error("Corrupt snapshot {snapshot}: {reason}")]
    Corrupt { snapshot: String, reason: String },
    #[error("Transform error: {0}")]
    TransformError(String),
}

impl StoreError {
    pub(crate) fn corrupt(topic: &str, key: &str, reason: impl Into<String>) -> Self {
        StoreError::Corrupt {
            snapshot: format!("{}/{}", topic, key),
            reason: reason.into(),
        }
    }

    /// Process exit code used by the CLI for this condition.
    pub fn exit_code(&self) -> i32 {
        match self {
            StoreError::TopicNotFound(_)
            | StoreError::EmptyTopic(_)
            | StoreError::SnapshotNotFound { .. }
            | StoreError::BlobNotFound { .. }
            | StoreError::StoreMissing(_) => 3,
            StoreError::SchemaMismatch(_)
            | StoreError::DuplicateSnapshot { .. }
            | StoreError::InvalidTopic(_)
            | StoreError::InvalidKey(_)
            | StoreError::ReadOnly(_) => 4,
            StoreError::Corrupt { .. } => 5,
            _ => 1,
        }
    }
}
