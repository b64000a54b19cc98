//! Snapshot keys: second-resolution timestamps whose lexical order is
//! chronological order.
//!
//! A key is `YYYYMMDDHHMMSS` ([`KeyStyle::Compact`]) or `YYYYMMDD_HHMMSS`
//! ([`KeyStyle::Underscore`]). When two writes land in the same second and the
//! store is configured with [`CollisionPolicy::Disambiguate`], the later key
//! gets a `.NNN` suffix. `.` sorts below every digit, so
//! `20240101093000 < 20240101093000.001 < 20240101093001`.

use crate::core::error::StoreError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Highest `.NNN` suffix handed out within one second.
pub const MAX_DISAMBIGUATION: u16 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum KeyStyle {
    /// `YYYYMMDDHHMMSS`
    #[default]
    Compact,
    /// `YYYYMMDD_HHMMSS`
    Underscore,
}

impl KeyStyle {
    fn pattern(self) -> &'static str {
        match self {
            KeyStyle::Compact => "%Y%m%d%H%M%S",
            KeyStyle::Underscore => "%Y%m%d_%H%M%S",
        }
    }

    fn base_len(self) -> usize {
        match self {
            KeyStyle::Compact => 14,
            KeyStyle::Underscore => 15,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            KeyStyle::Compact => "compact",
            KeyStyle::Underscore => "underscore",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "compact" => Some(KeyStyle::Compact),
            "underscore" => Some(KeyStyle::Underscore),
            _ => None,
        }
    }

    pub fn format(self, at: NaiveDateTime) -> SnapshotKey {
        SnapshotKey(at.format(self.pattern()).to_string())
    }

    /// Parse a key written in this style, with or without a `.NNN` suffix.
    pub fn parse(self, raw: &str) -> Result<SnapshotKey, StoreError> {
        let invalid = || StoreError::InvalidKey(raw.to_string());
        let (base, suffix) = match raw.split_once('.') {
            Some((base, suffix)) => (base, Some(suffix)),
            None => (raw, None),
        };
        if base.len() != self.base_len() {
            return Err(invalid());
        }
        let at = NaiveDateTime::parse_from_str(base, self.pattern()).map_err(|_| invalid())?;
        if self.format(at).0 != base {
            return Err(invalid());
        }
        if let Some(suffix) = suffix {
            let n: u16 = match suffix.len() {
                3 if suffix.bytes().all(|b| b.is_ascii_digit()) => {
                    suffix.parse().map_err(|_| invalid())?
                }
                _ => return Err(invalid()),
            };
            if n == 0 || n > MAX_DISAMBIGUATION {
                return Err(invalid());
            }
        }
        Ok(SnapshotKey(raw.to_string()))
    }
}

/// What `write_snapshot` does when the generated key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    /// Reject the write with `DuplicateSnapshot`.
    #[default]
    Fail,
    /// Append the first free `.NNN` suffix.
    Disambiguate,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotKey(String);

impl SnapshotKey {
    /// Wrap a key read back from the store file.
    pub(crate) fn from_stored(raw: String) -> Self {
        SnapshotKey(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The timestamp part, without any `.NNN` suffix.
    pub fn base(&self) -> &str {
        self.0.split_once('.').map(|(b, _)| b).unwrap_or(&self.0)
    }

    pub fn disambiguated(&self, n: u16) -> SnapshotKey {
        SnapshotKey(format!("{}.{:03}", self.base(), n))
    }
}

impl fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SnapshotKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
