//! Rectangular text tables: the body of every snapshot.
//!
//! Cells are always text. Typing numbers or timestamps is the reader's job.

use crate::core::error::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Named binary side-data attached to a snapshot (e.g. `flags/<url>` icons).
pub type Blobs = BTreeMap<String, Vec<u8>>;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new<C, S>(columns: C, rows: Vec<Vec<String>>) -> Self
    where
        C: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// Build a table from borrowed string rows.
    pub fn from_strs(columns: &[&str], rows: &[&[&str]]) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Check the table is storable: at least one column, no duplicate or
    /// empty column names, and every row exactly as wide as the header.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.columns.is_empty() {
            return Err(StoreError::SchemaMismatch(
                "table declares no columns".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for name in &self.columns {
            if name.is_empty() {
                return Err(StoreError::SchemaMismatch(
                    "column names must be non-empty".to_string(),
                ));
            }
            if !seen.insert(name.as_str()) {
                return Err(StoreError::SchemaMismatch(format!(
                    "duplicate column {:?}",
                    name
                )));
            }
        }
        self.require_rectangular()
    }

    /// Every row exactly as wide as the header.
    pub(crate) fn require_rectangular(&self) -> Result<(), StoreError> {
        for (index, row) in self.rows.iter().enumerate() {
            if row.len() != self.columns.len() {
                return Err(StoreError::SchemaMismatch(format!(
                    "row {} has {} cells, expected {}",
                    index,
                    row.len(),
                    self.columns.len()
                )));
            }
        }
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub(crate) fn require_column(&self, name: &str) -> Result<usize, StoreError> {
        self.column_index(name).ok_or_else(|| {
            StoreError::SchemaMismatch(format!(
                "unknown column {:?} (have: {})",
                name,
                self.columns.join(", ")
            ))
        })
    }

    /// Cells of one column, top to bottom. Rows too short to reach the
    /// column yield `""`.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &str>> {
        let index = self.column_index(name)?;
        Some(
            self.rows
                .iter()
                .map(move |r| r.get(index).map_or("", String::as_str)),
        )
    }

    /// Keep only `names`, in the given order.
    pub fn project<S: AsRef<str>>(&self, names: &[S]) -> Result<Table, StoreError> {
        self.require_rectangular()?;
        let indexes = names
            .iter()
            .map(|n| self.require_column(n.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Table {
            columns: names.iter().map(|n| n.as_ref().to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| indexes.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        })
    }
}
