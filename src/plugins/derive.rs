//! Raw → derived preprocessing.
//!
//! A preprocessor reads the latest raw snapshot of a topic, reshapes it and
//! appends the result under the same topic in the derived store. The reshaping
//! is any [`Transform`]; [`Pipeline`] is the declarative one configured from
//! `[derive.<topic>]` tables in `snapstore.toml`.

use crate::core::error::StoreError;
use crate::core::keys::SnapshotKey;
use crate::core::store::SnapshotStore;
use crate::core::table::{Blobs, Table};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Canonical text form of a cell cast to [`CastType::Datetime`].
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DATETIME_INPUTS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

pub trait Transform {
    fn apply(&self, table: Table) -> Result<Table, StoreError>;
}

impl<F> Transform for F
where
    F: Fn(Table) -> Result<Table, StoreError>,
{
    fn apply(&self, table: Table) -> Result<Table, StoreError> {
        self(table)
    }
}

/// One declarative reshaping step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    /// Keep only these columns, in this order.
    Select { columns: Vec<String> },
    Rename { from: String, to: String },
    /// Drop leading rows (export preambles, repeated headers).
    SkipRows { count: usize },
    /// Remove every occurrence of each of `chars` from a column, e.g. `,` or `%`.
    StripChars { column: String, chars: String },
    /// Replace a URL with its final path segment (`.../flags/fr.png` → `fr.png`).
    LastPathSegment {
        column: String,
        #[serde(default)]
        strip_extension: bool,
    },
    /// Collapse a numeric column into a single-row, single-column total.
    Sum { column: String, into: String },
    /// Parse every cell of a column as `to` and rewrite it in canonical form.
    Cast { column: String, to: CastType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CastType {
    Int,
    Float,
    /// RFC 3339, `YYYY-MM-DD[ T]HH:MM[:SS]` or a bare date; written as [`DATETIME_FORMAT`].
    Datetime,
}

impl CastType {
    pub fn as_str(self) -> &'static str {
        match self {
            CastType::Int => "int",
            CastType::Float => "float",
            CastType::Datetime => "datetime",
        }
    }

    fn cast(self, raw: &str) -> Option<String> {
        let cell = raw.trim();
        match self {
            CastType::Int => cell.parse::<i64>().ok().map(|v| v.to_string()),
            CastType::Float => cell
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(|v| format!("{:?}", v)),
            CastType::Datetime => {
                parse_datetime(cell).map(|at| at.format(DATETIME_FORMAT).to_string())
            }
        }
    }
}

fn parse_datetime(cell: &str) -> Option<NaiveDateTime> {
    if let Ok(at) = DateTime::parse_from_rfc3339(cell) {
        return Some(at.naive_utc());
    }
    DATETIME_INPUTS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(cell, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(cell, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Select { .. } => "select",
            Step::Rename { .. } => "rename",
            Step::SkipRows { .. } => "skip_rows",
            Step::StripChars { .. } => "strip_chars",
            Step::LastPathSegment { .. } => "last_path_segment",
            Step::Sum { .. } => "sum",
            Step::Cast { .. } => "cast",
        }
    }
}

impl Transform for Step {
    fn apply(&self, mut table: Table) -> Result<Table, StoreError> {
        table.require_rectangular()?;
        match self {
            Step::Select { columns } => table.project(columns),
            Step::Rename { from, to } => {
                let index = table.require_column(from)?;
                if from != to && table.column_index(to).is_some() {
                    return Err(StoreError::SchemaMismatch(format!(
                        "cannot rename {:?}: column {:?} already exists",
                        from, to
                    )));
                }
                table.columns[index] = to.clone();
                Ok(table)
            }
            Step::SkipRows { count } => {
                let n = (*count).min(table.rows.len());
                table.rows.drain(..n);
                Ok(table)
            }
            Step::StripChars { column, chars } => {
                let index = table.require_column(column)?;
                for row in &mut table.rows {
                    row[index].retain(|c| !chars.contains(c));
                }
                Ok(table)
            }
            Step::LastPathSegment {
                column,
                strip_extension,
            } => {
                let index = table.require_column(column)?;
                for row in &mut table.rows {
                    row[index] = last_path_segment(&row[index], *strip_extension);
                }
                Ok(table)
            }
            Step::Sum { column, into } => {
                let index = table.require_column(column)?;
                let cells: Vec<&str> = table.rows.iter().map(|r| r[index].as_str()).collect();
                let total = sum_cells(column, &cells)?;
                Ok(Table::new([into.as_str()], vec![vec![total]]))
            }
            Step::Cast { column, to } => {
                let index = table.require_column(column)?;
                for (i, row) in table.rows.iter_mut().enumerate() {
                    let Some(value) = to.cast(&row[index]) else {
                        return Err(StoreError::TransformError(format!(
                            "row {} of {:?} is not {}: {:?}",
                            i,
                            column,
                            to.as_str(),
                            row[index]
                        )));
                    };
                    row[index] = value;
                }
                Ok(table)
            }
        }
    }
}

fn last_path_segment(value: &str, strip_extension: bool) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    let without_query = trimmed.split(['?', '#']).next().unwrap_or(trimmed);
    let segment = without_query.rsplit('/').next().unwrap_or(without_query);
    if strip_extension
        && let Some((stem, _)) = segment.rsplit_once('.')
        && !stem.is_empty()
    {
        return stem.to_string();
    }
    segment.to_string()
}

/// Integers stay integers; any decimal cell switches the whole sum to floats.
fn sum_cells(column: &str, cells: &[&str]) -> Result<String, StoreError> {
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    let mut integral = true;
    for (row, raw) in cells.iter().enumerate() {
        let cell = raw.trim();
        if integral && let Ok(v) = cell.parse::<i64>() {
            int_total = int_total.checked_add(v).ok_or_else(|| {
                StoreError::TransformError(format!("sum of {:?} overflows", column))
            })?;
            float_total += v as f64;
            continue;
        }
        let v: f64 = cell.parse().map_err(|_| {
            StoreError::TransformError(format!(
                "row {} of {:?} is not numeric: {:?}",
                row, column, raw
            ))
        })?;
        integral = false;
        float_total += v;
    }
    Ok(if integral {
        int_total.to_string()
    } else {
        float_total.to_string()
    })
}

/// Ordered list of [`Step`]s. An empty pipeline copies the table unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pipeline {
    #[serde(default)]
    pub steps: Vec<Step>,
}

impl Pipeline {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }
}

impl Transform for Pipeline {
    fn apply(&self, table: Table) -> Result<Table, StoreError> {
        self.steps
            .iter()
            .enumerate()
            .try_fold(table, |table, (i, step)| {
                step.apply(table).map_err(|e| match e {
                    StoreError::SchemaMismatch(msg) => {
                        StoreError::SchemaMismatch(format!("step {} ({}): {}", i, step.name(), msg))
                    }
                    StoreError::TransformError(msg) => {
                        StoreError::TransformError(format!("step {} ({}): {}", i, step.name(), msg))
                    }
                    other => other,
                })
            })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeriveOutcome {
    pub topic: String,
    pub source_key: SnapshotKey,
    pub derived_key: SnapshotKey,
    pub rows: usize,
}

/// Read the latest `topic` snapshot from `raw`, transform it, and append the
/// result under the same topic in `derived`.
pub fn derive(
    raw: &SnapshotStore,
    derived: &mut SnapshotStore,
    topic: &str,
    transform: &dyn Transform,
) -> Result<DeriveOutcome, StoreError> {
    let source = raw.read_latest_snapshot(topic)?;
    let table = transform.apply(source.table)?;
    let rows = table.row_count();
    let derived_key = derived.write_snapshot(topic, &table, &Blobs::new())?;
    info!(
        topic,
        source = %source.key,
        derived = %derived_key,
        rows,
        "derived snapshot"
    );
    Ok(DeriveOutcome {
        topic: topic.to_string(),
        source_key: source.key,
        derived_key,
        rows,
    })
}
