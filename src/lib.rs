//! Snapstore: append-only, timestamp-versioned snapshots of scraped tables.
//!
//! Collectors write one immutable snapshot per run under a named topic;
//! preprocessing reads the latest raw snapshot, reshapes it and appends the
//! result to a second, derived store; dashboards read the latest derived
//! snapshot. Each store is a single SQLite file.
//!
//! # Guarantees
//!
//! - **Append-only**: snapshots are never updated or deleted.
//! - **Latest by key order**: keys are second-resolution timestamps whose
//!   lexical order is chronological, and "latest" is re-resolved on every read.
//! - **All or nothing**: a failed write leaves no trace; a half-written
//!   snapshot found on disk reads as `Corrupt`, never as truncated data.
//!
//! # Example
//!
//! ```no_run
//! use snapstore::core::db::OpenMode;
//! use snapstore::core::store::SnapshotStore;
//! use snapstore::core::table::{Blobs, Table};
//!
//! # fn main() -> Result<(), snapstore::core::error::StoreError> {
//! let mut store = SnapshotStore::open("data/data.db", OpenMode::Append)?;
//! let table = Table::from_strs(
//!     &["timestamp", "open", "high", "low", "close", "volume"],
//!     &[&["2024-01-01 09:30:00", "10.0", "10.5", "9.8", "10.2", "1000"]],
//! );
//! let key = store.write_snapshot("finance", &table, &Blobs::new())?;
//! let latest = store.read_latest_snapshot("finance")?;
//! assert_eq!(latest.key, key);
//! # Ok(())
//! # }
//! ```
//!
//! # Crate Structure
//!
//! - [`core`]: the store, keys, tables, integrity checks, config and logging
//! - [`plugins`]: the raw topic catalog and the raw → derived pipeline

pub mod core;
pub mod plugins;

mod cli;

use cli::{Cli, Command, OutputFormat};
use crate::core::{
    config::{Config, StoreRole},
    db::OpenMode,
    error::StoreError,
    logging, output,
    store::{Snapshot, SnapshotStore},
    table::{Blobs, Table},
};
use crate::plugins::{
    catalog,
    derive::{self, Pipeline, Step},
};

use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use tracing::warn;

pub fn run() -> Result<(), StoreError> {
    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    apply_cli_overrides(&cli, &mut config);
    logging::init_logging(&config.log_level, config.log_dir.as_deref())?;

    let role = cli.role;
    match cli.command {
        Command::Write {
            topic,
            input,
            blobs,
            format,
        } => run_write(&config, role, &topic, &input, &blobs, format),
        Command::Latest {
            topic,
            format,
            max_cell_chars,
        } => {
            let store = open_read(&config, role)?;
            let snapshot = store.read_latest_snapshot(&topic)?;
            print_snapshot(&snapshot, format, max_cell_chars)
        }
        Command::Show {
            topic,
            key,
            format,
            max_cell_chars,
        } => {
            let store = open_read(&config, role)?;
            let snapshot = store.read_snapshot(&topic, &key)?;
            print_snapshot(&snapshot, format, max_cell_chars)
        }
        Command::List { topic, format } => {
            let store = open_read(&config, role)?;
            let keys = store
                .list_snapshots(&topic)?
                .collect::<Result<Vec<_>, _>>()?;
            match format {
                OutputFormat::Json => print_json(&keys),
                OutputFormat::Text => {
                    for key in keys {
                        println!("{}", key);
                    }
                    Ok(())
                }
            }
        }
        Command::Topics { format } => {
            let store = open_read(&config, role)?;
            let topics = store.list_topics()?;
            match format {
                OutputFormat::Json => print_json(&topics),
                OutputFormat::Text => {
                    for topic in topics {
                        println!("{}", topic);
                    }
                    Ok(())
                }
            }
        }
        Command::CreateTopic { topic } => {
            let mut store = open_append(&config, role)?;
            if store.create_topic(&topic)? {
                println!("Created topic {}", topic);
            } else {
                println!("Topic {} already exists", topic);
            }
            store.close()
        }
        Command::Blob {
            topic,
            key,
            name,
            output,
        } => {
            let store = open_read(&config, role)?;
            let key = match key {
                Some(k) => k,
                None => store.latest_key(&topic)?.to_string(),
            };
            let Some(name) = name else {
                for blob in store.blob_names(&topic, &key)? {
                    println!("{}", blob);
                }
                return Ok(());
            };
            let data = store.read_blob(&topic, &key, &name)?;
            match output {
                Some(path) => {
                    crate::core::db::ensure_parent_dir(&path)?;
                    fs::write(&path, &data)?;
                    println!("Wrote {} bytes to {}", data.len(), path.display());
                }
                None => io::stdout().lock().write_all(&data)?,
            }
            Ok(())
        }
        Command::Derive {
            topic: Some(topic),
            select,
            format,
            ..
        } => run_derive(&config, &topic, select, format),
        Command::Derive { format, .. } => run_derive_all(&config, format),
        Command::Verify { format } => {
            let store = open_read(&config, role)?;
            let failures = store.verify()?;
            match format {
                OutputFormat::Json => print_json(&failures)?,
                OutputFormat::Text if failures.is_empty() => {
                    println!("{} {}", "ok".green().bold(), store.path().display())
                }
                OutputFormat::Text => {
                    for f in &failures {
                        println!("{} {}/{}: {}", "corrupt".red().bold(), f.topic, f.key, f.reason);
                    }
                }
            }
            if let Some(first) = failures.into_iter().next() {
                return Err(StoreError::corrupt(&first.topic, &first.key, first.reason));
            }
            Ok(())
        }
        Command::Events { format } => {
            let path = config.store_path(role);
            let events = crate::core::journal::Journal::for_store(path).read_events()?;
            match format {
                OutputFormat::Json => print_json(&events),
                OutputFormat::Text => {
                    for ev in events {
                        println!(
                            "{} {:<15} {:<8} {}{}",
                            ev.ts,
                            ev.op,
                            ev.status,
                            ev.topic,
                            ev.key.map(|k| format!("/{}", k)).unwrap_or_default()
                        );
                    }
                    Ok(())
                }
            }
        }
        Command::Catalog { subject, format } => {
            let topics = catalog::raw_topics(&subject);
            match format {
                OutputFormat::Json => print_json(&topics),
                OutputFormat::Text => {
                    for t in topics {
                        println!("{} - {}", t.name.bold(), t.description);
                        println!("  columns: {}", t.columns.join(", "));
                        if let Some(prefix) = t.blob_prefix {
                            println!("  blobs:   {}<source url>", prefix);
                        }
                    }
                    Ok(())
                }
            }
        }
    }
}

fn apply_cli_overrides(cli: &Cli, config: &mut Config) {
    if let Some(path) = &cli.raw_store {
        config.raw_store = path.clone();
    }
    if let Some(path) = &cli.derived_store {
        config.derived_store = path.clone();
    }
    if let Some(style) = cli.key_style {
        config.key_style = style;
    }
    if let Some(policy) = cli.collision {
        config.collision = policy;
    }
    if cli.no_journal {
        config.journal = false;
    }
}

fn open_read(config: &Config, role: StoreRole) -> Result<SnapshotStore, StoreError> {
    SnapshotStore::open_with(config.store_path(role), OpenMode::Read, config.store_options())
}

fn open_append(config: &Config, role: StoreRole) -> Result<SnapshotStore, StoreError> {
    SnapshotStore::open_with(config.store_path(role), OpenMode::Append, config.store_options())
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), StoreError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_snapshot(
    snapshot: &Snapshot,
    format: OutputFormat,
    max_cell_chars: usize,
) -> Result<(), StoreError> {
    match format {
        OutputFormat::Json => print_json(snapshot),
        OutputFormat::Text => {
            println!(
                "{}",
                format!(
                    "{}/{} ({} rows x {} columns)",
                    snapshot.topic,
                    snapshot.key,
                    snapshot.table.row_count(),
                    snapshot.table.column_count()
                )
                .dimmed()
            );
            print!("{}", output::render_table(&snapshot.table, max_cell_chars));
            if !snapshot.blob_names.is_empty() {
                println!(
                    "{} {}",
                    "blobs:".dimmed(),
                    output::preview_messages(&snapshot.blob_names, 5, max_cell_chars)
                );
            }
            Ok(())
        }
    }
}

fn read_table_input(input: &Path) -> Result<Table, StoreError> {
    let content = if input == Path::new("-") {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        fs::read_to_string(input)?
    };
    Ok(serde_json::from_str(&content)?)
}

fn run_write(
    config: &Config,
    role: StoreRole,
    topic: &str,
    input: &Path,
    blob_args: &[(String, std::path::PathBuf)],
    format: OutputFormat,
) -> Result<(), StoreError> {
    let table = read_table_input(input)?;
    let mut blobs = Blobs::new();
    for (name, path) in blob_args {
        blobs.insert(name.clone(), fs::read(path)?);
    }

    if role == StoreRole::Raw
        && let Some(declared) = catalog::lookup(topic)
    {
        let (extra, missing) = declared.drift(&table.columns);
        if !extra.is_empty() || !missing.is_empty() {
            warn!(
                topic,
                extra = %extra.join(","),
                missing = %missing.join(","),
                "columns differ from the catalog"
            );
        }
    }

    let mut store = open_append(config, role)?;
    let key = store.write_snapshot(topic, &table, &blobs)?;
    store.close()?;

    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "topic": topic,
            "key": key,
            "rows": table.row_count(),
            "blobs": blobs.len(),
        })),
        OutputFormat::Text => {
            println!("{}", key);
            Ok(())
        }
    }
}

/// Every configured pipeline, in topic order. A failing topic is logged and
/// skipped; the command still fails once the rest have run.
fn run_derive_all(config: &Config, format: OutputFormat) -> Result<(), StoreError> {
    let raw = open_read(config, StoreRole::Raw)?;
    let mut derived = open_append(config, StoreRole::Derived)?;
    let mut outcomes = Vec::new();
    let mut failed = Vec::new();
    for (topic, pipeline) in &config.derive {
        match derive::derive(&raw, &mut derived, topic, pipeline) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                warn!(topic = topic.as_str(), error = %e, "derive failed");
                failed.push(topic.as_str());
            }
        }
    }
    derived.close()?;

    match format {
        OutputFormat::Json => print_json(&outcomes)?,
        OutputFormat::Text => {
            for outcome in &outcomes {
                println!(
                    "{} {} -> {} ({} rows)",
                    outcome.topic, outcome.source_key, outcome.derived_key, outcome.rows
                );
            }
        }
    }
    if !failed.is_empty() {
        return Err(StoreError::TransformError(format!(
            "{} of {} pipelines failed: {}",
            failed.len(),
            config.derive.len(),
            failed.join(", ")
        )));
    }
    Ok(())
}

fn run_derive(
    config: &Config,
    topic: &str,
    select: Option<Vec<String>>,
    format: OutputFormat,
) -> Result<(), StoreError> {
    let pipeline = match select {
        Some(columns) => Pipeline::new(vec![Step::Select { columns }]),
        None => config.pipeline(topic).cloned().unwrap_or_default(),
    };
    let raw = open_read(config, StoreRole::Raw)?;
    let mut derived = open_append(config, StoreRole::Derived)?;
    let outcome = derive::derive(&raw, &mut derived, topic, &pipeline)?;
    derived.close()?;

    match format {
        OutputFormat::Json => print_json(&outcome),
        OutputFormat::Text => {
            println!(
                "{} {} -> {} ({} rows)",
                outcome.topic, outcome.source_key, outcome.derived_key, outcome.rows
            );
            Ok(())
        }
    }
}
