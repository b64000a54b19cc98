//! CLI struct definitions for the `snapstore` command-line interface.
//!
//! All clap-derived types live here. Dispatch logic lives in `lib.rs`.

use crate::core::config::StoreRole;
use crate::core::keys::{CollisionPolicy, KeyStyle};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "snapstore",
    version = env!("CARGO_PKG_VERSION"),
    about = "Append-only, timestamp-versioned snapshots of scraped tables, one SQLite file per store."
)]
pub(crate) struct Cli {
    /// Config file (defaults to ./snapstore.toml when present).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    /// Which store the command targets.
    #[clap(long, value_enum, default_value = "raw", global = true)]
    pub role: StoreRole,
    /// Override the raw store path.
    #[clap(long, global = true)]
    pub raw_store: Option<PathBuf>,
    /// Override the derived store path.
    #[clap(long, global = true)]
    pub derived_store: Option<PathBuf>,
    /// Key style for stores created by this invocation.
    #[clap(long, value_enum, global = true)]
    pub key_style: Option<KeyStyle>,
    /// Behavior when two snapshots land in the same second.
    #[clap(long, value_enum, global = true)]
    pub collision: Option<CollisionPolicy>,
    /// Do not append to the `.events.jsonl` audit trail.
    #[clap(long, global = true)]
    pub no_journal: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Append a snapshot read from a JSON table `{"columns": [...], "rows": [[...]]}`
    Write {
        #[clap(long)]
        topic: String,
        /// JSON file, or `-` for stdin.
        #[clap(long, default_value = "-")]
        input: PathBuf,
        /// Attach a blob as NAME=PATH (repeatable).
        #[clap(long = "blob", value_parser = parse_blob_arg)]
        blobs: Vec<(String, PathBuf)>,
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Print the newest snapshot of a topic
    Latest {
        #[clap(long)]
        topic: String,
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
        /// Truncate text cells to this many characters.
        #[clap(long, default_value_t = 60)]
        max_cell_chars: usize,
    },
    /// Print one specific snapshot
    Show {
        #[clap(long)]
        topic: String,
        #[clap(long)]
        key: String,
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
        #[clap(long, default_value_t = 60)]
        max_cell_chars: usize,
    },
    /// List snapshot keys of a topic, oldest first
    List {
        #[clap(long)]
        topic: String,
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// List topics in the store
    Topics {
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Register a topic with no snapshots
    CreateTopic { topic: String },
    /// Fetch a blob attached to a snapshot
    Blob {
        #[clap(long)]
        topic: String,
        /// Snapshot key (defaults to the latest).
        #[clap(long)]
        key: Option<String>,
        /// Blob name; without it the blob names are listed.
        #[clap(long)]
        name: Option<String>,
        /// Write bytes here instead of stdout.
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Transform the latest raw snapshot of a topic into the derived store
    Derive {
        #[clap(long, required_unless_present = "all")]
        topic: Option<String>,
        /// Run every `[derive.<topic>]` pipeline from the config, in topic order.
        #[clap(long, conflicts_with_all = ["topic", "select"])]
        all: bool,
        /// Project these columns instead of running the configured pipeline.
        #[clap(long, value_delimiter = ',')]
        select: Option<Vec<String>>,
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Check every snapshot in the store for corruption
    Verify {
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show the audit trail of the store
    Events {
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show the declared columns of the raw collector topics
    Catalog {
        /// Reddit subject used to name the reddit topics.
        #[clap(long, default_value = "<subject>")]
        subject: String,
        #[clap(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

pub(crate) fn parse_blob_arg(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.rsplit_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected NAME=PATH, got {:?}", raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_args_split_on_last_equals() {
        let (name, path) = parse_blob_arg("flags/https://x/a.png?v=1=/tmp/a.png").unwrap();
        assert_eq!(name, "flags/https://x/a.png?v=1");
        assert_eq!(path, PathBuf::from("/tmp/a.png"));
        assert!(parse_blob_arg("noequals").is_err());
        assert!(parse_blob_arg("=x").is_err());
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "snapstore",
            "latest",
            "--topic",
            "finance",
            "--role",
            "derived",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.role, StoreRole::Derived);
        match cli.command {
            Command::Latest { topic, format, .. } => {
                assert_eq!(topic, "finance");
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn derive_select_is_comma_separated() {
        let cli = Cli::try_parse_from([
            "snapstore",
            "derive",
            "--topic",
            "finance",
            "--select",
            "timestamp,close",
        ])
        .unwrap();
        match cli.command {
            Command::Derive { select, .. } => {
                assert_eq!(select, Some(vec!["timestamp".to_string(), "close".to_string()]))
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn derive_needs_a_topic_or_all() {
        assert!(Cli::try_parse_from(["snapstore", "derive"]).is_err());
        assert!(
            Cli::try_parse_from(["snapstore", "derive", "--all", "--topic", "finance"]).is_err()
        );
        let cli = Cli::try_parse_from(["snapstore", "derive", "--all"]).unwrap();
        match cli.command {
            Command::Derive { topic, all, .. } => {
                assert!(all);
                assert_eq!(topic, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
