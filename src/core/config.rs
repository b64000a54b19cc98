//! Per-invocation configuration.
//!
//! Sources, lowest to highest precedence: built-in defaults, `snapstore.toml`,
//! environment (`SNAPSTORE_RAW`, `SNAPSTORE_DERIVED`, `SNAPSTORE_LOG_DIR`),
//! then CLI flags applied by the caller. The resulting [`Config`] value is
//! passed down explicitly; nothing here is process-global.

use crate::core::error::StoreError;
use crate::core::keys::{CollisionPolicy, KeyStyle};
use crate::core::store::StoreOptions;
use crate::plugins::derive::Pipeline;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "snapstore.toml";
pub const ENV_RAW_STORE: &str = "SNAPSTORE_RAW";
pub const ENV_DERIVED_STORE: &str = "SNAPSTORE_DERIVED";
pub const ENV_LOG_DIR: &str = "SNAPSTORE_LOG_DIR";

/// Which of the two pipeline stores a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StoreRole {
    /// Written by collectors.
    #[default]
    Raw,
    /// Written by preprocessing, read by the dashboard.
    Derived,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub raw_store: PathBuf,
    pub derived_store: PathBuf,
    pub key_style: KeyStyle,
    pub collision: CollisionPolicy,
    pub journal: bool,
    pub log_dir: Option<PathBuf>,
    pub log_level: String,
    /// Preprocessing pipelines keyed by topic.
    pub derive: BTreeMap<String, Pipeline>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            raw_store: PathBuf::from("data").join("data.db"),
            derived_store: PathBuf::from("data").join("preprocessed_data.db"),
            key_style: KeyStyle::Compact,
            collision: CollisionPolicy::Fail,
            journal: true,
            log_dir: None,
            log_level: "info".to_string(),
            derive: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(content: &str) -> Result<Self, StoreError> {
        toml::from_str(content).map_err(|e| StoreError::ConfigError(e.to_string()))
    }

    /// Load from `path`, or from `./snapstore.toml` when present, then apply
    /// environment overrides. An explicit path that does not exist is an error;
    /// a missing default file just means defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, StoreError> {
        let mut config = match path {
            Some(p) => {
                let content = fs::read_to_string(p).map_err(|e| {
                    StoreError::ConfigError(format!("cannot read {}: {}", p.display(), e))
                })?;
                Self::from_toml_str(&content)?
            }
            None => {
                let default_path = Path::new(CONFIG_FILE_NAME);
                if default_path.is_file() {
                    Self::from_toml_str(&fs::read_to_string(default_path)?)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_RAW_STORE).filter(|v| !v.is_empty()) {
            self.raw_store = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_DERIVED_STORE).filter(|v| !v.is_empty()) {
            self.derived_store = PathBuf::from(v);
        }
        if let Some(v) = lookup(ENV_LOG_DIR).filter(|v| !v.is_empty()) {
            self.log_dir = Some(PathBuf::from(v));
        }
    }

    pub fn store_path(&self, role: StoreRole) -> &Path {
        match role {
            StoreRole::Raw => &self.raw_store,
            StoreRole::Derived => &self.derived_store,
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            key_style: self.key_style,
            collision: self.collision,
            journal: self.journal,
        }
    }

    pub fn pipeline(&self, topic: &str) -> Option<&Pipeline> {
        self.derive.get(topic)
    }
}
