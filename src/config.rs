//! Configuration system.
//!
//! Layered configuration: built-in defaults, then the global file at
//! `~/.config/strata/config.toml` when present, then an explicit file, then
//! `STRATA_*` environment variables (nested keys separated by `__`, e.g.
//! `STRATA_STORE__PATH`).

use crate::error::CoordError;
use crate::logging::LoggingConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Store backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path for the sled-backed durable store. In-memory store when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Flush to disk after every durable commit.
    #[serde(default = "default_true")]
    pub flush_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            flush_on_commit: default_true(),
        }
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrataConfig {
    /// Background contexts obtain permanent identifiers before their saves
    /// propagate upward.
    #[serde(default = "default_true")]
    pub obtain_permanent_ids: bool,

    /// Store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

impl Default for StrataConfig {
    fn default() -> Self {
        Self {
            obtain_permanent_ids: default_true(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Path to the global config file (`$HOME/.config/strata/config.toml`).
pub fn global_config_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(|home| {
        PathBuf::from(home)
            .join(".config")
            .join("strata")
            .join("config.toml")
    })
}

/// Load configuration, layering the global file, an optional explicit file,
/// and environment overrides over the defaults.
pub fn load(explicit: Option<&Path>) -> Result<StrataConfig, CoordError> {
    let mut builder = Config::builder();
    if let Some(global) = global_config_path() {
        if global.exists() {
            builder = builder.add_source(File::from(global).required(false));
        }
    }
    if let Some(path) = explicit {
        builder = builder.add_source(File::from(path.to_path_buf()).required(true));
    }
    builder = builder.add_source(
        Environment::with_prefix("STRATA")
            .separator("__")
            .try_parsing(true),
    );
    let loaded = builder
        .build()
        .map_err(|e| CoordError::Config(format!("failed to load configuration: {}", e)))?;
    loaded
        .try_deserialize()
        .map_err(|e| CoordError::Config(format!("invalid configuration: {}", e)))
}
