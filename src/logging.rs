//! Logging System
//!
//! Structured logging built on the `tracing` crate: configurable level,
//! text or JSON output, stdout or file destination, and per-module level
//! overrides. Environment variables (`STRATA_LOG`, `STRATA_LOG_FORMAT`,
//! `STRATA_LOG_OUTPUT`) take priority over the configuration file.

use crate::error::CoordError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text (default: text)
    #[serde(default = "default_format")]
    pub format: String,

    /// Output destination: stdout, file
    #[serde(default = "default_output")]
    pub output: String,

    /// Log file path (if output is "file")
    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Enable colored output (text format, stdout only)
    #[serde(default = "default_true")]
    pub color: bool,

    /// Module-specific log levels
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    "stdout".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from(".strata/strata.log")
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: default_log_file(),
            color: default_true(),
            modules: HashMap::new(),
        }
    }
}

/// Initialize the logging system.
///
/// Priority order (highest to lowest): environment variables, configuration,
/// defaults. Fails if a subscriber is already installed.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), CoordError> {
    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;
    let output = determine_output(config)?;
    let use_color = config.map(|c| c.color).unwrap_or(true);

    let base_subscriber = Registry::default().with(filter);

    let get_file_writer = || -> Result<std::fs::File, CoordError> {
        let log_file = config
            .map(|c| c.file.clone())
            .unwrap_or_else(default_log_file);
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CoordError::Config(format!("failed to create log directory: {}", e))
            })?;
        }
        std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .map_err(|e| CoordError::Config(format!("failed to open log file {:?}: {}", log_file, e)))
    };

    let init_result = if format == "json" {
        if output == "file" {
            let file_writer = get_file_writer()?;
            base_subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_writer(file_writer),
                )
                .try_init()
        } else {
            base_subscriber
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(ChronoUtc::rfc_3339())
                        .with_writer(std::io::stdout),
                )
                .try_init()
        }
    } else if output == "file" {
        let file_writer = get_file_writer()?;
        base_subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(false)
                    .with_writer(file_writer),
            )
            .try_init()
    } else {
        base_subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(use_color)
                    .with_writer(std::io::stdout),
            )
            .try_init()
    };

    init_result.map_err(|e| CoordError::Config(format!("failed to install subscriber: {}", e)))
}

/// Build environment filter from config or environment variables.
fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, CoordError> {
    if let Ok(filter) = EnvFilter::try_from_env("STRATA_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("info");
    if level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(level);
    if let Some(config) = config {
        for (module, module_level) in &config.modules {
            let directive = format!("{}={}", module, module_level);
            filter = filter.add_directive(directive.parse().map_err(|e| {
                CoordError::Config(format!("invalid log directive: {}", e))
            })?);
        }
    }

    Ok(filter)
}

/// Determine output format from config or environment.
fn determine_format(config: Option<&LoggingConfig>) -> Result<String, CoordError> {
    if let Ok(format) = std::env::var("STRATA_LOG_FORMAT") {
        if format == "json" || format == "text" {
            return Ok(format);
        }
    }

    let format = config.map(|c| c.format.as_str()).unwrap_or("text");
    if format != "json" && format != "text" {
        return Err(CoordError::Config(format!(
            "invalid log format: {} (must be 'json' or 'text')",
            format
        )));
    }
    Ok(format.to_string())
}

/// Determine output destination from config or environment.
fn determine_output(config: Option<&LoggingConfig>) -> Result<String, CoordError> {
    let output = match std::env::var("STRATA_LOG_OUTPUT") {
        Ok(output) => output,
        Err(_) => config
            .map(|c| c.output.clone())
            .unwrap_or_else(default_output),
    };
    if output != "stdout" && output != "file" {
        return Err(CoordError::Config(format!(
            "invalid log output: {} (must be 'stdout' or 'file')",
            output
        )));
    }
    Ok(output)
}
