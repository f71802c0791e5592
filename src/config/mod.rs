//! Configuration file loading and parsing.
//!
//! This module handles loading the configuration file from disk and parsing
//! it into validated, type-safe structures.
//!
//! # Configuration File Locations
//!
//! The configuration file is searched in the following order:
//!
//! 1. Path specified via `--config` CLI flag
//! 2. Default location:
//!    - **Linux/macOS:** `~/.excel-mcp/config.json`
//!    - **Windows:** `%USERPROFILE%\.excel-mcp\config.json`
//!
//! The file is optional: when the default file does not exist every setting
//! takes its default value. A file named with `--config` must exist.

mod settings;

pub use settings::{ClientConfig, Config, LoggingConfig, PaginationConfig};

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// Returns the default configuration directory.
///
/// - **Linux/macOS:** `~/.excel-mcp/`
/// - **Windows:** `%USERPROFILE%\.excel-mcp\`
#[must_use]
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".excel-mcp"))
}

/// Returns the platform-specific default configuration file path.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    default_config_dir().map(|p| p.join("config.json"))
}

/// Loads and validates the configuration.
///
/// If `path` is `None`, uses the platform-specific default location and
/// falls back to defaults when no file is there.
///
/// # Errors
///
/// Returns an error if:
/// - An explicitly given configuration file cannot be found
/// - The file cannot be read
/// - The JSON is malformed
/// - A setting is invalid
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(ConfigError::NotFound {
                    path: p.to_path_buf(),
                });
            }
            p.to_path_buf()
        }
        None => match default_config_path().filter(|p| p.exists()) {
            Some(p) => p,
            None => return Ok(Config::default()),
        },
    };

    load_file(&config_path)
}

fn load_file(config_path: &Path) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
        path: config_path.to_path_buf(),
        source: e,
    })?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| ConfigError::ParseError {
        path: config_path.to_path_buf(),
        source: e,
    })?;

    config.validate()?;

    tracing::debug!(path = %config_path.display(), "Loaded configuration");
    Ok(config)
}
