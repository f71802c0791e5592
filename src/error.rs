//! Configuration error types.
//!
//! Errors of the MCP layer live in [`crate::mcp::error`]; errors of the
//! workbook service in [`crate::workbook::error`].

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while loading the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {}", path.display())]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {}: {source}", path.display())]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// An explicitly requested configuration file does not exist.
    #[error("configuration file not found: {}", path.display())]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let error = ConfigError::NotFound {
            path: PathBuf::from("/path/to/config.json"),
        };
        let msg = error.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("config.json"));
    }

    #[test]
    fn validation_error_display() {
        let error = ConfigError::ValidationError {
            message: "pagination.max_page_size must be at least 1".to_string(),
        };
        assert!(error.to_string().contains("max_page_size"));
    }

    #[test]
    fn parse_error_includes_cause() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let error = ConfigError::ParseError {
            path: PathBuf::from("config.json"),
            source,
        };
        assert!(error.to_string().contains("EOF"));
    }
}
