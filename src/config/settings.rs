//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::workbook::PageLimits;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Workbook served when none is given on the command line.
    #[serde(default)]
    pub workbook: Option<PathBuf>,

    /// Page sizes for search, preview and resources.
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Settings of the bundled client.
    #[serde(default)]
    pub client: ClientConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| {
            Err(ConfigError::ValidationError {
                message: message.to_string(),
            })
        };

        let pagination = &self.pagination;
        if pagination.default_page_size == 0 {
            return invalid("pagination.default_page_size must be at least 1");
        }
        if pagination.max_page_size == 0 {
            return invalid("pagination.max_page_size must be at least 1");
        }
        if pagination.default_page_size > pagination.max_page_size {
            return invalid("pagination.default_page_size must not exceed pagination.max_page_size");
        }
        if pagination.resource_preview_rows == 0 {
            return invalid("pagination.resource_preview_rows must be at least 1");
        }
        if self.client.shutdown_timeout_ms == 0 {
            return invalid("client.shutdown_timeout_ms must be greater than 0");
        }
        Ok(())
    }
}

/// Page size configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PaginationConfig {
    /// Page size when a caller does not ask for one.
    /// Default: 20
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,

    /// Largest page size a caller may ask for.
    /// Default: 100
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,

    /// Rows rendered when reading a worksheet or table resource.
    /// Default: 20
    #[serde(default = "default_page_size")]
    pub resource_preview_rows: usize,
}

impl PaginationConfig {
    /// The page size policy these settings describe.
    #[must_use]
    pub const fn limits(&self) -> PageLimits {
        PageLimits {
            default_size: self.default_page_size,
            max_size: self.max_page_size,
        }
    }
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            resource_preview_rows: default_page_size(),
        }
    }
}

const fn default_page_size() -> usize {
    20
}

const fn default_max_page_size() -> usize {
    100
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Server executable to launch.
    #[serde(default)]
    pub server_path: Option<PathBuf>,

    /// Bound on the shutdown request and on waiting for the server to exit.
    /// Default: 2000
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl ClientConfig {
    /// The shutdown timeout as a duration.
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_path: None,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

const fn default_shutdown_timeout_ms() -> u64 {
    2000
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert!(config.workbook.is_none());
        assert_eq!(config.pagination.limits(), PageLimits::default());
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "workbook": "/data/sales.xlsx",
            "pagination": {
                "default_page_size": 10,
                "max_page_size": 50,
                "resource_preview_rows": 5
            },
            "client": {
                "server_path": "/usr/local/bin/excel-mcp",
                "shutdown_timeout_ms": 500
            },
            "logging": {
                "level": "debug"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.workbook, Some(PathBuf::from("/data/sales.xlsx")));
        assert_eq!(config.pagination.limits().default_size, 10);
        assert_eq!(config.pagination.limits().max_size, 50);
        assert_eq!(config.pagination.resource_preview_rows, 5);
        assert_eq!(
            config.client.server_path,
            Some(PathBuf::from("/usr/local/bin/excel-mcp"))
        );
        assert_eq!(config.client.shutdown_timeout(), Duration::from_millis(500));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn client_config_defaults() {
        let config = ClientConfig::default();
        assert!(config.server_path.is_none());
        assert_eq!(config.shutdown_timeout_ms, 2000);
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
    }

    #[test]
    fn reject_default_above_max() {
        let json = r#"{
            "pagination": {
                "default_page_size": 200
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must not exceed"));
    }

    #[test]
    fn reject_zero_sizes() {
        for json in [
            r#"{ "pagination": { "max_page_size": 0 } }"#,
            r#"{ "pagination": { "default_page_size": 0 } }"#,
            r#"{ "pagination": { "resource_preview_rows": 0 } }"#,
            r#"{ "client": { "shutdown_timeout_ms": 0 } }"#,
        ] {
            let config: Config = serde_json::from_str(json).unwrap();
            assert!(config.validate().is_err(), "{json} should be rejected");
        }
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{
            "unknown_field": "value"
        }"#;

        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
