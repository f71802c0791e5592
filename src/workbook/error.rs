//! Workbook service error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the workbook service.
///
/// Display texts are shown to the caller verbatim, either as tool error
/// content or as a JSON-RPC error message.
#[derive(Debug, Error)]
pub enum WorkbookError {
    /// The workbook file does not exist.
    #[error("Workbook not found at '{}'.", path.display())]
    NotFound {
        /// Path that was looked up.
        path: PathBuf,
    },

    /// The workbook could not be parsed.
    #[error("Failed to open workbook '{}': {source}", path.display())]
    Open {
        /// Path to the workbook.
        path: PathBuf,
        /// The underlying reader error.
        #[source]
        source: calamine::XlsxError,
    },

    /// A part of the workbook package could not be read.
    #[error("Failed to read '{part}' from workbook package: {message}")]
    Package {
        /// Package part path.
        part: String,
        /// What went wrong.
        message: String,
    },

    /// The workbook could not be written.
    #[error("Failed to save workbook: {0}")]
    Save(#[from] rust_xlsxwriter::XlsxError),

    /// File system failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A required argument is missing or blank.
    #[error("{0} is required.")]
    MissingArgument(&'static str),

    /// No worksheet with the requested name.
    #[error("Worksheet '{name}' not found.")]
    WorksheetNotFound {
        /// Requested worksheet name.
        name: String,
    },

    /// No table with the requested name on the worksheet.
    #[error("Table '{table}' not found in worksheet '{worksheet}'.")]
    TableNotFound {
        /// Requested table name.
        table: String,
        /// Worksheet that was searched.
        worksheet: String,
    },

    /// A worksheet with the requested name already exists.
    #[error("Worksheet '{name}' already exists.")]
    WorksheetExists {
        /// Requested worksheet name.
        name: String,
    },

    /// The worksheet name is not acceptable to Excel.
    #[error("Invalid worksheet name '{name}': {reason}")]
    InvalidWorksheetName {
        /// Requested worksheet name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The cell reference is not an A1 address.
    #[error("Invalid cell reference '{cell}'.")]
    InvalidCell {
        /// The rejected reference.
        cell: String,
    },

    /// Saving would drop pivot tables the writer cannot reproduce.
    #[error("The workbook contains pivot tables; saving it would remove them, so write operations are disabled.")]
    PivotTablesPresent,
}

impl WorkbookError {
    pub(crate) fn package(part: impl Into<String>, message: impl ToString) -> Self {
        Self::Package {
            part: part.into(),
            message: message.to_string(),
        }
    }
}
