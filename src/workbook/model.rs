//! Argument and result types of the workbook service.
//!
//! Argument types deserialise from tool call arguments (camelCase keys);
//! required string arguments are `Option`s so that a missing value can be
//! reported as a tool error instead of a decode failure.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::workbook::pagination::Page;

/// Structure of a workbook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkbookMetadata {
    /// Absolute path of the workbook file.
    pub workbook_path: String,
    /// Worksheets in workbook order.
    pub worksheets: Vec<WorksheetMetadata>,
    /// When this metadata was read from disk.
    pub loaded_at: DateTime<Utc>,
}

/// Structure of one worksheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorksheetMetadata {
    /// Worksheet name.
    pub name: String,
    /// Tables on the worksheet.
    pub tables: Vec<TableMetadata>,
    /// Header row of the used range (blank headers become `Column{n}`).
    pub column_headers: Vec<String>,
}

/// Structure of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    /// Table name.
    pub name: String,
    /// Worksheet the table lives on.
    pub worksheet_name: String,
    /// Column headers.
    pub columns: Vec<String>,
    /// Number of data rows.
    pub row_count: usize,
}

/// Arguments of a row search.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchArgs {
    /// Text to look for.
    pub query: Option<String>,
    /// Restrict to this worksheet.
    pub worksheet: Option<String>,
    /// Restrict to this table.
    pub table: Option<String>,
    /// Page size.
    pub limit: Option<i64>,
    /// Match case exactly.
    #[serde(default)]
    pub case_sensitive: bool,
    /// Continuation cursor.
    pub cursor: Option<String>,
}

/// A row matched by a search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchRow {
    /// Worksheet holding the row.
    pub worksheet: String,
    /// Table holding the row, if any.
    pub table: Option<String>,
    /// 1-based sheet row number.
    pub row_number: u32,
    /// Cell values keyed by column header.
    pub values: IndexMap<String, String>,
}

/// One page of search results.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// The query that was run.
    pub query: String,
    /// Worksheet filter.
    pub worksheet: Option<String>,
    /// Table filter.
    pub table: Option<String>,
    /// Effective page size.
    pub limit: usize,
    /// The page.
    #[serde(flatten)]
    pub page: Page<SearchRow>,
}

/// Arguments of a table or worksheet preview.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewArgs {
    /// Worksheet to preview.
    pub worksheet: Option<String>,
    /// Table to preview instead of the whole worksheet.
    pub table: Option<String>,
    /// Page size.
    pub rows: Option<i64>,
    /// Continuation cursor.
    pub cursor: Option<String>,
}

/// A previewed row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRow {
    /// 1-based sheet row number.
    pub row_number: u32,
    /// Cell values in header order.
    pub values: Vec<String>,
}

/// One page of a preview.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResult {
    /// Worksheet name as stored in the workbook.
    pub worksheet: String,
    /// Table name as stored in the workbook, if previewing a table.
    pub table: Option<String>,
    /// Number of rows on this page.
    pub row_count: usize,
    /// Column headers.
    pub headers: Vec<String>,
    /// The page.
    #[serde(flatten)]
    pub page: Page<PreviewRow>,
}

/// Arguments of a pivot table analysis.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotArgs {
    /// Worksheet hosting the pivot tables.
    pub worksheet: Option<String>,
    /// Only this pivot table.
    pub pivot_table: Option<String>,
    /// Report filter (page) fields.
    #[serde(default = "default_true")]
    pub include_filters: bool,
    /// Largest number of body rows returned per pivot table.
    #[serde(default = "default_pivot_rows")]
    pub max_rows: i64,
}

impl Default for PivotArgs {
    fn default() -> Self {
        Self {
            worksheet: None,
            pivot_table: None,
            include_filters: true,
            max_rows: default_pivot_rows(),
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_pivot_rows() -> i64 {
    100
}

/// Pivot tables found on a worksheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotResult {
    /// The pivot tables.
    pub pivot_tables: Vec<PivotTableInfo>,
}

/// Definition and rendered body of one pivot table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotTableInfo {
    /// Pivot table name.
    pub name: String,
    /// Worksheet hosting the pivot table.
    pub worksheet_name: String,
    /// Worksheet holding the source data.
    pub source_worksheet: String,
    /// Source data range.
    pub source_range: String,
    /// Row fields.
    pub row_fields: Vec<PivotFieldInfo>,
    /// Column fields.
    pub column_fields: Vec<PivotFieldInfo>,
    /// Value fields.
    pub data_fields: Vec<PivotFieldInfo>,
    /// Report filter fields.
    pub filter_fields: Vec<PivotFieldInfo>,
    /// Rendered body rows keyed by the pivot's header row.
    pub data: Vec<IndexMap<String, String>>,
}

/// One field of a pivot table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotFieldInfo {
    /// Display name.
    pub name: String,
    /// Source column name.
    pub source_name: String,
    /// Aggregation function (`none` for axis fields).
    pub function: String,
}

/// Arguments of a cell update.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCellArgs {
    /// Worksheet holding the cell.
    pub worksheet: Option<String>,
    /// A1 reference.
    pub cell: Option<String>,
    /// New value.
    pub value: Option<String>,
    /// Why the change was made (audit).
    pub reason: Option<String>,
}

/// Outcome of a cell update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCellResult {
    /// Worksheet name as stored in the workbook.
    pub worksheet: String,
    /// Normalised A1 reference.
    pub cell: String,
    /// Formatted value before the update, if the cell was not empty.
    pub previous_value: Option<String>,
    /// Value as given by the caller.
    pub new_value: String,
    /// When the update was saved.
    pub timestamp: DateTime<Utc>,
    /// Audit trail entry id.
    pub audit_id: String,
}

/// Arguments of a worksheet addition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddWorksheetArgs {
    /// New worksheet name.
    pub name: Option<String>,
    /// 1-based position; appended when absent or out of range.
    pub position: Option<i64>,
    /// Why the change was made (audit).
    pub reason: Option<String>,
}

/// Outcome of a worksheet addition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddWorksheetResult {
    /// Name of the new worksheet.
    pub name: String,
    /// 1-based position of the new worksheet.
    pub position: usize,
    /// When the workbook was saved.
    pub timestamp: DateTime<Utc>,
    /// Audit trail entry id.
    pub audit_id: String,
}

/// Arguments of a cell note addition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddAnnotationArgs {
    /// Worksheet holding the cell.
    pub worksheet: Option<String>,
    /// A1 reference.
    pub cell: Option<String>,
    /// Note text.
    pub text: Option<String>,
    /// Note author.
    pub author: Option<String>,
}

/// Outcome of a cell note addition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddAnnotationResult {
    /// Worksheet name as stored in the workbook.
    pub worksheet: String,
    /// Normalised A1 reference.
    pub cell: String,
    /// Note text.
    pub text: String,
    /// Note author.
    pub author: String,
    /// When the workbook was saved.
    pub timestamp: DateTime<Utc>,
    /// Audit trail entry id.
    pub audit_id: String,
}
