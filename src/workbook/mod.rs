//! The spreadsheet service behind the MCP tools.
//!
//! [`WorkbookService`] owns one workbook path. Every operation re-opens the
//! file, so edits made by other programs are picked up; nothing is locked.
//! Structure metadata is cached per service instance and keyed by the
//! file's modification time. Every successful write invalidates the cache
//! and appends an entry to the in-memory audit trail.

pub mod address;
pub mod audit;
pub mod error;
pub mod model;
pub mod ooxml;
pub mod pagination;
pub mod reader;
pub mod writer;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use calamine::Data;
use chrono::Utc;
use indexmap::IndexMap;

pub use address::CellRef;
pub use audit::{AuditEntry, AuditLog, AuditQuery, AuditTrail, OperationType};
pub use error::WorkbookError;
pub use model::{
    AddAnnotationArgs, AddAnnotationResult, AddWorksheetArgs, AddWorksheetResult, PivotArgs,
    PivotResult, PivotTableInfo, PreviewArgs, PreviewResult, PreviewRow, SearchArgs, SearchResult,
    SearchRow, UpdateCellArgs, UpdateCellResult, WorkbookMetadata,
};
pub use pagination::{paginate, Cursor, Page, PageLimits};

use crate::workbook::ooxml::NoteDef;
use crate::workbook::reader::{same_name, RowSet, Sheet, Snapshot};

/// Author recorded on notes added without one.
pub const DEFAULT_NOTE_AUTHOR: &str = "excel-mcp";

/// Rows rendered when reading a worksheet or table resource.
pub const DEFAULT_RESOURCE_PREVIEW_ROWS: usize = 20;

const MAX_SHEET_NAME_LEN: usize = 31;

#[derive(Debug)]
struct CachedMetadata {
    modified: SystemTime,
    metadata: Arc<WorkbookMetadata>,
}

/// Read and write access to one workbook file.
#[derive(Debug)]
pub struct WorkbookService {
    path: PathBuf,
    limits: PageLimits,
    resource_preview_rows: usize,
    cache: Mutex<Option<CachedMetadata>>,
    audit: AuditLog,
}

/// A page of CSV text rendered from a worksheet or table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvPreview {
    /// Worksheet name as stored in the workbook.
    pub worksheet: String,
    /// Table name as stored in the workbook.
    pub table: Option<String>,
    /// The rendered CSV (header line first).
    pub csv: String,
}

impl WorkbookService {
    /// Creates a service for the workbook at `path`.
    ///
    /// The file is not opened until the first operation.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let path = std::path::absolute(&path).unwrap_or(path);
        Self {
            path,
            limits: PageLimits::default(),
            resource_preview_rows: DEFAULT_RESOURCE_PREVIEW_ROWS,
            cache: Mutex::new(None),
            audit: AuditLog::new(),
        }
    }

    /// Sets the page size policy for search and preview.
    #[must_use]
    pub const fn with_limits(mut self, limits: PageLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Sets how many rows a worksheet or table resource renders.
    #[must_use]
    pub fn with_resource_preview_rows(mut self, rows: usize) -> Self {
        self.resource_preview_rows = rows.max(1);
        self
    }

    /// Absolute path of the workbook.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Page size policy.
    #[must_use]
    pub const fn limits(&self) -> PageLimits {
        self.limits
    }

    fn modified(&self) -> Result<SystemTime, WorkbookError> {
        match fs::metadata(&self.path) {
            Ok(meta) if meta.is_file() => Ok(meta.modified()?),
            Ok(_) => Err(self.not_found()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(self.not_found()),
            Err(e) => Err(e.into()),
        }
    }

    fn not_found(&self) -> WorkbookError {
        WorkbookError::NotFound {
            path: self.path.clone(),
        }
    }

    fn load(&self) -> Result<Snapshot, WorkbookError> {
        self.modified()?;
        Snapshot::load(&self.path)
    }

    /// Structure of the workbook, served from cache while the file is unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the workbook is missing or cannot be read.
    pub fn metadata(&self) -> Result<Arc<WorkbookMetadata>, WorkbookError> {
        let modified = self.modified()?;

        if let Some(cached) = self
            .cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .filter(|c| c.modified == modified)
        {
            return Ok(Arc::clone(&cached.metadata));
        }

        let snapshot = Snapshot::load(&self.path)?;
        let metadata = Arc::new(WorkbookMetadata {
            workbook_path: self.path.display().to_string(),
            worksheets: snapshot.worksheet_metadata(),
            loaded_at: Utc::now(),
        });

        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedMetadata {
            modified,
            metadata: Arc::clone(&metadata),
        });
        Ok(metadata)
    }

    /// Drops cached metadata so the next read goes to disk.
    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Searches rows for cells containing a query string.
    ///
    /// Rows are scanned across worksheets in workbook order: the data rows
    /// of each table on a worksheet that has tables, otherwise the
    /// worksheet's used rows.
    ///
    /// # Errors
    ///
    /// Returns an error if `query` is missing or the workbook cannot be read.
    pub fn search(&self, args: &SearchArgs) -> Result<SearchResult, WorkbookError> {
        let query = required(args.query.as_deref(), "query")?;
        let worksheet = optional(args.worksheet.as_deref());
        let table = optional(args.table.as_deref());
        let limit = self.limits.resolve(args.limit);
        let cursor = Cursor::decode(args.cursor.as_deref());

        let snapshot = self.load()?;
        let rows = search_universe(&snapshot, worksheet, table);

        let needle = if args.case_sensitive {
            query.to_string()
        } else {
            query.to_lowercase()
        };
        let page = paginate(rows, cursor, limit, |row: &SearchRow| {
            row.values.values().any(|value| {
                !value.is_empty()
                    && if args.case_sensitive {
                        value.contains(&needle)
                    } else {
                        value.to_lowercase().contains(&needle)
                    }
            })
        });

        tracing::debug!(query, matches = page.rows.len(), has_more = page.has_more, "Search complete");
        Ok(SearchResult {
            query: query.to_string(),
            worksheet: worksheet.map(str::to_string),
            table: table.map(str::to_string),
            limit,
            page,
        })
    }

    /// Returns a page of a worksheet's used rows or of a table's data rows.
    ///
    /// # Errors
    ///
    /// Returns an error if `worksheet` is missing, the worksheet or table
    /// does not exist, or the workbook cannot be read.
    pub fn preview(&self, args: &PreviewArgs) -> Result<PreviewResult, WorkbookError> {
        let worksheet = required(args.worksheet.as_deref(), "worksheet")?;
        let limit = self.limits.resolve(args.rows);
        let cursor = Cursor::decode(args.cursor.as_deref());

        let snapshot = self.load()?;
        Self::preview_page(&snapshot, worksheet, optional(args.table.as_deref()), cursor, limit)
    }

    fn preview_page(
        snapshot: &Snapshot,
        worksheet: &str,
        table: Option<&str>,
        cursor: Cursor,
        limit: usize,
    ) -> Result<PreviewResult, WorkbookError> {
        let sheet = snapshot.sheet(worksheet)?;
        let (table_name, RowSet { headers, rows }) = match table {
            Some(name) => {
                let table = sheet.table(name)?;
                (Some(table.name.clone()), sheet.table_rows(table))
            }
            None => (None, sheet.worksheet_rows()),
        };

        let page = paginate(rows, cursor, limit, |_| true);
        Ok(PreviewResult {
            worksheet: sheet.name.clone(),
            table: table_name,
            row_count: page.rows.len(),
            headers,
            page,
        })
    }

    /// Renders the first rows of a worksheet or table as CSV.
    ///
    /// # Errors
    ///
    /// Returns an error if the worksheet or table does not exist or the
    /// workbook cannot be read.
    pub fn csv_preview(&self, worksheet: &str, table: Option<&str>) -> Result<CsvPreview, WorkbookError> {
        let snapshot = self.load()?;
        let preview = Self::preview_page(
            &snapshot,
            worksheet,
            table,
            Cursor::Offset(0),
            self.resource_preview_rows,
        )?;

        Ok(CsvPreview {
            csv: to_csv(&preview.headers, &preview.page.rows)?,
            worksheet: preview.worksheet,
            table: preview.table,
        })
    }

    /// Describes the pivot tables hosted on a worksheet.
    ///
    /// # Errors
    ///
    /// Returns an error if `worksheet` is missing or does not exist, or the
    /// workbook cannot be read.
    pub fn pivot_tables(&self, args: &PivotArgs) -> Result<PivotResult, WorkbookError> {
        let worksheet = required(args.worksheet.as_deref(), "worksheet")?;
        let pivot_filter = optional(args.pivot_table.as_deref());
        let max_rows = usize::try_from(args.max_rows).unwrap_or(0);

        let snapshot = self.load()?;
        let sheet = snapshot.sheet(worksheet)?;

        let pivot_tables = sheet
            .pivots
            .iter()
            .filter(|p| pivot_filter.is_none_or(|name| same_name(&p.name, name)))
            .map(|pivot| PivotTableInfo {
                name: pivot.name.clone(),
                worksheet_name: sheet.name.clone(),
                source_worksheet: pivot.source_sheet.clone(),
                source_range: pivot.source_range.clone(),
                row_fields: pivot.row_fields.clone(),
                column_fields: pivot.column_fields.clone(),
                data_fields: pivot.data_fields.clone(),
                filter_fields: if args.include_filters {
                    pivot.filter_fields.clone()
                } else {
                    Vec::new()
                },
                data: pivot
                    .location
                    .as_ref()
                    .map(|location| sheet.pivot_body(location, max_rows))
                    .unwrap_or_default(),
            })
            .collect();

        Ok(PivotResult { pivot_tables })
    }

    /// Sets one cell's value.
    ///
    /// Values that parse as numbers are stored as numbers, `TRUE`/`FALSE`
    /// as booleans, values starting with `=` as formulas, anything else as
    /// text.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument is missing or invalid, the worksheet
    /// does not exist, or the workbook cannot be read or saved.
    pub fn update_cell(&self, args: &UpdateCellArgs) -> Result<UpdateCellResult, WorkbookError> {
        let worksheet = required(args.worksheet.as_deref(), "worksheet")?;
        let cell_text = required(args.cell.as_deref(), "cell")?;
        let value = args
            .value
            .as_deref()
            .ok_or(WorkbookError::MissingArgument("value"))?;
        let cell = CellRef::parse(cell_text)?;

        let mut snapshot = self.load()?;
        let sheet = snapshot.sheet_mut(worksheet)?;
        let previous = sheet.text(cell.row, cell.col);
        let sheet_name = sheet.name.clone();

        let (data, formula) = typed_value(value);
        sheet.set_cell(cell, data, formula);

        self.save(&snapshot)?;
        let timestamp = Utc::now();

        let previous_value = (!previous.is_empty()).then_some(previous);
        let entry = self.audit.record(
            OperationType::UpdateCell,
            format!("Updated {sheet_name}!{cell}"),
            timestamp,
            args.reason.clone(),
            details([
                ("worksheet", Some(sheet_name.clone())),
                ("cell", Some(cell.to_string())),
                ("previousValue", previous_value.clone()),
                ("newValue", Some(value.to_string())),
            ]),
        );

        Ok(UpdateCellResult {
            worksheet: sheet_name,
            cell: cell.to_string(),
            previous_value,
            new_value: value.to_string(),
            timestamp,
            audit_id: entry.id,
        })
    }

    /// Adds an empty worksheet.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is missing, invalid or already used, or
    /// the workbook cannot be read or saved.
    pub fn add_worksheet(&self, args: &AddWorksheetArgs) -> Result<AddWorksheetResult, WorkbookError> {
        let name = required(args.name.as_deref(), "name")?.trim();
        validate_sheet_name(name)?;

        let mut snapshot = self.load()?;
        if snapshot.sheets.iter().any(|s| same_name(&s.name, name)) {
            return Err(WorkbookError::WorksheetExists {
                name: name.to_string(),
            });
        }

        let count = snapshot.sheets.len();
        let index = args
            .position
            .and_then(|p| usize::try_from(p).ok())
            .filter(|p| (1..=count + 1).contains(p))
            .map_or(count, |p| p - 1);

        snapshot.sheets.insert(
            index,
            Sheet {
                name: name.to_string(),
                ..Sheet::default()
            },
        );

        self.save(&snapshot)?;
        let timestamp = Utc::now();
        let position = index + 1;

        let entry = self.audit.record(
            OperationType::AddWorksheet,
            format!("Added worksheet '{name}'"),
            timestamp,
            args.reason.clone(),
            details([
                ("name", Some(name.to_string())),
                ("position", Some(position.to_string())),
            ]),
        );

        Ok(AddWorksheetResult {
            name: name.to_string(),
            position,
            timestamp,
            audit_id: entry.id,
        })
    }

    /// Attaches a note to a cell, replacing any note already there.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument is missing or invalid, the worksheet
    /// does not exist, or the workbook cannot be read or saved.
    pub fn add_annotation(&self, args: &AddAnnotationArgs) -> Result<AddAnnotationResult, WorkbookError> {
        let worksheet = required(args.worksheet.as_deref(), "worksheet")?;
        let cell = CellRef::parse(required(args.cell.as_deref(), "cell")?)?;
        let text = required(args.text.as_deref(), "text")?;
        let author = optional(args.author.as_deref()).unwrap_or(DEFAULT_NOTE_AUTHOR);

        let mut snapshot = self.load()?;
        let sheet = snapshot.sheet_mut(worksheet)?;
        let sheet_name = sheet.name.clone();
        sheet.set_note(NoteDef {
            cell,
            author: author.to_string(),
            text: text.to_string(),
        });

        self.save(&snapshot)?;
        let timestamp = Utc::now();

        let entry = self.audit.record(
            OperationType::AddAnnotation,
            format!("Added note to {sheet_name}!{cell}"),
            timestamp,
            None,
            details([
                ("worksheet", Some(sheet_name.clone())),
                ("cell", Some(cell.to_string())),
                ("author", Some(author.to_string())),
                ("text", Some(text.to_string())),
            ]),
        );

        Ok(AddAnnotationResult {
            worksheet: sheet_name,
            cell: cell.to_string(),
            text: text.to_string(),
            author: author.to_string(),
            timestamp,
            audit_id: entry.id,
        })
    }

    /// Queries the audit trail of writes made through this service.
    #[must_use]
    pub fn audit_trail(&self, query: &AuditQuery) -> AuditTrail {
        self.audit.query(query)
    }

    fn save(&self, snapshot: &Snapshot) -> Result<(), WorkbookError> {
        let result = writer::save(snapshot, &self.path);
        self.invalidate();
        result
    }
}

fn required<'a>(value: Option<&'a str>, name: &'static str) -> Result<&'a str, WorkbookError> {
    optional(value).ok_or(WorkbookError::MissingArgument(name))
}

fn optional(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn details<const N: usize>(pairs: [(&str, Option<String>); N]) -> IndexMap<String, Option<String>> {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value))
        .collect()
}

/// Interprets a caller-supplied cell value.
fn typed_value(value: &str) -> (Data, Option<String>) {
    let trimmed = value.trim();

    if let Some(formula) = trimmed.strip_prefix('=').filter(|f| !f.trim().is_empty()) {
        return (Data::Empty, Some(formula.to_string()));
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return (Data::Bool(true), None);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return (Data::Bool(false), None);
    }
    if let Some(number) = trimmed.parse::<f64>().ok().filter(|n| n.is_finite()) {
        if !trimmed.is_empty() && trimmed.bytes().all(|b| b.is_ascii_digit() || b"+-.eE".contains(&b)) {
            return (Data::Float(number), None);
        }
    }

    (Data::String(value.to_string()), None)
}

fn validate_sheet_name(name: &str) -> Result<(), WorkbookError> {
    let invalid = |reason| WorkbookError::InvalidWorksheetName {
        name: name.to_string(),
        reason,
    };

    if name.chars().count() > MAX_SHEET_NAME_LEN {
        return Err(invalid("names are limited to 31 characters"));
    }
    if name.contains(['[', ']', ':', '*', '?', '/', '\\']) {
        return Err(invalid("names cannot contain [ ] : * ? / \\"));
    }
    if name.starts_with('\'') || name.ends_with('\'') {
        return Err(invalid("names cannot start or end with an apostrophe"));
    }
    if name.eq_ignore_ascii_case("history") {
        return Err(invalid("'History' is reserved"));
    }
    Ok(())
}

/// Rows every search scans, in workbook order.
fn search_universe(snapshot: &Snapshot, worksheet: Option<&str>, table: Option<&str>) -> Vec<SearchRow> {
    let mut rows = Vec::new();

    for sheet in &snapshot.sheets {
        if worksheet.is_some_and(|name| !same_name(&sheet.name, name)) {
            continue;
        }

        if sheet.tables.is_empty() {
            if table.is_none() {
                let RowSet { headers, rows: sheet_rows } = sheet.worksheet_rows();
                rows.extend(sheet_rows.into_iter().map(|row| SearchRow {
                    worksheet: sheet.name.clone(),
                    table: None,
                    row_number: row.row_number,
                    values: headers.iter().cloned().zip(row.values).collect(),
                }));
            }
            continue;
        }

        for def in &sheet.tables {
            if table.is_some_and(|name| !same_name(&def.name, name)) {
                continue;
            }
            let RowSet { headers, rows: table_rows } = sheet.table_rows(def);
            rows.extend(table_rows.into_iter().map(|row| SearchRow {
                worksheet: sheet.name.clone(),
                table: Some(def.name.clone()),
                row_number: row.row_number,
                values: headers.iter().cloned().zip(row.values).collect(),
            }));
        }
    }

    rows
}

/// Renders headers and rows as CSV; empty when there is nothing to render.
///
/// # Errors
///
/// Returns an error if the CSV writer fails.
pub fn to_csv(headers: &[String], rows: &[PreviewRow]) -> Result<String, WorkbookError> {
    if headers.is_empty() && rows.is_empty() {
        return Ok(String::new());
    }

    let mut writer = csv::WriterBuilder::new()
        .flexible(true)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    if !headers.is_empty() {
        writer.write_record(headers).map_err(io::Error::from)?;
    }
    for row in rows {
        writer.write_record(&row.values).map_err(io::Error::from)?;
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e).into())
}
