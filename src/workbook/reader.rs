//! Workbook snapshots.
//!
//! A [`Snapshot`] is the whole workbook read into memory: every worksheet's
//! non-empty cells (value plus formula text), tables, notes and pivot table
//! definitions. Read operations derive row sets from it; write operations
//! edit it and hand it to the writer.

use std::collections::BTreeMap;
use std::path::Path;

use calamine::{open_workbook, Data, Reader, Xlsx};
use chrono::Timelike;
use indexmap::IndexMap;

use crate::workbook::address::{CellRange, CellRef};
use crate::workbook::error::WorkbookError;
use crate::workbook::model::{PreviewRow, TableMetadata, WorksheetMetadata};
use crate::workbook::ooxml::{self, NoteDef, PivotDef, TableDef};

/// One stored cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    /// Value (the cached result for formula cells).
    pub value: Data,
    /// Formula text without the leading `=`.
    pub formula: Option<String>,
}

impl Cell {
    /// A plain value cell.
    #[must_use]
    pub const fn value(value: Data) -> Self {
        Self {
            value,
            formula: None,
        }
    }

    /// The cell's value formatted as text.
    #[must_use]
    pub fn text(&self) -> String {
        format_cell(&self.value)
    }
}

/// One worksheet.
#[derive(Debug, Clone, Default)]
pub struct Sheet {
    /// Worksheet name.
    pub name: String,
    /// Non-empty cells keyed by zero-based `(row, column)`.
    pub cells: BTreeMap<(u32, u32), Cell>,
    /// Tables on the worksheet.
    pub tables: Vec<TableDef>,
    /// Cell notes.
    pub notes: Vec<NoteDef>,
    /// Pivot tables hosted on the worksheet.
    pub pivots: Vec<PivotDef>,
}

/// Headers and rows of a table or of a worksheet's used range.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowSet {
    /// Column headers.
    pub headers: Vec<String>,
    /// Rows in sheet order.
    pub rows: Vec<PreviewRow>,
}

/// The whole workbook.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Worksheets in workbook order.
    pub sheets: Vec<Sheet>,
}

impl Snapshot {
    /// Reads a workbook from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or parsed.
    #[allow(clippy::cast_possible_truncation)] // calamine positions are u32 internally
    pub fn load(path: &Path) -> Result<Self, WorkbookError> {
        let open_error = |source| WorkbookError::Open {
            path: path.to_path_buf(),
            source,
        };

        let mut workbook: Xlsx<_> = open_workbook(path).map_err(open_error)?;
        let mut package = ooxml::read_package(path)?;

        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let values = workbook.worksheet_range(&name).map_err(open_error)?;
            let formulas = workbook.worksheet_formula(&name).map_err(open_error)?;

            let mut cells = BTreeMap::new();
            let (row0, col0) = values.start().unwrap_or_default();
            for (row, col, value) in values.used_cells() {
                if !is_blank(value) {
                    let key = (row0 + row as u32, col0 + col as u32);
                    cells.insert(key, Cell::value(value.clone()));
                }
            }

            let (row0, col0) = formulas.start().unwrap_or_default();
            for (row, col, formula) in formulas.used_cells() {
                if formula.is_empty() {
                    continue;
                }
                let key = (row0 + row as u32, col0 + col as u32);
                cells
                    .entry(key)
                    .or_insert_with(|| Cell::value(Data::Empty))
                    .formula = Some(formula.clone());
            }

            let parts = package.take(&name);
            sheets.push(Sheet {
                name,
                cells,
                tables: parts.tables,
                notes: parts.notes,
                pivots: parts.pivots,
            });
        }

        tracing::debug!(path = %path.display(), sheets = sheets.len(), "Loaded workbook");
        Ok(Self { sheets })
    }

    /// Finds a worksheet by name (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns `WorkbookError::WorksheetNotFound` if there is no such worksheet.
    pub fn sheet(&self, name: &str) -> Result<&Sheet, WorkbookError> {
        self.sheet_index(name).map(|index| &self.sheets[index])
    }

    /// Finds a worksheet by name (case-insensitive) for editing.
    ///
    /// # Errors
    ///
    /// Returns `WorkbookError::WorksheetNotFound` if there is no such worksheet.
    pub fn sheet_mut(&mut self, name: &str) -> Result<&mut Sheet, WorkbookError> {
        self.sheet_index(name).map(|index| &mut self.sheets[index])
    }

    fn sheet_index(&self, name: &str) -> Result<usize, WorkbookError> {
        self.sheets
            .iter()
            .position(|s| same_name(&s.name, name))
            .ok_or_else(|| WorkbookError::WorksheetNotFound {
                name: name.to_string(),
            })
    }

    /// Whether any worksheet hosts a pivot table.
    #[must_use]
    pub fn has_pivot_tables(&self) -> bool {
        self.sheets.iter().any(|s| !s.pivots.is_empty())
    }

    /// Structure of every worksheet.
    #[must_use]
    pub fn worksheet_metadata(&self) -> Vec<WorksheetMetadata> {
        self.sheets
            .iter()
            .map(|sheet| WorksheetMetadata {
                name: sheet.name.clone(),
                tables: sheet
                    .tables
                    .iter()
                    .map(|table| TableMetadata {
                        name: table.name.clone(),
                        worksheet_name: sheet.name.clone(),
                        columns: table_headers(table),
                        row_count: table.data_row_count(),
                    })
                    .collect(),
                column_headers: sheet.worksheet_rows().headers,
            })
            .collect()
    }
}

impl Sheet {
    /// Finds a table by name (case-insensitive).
    ///
    /// # Errors
    ///
    /// Returns `WorkbookError::TableNotFound` if there is no such table.
    pub fn table(&self, name: &str) -> Result<&TableDef, WorkbookError> {
        self.tables
            .iter()
            .find(|t| same_name(&t.name, name))
            .ok_or_else(|| WorkbookError::TableNotFound {
                table: name.to_string(),
                worksheet: self.name.clone(),
            })
    }

    /// Formatted text of a cell (empty when the cell is empty).
    #[must_use]
    pub fn text(&self, row: u32, col: u32) -> String {
        self.cells.get(&(row, col)).map(Cell::text).unwrap_or_default()
    }

    /// Extent of the non-empty cells.
    #[must_use]
    pub fn used_range(&self) -> Option<CellRange> {
        let mut occupied = self
            .cells
            .iter()
            .filter(|(_, cell)| !cell.text().is_empty())
            .map(|(&(row, col), _)| (row, col));

        let (first_row, first_col) = occupied.next()?;
        let (mut min_col, mut max_col, mut max_row) = (first_col, first_col, first_row);
        for (row, col) in occupied {
            min_col = min_col.min(col);
            max_col = max_col.max(col);
            max_row = max_row.max(row);
        }

        Some(CellRange {
            start: CellRef::new(first_row, min_col),
            end: CellRef::new(max_row, max_col),
        })
    }

    /// The worksheet's used range as rows under its header row.
    ///
    /// The header row is the first non-empty row; blank header cells become
    /// `Column{n}`. Rows without any non-empty cell are skipped.
    #[must_use]
    pub fn worksheet_rows(&self) -> RowSet {
        let Some(range) = self.used_range() else {
            return RowSet::default();
        };

        let columns = range.start.col..=range.end.col;
        let headers = columns
            .clone()
            .enumerate()
            .map(|(index, col)| {
                let header = self.text(range.start.row, col);
                if header.trim().is_empty() {
                    format!("Column{}", index + 1)
                } else {
                    header
                }
            })
            .collect();

        let rows = (range.start.row + 1..=range.end.row)
            .filter_map(|row| {
                let values: Vec<String> = columns.clone().map(|col| self.text(row, col)).collect();
                values.iter().any(|v| !v.is_empty()).then_some(PreviewRow {
                    row_number: row + 1,
                    values,
                })
            })
            .collect();

        RowSet { headers, rows }
    }

    /// Every data row of a table, empty rows included.
    #[must_use]
    pub fn table_rows(&self, table: &TableDef) -> RowSet {
        let columns = table.range.start.col..=table.range.end.col;
        let rows = table
            .last_data_row()
            .map(|last| {
                (table.first_data_row()..=last)
                    .map(|row| PreviewRow {
                        row_number: row + 1,
                        values: columns.clone().map(|col| self.text(row, col)).collect(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        RowSet {
            headers: table_headers(table),
            rows,
        }
    }

    /// The rendered body of a pivot table: its top row as headers and up to
    /// `max_rows` non-empty rows below it.
    #[must_use]
    pub fn pivot_body(&self, location: &CellRange, max_rows: usize) -> Vec<IndexMap<String, String>> {
        let columns = location.start.col..=location.end.col;
        let mut headers: Vec<String> = Vec::new();
        for (index, col) in columns.clone().enumerate() {
            let text = self.text(location.start.row, col);
            let header = if text.trim().is_empty() || headers.contains(&text) {
                format!("Column{}", index + 1)
            } else {
                text
            };
            headers.push(header);
        }

        (location.start.row + 1..=location.end.row)
            .map(|row| {
                headers
                    .iter()
                    .cloned()
                    .zip(columns.clone().map(|col| self.text(row, col)))
                    .collect::<IndexMap<_, _>>()
            })
            .filter(|values| values.values().any(|v| !v.is_empty()))
            .take(max_rows)
            .collect()
    }

    /// Stores a cell, or clears it when `value` is empty and there is no formula.
    pub fn set_cell(&mut self, cell: CellRef, value: Data, formula: Option<String>) {
        let key = (cell.row, cell.col);
        if formula.is_none() && is_blank(&value) {
            self.cells.remove(&key);
        } else {
            self.cells.insert(key, Cell { value, formula });
        }
    }

    /// Attaches a note to a cell, replacing any note already there.
    pub fn set_note(&mut self, note: NoteDef) {
        match self.notes.iter_mut().find(|n| n.cell == note.cell) {
            Some(existing) => *existing = note,
            None => {
                self.notes.push(note);
                self.notes.sort_by_key(|n| n.cell);
            }
        }
    }
}

/// Table column names, padded with `Column{n}` to the table width.
fn table_headers(table: &TableDef) -> Vec<String> {
    (0..table.range.width() as usize)
        .map(|index| {
            table
                .columns
                .get(index)
                .filter(|name| !name.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| format!("Column{}", index + 1))
        })
        .collect()
}

/// Case-insensitive name comparison used for worksheets and tables.
#[must_use]
pub fn same_name(stored: &str, requested: &str) -> bool {
    let requested = requested.trim();
    stored.eq_ignore_ascii_case(requested) || stored.to_lowercase() == requested.to_lowercase()
}

fn is_blank(value: &Data) -> bool {
    match value {
        Data::Empty => true,
        Data::String(s) => s.is_empty(),
        _ => false,
    }
}

/// Formats a cell value as text.
///
/// Integral numbers have no decimal point, booleans are `TRUE`/`FALSE`,
/// dates are `YYYY-MM-DD` with ` HH:MM:SS` when they carry a time, and
/// errors use their Excel literal.
#[must_use]
pub fn format_cell(value: &Data) -> String {
    match value {
        Data::Empty => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) => format_number(*f),
        Data::Bool(true) => "TRUE".to_string(),
        Data::Bool(false) => "FALSE".to_string(),
        Data::DateTime(dt) => dt.as_datetime().map_or_else(
            || format_number(dt.as_f64()),
            |datetime| {
                if datetime.time().num_seconds_from_midnight() == 0 {
                    datetime.format("%Y-%m-%d").to_string()
                } else {
                    datetime.format("%Y-%m-%d %H:%M:%S").to_string()
                }
            },
        ),
        Data::Error(e) => e.to_string(),
        #[allow(unreachable_patterns)]
        other => other.to_string(),
    }
}

/// Shortest round-trip text of a number, without a trailing `.0`.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    value.to_string()
}
