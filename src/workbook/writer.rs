//! Saves a [`Snapshot`] back to disk.
//!
//! The workbook is rendered afresh from the snapshot: cell values with
//! their types, formulas (with their cached results), tables and notes
//! survive. Cell styles, column widths and other presentation details do
//! not. Pivot tables cannot be reproduced, so a snapshot holding any is
//! refused before anything is written.
//!
//! The file is written next to the target under a temporary name and then
//! renamed over it, so readers never observe a half-written workbook.

use std::fs;
use std::path::{Path, PathBuf};

use calamine::Data;
use rust_xlsxwriter::{Formula, Format, Note, Table, TableColumn, Workbook, Worksheet};
use uuid::Uuid;

use crate::workbook::address::CellRef;
use crate::workbook::error::WorkbookError;
use crate::workbook::ooxml::TableDef;
use crate::workbook::reader::{format_cell, Cell, Sheet, Snapshot};

struct Formats {
    date: Format,
    datetime: Format,
}

/// Writes `snapshot` to `path`, replacing the file.
///
/// # Errors
///
/// Returns `WorkbookError::PivotTablesPresent` if the snapshot holds pivot
/// tables, or an error if rendering or writing fails.
pub fn save(snapshot: &Snapshot, path: &Path) -> Result<(), WorkbookError> {
    if snapshot.has_pivot_tables() {
        return Err(WorkbookError::PivotTablesPresent);
    }

    let formats = Formats {
        date: Format::new().set_num_format("yyyy-mm-dd"),
        datetime: Format::new().set_num_format("yyyy-mm-dd hh:mm:ss"),
    };

    let mut workbook = Workbook::new();
    for sheet in &snapshot.sheets {
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(&sheet.name)?;
        render_sheet(worksheet, sheet, &formats)?;
    }

    let temp = temp_sibling(path);
    if let Err(e) = workbook.save(&temp) {
        // Best effort: the partial file is useless either way.
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&temp, path) {
        let _ = fs::remove_file(&temp);
        return Err(e.into());
    }

    tracing::info!(path = %path.display(), "Saved workbook");
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map_or_else(|| "workbook".into(), |n| n.to_string_lossy());
    path.with_file_name(format!(".{file_name}.{}.tmp", Uuid::new_v4().simple()))
}

fn render_sheet(worksheet: &mut Worksheet, sheet: &Sheet, formats: &Formats) -> Result<(), WorkbookError> {
    for (&(row, col), cell) in &sheet.cells {
        write_cell(worksheet, row, column(row, col)?, cell, formats)?;
    }

    for table in &sheet.tables {
        write_table(worksheet, table)?;
    }

    for note in &sheet.notes {
        let rendered = Note::new(&note.text)
            .set_author(&note.author)
            .add_author_prefix(false);
        worksheet.insert_note(note.cell.row, column(note.cell.row, note.cell.col)?, &rendered)?;
    }

    Ok(())
}

fn column(row: u32, col: u32) -> Result<u16, WorkbookError> {
    u16::try_from(col).map_err(|_| WorkbookError::InvalidCell {
        cell: CellRef::new(row, col).to_string(),
    })
}

#[allow(clippy::cast_precision_loss)] // Excel stores every number as f64
fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    cell: &Cell,
    formats: &Formats,
) -> Result<(), WorkbookError> {
    if let Some(formula) = &cell.formula {
        let cached = format_cell(&cell.value);
        let mut formula = Formula::new(format!("={formula}"));
        if !cached.is_empty() {
            formula = formula.set_result(cached);
        }
        worksheet.write_formula(row, col, formula)?;
        return Ok(());
    }

    match &cell.value {
        Data::Empty => {}
        Data::Int(i) => {
            worksheet.write_number(row, col, *i as f64)?;
        }
        Data::Float(f) => {
            worksheet.write_number(row, col, *f)?;
        }
        Data::Bool(b) => {
            worksheet.write_boolean(row, col, *b)?;
        }
        Data::DateTime(dt) => {
            let serial = dt.as_f64();
            let format = if serial.fract() == 0.0 {
                &formats.date
            } else {
                &formats.datetime
            };
            worksheet.write_number_with_format(row, col, serial, format)?;
        }
        other => {
            worksheet.write_string(row, col, format_cell(other))?;
        }
    }

    Ok(())
}

/// Adds a table over its header and data rows. A totals row, if any, is
/// kept as plain cells below the table.
fn write_table(worksheet: &mut Worksheet, table: &TableDef) -> Result<(), WorkbookError> {
    let start = table.range.start;
    // At least one data row is required under the header.
    let last_row = table
        .last_data_row()
        .unwrap_or_else(|| table.first_data_row());
    let first_col = column(start.row, start.col)?;
    let last_col = column(start.row, table.range.end.col)?;

    let columns: Vec<TableColumn> = (0..table.range.width() as usize)
        .map(|index| {
            let header = table
                .columns
                .get(index)
                .filter(|h| !h.trim().is_empty())
                .cloned()
                .unwrap_or_else(|| format!("Column{}", index + 1));
            TableColumn::new().set_header(header)
        })
        .collect();

    let rendered = Table::new()
        .set_name(&table.name)
        .set_header_row(table.header_rows > 0)
        .set_columns(&columns);

    worksheet.add_table(start.row, first_col, last_row, last_col, &rendered)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::address::CellRange;
    use crate::workbook::ooxml::{NoteDef, PivotDef};

    fn sample_snapshot() -> Snapshot {
        let mut sheet = Sheet {
            name: "Data".to_string(),
            ..Sheet::default()
        };
        sheet.set_cell(CellRef::new(0, 0), Data::String("Item".to_string()), None);
        sheet.set_cell(CellRef::new(0, 1), Data::String("Qty".to_string()), None);
        sheet.set_cell(CellRef::new(1, 0), Data::String("Bolt".to_string()), None);
        sheet.set_cell(CellRef::new(1, 1), Data::Float(4.0), None);
        sheet.set_cell(CellRef::new(2, 1), Data::Float(4.0), Some("SUM(B2)".to_string()));
        sheet.tables.push(TableDef {
            name: "Parts".to_string(),
            range: CellRange::parse("A1:B2").unwrap(),
            header_rows: 1,
            totals_rows: 0,
            columns: vec!["Item".to_string(), "Qty".to_string()],
        });
        sheet.set_note(NoteDef {
            cell: CellRef::new(1, 0),
            author: "tester".to_string(),
            text: "check stock".to_string(),
        });
        Snapshot {
            sheets: vec![sheet],
        }
    }

    #[test]
    fn saved_workbook_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");

        save(&sample_snapshot(), &path).unwrap();
        let reloaded = Snapshot::load(&path).unwrap();

        let sheet = reloaded.sheet("data").unwrap();
        assert_eq!(sheet.text(1, 0), "Bolt");
        assert_eq!(sheet.text(1, 1), "4");
        assert_eq!(sheet.cells[&(2, 1)].formula.as_deref(), Some("SUM(B2)"));
        assert_eq!(sheet.tables.len(), 1);
        assert_eq!(sheet.tables[0].name, "Parts");
        assert_eq!(sheet.notes.len(), 1);
        assert_eq!(sheet.notes[0].text, "check stock");
        assert_eq!(sheet.notes[0].author, "tester");

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn refuses_pivot_tables() {
        let mut snapshot = sample_snapshot();
        snapshot.sheets[0].pivots.push(PivotDef {
            name: "P".to_string(),
            location: None,
            source_sheet: String::new(),
            source_range: String::new(),
            row_fields: Vec::new(),
            column_fields: Vec::new(),
            data_fields: Vec::new(),
            filter_fields: Vec::new(),
        });

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        let err = save(&snapshot, &path).unwrap_err();
        assert!(matches!(err, WorkbookError::PivotTablesPresent));
        assert!(!path.exists());
    }
}
