//! Integration tests for the workbook service.
//!
//! Every test writes a fresh fixture workbook into a temporary directory,
//! so write operations never leak between tests.

mod common;

use std::sync::Arc;

use excel_mcp::workbook::reader::Snapshot;
use excel_mcp::workbook::{
    AddAnnotationArgs, AddWorksheetArgs, AuditQuery, OperationType, PageLimits, PivotArgs,
    PreviewArgs, SearchArgs, UpdateCellArgs, WorkbookError, WorkbookService,
};

fn service() -> (tempfile::TempDir, WorkbookService) {
    let dir = tempfile::tempdir().unwrap();
    let path = common::sales_workbook(dir.path());
    (dir, WorkbookService::new(path))
}

fn search(query: &str) -> SearchArgs {
    SearchArgs {
        query: Some(query.to_string()),
        ..SearchArgs::default()
    }
}

fn preview(worksheet: &str) -> PreviewArgs {
    PreviewArgs {
        worksheet: Some(worksheet.to_string()),
        ..PreviewArgs::default()
    }
}

// =============================================================================
// Structure
// =============================================================================

#[test]
fn metadata_lists_worksheets_tables_and_headers() {
    let (_dir, service) = service();
    let metadata = service.metadata().unwrap();

    let names: Vec<_> = metadata.worksheets.iter().map(|w| w.name.as_str()).collect();
    assert_eq!(names, vec!["Sales", "Notes", "Q1 Results"]);

    let sales = &metadata.worksheets[0];
    assert_eq!(sales.column_headers, vec!["Region", "Product", "Amount"]);
    assert_eq!(sales.tables.len(), 1);
    assert_eq!(sales.tables[0].name, "Orders");
    assert_eq!(sales.tables[0].worksheet_name, "Sales");
    assert_eq!(sales.tables[0].columns, vec!["Region", "Product", "Amount"]);
    assert_eq!(sales.tables[0].row_count, 5);

    assert!(metadata.worksheets[1].tables.is_empty());
    assert_eq!(metadata.worksheets[1].column_headers, vec!["Name", "Comment"]);
    assert!(metadata.workbook_path.ends_with("sales.xlsx"));
}

#[test]
fn metadata_is_cached_until_a_write() {
    let (_dir, service) = service();

    let first = service.metadata().unwrap();
    let second = service.metadata().unwrap();
    assert!(Arc::ptr_eq(&first, &second));

    service
        .add_worksheet(&AddWorksheetArgs {
            name: Some("Archive".to_string()),
            ..AddWorksheetArgs::default()
        })
        .unwrap();

    let third = service.metadata().unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
    assert_eq!(third.worksheets.len(), 4);
}

// =============================================================================
// Preview
// =============================================================================

#[test]
fn preview_table_rows() {
    let (_dir, service) = service();
    let result = service
        .preview(&PreviewArgs {
            table: Some("orders".to_string()),
            ..preview("sales")
        })
        .unwrap();

    assert_eq!(result.worksheet, "Sales");
    assert_eq!(result.table.as_deref(), Some("Orders"));
    assert_eq!(result.headers, vec!["Region", "Product", "Amount"]);
    assert_eq!(result.row_count, 5);
    assert!(!result.page.has_more);
    assert_eq!(result.page.rows[0].row_number, 2);
    assert_eq!(result.page.rows[0].values, vec!["North", "Bolt", "120"]);
    assert_eq!(result.page.rows[1].values, vec!["South", "Nut", "80.5"]);
}

#[test]
fn preview_pages_through_worksheet() {
    let (_dir, service) = service();
    let page = |cursor: Option<&str>| {
        service
            .preview(&PreviewArgs {
                rows: Some(2),
                cursor: cursor.map(str::to_string),
                ..preview("Notes")
            })
            .unwrap()
    };

    let first = page(None);
    assert_eq!(first.page.offset, 0);
    assert_eq!(first.page.rows.len(), 2);
    assert!(first.page.has_more);
    assert_eq!(first.page.next_cursor.as_deref(), Some("2"));

    let second = page(Some("2"));
    assert_eq!(second.page.offset, 2);
    assert_eq!(second.page.rows.len(), 2);
    assert_eq!(second.page.next_cursor.as_deref(), Some("4"));

    let third = page(Some("4"));
    assert_eq!(third.page.offset, 4);
    assert_eq!(third.page.rows.len(), 1);
    assert!(!third.page.has_more);
    assert!(third.page.next_cursor.is_none());

    let past_end = page(Some("50"));
    assert!(past_end.page.rows.is_empty());
    assert!(!past_end.page.has_more);

    let invalid = page(Some("abc"));
    assert!(invalid.page.rows.is_empty());
    assert!(invalid.page.next_cursor.is_none());
}

#[test]
fn preview_errors_name_what_is_missing() {
    let (_dir, service) = service();

    let err = service.preview(&preview("Nope")).unwrap_err();
    assert_eq!(err.to_string(), "Worksheet 'Nope' not found.");

    let err = service
        .preview(&PreviewArgs {
            table: Some("Missing".to_string()),
            ..preview("Sales")
        })
        .unwrap_err();
    assert_eq!(err.to_string(), "Table 'Missing' not found in worksheet 'Sales'.");
}

#[test]
fn page_size_is_clamped() {
    let dir = tempfile::tempdir().unwrap();
    let path = common::sales_workbook(dir.path());
    let service = WorkbookService::new(path).with_limits(PageLimits {
        default_size: 1,
        max_size: 3,
    });

    let result = service.preview(&preview("Notes")).unwrap();
    assert_eq!(result.page.rows.len(), 1);

    let result = service
        .preview(&PreviewArgs {
            rows: Some(1000),
            ..preview("Notes")
        })
        .unwrap();
    assert_eq!(result.page.rows.len(), 3);

    let result = service
        .preview(&PreviewArgs {
            rows: Some(-4),
            ..preview("Notes")
        })
        .unwrap();
    assert_eq!(result.page.rows.len(), 1);
}

#[test]
fn csv_preview_renders_header_and_rows() {
    let (_dir, service) = service();
    let csv = service.csv_preview("Sales", Some("Orders")).unwrap();
    let lines: Vec<_> = csv.csv.lines().collect();
    assert_eq!(lines[0], "Region,Product,Amount");
    assert_eq!(lines[1], "North,Bolt,120");
    assert_eq!(lines.len(), 6);

    let csv = service.csv_preview("q1 results", None).unwrap();
    assert_eq!(csv.worksheet, "Q1 Results");
    assert_eq!(csv.csv, "Quarter,Total\r\nQ1,560.5\r\n");
}

// =============================================================================
// Search
// =============================================================================

#[test]
fn search_is_case_insensitive_by_default() {
    let (_dir, service) = service();

    let result = service.search(&search("bolt")).unwrap();
    let rows: Vec<_> = result.page.rows.iter().map(|r| r.row_number).collect();
    assert_eq!(rows, vec![2, 4]);
    assert_eq!(result.page.rows[0].table.as_deref(), Some("Orders"));
    assert_eq!(result.page.rows[0].values["Product"], "Bolt");

    let result = service
        .search(&SearchArgs {
            case_sensitive: true,
            ..search("bolt")
        })
        .unwrap();
    assert!(result.page.rows.is_empty());
}

#[test]
fn search_pages_over_examined_rows() {
    let (_dir, service) = service();
    let page = |cursor: Option<&str>| {
        service
            .search(&SearchArgs {
                worksheet: Some("Notes".to_string()),
                limit: Some(2),
                cursor: cursor.map(str::to_string),
                ..search("match")
            })
            .unwrap()
    };

    let first = page(None);
    assert_eq!(first.page.rows.len(), 2);
    assert_eq!(first.page.next_cursor.as_deref(), Some("2"));

    let second = page(Some("2"));
    assert_eq!(second.page.rows.len(), 2);
    assert_eq!(second.page.next_cursor.as_deref(), Some("4"));

    let third = page(Some("4"));
    assert_eq!(third.page.rows.len(), 1);
    assert!(!third.page.has_more);
}

#[test]
fn search_table_filter_excludes_plain_worksheets() {
    let (_dir, service) = service();
    let result = service
        .search(&SearchArgs {
            table: Some("Orders".to_string()),
            ..search("o")
        })
        .unwrap();
    assert!(result
        .page
        .rows
        .iter()
        .all(|r| r.table.as_deref() == Some("Orders")));
    assert!(!result.page.rows.is_empty());
}

#[test]
fn search_requires_query() {
    let (_dir, service) = service();
    let err = service.search(&search("  ")).unwrap_err();
    assert!(matches!(err, WorkbookError::MissingArgument("query")));
}

// =============================================================================
// Pivot tables
// =============================================================================

#[test]
fn worksheet_without_pivots_has_none() {
    let (_dir, service) = service();
    let result = service
        .pivot_tables(&PivotArgs {
            worksheet: Some("Sales".to_string()),
            ..PivotArgs::default()
        })
        .unwrap();
    assert!(result.pivot_tables.is_empty());
}

// =============================================================================
// Writes
// =============================================================================

#[test]
fn update_cell_keeps_table_and_records_audit() {
    let (_dir, service) = service();
    let result = service
        .update_cell(&UpdateCellArgs {
            worksheet: Some("sales".to_string()),
            cell: Some("$C$2".to_string()),
            value: Some("999".to_string()),
            reason: Some("Corrected order".to_string()),
        })
        .unwrap();

    assert_eq!(result.worksheet, "Sales");
    assert_eq!(result.cell, "C2");
    assert_eq!(result.previous_value.as_deref(), Some("120"));
    assert_eq!(result.new_value, "999");

    let preview = service
        .preview(&PreviewArgs {
            table: Some("Orders".to_string()),
            ..preview("Sales")
        })
        .unwrap();
    assert_eq!(preview.page.rows[0].values, vec!["North", "Bolt", "999"]);

    let trail = service.audit_trail(&AuditQuery::default());
    assert_eq!(trail.total_count, 1);
    let entry = &trail.entries[0];
    assert_eq!(entry.id, result.audit_id);
    assert_eq!(entry.operation_type, OperationType::UpdateCell);
    assert_eq!(entry.reason.as_deref(), Some("Corrected order"));
    assert_eq!(entry.details["previousValue"].as_deref(), Some("120"));
}

#[test]
fn update_cell_stores_typed_values() {
    let (dir, service) = service();
    let update = |cell: &str, value: &str| {
        service
            .update_cell(&UpdateCellArgs {
                worksheet: Some("Q1 Results".to_string()),
                cell: Some(cell.to_string()),
                value: Some(value.to_string()),
                reason: None,
            })
            .unwrap()
    };

    let first = update("C1", "Checked");
    assert!(first.previous_value.is_none());
    update("C2", "true");
    update("B3", "=SUM(B2)");

    let snapshot = Snapshot::load(&dir.path().join("sales.xlsx")).unwrap();
    let sheet = snapshot.sheet("Q1 Results").unwrap();
    assert_eq!(sheet.text(0, 2), "Checked");
    assert_eq!(sheet.text(1, 2), "TRUE");
    assert_eq!(sheet.cells[&(2, 1)].formula.as_deref(), Some("SUM(B2)"));
}

#[test]
fn update_cell_rejects_bad_reference() {
    let (_dir, service) = service();
    let err = service
        .update_cell(&UpdateCellArgs {
            worksheet: Some("Sales".to_string()),
            cell: Some("ZZZZ1".to_string()),
            value: Some("1".to_string()),
            reason: None,
        })
        .unwrap_err();
    assert!(matches!(err, WorkbookError::InvalidCell { .. }));
    assert!(service.audit_trail(&AuditQuery::default()).entries.is_empty());
}

#[test]
fn add_worksheet_at_position() {
    let (_dir, service) = service();
    let result = service
        .add_worksheet(&AddWorksheetArgs {
            name: Some("Summary".to_string()),
            position: Some(1),
            reason: None,
        })
        .unwrap();
    assert_eq!(result.position, 1);

    let metadata = service.metadata().unwrap();
    assert_eq!(metadata.worksheets[0].name, "Summary");
    assert_eq!(metadata.worksheets[1].tables[0].name, "Orders");

    let appended = service
        .add_worksheet(&AddWorksheetArgs {
            name: Some("Later".to_string()),
            position: Some(99),
            reason: None,
        })
        .unwrap();
    assert_eq!(appended.position, 5);
}

#[test]
fn add_worksheet_rejects_duplicates_and_bad_names() {
    let (_dir, service) = service();

    let err = service
        .add_worksheet(&AddWorksheetArgs {
            name: Some("NOTES".to_string()),
            ..AddWorksheetArgs::default()
        })
        .unwrap_err();
    assert_eq!(err.to_string(), "Worksheet 'NOTES' already exists.");

    let err = service
        .add_worksheet(&AddWorksheetArgs {
            name: Some("a:b".to_string()),
            ..AddWorksheetArgs::default()
        })
        .unwrap_err();
    assert!(matches!(err, WorkbookError::InvalidWorksheetName { .. }));
}

#[test]
fn add_annotation_is_saved_as_note() {
    let (dir, service) = service();
    let result = service
        .add_annotation(&AddAnnotationArgs {
            worksheet: Some("Sales".to_string()),
            cell: Some("b3".to_string()),
            text: Some("Confirm with supplier".to_string()),
            author: None,
        })
        .unwrap();
    assert_eq!(result.cell, "B3");
    assert_eq!(result.author, "excel-mcp");

    let snapshot = Snapshot::load(&dir.path().join("sales.xlsx")).unwrap();
    let sheet = snapshot.sheet("Sales").unwrap();
    assert_eq!(sheet.notes.len(), 1);
    assert_eq!(sheet.notes[0].text, "Confirm with supplier");
    assert_eq!(sheet.notes[0].author, "excel-mcp");
    assert_eq!(sheet.tables.len(), 1);
}

// =============================================================================
// Audit trail
// =============================================================================

#[test]
fn audit_trail_filters_newest_first() {
    let (_dir, service) = service();

    for name in ["One", "Two"] {
        service
            .add_worksheet(&AddWorksheetArgs {
                name: Some(name.to_string()),
                ..AddWorksheetArgs::default()
            })
            .unwrap();
    }
    service
        .add_annotation(&AddAnnotationArgs {
            worksheet: Some("One".to_string()),
            cell: Some("A1".to_string()),
            text: Some("note".to_string()),
            author: Some("tester".to_string()),
        })
        .unwrap();

    let all = service.audit_trail(&AuditQuery::default());
    assert_eq!(all.total_count, 3);
    assert_eq!(all.entries[0].operation_type, OperationType::AddAnnotation);

    let worksheets = service.audit_trail(&AuditQuery {
        operation_type: Some("ADDWORKSHEET".to_string()),
        limit: Some(1),
        ..AuditQuery::default()
    });
    assert_eq!(worksheets.total_count, 2);
    assert_eq!(worksheets.entries.len(), 1);
    assert_eq!(worksheets.entries[0].details["name"].as_deref(), Some("Two"));

    let unknown = service.audit_trail(&AuditQuery {
        operation_type: Some("deleteEverything".to_string()),
        ..AuditQuery::default()
    });
    assert_eq!(unknown.total_count, 0);
}
