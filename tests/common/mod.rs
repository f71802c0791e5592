//! Workbook fixtures shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use rust_xlsxwriter::{Table, TableColumn, Workbook};

/// Rows of the `Orders` table on the `Sales` worksheet.
pub const ORDERS: [(&str, &str, f64); 5] = [
    ("North", "Bolt", 120.0),
    ("South", "Nut", 80.5),
    ("East", "Bolt", 45.0),
    ("West", "Washer", 300.0),
    ("North", "Screw", 15.0),
];

/// Writes `sales.xlsx` into `dir` and returns its path.
///
/// - `Sales`: table `Orders` (Region, Product, Amount) over `A1:C6`
/// - `Notes`: plain rows under a `Name`/`Comment` header, every comment
///   containing "match"
/// - `Q1 Results`: a header and one row, no table
pub fn sales_workbook(dir: &Path) -> PathBuf {
    let path = dir.join("sales.xlsx");
    let mut workbook = Workbook::new();

    let sales = workbook.add_worksheet();
    sales.set_name("Sales").unwrap();
    for (index, (region, product, amount)) in ORDERS.iter().enumerate() {
        let row = u32::try_from(index).unwrap() + 1;
        sales.write_string(row, 0, *region).unwrap();
        sales.write_string(row, 1, *product).unwrap();
        sales.write_number(row, 2, *amount).unwrap();
    }
    let columns = [
        TableColumn::new().set_header("Region"),
        TableColumn::new().set_header("Product"),
        TableColumn::new().set_header("Amount"),
    ];
    let table = Table::new().set_name("Orders").set_columns(&columns);
    sales.add_table(0, 0, 5, 2, &table).unwrap();

    let notes = workbook.add_worksheet();
    notes.set_name("Notes").unwrap();
    notes.write_string(0, 0, "Name").unwrap();
    notes.write_string(0, 1, "Comment").unwrap();
    for index in 1..=5u32 {
        notes.write_string(index, 0, format!("Item {index}")).unwrap();
        notes.write_string(index, 1, format!("match {index}")).unwrap();
    }

    let results = workbook.add_worksheet();
    results.set_name("Q1 Results").unwrap();
    results.write_string(0, 0, "Quarter").unwrap();
    results.write_string(0, 1, "Total").unwrap();
    results.write_string(1, 0, "Q1").unwrap();
    results.write_number(1, 1, 560.5).unwrap();

    workbook.save(&path).unwrap();
    path
}
