//! A1-style cell references.

use std::fmt;
use std::str::FromStr;

use crate::workbook::error::WorkbookError;

/// Largest zero-based row index Excel accepts.
pub const MAX_ROW: u32 = 1_048_575;
/// Largest zero-based column index Excel accepts (`XFD`).
pub const MAX_COL: u32 = 16_383;

/// A zero-based cell position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellRef {
    /// Zero-based row index.
    pub row: u32,
    /// Zero-based column index.
    pub col: u32,
}

impl CellRef {
    /// Creates a reference from zero-based indices.
    #[must_use]
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Parses an A1 reference, accepting `$` anchors and lowercase letters.
    ///
    /// # Errors
    ///
    /// Returns `WorkbookError::InvalidCell` if `text` is not a cell
    /// reference inside the Excel grid.
    pub fn parse(text: &str) -> Result<Self, WorkbookError> {
        parse_a1(text.trim()).ok_or_else(|| WorkbookError::InvalidCell {
            cell: text.to_string(),
        })
    }
}

fn parse_a1(text: &str) -> Option<CellRef> {
    let text = text.strip_prefix('$').unwrap_or(text);
    let split = text.find(|c: char| !c.is_ascii_alphabetic())?;
    let (letters, rest) = text.split_at(split);
    let digits = rest.strip_prefix('$').unwrap_or(rest);

    if letters.is_empty() || letters.len() > 3 || digits.is_empty() {
        return None;
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) || digits.starts_with('0') {
        return None;
    }

    let col = letters
        .bytes()
        .map(|b| u32::from(b.to_ascii_uppercase() - b'A') + 1)
        .fold(0, |acc, n| acc * 26 + n)
        - 1;
    let row = digits.parse::<u32>().ok()?.checked_sub(1)?;

    (row <= MAX_ROW && col <= MAX_COL).then_some(CellRef { row, col })
}

/// Column letters for a zero-based column index.
#[must_use]
pub fn column_name(col: u32) -> String {
    let mut n = col + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(char::from(b'A' + u8::try_from(rem).unwrap_or(0)));
        n = (n - 1) / 26;
    }
    letters.iter().rev().collect()
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", column_name(self.col), self.row + 1)
    }
}

impl FromStr for CellRef {
    type Err = WorkbookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// A rectangular block of cells, inclusive on both corners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    /// Top-left corner.
    pub start: CellRef,
    /// Bottom-right corner.
    pub end: CellRef,
}

impl CellRange {
    /// Parses `A1:C10` (or a single cell `A1`).
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (first, last) = text.split_once(':').unwrap_or((text, text));
        let a = parse_a1(first.trim())?;
        let b = parse_a1(last.trim())?;
        Some(Self {
            start: CellRef::new(a.row.min(b.row), a.col.min(b.col)),
            end: CellRef::new(a.row.max(b.row), a.col.max(b.col)),
        })
    }

    /// Number of columns covered.
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.end.col - self.start.col + 1
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_references() {
        assert_eq!(CellRef::parse("A1").unwrap(), CellRef::new(0, 0));
        assert_eq!(CellRef::parse("b12").unwrap(), CellRef::new(11, 1));
        assert_eq!(CellRef::parse("$C$3").unwrap(), CellRef::new(2, 2));
        assert_eq!(CellRef::parse("AA10").unwrap(), CellRef::new(9, 26));
        assert_eq!(CellRef::parse("XFD1048576").unwrap(), CellRef::new(MAX_ROW, MAX_COL));
    }

    #[test]
    fn reject_invalid_references() {
        for bad in ["", "A", "1", "A0", "A01", "1A", "A1B", "XFE1", "A1048577", "ABCD1", "A-1"] {
            assert!(CellRef::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn display_round_trip() {
        for text in ["A1", "Z9", "AA1", "AZ100", "ZZ5", "AAA7", "XFD1048576"] {
            assert_eq!(CellRef::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn parse_ranges() {
        let range = CellRange::parse("B2:D10").unwrap();
        assert_eq!(range.start, CellRef::new(1, 1));
        assert_eq!(range.end, CellRef::new(9, 3));
        assert_eq!(range.width(), 3);
        assert_eq!(range.to_string(), "B2:D10");

        let single = CellRange::parse("C3").unwrap();
        assert_eq!(single.start, single.end);
        assert!(CellRange::parse("nope").is_none());
    }
}
