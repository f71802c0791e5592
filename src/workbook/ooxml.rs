//! Package parts the cell reader does not expose.
//!
//! Tables, cell notes and pivot table definitions are read straight from the
//! workbook's zip package. Parts are located by following relationships
//! from `xl/workbook.xml` to each worksheet and from each worksheet to its
//! table, comment and pivot table parts.

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::workbook::address::{CellRange, CellRef};
use crate::workbook::error::WorkbookError;
use crate::workbook::model::PivotFieldInfo;

const WORKBOOK_PART: &str = "xl/workbook.xml";

/// Package contents of every worksheet, in workbook order.
#[derive(Debug, Clone, Default)]
pub struct PackageIndex {
    /// One entry per worksheet.
    pub sheets: Vec<SheetParts>,
}

impl PackageIndex {
    /// Removes and returns the parts of the named worksheet.
    pub fn take(&mut self, name: &str) -> SheetParts {
        self.sheets
            .iter()
            .position(|s| s.name == name)
            .map_or_else(
                || SheetParts {
                    name: name.to_string(),
                    ..SheetParts::default()
                },
                |index| self.sheets.remove(index),
            )
    }
}

/// Package contents attached to one worksheet.
#[derive(Debug, Clone, Default)]
pub struct SheetParts {
    /// Worksheet name.
    pub name: String,
    /// Tables on the worksheet.
    pub tables: Vec<TableDef>,
    /// Cell notes on the worksheet.
    pub notes: Vec<NoteDef>,
    /// Pivot tables hosted on the worksheet.
    pub pivots: Vec<PivotDef>,
}

/// A worksheet table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDef {
    /// Display name.
    pub name: String,
    /// Full extent including header and totals rows.
    pub range: CellRange,
    /// Number of header rows (0 or 1).
    pub header_rows: u32,
    /// Number of totals rows (0 or 1).
    pub totals_rows: u32,
    /// Column names.
    pub columns: Vec<String>,
}

impl TableDef {
    /// First data row (zero-based).
    #[must_use]
    pub const fn first_data_row(&self) -> u32 {
        self.range.start.row + self.header_rows
    }

    /// Last data row (zero-based, inclusive), `None` when there are no data rows.
    #[must_use]
    pub fn last_data_row(&self) -> Option<u32> {
        let last = self.range.end.row.checked_sub(self.totals_rows)?;
        (last >= self.first_data_row()).then_some(last)
    }

    /// Number of data rows.
    #[must_use]
    pub fn data_row_count(&self) -> usize {
        self.last_data_row()
            .map_or(0, |last| (last - self.first_data_row() + 1) as usize)
    }
}

/// A cell note.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteDef {
    /// Cell the note is attached to.
    pub cell: CellRef,
    /// Note author.
    pub author: String,
    /// Note text.
    pub text: String,
}

/// A pivot table definition joined with its cache source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotDef {
    /// Pivot table name.
    pub name: String,
    /// Where the rendered pivot sits on its host worksheet.
    pub location: Option<CellRange>,
    /// Worksheet holding the source data.
    pub source_sheet: String,
    /// Source data range (or defined name).
    pub source_range: String,
    /// Row fields.
    pub row_fields: Vec<PivotFieldInfo>,
    /// Column fields.
    pub column_fields: Vec<PivotFieldInfo>,
    /// Value fields.
    pub data_fields: Vec<PivotFieldInfo>,
    /// Report filter fields.
    pub filter_fields: Vec<PivotFieldInfo>,
}

#[derive(Debug, Clone)]
struct Relationship {
    kind: String,
    target: String,
}

/// Reads tables, notes and pivot tables of every worksheet.
///
/// # Errors
///
/// Returns an error if the file is not a zip package or a part is not
/// well-formed XML.
pub fn read_package(path: &Path) -> Result<PackageIndex, WorkbookError> {
    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| WorkbookError::package("package", e))?;

    let workbook_xml = read_part(&mut archive, WORKBOOK_PART)?
        .ok_or_else(|| WorkbookError::package(WORKBOOK_PART, "part is missing"))?;
    let sheet_ids = parse_workbook_sheets(&workbook_xml)?;
    let workbook_rels = read_relationships(&mut archive, WORKBOOK_PART)?;

    let mut index = PackageIndex::default();
    for (name, rel_id) in sheet_ids {
        let mut parts = SheetParts {
            name,
            ..SheetParts::default()
        };

        if let Some(sheet_part) = workbook_rels.get(&rel_id).map(|r| r.target.clone()) {
            for rel in read_relationships(&mut archive, &sheet_part)?.into_values() {
                match rel.kind.as_str() {
                    "table" => {
                        if let Some(xml) = read_part(&mut archive, &rel.target)? {
                            parts.tables.extend(parse_table(&xml, &rel.target)?);
                        }
                    }
                    "comments" => {
                        if let Some(xml) = read_part(&mut archive, &rel.target)? {
                            parts.notes.extend(parse_comments(&xml, &rel.target)?);
                        }
                    }
                    "pivotTable" => {
                        if let Some(pivot) = read_pivot(&mut archive, &rel.target)? {
                            parts.pivots.push(pivot);
                        }
                    }
                    _ => {}
                }
            }
        }

        parts.tables.sort_by_key(|t| (t.range.start.row, t.range.start.col));
        parts.notes.sort_by_key(|n| n.cell);
        parts.pivots.sort_by(|a, b| a.name.cmp(&b.name));
        index.sheets.push(parts);
    }

    Ok(index)
}

fn read_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<String>, WorkbookError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(WorkbookError::package(name, e)),
    };

    let mut xml = String::new();
    file.read_to_string(&mut xml)
        .map_err(|e| WorkbookError::package(name, e))?;
    Ok(Some(xml))
}

/// Path of the relationships part belonging to `part`.
fn rels_path(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{dir}/_rels/{file}.rels"),
        None => format!("_rels/{part}.rels"),
    }
}

/// Resolves a relationship target against the part that owns it.
fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }

    let mut segments: Vec<&str> = source_part
        .rsplit_once('/')
        .map_or_else(Vec::new, |(dir, _)| dir.split('/').collect());

    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    segments.join("/")
}

/// Reads the relationships of `part`, keyed by relationship id.
///
/// Relationship kinds are reduced to the last segment of their type URI.
fn read_relationships<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    part: &str,
) -> Result<HashMap<String, Relationship>, WorkbookError> {
    let rels_part = rels_path(part);
    let Some(xml) = read_part(archive, &rels_part)? else {
        return Ok(HashMap::new());
    };

    let mut rels = HashMap::new();
    let mut reader = Reader::from_str(&xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e) | Event::Empty(ref e))
                if e.local_name().as_ref() == b"Relationship" =>
            {
                let external =
                    attr(e, b"TargetMode").is_some_and(|m| m.eq_ignore_ascii_case("External"));
                if let (false, Some(id), Some(kind), Some(target)) =
                    (external, attr(e, b"Id"), attr(e, b"Type"), attr(e, b"Target"))
                {
                    let kind = kind.rsplit('/').next().unwrap_or_default().to_string();
                    rels.insert(
                        id,
                        Relationship {
                            kind,
                            target: resolve_target(part, &target),
                        },
                    );
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::package(&rels_part, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(rels)
}

/// Worksheet names and relationship ids from `xl/workbook.xml`.
fn parse_workbook_sheets(xml: &str) -> Result<Vec<(String, String)>, WorkbookError> {
    let mut sheets = Vec::new();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e) | Event::Empty(ref e)) if e.local_name().as_ref() == b"sheet" => {
                if let (Some(name), Some(id)) = (attr(e, b"name"), attr(e, b"id")) {
                    sheets.push((name, id));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::package(WORKBOOK_PART, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(sheets)
}

fn parse_table(xml: &str, part: &str) -> Result<Option<TableDef>, WorkbookError> {
    let mut table: Option<TableDef> = None;
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e) | Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"table" => {
                    let name = attr(e, b"displayName").or_else(|| attr(e, b"name"));
                    let range = attr(e, b"ref").and_then(|r| CellRange::parse(&r));
                    if let (Some(name), Some(range)) = (name, range) {
                        table = Some(TableDef {
                            name,
                            range,
                            header_rows: attr_u32(e, b"headerRowCount").unwrap_or(1).min(1),
                            totals_rows: attr_u32(e, b"totalsRowCount").unwrap_or(0).min(1),
                            columns: Vec::new(),
                        });
                    }
                }
                b"tableColumn" => {
                    if let (Some(table), Some(name)) = (table.as_mut(), attr(e, b"name")) {
                        table.columns.push(name);
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::package(part, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(table)
}

fn parse_comments(xml: &str, part: &str) -> Result<Vec<NoteDef>, WorkbookError> {
    let mut authors = Vec::new();
    let mut notes = Vec::new();

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(false);
    let mut buf = Vec::new();

    let mut in_author = false;
    let mut in_text = false;
    let mut text = String::new();
    let mut current: Option<(CellRef, usize)> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"author" => {
                    in_author = true;
                    text.clear();
                }
                b"comment" => {
                    let cell = attr(e, b"ref").and_then(|r| CellRef::parse(&r).ok());
                    let author = attr_u32(e, b"authorId").unwrap_or(0) as usize;
                    current = cell.map(|cell| (cell, author));
                    text.clear();
                }
                b"t" if current.is_some() => in_text = true,
                _ => {}
            },
            Ok(Event::Text(ref e)) if in_author || in_text => {
                text.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Ok(Event::GeneralRef(ref e)) if in_author || in_text => {
                if let Some(c) = resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                    text.push(c);
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"author" => {
                    in_author = false;
                    authors.push(std::mem::take(&mut text));
                }
                b"t" => in_text = false,
                b"comment" => {
                    if let Some((cell, author_id)) = current.take() {
                        notes.push(NoteDef {
                            cell,
                            author: authors.get(author_id).cloned().unwrap_or_default(),
                            text: std::mem::take(&mut text),
                        });
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::package(part, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(notes)
}

fn read_pivot<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    part: &str,
) -> Result<Option<PivotDef>, WorkbookError> {
    let Some(xml) = read_part(archive, part)? else {
        return Ok(None);
    };

    let cache_part = read_relationships(archive, part)?
        .into_values()
        .find(|r| r.kind == "pivotCacheDefinition")
        .map(|r| r.target);
    let cache = match cache_part {
        Some(cache_part) => match read_part(archive, &cache_part)? {
            Some(cache_xml) => parse_pivot_cache(&cache_xml, &cache_part)?,
            None => PivotCache::default(),
        },
        None => PivotCache::default(),
    };

    parse_pivot_table(&xml, part, &cache).map(Some)
}

#[derive(Debug, Default)]
struct PivotCache {
    source_sheet: String,
    source_range: String,
    fields: Vec<String>,
}

fn parse_pivot_cache(xml: &str, part: &str) -> Result<PivotCache, WorkbookError> {
    let mut cache = PivotCache::default();
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e) | Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"worksheetSource" => {
                    cache.source_sheet = attr(e, b"sheet").unwrap_or_default();
                    cache.source_range = attr(e, b"ref")
                        .or_else(|| attr(e, b"name"))
                        .unwrap_or_default();
                }
                b"cacheField" => cache.fields.push(attr(e, b"name").unwrap_or_default()),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::package(part, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(cache)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AxisList {
    None,
    Rows,
    Columns,
}

fn parse_pivot_table(xml: &str, part: &str, cache: &PivotCache) -> Result<PivotDef, WorkbookError> {
    let field = |index: Option<u32>, name: Option<String>, function: &str| {
        let source_name = index
            .and_then(|i| cache.fields.get(i as usize))
            .cloned()
            .unwrap_or_default();
        PivotFieldInfo {
            name: name.unwrap_or_else(|| source_name.clone()),
            source_name,
            function: function.to_string(),
        }
    };

    let mut pivot = PivotDef {
        name: String::new(),
        location: None,
        source_sheet: cache.source_sheet.clone(),
        source_range: cache.source_range.clone(),
        row_fields: Vec::new(),
        column_fields: Vec::new(),
        data_fields: Vec::new(),
        filter_fields: Vec::new(),
    };

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut axis = AxisList::None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e) | Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"pivotTableDefinition" => pivot.name = attr(e, b"name").unwrap_or_default(),
                b"location" => {
                    pivot.location = attr(e, b"ref").and_then(|r| CellRange::parse(&r));
                }
                b"rowFields" => axis = AxisList::Rows,
                b"colFields" => axis = AxisList::Columns,
                // x="-2" is the synthetic "Values" field.
                b"field" => {
                    if let Ok(index) = u32::try_from(attr_i64(e, b"x").unwrap_or(-1)) {
                        let info = field(Some(index), None, "none");
                        match axis {
                            AxisList::Rows => pivot.row_fields.push(info),
                            AxisList::Columns => pivot.column_fields.push(info),
                            AxisList::None => {}
                        }
                    }
                }
                b"pageField" => {
                    let info = field(attr_u32(e, b"fld"), attr(e, b"name"), "none");
                    pivot.filter_fields.push(info);
                }
                b"dataField" => {
                    let function = attr(e, b"subtotal").unwrap_or_else(|| "sum".to_string());
                    let info = field(attr_u32(e, b"fld"), attr(e, b"name"), &function);
                    pivot.data_fields.push(info);
                }
                _ => {}
            },
            Ok(Event::End(ref e)) => {
                if matches!(e.local_name().as_ref(), b"rowFields" | b"colFields") {
                    axis = AxisList::None;
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(WorkbookError::package(part, e)),
            _ => {}
        }
        buf.clear();
    }

    Ok(pivot)
}

/// Returns the unescaped value of the attribute whose local name is `name`.
fn attr(e: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == name)
        .map(|a| unescape_xml(&String::from_utf8_lossy(&a.value)))
}

fn attr_u32(e: &BytesStart<'_>, name: &[u8]) -> Option<u32> {
    attr(e, name).and_then(|v| v.trim().parse().ok())
}

fn attr_i64(e: &BytesStart<'_>, name: &[u8]) -> Option<i64> {
    attr(e, name).and_then(|v| v.trim().parse().ok())
}

/// Unescape the 5 predefined XML entities and numeric character references.
fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start + 1..];
        match tail.find(';').and_then(|end| Some((resolve_entity(&tail[..end])?, end))) {
            Some((c, end)) => {
                out.push(c);
                rest = &tail[end + 1..];
            }
            None => {
                out.push('&');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Resolves an entity name (without `&` and `;`).
fn resolve_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        _ => {
            let code = name.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}
