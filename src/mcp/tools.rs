//! The tool registry.
//!
//! Tools form a closed set ([`Tool`]); a name only becomes a `Tool` through
//! [`Tool::from_name`], at the point where a `tools/call` request is
//! decoded. Handlers report argument and workbook problems as
//! `isError` results so the caller can correct itself and retry; only an
//! unknown tool name, or a workbook that cannot be opened at all while
//! listing its structure, becomes an RPC error.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::mcp::protocol::JsonRpcErrorData;
use crate::mcp::types::{ToolCallResult, ToolContent, ToolDefinition};
use crate::workbook::{
    to_csv, AddAnnotationArgs, AddWorksheetArgs, AuditQuery, PageLimits, PivotArgs, PreviewArgs,
    SearchArgs, UpdateCellArgs, WorkbookError, WorkbookService,
};

/// Every tool the server offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    /// Worksheets, tables and headers of the workbook.
    ListStructure,
    /// Row search across worksheets and tables.
    Search,
    /// Paged rows of a worksheet or table.
    PreviewTable,
    /// Pivot table definitions and bodies.
    PivotAnalysis,
    /// Change one cell.
    UpdateCell,
    /// Add a worksheet.
    AddWorksheet,
    /// Attach a note to a cell.
    AddAnnotation,
    /// Query the audit trail of writes.
    GetAuditTrail,
}

impl Tool {
    /// All tools in listing order.
    pub const ALL: [Self; 8] = [
        Self::ListStructure,
        Self::Search,
        Self::PreviewTable,
        Self::PivotAnalysis,
        Self::UpdateCell,
        Self::AddWorksheet,
        Self::AddAnnotation,
        Self::GetAuditTrail,
    ];

    /// Wire name of the tool.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ListStructure => "excel-list-structure",
            Self::Search => "excel-search",
            Self::PreviewTable => "excel-preview-table",
            Self::PivotAnalysis => "excel-pivot-analysis",
            Self::UpdateCell => "excel-update-cell",
            Self::AddWorksheet => "excel-add-worksheet",
            Self::AddAnnotation => "excel-add-annotation",
            Self::GetAuditTrail => "excel-get-audit-trail",
        }
    }

    /// Looks a tool up by name, ignoring case and surrounding whitespace.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|tool| tool.name().eq_ignore_ascii_case(name))
    }

    const fn description(self) -> &'static str {
        match self {
            Self::ListStructure => {
                "List the worksheets of the workbook with their column headers and tables."
            }
            Self::Search => {
                "Search worksheet and table rows for cells containing a text. \
                 Results are paged; pass nextCursor back as cursor to continue. \
                 nextCursor counts every row examined, matching or not, so it is \
                 not offset plus the number of rows returned."
            }
            Self::PreviewTable => {
                "Preview the rows of a worksheet or of a table on it. \
                 Results are paged; pass nextCursor back as cursor to continue."
            }
            Self::PivotAnalysis => {
                "Describe the pivot tables on a worksheet: source data, row, column, \
                 value and filter fields, and the rendered pivot rows."
            }
            Self::UpdateCell => {
                "Set the value of a cell. Numbers, TRUE/FALSE and formulas starting \
                 with '=' are stored with their type; anything else is stored as text."
            }
            Self::AddWorksheet => "Add an empty worksheet to the workbook.",
            Self::AddAnnotation => "Attach a note to a cell, replacing any existing note.",
            Self::GetAuditTrail => {
                "List the write operations made through this server, newest first."
            }
        }
    }

    /// JSON Schema of the tool's arguments.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn input_schema(self, limits: PageLimits) -> Value {
        let page_size = |what: &str| {
            json!({
                "type": "integer",
                "minimum": 1,
                "maximum": limits.max_size,
                "default": limits.default_size,
                "description": format!("Number of {what} per page"),
            })
        };
        let cursor = json!({
            "type": "string",
            "description": "nextCursor from a previous page",
        });

        match self {
            Self::ListStructure => json!({
                "type": "object",
                "properties": {},
            }),
            Self::Search => json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Text to look for in cell values",
                    },
                    "worksheet": {
                        "type": "string",
                        "description": "Only search this worksheet",
                    },
                    "table": {
                        "type": "string",
                        "description": "Only search this table",
                    },
                    "limit": page_size("matches"),
                    "caseSensitive": {
                        "type": "boolean",
                        "default": false,
                        "description": "Match case exactly",
                    },
                    "cursor": cursor,
                },
                "required": ["query"],
            }),
            Self::PreviewTable => json!({
                "type": "object",
                "properties": {
                    "worksheet": {
                        "type": "string",
                        "description": "Worksheet to preview",
                    },
                    "table": {
                        "type": "string",
                        "description": "Table on the worksheet to preview instead of the whole worksheet",
                    },
                    "rows": page_size("rows"),
                    "cursor": cursor,
                },
                "required": ["worksheet"],
            }),
            Self::PivotAnalysis => json!({
                "type": "object",
                "properties": {
                    "worksheet": {
                        "type": "string",
                        "description": "Worksheet hosting the pivot tables",
                    },
                    "pivotTable": {
                        "type": "string",
                        "description": "Only describe this pivot table",
                    },
                    "includeFilters": {
                        "type": "boolean",
                        "default": true,
                        "description": "Include report filter fields",
                    },
                    "maxRows": {
                        "type": "integer",
                        "minimum": 0,
                        "default": 100,
                        "description": "Largest number of pivot rows returned per pivot table",
                    },
                },
                "required": ["worksheet"],
            }),
            Self::UpdateCell => json!({
                "type": "object",
                "properties": {
                    "worksheet": {
                        "type": "string",
                        "description": "Worksheet holding the cell",
                    },
                    "cell": {
                        "type": "string",
                        "description": "A1 reference, e.g. B7",
                    },
                    "value": {
                        "type": "string",
                        "description": "New value; start with '=' for a formula",
                    },
                    "reason": {
                        "type": "string",
                        "description": "Why the change is made (recorded in the audit trail)",
                    },
                },
                "required": ["worksheet", "cell", "value"],
            }),
            Self::AddWorksheet => json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "description": "Name of the new worksheet",
                    },
                    "position": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "1-based position; appended when omitted",
                    },
                    "reason": {
                        "type": "string",
                        "description": "Why the worksheet is added (recorded in the audit trail)",
                    },
                },
                "required": ["name"],
            }),
            Self::AddAnnotation => json!({
                "type": "object",
                "properties": {
                    "worksheet": {
                        "type": "string",
                        "description": "Worksheet holding the cell",
                    },
                    "cell": {
                        "type": "string",
                        "description": "A1 reference, e.g. B7",
                    },
                    "text": {
                        "type": "string",
                        "description": "Note text",
                    },
                    "author": {
                        "type": "string",
                        "description": "Note author",
                    },
                },
                "required": ["worksheet", "cell", "text"],
            }),
            Self::GetAuditTrail => json!({
                "type": "object",
                "properties": {
                    "since": {
                        "type": "string",
                        "format": "date-time",
                        "description": "Only entries at or after this RFC 3339 timestamp",
                    },
                    "until": {
                        "type": "string",
                        "format": "date-time",
                        "description": "Only entries at or before this RFC 3339 timestamp",
                    },
                    "operationType": {
                        "type": "string",
                        "enum": ["updateCell", "addWorksheet", "addAnnotation"],
                        "description": "Only entries of this kind",
                    },
                    "limit": {
                        "type": "integer",
                        "minimum": 1,
                        "description": "Largest number of entries returned",
                    },
                },
            }),
        }
    }

    /// The tools/list entry of the tool.
    #[must_use]
    pub fn definition(self, limits: PageLimits) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(limits),
        }
    }
}

/// A tool call that could not produce a result.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with that name.
    #[error("Unknown tool '{0}'.")]
    UnknownTool(String),

    /// The workbook failed in a way the tool does not report as a result.
    #[error(transparent)]
    Workbook(#[from] WorkbookError),
}

impl ToolError {
    /// The JSON-RPC error reported for this failure.
    #[must_use]
    pub fn to_rpc_error(&self) -> JsonRpcErrorData {
        match self {
            Self::UnknownTool(_) => JsonRpcErrorData::invalid_params(self.to_string()),
            Self::Workbook(e) => JsonRpcErrorData::internal(e.to_string()),
        }
    }
}

/// Dispatches tool calls to the workbook service.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    service: Arc<WorkbookService>,
}

impl ToolRegistry {
    /// Creates a registry backed by `service`.
    #[must_use]
    pub const fn new(service: Arc<WorkbookService>) -> Self {
        Self { service }
    }

    /// The workbook service behind the tools.
    #[must_use]
    pub fn service(&self) -> &WorkbookService {
        &self.service
    }

    /// Definitions of every tool, in listing order.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let limits = self.service.limits();
        Tool::ALL.into_iter().map(|tool| tool.definition(limits)).collect()
    }

    /// Calls a tool by name.
    ///
    /// # Errors
    ///
    /// Returns `ToolError::UnknownTool` for an unregistered name, or
    /// `ToolError::Workbook` if the structure listing cannot open the
    /// workbook.
    pub fn invoke(&self, name: &str, arguments: &Value) -> Result<ToolCallResult, ToolError> {
        let tool = Tool::from_name(name).ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        tracing::debug!(tool = tool.name(), "Calling tool");

        let result = match tool {
            Tool::ListStructure => return self.call_list_structure(),
            Tool::Search => self.call_search(arguments),
            Tool::PreviewTable => self.call_preview_table(arguments),
            Tool::PivotAnalysis => self.call_pivot_analysis(arguments),
            Tool::UpdateCell => self.call_update_cell(arguments),
            Tool::AddWorksheet => self.call_add_worksheet(arguments),
            Tool::AddAnnotation => self.call_add_annotation(arguments),
            Tool::GetAuditTrail => self.call_get_audit_trail(arguments),
        };

        if result.is_error {
            tracing::info!(tool = tool.name(), "Tool reported an error");
        }
        Ok(result)
    }

    // ==================== Tool Handlers ====================

    fn call_list_structure(&self) -> Result<ToolCallResult, ToolError> {
        let metadata = self.service.metadata()?;

        let mut text = String::new();
        let _ = writeln!(text, "Workbook: {}", metadata.workbook_path);
        let _ = writeln!(text, "Loaded: {}", metadata.loaded_at.to_rfc3339());
        let _ = writeln!(text, "Worksheets: {}", metadata.worksheets.len());

        for worksheet in &metadata.worksheets {
            let _ = writeln!(text);
            let _ = writeln!(text, "Worksheet '{}'", worksheet.name);
            if worksheet.column_headers.is_empty() {
                let _ = writeln!(text, "  Columns: (empty)");
            } else {
                let _ = writeln!(text, "  Columns: {}", worksheet.column_headers.join(", "));
            }
            if worksheet.tables.is_empty() {
                let _ = writeln!(text, "  Tables: none");
                continue;
            }
            let _ = writeln!(text, "  Tables:");
            for table in &worksheet.tables {
                let _ = writeln!(
                    text,
                    "    - {} ({} rows): {}",
                    table.name,
                    table.row_count,
                    table.columns.join(", ")
                );
            }
        }

        Ok(ToolCallResult::text(text.trim_end()))
    }

    fn call_search(&self, arguments: &Value) -> ToolCallResult {
        match parse_arguments::<SearchArgs>(arguments) {
            Ok(args) => json_result(self.service.search(&args)),
            Err(result) => result,
        }
    }

    fn call_preview_table(&self, arguments: &Value) -> ToolCallResult {
        let args = match parse_arguments::<PreviewArgs>(arguments) {
            Ok(args) => args,
            Err(result) => return result,
        };

        let preview = match self.service.preview(&args) {
            Ok(preview) => preview,
            Err(e) => return ToolCallResult::error(e.to_string()),
        };
        let csv = match to_csv(&preview.headers, &preview.page.rows) {
            Ok(csv) => csv,
            Err(e) => return ToolCallResult::error(e.to_string()),
        };

        let mut result = json_result(Ok(preview));
        if !result.is_error && !csv.is_empty() {
            result.content.push(ToolContent::Text { text: csv });
        }
        result
    }

    fn call_pivot_analysis(&self, arguments: &Value) -> ToolCallResult {
        match parse_arguments::<PivotArgs>(arguments) {
            Ok(args) => json_result(self.service.pivot_tables(&args)),
            Err(result) => result,
        }
    }

    fn call_update_cell(&self, arguments: &Value) -> ToolCallResult {
        match parse_arguments::<UpdateCellArgs>(arguments) {
            Ok(args) => json_result(self.service.update_cell(&args)),
            Err(result) => result,
        }
    }

    fn call_add_worksheet(&self, arguments: &Value) -> ToolCallResult {
        match parse_arguments::<AddWorksheetArgs>(arguments) {
            Ok(args) => json_result(self.service.add_worksheet(&args)),
            Err(result) => result,
        }
    }

    fn call_add_annotation(&self, arguments: &Value) -> ToolCallResult {
        match parse_arguments::<AddAnnotationArgs>(arguments) {
            Ok(args) => json_result(self.service.add_annotation(&args)),
            Err(result) => result,
        }
    }

    fn call_get_audit_trail(&self, arguments: &Value) -> ToolCallResult {
        match parse_arguments::<AuditQuery>(arguments) {
            Ok(query) => json_result(Ok(self.service.audit_trail(&query))),
            Err(result) => result,
        }
    }
}

/// Decodes tool arguments; a missing or `null` argument object is empty.
fn parse_arguments<T: DeserializeOwned>(arguments: &Value) -> Result<T, ToolCallResult> {
    let arguments = if arguments.is_null() {
        Value::Object(Map::new())
    } else {
        arguments.clone()
    };
    serde_json::from_value(arguments).map_err(|e| ToolCallResult::error(format!("Invalid arguments: {e}")))
}

fn json_result<T: Serialize>(result: Result<T, WorkbookError>) -> ToolCallResult {
    match result.map(|value| serde_json::to_value(&value)) {
        Ok(Ok(json)) => ToolCallResult::json(json),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Failed to serialise tool result");
            ToolCallResult::error(format!("Failed to serialise result: {e}"))
        }
        Err(e) => ToolCallResult::error(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::ErrorCode;
    use std::collections::HashSet;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(Arc::new(WorkbookService::new("does-not-exist.xlsx")))
    }

    #[test]
    fn tool_definitions_valid() {
        let definitions = registry().definitions();
        assert_eq!(definitions.len(), Tool::ALL.len());

        let names: HashSet<_> = definitions.iter().map(|d| d.name.clone()).collect();
        assert_eq!(names.len(), definitions.len(), "tool names must be unique");

        for def in &definitions {
            assert!(def.name.starts_with("excel-"));
            assert!(!def.description.is_empty());
            assert_eq!(def.input_schema["type"], "object");
            assert!(def.input_schema["properties"].is_object());
        }
    }

    #[test]
    fn schemas_declare_required_arguments() {
        let limits = PageLimits::default();
        let required = |tool: Tool| tool.input_schema(limits)["required"].clone();

        assert_eq!(required(Tool::Search), json!(["query"]));
        assert_eq!(required(Tool::PreviewTable), json!(["worksheet"]));
        assert_eq!(required(Tool::PivotAnalysis), json!(["worksheet"]));
        assert_eq!(required(Tool::UpdateCell), json!(["worksheet", "cell", "value"]));
        assert_eq!(required(Tool::AddWorksheet), json!(["name"]));
        assert_eq!(required(Tool::AddAnnotation), json!(["worksheet", "cell", "text"]));
        assert!(required(Tool::ListStructure).is_null());
        assert!(required(Tool::GetAuditTrail).is_null());

        assert_eq!(Tool::Search.input_schema(limits)["properties"]["limit"]["maximum"], 100);
    }

    #[test]
    fn search_description_explains_cursor() {
        let definition = registry()
            .definitions()
            .into_iter()
            .find(|definition| definition.name == "excel-search")
            .unwrap();
        assert!(definition.description.contains("nextCursor counts every row examined"));
        assert!(definition.description.contains("not offset plus the number of rows returned"));
    }

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(Tool::from_name("EXCEL-SEARCH"), Some(Tool::Search));
        assert_eq!(Tool::from_name(" excel-preview-table "), Some(Tool::PreviewTable));
        assert_eq!(Tool::from_name("excel-delete-everything"), None);
    }

    #[test]
    fn unknown_tool_is_invalid_params() {
        let err = registry().invoke("nope", &Value::Null).unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(_)));
        assert_eq!(err.to_rpc_error().code, ErrorCode::InvalidParams.code());
    }

    #[test]
    fn missing_required_argument_is_tool_error() {
        let result = registry().invoke("excel-search", &json!({})).unwrap();
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("query is required."));

        let result = registry()
            .invoke("excel-preview-table", &json!({ "worksheet": "  " }))
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.first_text(), Some("worksheet is required."));
    }

    #[test]
    fn mistyped_argument_is_tool_error() {
        let result = registry()
            .invoke("excel-search", &json!({ "query": "x", "limit": "ten" }))
            .unwrap();
        assert!(result.is_error);
        assert!(result.first_text().unwrap().starts_with("Invalid arguments:"));
    }

    #[test]
    fn structure_listing_escapes_when_workbook_missing() {
        let err = registry().invoke("excel-list-structure", &Value::Null).unwrap_err();
        assert!(matches!(err, ToolError::Workbook(WorkbookError::NotFound { .. })));
        assert_eq!(err.to_rpc_error().code, ErrorCode::InternalError.code());
    }

    #[test]
    fn audit_trail_starts_empty() {
        let result = registry().invoke("excel-get-audit-trail", &Value::Null).unwrap();
        assert!(!result.is_error);
        assert_eq!(result.first_json(), Some(&json!({ "entries": [], "totalCount": 0 })));
    }
}
