//! MCP payload models shared by the server and the client.
//!
//! These are the `params` and `result` shapes of the MCP methods this crate
//! speaks. All of them serialise with camelCase field names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::protocol::SERVER_NAME;

/// Server capabilities advertised during initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tool-related capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ListChangedCapability>,
    /// Resource-related capabilities.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ListChangedCapability>,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: Some(ListChangedCapability::default()),
            resources: Some(ListChangedCapability::default()),
        }
    }
}

/// A capability whose only property is whether its list can change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListChangedCapability {
    /// Whether the list can change during the session. Always `false` here.
    #[serde(rename = "listChanged", default)]
    pub list_changed: bool,
}

/// Implementation name and version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Name.
    pub name: String,
    /// Version.
    #[serde(default)]
    pub version: String,
}

impl Implementation {
    /// Identity of this server.
    #[must_use]
    pub fn server() -> Self {
        Self {
            name: SERVER_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Identity of the bundled client.
    #[must_use]
    pub fn client() -> Self {
        Self {
            name: "excel-mcp-client".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters for the initialize request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by the client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_version: Option<String>,
    /// Client capabilities.
    #[serde(default)]
    pub capabilities: Value,
    /// Client information.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Implementation>,
}

/// Result of the initialize request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// The protocol version the server will speak.
    pub protocol_version: String,
    /// Server identity.
    pub server_info: Implementation,
    /// Server capabilities.
    pub capabilities: ServerCapabilities,
}

/// A tool definition for the tools/list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Result of tools/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Every registered tool.
    pub tools: Vec<ToolDefinition>,
    /// Always `null`; the list is never paginated.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Parameters for tools/call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
}

/// Content item in a tool call response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
    /// Structured JSON content.
    Json {
        /// The JSON payload.
        json: Value,
    },
}

/// Result of a tool call.
///
/// An empty `content` list with `is_error == false` is a valid "no data"
/// result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    #[serde(default)]
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Creates a successful JSON result.
    #[must_use]
    pub fn json(json: Value) -> Self {
        Self {
            content: vec![ToolContent::Json { json }],
            is_error: false,
        }
    }

    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Returns the first JSON content item, if any.
    #[must_use]
    pub fn first_json(&self) -> Option<&Value> {
        self.content.iter().find_map(|item| match item {
            ToolContent::Json { json } => Some(json),
            ToolContent::Text { .. } => None,
        })
    }

    /// Returns the first text content item, if any.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().find_map(|item| match item {
            ToolContent::Text { text } => Some(text.as_str()),
            ToolContent::Json { .. } => None,
        })
    }
}

/// A resource advertised by resources/list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDefinition {
    /// Resource URI.
    pub uri: String,
    /// Display name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the resource body.
    pub mime_type: String,
}

/// Result of resources/list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    /// Every readable resource.
    pub resources: Vec<ResourceDefinition>,
    /// Always `null`; the list is never paginated.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Parameters for resources/read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceParams {
    /// URI of the resource to read.
    pub uri: String,
}

/// The body of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// URI the contents were read from.
    pub uri: String,
    /// MIME type of `text`.
    pub mime_type: String,
    /// The resource body.
    pub text: String,
}

/// Result of resources/read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    /// The resource bodies (always exactly one here).
    pub contents: Vec<ResourceContents>,
}
