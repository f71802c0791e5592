//! JSON-RPC 2.0 message types for the MCP protocol.
//!
//! This module defines the message model shared by the server dispatcher and
//! the client correlator. Every frame read from a stream is classified into
//! exactly one [`Message`] variant.
//!
//! # Message Types
//!
//! - **Request**: A message expecting a response (has a non-null `id`)
//! - **Notification**: A one-way message (no `id`, or `id: null`)
//! - **Response**: A successful reply to a request (`result`)
//! - **Error**: A failed reply to a request (`error`)
//! - **Ignored**: Anything else that parsed as a JSON object
//!
//! # MCP-Specific Constraints
//!
//! - Request IDs must be strings or integers (never `null`)
//! - Notifications never receive a response

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The MCP protocol version reported when the client does not request one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-06-18";

/// Server name for capability negotiation.
pub const SERVER_NAME: &str = "excel-mcp";

/// The only JSON-RPC version this implementation speaks.
pub const JSONRPC_VERSION: &str = "2.0";

fn jsonrpc_version() -> String {
    JSONRPC_VERSION.to_string()
}

/// A JSON-RPC 2.0 request ID.
///
/// MCP requires IDs to be strings or integers, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(i64),
    /// String request ID.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

/// A JSON-RPC 2.0 request message.
///
/// Requests expect a response from the peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// Unique request identifier.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Validates that this is a well-formed JSON-RPC 2.0 request.
    ///
    /// Returns an error message if validation fails.
    #[must_use]
    pub fn validate(&self) -> Option<&'static str> {
        if self.jsonrpc != JSONRPC_VERSION {
            return Some("jsonrpc field must be \"2.0\"");
        }
        if self.method.is_empty() {
            return Some("method field cannot be empty");
        }
        None
    }
}

/// A JSON-RPC 2.0 notification message.
///
/// Notifications do not have an ID and never receive a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Must be "2.0".
    pub jsonrpc: String,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Creates a new notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            method: method.into(),
            params,
        }
    }
}

/// A successful JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,

    /// The request ID this response corresponds to.
    pub id: RequestId,

    /// The result of the method call.
    pub result: Value,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            result,
        }
    }
}

/// Standard JSON-RPC 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received.
    ParseError,
    /// The JSON sent is not a valid Request object.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters, including unknown tool names.
    InvalidParams,
    /// A handler failed while processing a request.
    InternalError,
    /// Server-defined error.
    ServerError(i32),
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError(code) => code,
        }
    }

    /// Returns the default message for this error code.
    #[must_use]
    pub const fn default_message(self) -> &'static str {
        match self {
            Self::ParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::ServerError(_) => "Server error",
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorData {
    /// The error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcErrorData {
    /// Creates a new error from an error code.
    #[must_use]
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code: code.code(),
            message: code.default_message().to_string(),
            data: None,
        }
    }

    /// Creates a new error with a custom message.
    #[must_use]
    pub fn with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Adds additional data to the error.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Unknown method.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::with_message(
            ErrorCode::MethodNotFound,
            format!("Unknown method '{method}'."),
        )
    }

    /// Invalid or missing parameters.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InvalidParams, message)
    }

    /// Handler failure; the message is the failure's display text.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_message(ErrorCode::InternalError, message)
    }
}

/// A JSON-RPC 2.0 error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Always "2.0".
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,

    /// The request ID this error corresponds to (`null` if it could not be determined).
    #[serde(default)]
    pub id: Option<RequestId>,

    /// The error details.
    pub error: JsonRpcErrorData,
}

impl JsonRpcError {
    /// Creates a new error response.
    #[must_use]
    pub fn new(id: Option<RequestId>, error: JsonRpcErrorData) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            error,
        }
    }

    /// Creates a parse error response (ID cannot be determined).
    #[must_use]
    pub fn parse_error() -> Self {
        Self::new(None, JsonRpcErrorData::from_code(ErrorCode::ParseError))
    }

    /// Creates an invalid request error response.
    #[must_use]
    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::new(id, JsonRpcErrorData::from_code(ErrorCode::InvalidRequest))
    }
}

/// Any JSON-RPC 2.0 message.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A notification (no response expected).
    Notification(JsonRpcNotification),
    /// A successful response.
    Response(JsonRpcResponse),
    /// An error response.
    Error(JsonRpcError),
    /// A JSON object with neither a routable method nor a reply shape.
    /// Receivers drop it without answering.
    Ignored(Value),
}

impl Message {
    /// Returns the method name if this is a request or notification.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) | Self::Error(_) | Self::Ignored(_) => None,
        }
    }

    /// Returns the parameters if this is a request or notification.
    #[must_use]
    pub fn params(&self) -> Option<&Value> {
        match self {
            Self::Request(req) => req.params.as_ref(),
            Self::Notification(notif) => notif.params.as_ref(),
            Self::Response(_) | Self::Error(_) | Self::Ignored(_) => None,
        }
    }

    /// Returns the message ID, if any.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => Some(&resp.id),
            Self::Error(err) => err.id.as_ref(),
            Self::Notification(_) | Self::Ignored(_) => None,
        }
    }
}

impl From<JsonRpcRequest> for Message {
    fn from(value: JsonRpcRequest) -> Self {
        Self::Request(value)
    }
}

impl From<JsonRpcNotification> for Message {
    fn from(value: JsonRpcNotification) -> Self {
        Self::Notification(value)
    }
}

impl From<JsonRpcResponse> for Message {
    fn from(value: JsonRpcResponse) -> Self {
        Self::Response(value)
    }
}

impl From<JsonRpcError> for Message {
    fn from(value: JsonRpcError) -> Self {
        Self::Error(value)
    }
}

/// Parses a JSON document into a message.
///
/// # Errors
///
/// Returns a parse error if the bytes are not JSON, or any error
/// [`classify`] returns.
pub fn parse_message(json: &[u8]) -> Result<Message, JsonRpcError> {
    let value: Value = serde_json::from_slice(json).map_err(|_| JsonRpcError::parse_error())?;
    classify(value)
}

/// Classifies an already-parsed JSON value into a message.
///
/// Routing follows `method` and `id`. Only a message that carries a usable
/// id can earn an error reply; everything else that cannot be routed comes
/// back as [`Message::Ignored`]. Notifications are accepted whatever their
/// `jsonrpc` member says.
///
/// # Errors
///
/// Returns a parse error if the value is not an object, or an invalid
/// request error (carrying the request's id) if a message with a `method`
/// and an id is not valid JSON-RPC 2.0.
pub fn classify(value: Value) -> Result<Message, JsonRpcError> {
    let Some(obj) = value.as_object() else {
        return Err(JsonRpcError::parse_error());
    };

    let id = match obj
        .get("id")
        .filter(|id| !id.is_null())
        .map(RequestId::deserialize)
        .transpose()
    {
        Ok(id) => id,
        // An id that is neither a string nor an integer cannot address a reply.
        Err(_) => return Ok(Message::Ignored(value)),
    };

    if obj.contains_key("method") {
        let Some(id) = id else {
            return Ok(match notification_from(obj) {
                Some(notification) => Message::Notification(notification),
                None => Message::Ignored(value),
            });
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(JsonRpcError::invalid_request(Some(id)));
        }
        let request = JsonRpcRequest::deserialize(&value)
            .map_err(|_| JsonRpcError::invalid_request(Some(id)))?;
        if request.validate().is_some() {
            return Err(JsonRpcError::invalid_request(Some(request.id)));
        }
        return Ok(Message::Request(request));
    }

    if obj.contains_key("error") {
        if let Ok(error) = JsonRpcError::deserialize(&value) {
            return Ok(Message::Error(error));
        }
    } else if obj.contains_key("result") && id.is_some() {
        if let Ok(response) = JsonRpcResponse::deserialize(&value) {
            return Ok(Message::Response(response));
        }
    }

    Ok(Message::Ignored(value))
}

/// A notification built from an object with a string `method`.
fn notification_from(obj: &serde_json::Map<String, Value>) -> Option<JsonRpcNotification> {
    let method = obj.get("method")?.as_str()?;
    Some(JsonRpcNotification::new(method, obj.get("params").cloned()))
}
