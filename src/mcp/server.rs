//! MCP server session.
//!
//! This module implements the MCP server lifecycle:
//!
//! 1. **Initialisation**: `initialize` agrees a protocol version
//! 2. **Operation**: tool calls and resource reads
//! 3. **Shutdown**: `shutdown`, then `exit` or end of stream
//!
//! # Concurrency
//!
//! The session is one loop: read a message, handle it completely, write the
//! reply, read the next. Responses are therefore always in request order.
//! A shutdown signal is only observed while waiting for the next message.
//!
//! Tool and resource calls made before `initialize` are served as usual.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, Stdin, Stdout};

use crate::mcp::error::{FrameError, ProtocolError};
use crate::mcp::protocol::{
    JsonRpcError, JsonRpcErrorData, JsonRpcResponse, Message, DEFAULT_PROTOCOL_VERSION,
};
use crate::mcp::resources::{list_resources, ResourceUri};
use crate::mcp::tools::ToolRegistry;
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    Implementation, InitializeParams, InitializeResult, ListResourcesResult, ListToolsResult,
    ReadResourceParams, ReadResourceResult, ResourceContents, ServerCapabilities, ToolCallParams,
};
use crate::workbook::WorkbookService;

/// Methods the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `initialize`
    Initialize,
    /// `initialized` or `notifications/initialized`
    Initialized,
    /// `shutdown`
    Shutdown,
    /// `exit`
    Exit,
    /// `ping`
    Ping,
    /// `tools/list`
    ToolsList,
    /// `tools/call`
    ToolsCall,
    /// `resources/list`
    ResourcesList,
    /// `resources/read`
    ResourcesRead,
    /// Anything else.
    Unknown,
}

impl Method {
    /// Classifies a method name.
    #[must_use]
    pub fn parse(name: &str) -> Self {
        match name {
            "initialize" => Self::Initialize,
            "initialized" | "notifications/initialized" => Self::Initialized,
            "shutdown" => Self::Shutdown,
            "exit" => Self::Exit,
            "ping" => Self::Ping,
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            "resources/list" => Self::ResourcesList,
            "resources/read" => Self::ResourcesRead,
            _ => Self::Unknown,
        }
    }

    /// Whether a request for this method is answered.
    ///
    /// `initialized` and `exit` are never answered, even when sent with an id.
    #[must_use]
    pub const fn expects_reply(self) -> bool {
        !matches!(self, Self::Initialized | Self::Exit)
    }
}

/// Session state in the MCP lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for `initialize`.
    Uninitialized,
    /// `initialize` answered.
    Initialized,
    /// `shutdown` answered; waiting for `exit`.
    ShuttingDown,
    /// The loop has ended.
    Terminated,
}

/// An MCP server bound to one pair of streams.
pub struct McpServer<R, W> {
    transport: Transport<R, W>,
    registry: ToolRegistry,
    state: SessionState,
    protocol_version: Option<String>,
}

impl McpServer<Stdin, Stdout> {
    /// Creates a server on this process's stdin and stdout.
    #[must_use]
    pub fn stdio(service: Arc<WorkbookService>) -> Self {
        Self::new(Transport::new(tokio::io::stdin(), tokio::io::stdout()), service)
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> McpServer<R, W> {
    /// Creates a server on `transport` serving `service`.
    #[must_use]
    pub fn new(transport: Transport<R, W>, service: Arc<WorkbookService>) -> Self {
        Self {
            transport,
            registry: ToolRegistry::new(service),
            state: SessionState::Uninitialized,
            protocol_version: None,
        }
    }

    /// Current session state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Protocol version agreed by the last `initialize`.
    #[must_use]
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    /// Runs the session until end of stream, `exit`, or SIGINT/SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails or carries a broken frame.
    pub async fn run(&mut self) -> Result<(), ProtocolError> {
        self.run_until(shutdown_signal()).await
    }

    /// Runs the session until end of stream, `exit`, or `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream fails or carries a broken frame.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<(), ProtocolError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        while self.state != SessionState::Terminated {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!("Shutdown requested, ending session");
                    self.state = SessionState::Terminated;
                }

                frame = self.transport.read_message() => {
                    match frame {
                        Ok(Some(message)) => self.handle_message(message).await?,
                        Ok(None) => {
                            tracing::info!("Input closed, ending session");
                            self.state = SessionState::Terminated;
                        }
                        Err(FrameError::Parse(reply)) => {
                            tracing::warn!(error = %reply.error.message, "Rejected malformed message");
                            self.transport.write_message(&reply).await?;
                        }
                        Err(FrameError::Protocol(e)) => {
                            tracing::error!(error = %e, "Broken input stream, ending session");
                            self.state = SessionState::Terminated;
                            return Err(e);
                        }
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_message(&mut self, message: Message) -> Result<(), ProtocolError> {
        match message {
            Message::Request(request) => {
                let method = Method::parse(&request.method);
                tracing::debug!(method = %request.method, id = %request.id, "Handling request");

                let outcome = self.dispatch(method, &request.method, request.params.as_ref());
                if !method.expects_reply() {
                    return Ok(());
                }

                match outcome {
                    Ok(result) => {
                        let response = JsonRpcResponse::success(request.id, result);
                        self.transport.write_message(&response).await
                    }
                    Err(error) => {
                        tracing::info!(
                            method = %request.method,
                            id = %request.id,
                            code = error.code,
                            message = %error.message,
                            "Request failed"
                        );
                        let response = JsonRpcError::new(Some(request.id), error);
                        self.transport.write_message(&response).await
                    }
                }
            }
            Message::Notification(notification) => {
                let method = Method::parse(&notification.method);
                if method == Method::Unknown {
                    tracing::debug!(method = %notification.method, "Ignoring unknown notification");
                    return Ok(());
                }
                if let Err(error) = self.dispatch(method, &notification.method, notification.params.as_ref()) {
                    tracing::warn!(
                        method = %notification.method,
                        error = %error.message,
                        "Notification handler failed"
                    );
                }
                Ok(())
            }
            Message::Response(_) | Message::Error(_) | Message::Ignored(_) => {
                tracing::debug!("Ignoring message without a method");
                Ok(())
            }
        }
    }

    /// Runs the handler for one method.
    fn dispatch(
        &mut self,
        method: Method,
        name: &str,
        params: Option<&Value>,
    ) -> Result<Value, JsonRpcErrorData> {
        match method {
            Method::Initialize => self.handle_initialize(params),
            Method::Initialized => {
                tracing::debug!("Client confirmed initialisation");
                Ok(Value::Null)
            }
            Method::Shutdown => {
                tracing::info!("Shutdown requested by client");
                self.state = SessionState::ShuttingDown;
                Ok(json!({}))
            }
            Method::Exit => {
                tracing::info!("Exit requested by client");
                self.state = SessionState::Terminated;
                Ok(Value::Null)
            }
            Method::Ping => Ok(json!({})),
            Method::ToolsList => to_result(&ListToolsResult {
                tools: self.registry.definitions(),
                next_cursor: None,
            }),
            Method::ToolsCall => self.handle_tools_call(params),
            Method::ResourcesList => self.handle_resources_list(),
            Method::ResourcesRead => self.handle_resources_read(params),
            Method::Unknown => Err(JsonRpcErrorData::method_not_found(name)),
        }
    }

    fn handle_initialize(&mut self, params: Option<&Value>) -> Result<Value, JsonRpcErrorData> {
        let params: InitializeParams = decode_params(params, "initialize")?.unwrap_or_default();

        let version = params
            .protocol_version
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string());

        if let Some(client) = &params.client_info {
            tracing::info!(client = %client.name, version = %client.version, protocol = %version, "Client connected");
        }

        self.protocol_version = Some(version.clone());
        self.state = SessionState::Initialized;

        to_result(&InitializeResult {
            protocol_version: version,
            server_info: Implementation::server(),
            capabilities: ServerCapabilities::default(),
        })
    }

    fn handle_tools_call(&self, params: Option<&Value>) -> Result<Value, JsonRpcErrorData> {
        let params: ToolCallParams = decode_params(params, "tools/call")?
            .ok_or_else(|| JsonRpcErrorData::invalid_params("Missing tool call params"))?;
        if params.name.trim().is_empty() {
            return Err(JsonRpcErrorData::invalid_params("Tool name is required."));
        }

        let result = self
            .registry
            .invoke(&params.name, &params.arguments)
            .map_err(|e| e.to_rpc_error())?;
        to_result(&result)
    }

    fn handle_resources_list(&self) -> Result<Value, JsonRpcErrorData> {
        let metadata = self
            .registry
            .service()
            .metadata()
            .map_err(|e| JsonRpcErrorData::internal(e.to_string()))?;

        to_result(&ListResourcesResult {
            resources: list_resources(&metadata),
            next_cursor: None,
        })
    }

    fn handle_resources_read(&self, params: Option<&Value>) -> Result<Value, JsonRpcErrorData> {
        let params: ReadResourceParams = decode_params(params, "resources/read")?
            .ok_or_else(|| JsonRpcErrorData::invalid_params("Missing resource read params"))?;

        let uri = ResourceUri::parse(&params.uri).map_err(|e| JsonRpcErrorData::internal(e.to_string()))?;
        let service = self.registry.service();
        let failed = |e: crate::workbook::WorkbookError| JsonRpcErrorData::internal(e.to_string());

        let text = match &uri {
            ResourceUri::Workbook => {
                let metadata = service.metadata().map_err(failed)?;
                serde_json::to_string_pretty(&*metadata)
                    .map_err(|e| JsonRpcErrorData::internal(e.to_string()))?
            }
            ResourceUri::Worksheet { name } => service.csv_preview(name, None).map_err(failed)?.csv,
            ResourceUri::Table { worksheet, table } => {
                service.csv_preview(worksheet, Some(table)).map_err(failed)?.csv
            }
        };

        to_result(&ReadResourceResult {
            contents: vec![ResourceContents {
                uri: params.uri,
                mime_type: uri.mime_type().to_string(),
                text,
            }],
        })
    }
}

/// Decodes method params; absent or `null` params decode to `None`.
fn decode_params<T: DeserializeOwned>(
    params: Option<&Value>,
    method: &str,
) -> Result<Option<T>, JsonRpcErrorData> {
    params
        .filter(|p| !p.is_null())
        .map(|p| serde_json::from_value(p.clone()))
        .transpose()
        .map_err(|e| JsonRpcErrorData::invalid_params(format!("Invalid {method} params: {e}")))
}

fn to_result<T: Serialize>(value: &T) -> Result<Value, JsonRpcErrorData> {
    serde_json::to_value(value).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialise result");
        JsonRpcErrorData::internal("Internal error: failed to serialise result")
    })
}

/// Resolves when the process is asked to stop (SIGINT or SIGTERM).
///
/// If the handlers cannot be installed this never resolves.
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "Failed to install signal handlers");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sigint.recv() => tracing::info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Resolves when the process is asked to stop (Ctrl+C).
///
/// If the handler cannot be installed this never resolves.
#[cfg(windows)]
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received Ctrl+C, initiating graceful shutdown");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{ErrorCode, JsonRpcRequest, RequestId};
    use crate::mcp::transport::FrameReader;
    use tokio::io::{duplex, split, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    type TestServer = McpServer<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn test_server() -> TestServer {
        let (_client, server) = duplex(1024);
        let (reader, writer) = split(server);
        McpServer::new(
            Transport::new(reader, writer),
            Arc::new(WorkbookService::new("missing.xlsx")),
        )
    }

    fn call(server: &mut TestServer, method: &str, params: Value) -> Result<Value, JsonRpcErrorData> {
        let params = (!params.is_null()).then_some(params);
        server.dispatch(Method::parse(method), method, params.as_ref())
    }

    #[test]
    fn server_initial_state() {
        let server = test_server();
        assert_eq!(server.state(), SessionState::Uninitialized);
        assert!(server.protocol_version().is_none());
    }

    #[test]
    fn method_classification() {
        assert_eq!(Method::parse("notifications/initialized"), Method::Initialized);
        assert_eq!(Method::parse("tools/call"), Method::ToolsCall);
        assert_eq!(Method::parse("Tools/Call"), Method::Unknown);
        assert!(!Method::Exit.expects_reply());
        assert!(!Method::Initialized.expects_reply());
        assert!(Method::Unknown.expects_reply());
    }

    #[test]
    fn initialize_echoes_requested_version() {
        let mut server = test_server();
        let result = call(&mut server, "initialize", json!({ "protocolVersion": "2024-11-05" })).unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "excel-mcp");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
        assert_eq!(result["capabilities"]["resources"]["listChanged"], false);
        assert_eq!(server.state(), SessionState::Initialized);
        assert_eq!(server.protocol_version(), Some("2024-11-05"));
    }

    #[test]
    fn initialize_defaults_version() {
        let mut server = test_server();
        let result = call(&mut server, "initialize", Value::Null).unwrap();
        assert_eq!(result["protocolVersion"], DEFAULT_PROTOCOL_VERSION);

        let result = call(&mut server, "initialize", json!({ "protocolVersion": " " })).unwrap();
        assert_eq!(result["protocolVersion"], DEFAULT_PROTOCOL_VERSION);
    }

    #[test]
    fn unknown_method_not_found() {
        let mut server = test_server();
        let err = call(&mut server, "resources/subscribe", Value::Null).unwrap_err();
        assert_eq!(err.code, ErrorCode::MethodNotFound.code());
        assert_eq!(err.message, "Unknown method 'resources/subscribe'.");
    }

    #[test]
    fn tools_call_parameter_errors() {
        let mut server = test_server();

        let err = call(&mut server, "tools/call", Value::Null).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams.code());

        let err = call(&mut server, "tools/call", json!({ "name": "" })).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams.code());

        let err = call(&mut server, "tools/call", json!({ "name": "excel-frobnicate" })).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams.code());
    }

    #[test]
    fn tools_are_served_before_initialize() {
        let mut server = test_server();
        let result = call(&mut server, "tools/list", Value::Null).unwrap();
        assert_eq!(result["tools"].as_array().unwrap().len(), 8);
        assert!(result["nextCursor"].is_null());
        assert_eq!(server.state(), SessionState::Uninitialized);
    }

    #[test]
    fn resource_errors() {
        let mut server = test_server();

        let err = call(&mut server, "resources/read", json!({})).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidParams.code());

        let err = call(&mut server, "resources/read", json!({ "uri": "http://example.com" })).unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError.code());

        let err = call(&mut server, "resources/list", Value::Null).unwrap_err();
        assert_eq!(err.code, ErrorCode::InternalError.code());
        assert!(err.message.starts_with("Workbook not found"));
    }

    #[test]
    fn shutdown_then_exit() {
        let mut server = test_server();
        assert_eq!(call(&mut server, "shutdown", Value::Null).unwrap(), json!({}));
        assert_eq!(server.state(), SessionState::ShuttingDown);
        call(&mut server, "exit", Value::Null).unwrap();
        assert_eq!(server.state(), SessionState::Terminated);
    }

    #[tokio::test]
    async fn loop_answers_in_order_and_stops_on_exit() {
        let (client, server_io) = duplex(64 * 1024);
        let (reader, writer) = split(server_io);
        let mut server = McpServer::new(
            Transport::new(reader, writer),
            Arc::new(WorkbookService::new("missing.xlsx")),
        );

        let (client_read, mut client_write) = split(client);
        let ping = serde_json::to_string(&JsonRpcRequest::new(RequestId::Number(1), "ping", None)).unwrap();
        let input = format!(
            "{ping}\n\
             {{not json}}\n\
             {{\"jsonrpc\":\"2.0\",\"method\":\"bogus/notification\"}}\n\
             {{\"jsonrpc\":\"2.0\",\"id\":\"a\",\"method\":\"bogus\"}}\n\
             {{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"initialized\"}}\n\
             {{\"jsonrpc\":\"2.0\",\"id\":3,\"method\":\"exit\"}}\n\
             {{\"jsonrpc\":\"2.0\",\"id\":4,\"method\":\"ping\"}}\n"
        );
        client_write.write_all(input.as_bytes()).await.unwrap();

        server.run_until(std::future::pending()).await.unwrap();
        assert_eq!(server.state(), SessionState::Terminated);
        drop(server);

        let mut replies = FrameReader::new(client_read);
        let first = replies.read_message().await.unwrap().unwrap();
        assert!(matches!(first, Message::Response(ref r) if r.id == RequestId::Number(1)));

        let second = replies.read_message().await.unwrap().unwrap();
        let Message::Error(parse) = second else {
            panic!("expected parse error, got {second:?}");
        };
        assert_eq!(parse.error.code, ErrorCode::ParseError.code());
        assert!(parse.id.is_none());

        let third = replies.read_message().await.unwrap().unwrap();
        let Message::Error(unknown) = third else {
            panic!("expected method not found, got {third:?}");
        };
        assert_eq!(unknown.id, Some(RequestId::String("a".to_string())));
        assert_eq!(unknown.error.code, ErrorCode::MethodNotFound.code());

        // Nothing for `initialized`, `exit`, or anything after `exit`.
        assert!(replies.read_message().await.unwrap().is_none());
    }

    /// Feeds `input` to a fresh session and returns every reply it wrote.
    async fn replies_to(input: &str) -> Vec<Message> {
        let (client, server_io) = duplex(64 * 1024);
        let (reader, writer) = split(server_io);
        let mut server = McpServer::new(
            Transport::new(reader, writer),
            Arc::new(WorkbookService::new("missing.xlsx")),
        );

        let (client_read, mut client_write) = split(client);
        client_write.write_all(input.as_bytes()).await.unwrap();
        client_write.shutdown().await.unwrap();

        server.run_until(std::future::pending()).await.unwrap();
        assert_eq!(server.state(), SessionState::Terminated);
        drop(server);

        let mut reader = FrameReader::new(client_read);
        let mut replies = Vec::new();
        while let Some(message) = reader.read_message().await.unwrap() {
            replies.push(message);
        }
        replies
    }

    #[tokio::test]
    async fn exit_without_version_is_a_notification() {
        let replies = replies_to(
            "{\"method\":\"exit\"}\n\
             {\"jsonrpc\":\"2.0\",\"id\":9,\"method\":\"ping\"}\n",
        )
        .await;
        assert!(replies.is_empty(), "{replies:?}");
    }

    #[tokio::test]
    async fn messages_without_method_get_no_reply() {
        let replies = replies_to(
            "{\"jsonrpc\":\"2.0\",\"id\":4}\n\
             {\"jsonrpc\":\"2.0\",\"result\":{}}\n\
             {\"jsonrpc\":\"2.0\",\"id\":5,\"result\":{}}\n\
             {\"jsonrpc\":\"2.0\",\"id\":[1],\"method\":\"ping\"}\n\
             {\"jsonrpc\":\"1.0\",\"id\":6,\"method\":\"ping\"}\n",
        )
        .await;
        assert_eq!(replies.len(), 1, "{replies:?}");
        let Message::Error(invalid) = &replies[0] else {
            panic!("expected invalid request, got {:?}", replies[0]);
        };
        assert_eq!(invalid.id, Some(RequestId::Number(6)));
        assert_eq!(invalid.error.code, ErrorCode::InvalidRequest.code());
    }

    #[tokio::test]
    async fn shutdown_future_ends_loop() {
        let (_client, server_io) = duplex(1024);
        let (reader, writer) = split(server_io);
        let mut server = McpServer::new(
            Transport::new(reader, writer),
            Arc::new(WorkbookService::new("missing.xlsx")),
        );

        server.run_until(async {}).await.unwrap();
        assert_eq!(server.state(), SessionState::Terminated);
    }
}
