//! Model Context Protocol (MCP) engine.
//!
//! JSON-RPC 2.0 over a pair of byte streams, in both roles: the server
//! session that exposes a workbook as tools and resources, and the client
//! that drives such a server as a child process.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── server ────────────────────────────┐
//! │  Transport ──▶ McpServer ──▶ ToolRegistry ──▶ WorkbookService  │
//! │  (framing)     (dispatch)    (tools)                           │
//! └────────────────────────────────────────────────────────────────┘
//! ┌──────────────────────────── client ────────────────────────────┐
//! │  ProcessHost ──▶ McpClient ──▶ Transport ──▶ child stdin/stdout │
//! │  (spawn/stop)    (correlate)   (framing)                        │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! The server answers `initialize` with the version the client asked for,
//! or [`protocol::DEFAULT_PROTOCOL_VERSION`] when it asked for none.

pub mod client;
pub mod error;
pub mod host;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod tools;
pub mod transport;
pub mod types;

pub use client::McpClient;
pub use error::{ClientError, FrameError, ProtocolError};
pub use host::{HostOptions, ProcessHost};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, Message, RequestId};
pub use server::McpServer;
pub use tools::{Tool, ToolRegistry};
pub use transport::{StdioTransport, Transport};
