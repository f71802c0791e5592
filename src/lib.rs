//! excel-mcp: MCP server and client for Excel workbooks
//!
//! This library exposes the contents of an `.xlsx` workbook to AI assistants
//! and other callers through the Model Context Protocol, spoken as JSON-RPC
//! 2.0 over standard input and output.
//!
//! # Architecture
//!
//! - **Server**: one session per process, reading and answering one message
//!   at a time. Tools search, preview and edit the workbook; resources
//!   expose its structure and the first rows of each worksheet and table.
//! - **Client**: spawns a server, performs the handshake and correlates
//!   requests with responses.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`error`]: Configuration error types
//! - [`mcp`]: MCP protocol implementation
//! - [`workbook`]: Workbook reading, paging and writing

pub mod config;
pub mod error;
pub mod mcp;
pub mod workbook;
