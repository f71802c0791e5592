//! Error types for the MCP transport, correlator and process host.

use std::io;

use serde_json::Value;
use thiserror::Error;

use crate::mcp::protocol::JsonRpcError;

/// A fatal failure of the byte stream carrying JSON-RPC frames.
///
/// Once a `ProtocolError` is observed the stream is no longer in a known
/// position and the session must be torn down.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The underlying stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A header block ended without a `Content-Length` header.
    #[error("Missing Content-Length header in JSON-RPC message")]
    MissingContentLength,

    /// The `Content-Length` header value is not a byte count.
    #[error("Invalid Content-Length header value '{value}'")]
    InvalidContentLength {
        /// The raw header value.
        value: String,
    },

    /// The stream closed part-way through a frame.
    #[error("Unexpected end of stream while reading {context}")]
    UnexpectedEof {
        /// Which part of the frame was being read.
        context: &'static str,
    },
}

/// A failure reading one frame.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream itself is broken; fatal.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The frame was read completely but does not hold a valid message.
    ///
    /// Carries the error reply a server should send back.
    #[error("Malformed JSON-RPC message: {}", .0.error.message)]
    Parse(JsonRpcError),
}

impl FrameError {
    /// Returns `true` if the stream cannot be read any further.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Protocol(_))
    }
}

/// What a caller of the client-side correlator or process host can observe.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The peer closed its end of the connection.
    #[error("Connection to the MCP server was lost")]
    ConnectionClosed,

    /// The stream broke mid-frame or could not be written.
    #[error("Connection to the MCP server was lost: {0}")]
    Protocol(#[from] ProtocolError),

    /// The peer answered with a JSON-RPC error object.
    #[error("MCP request failed ({code}): {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i32,
        /// Error message reported by the peer.
        message: String,
        /// Optional structured error data.
        data: Option<Value>,
    },

    /// The peer answered with a result that does not have the expected shape.
    #[error("Invalid response to '{method}': {source}")]
    InvalidResponse {
        /// The method whose result could not be decoded.
        method: String,
        /// The decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// The server process could not be started.
    #[error("Failed to start MCP server '{program}': {source}")]
    Spawn {
        /// Program that was being launched.
        program: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },

    /// The server process could not be waited on or stopped.
    #[error("Failed to manage MCP server process: {0}")]
    Process(#[source] io::Error),

    /// A bounded wait ran out.
    #[error("Timed out waiting for {0}")]
    Timeout(&'static str),
}

impl ClientError {
    /// Returns the JSON-RPC error code if this is an RPC error.
    #[must_use]
    pub const fn rpc_code(&self) -> Option<i32> {
        match self {
            Self::Rpc { code, .. } => Some(*code),
            _ => None,
        }
    }
}
