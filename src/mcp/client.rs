//! Client side of an MCP session.
//!
//! [`McpClient`] correlates requests with responses by id. It sends one
//! request, then reads until the response carrying that id arrives;
//! anything else read meanwhile is dropped. Calls take `&mut self`, so
//! there is only ever one request in flight per client.
//!
//! There is no timeout on a request: a peer that never answers leaves the
//! call pending. Wrap a call in `tokio::time::timeout` where that matters.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::mcp::error::{ClientError, FrameError};
use crate::mcp::protocol::{
    JsonRpcNotification, JsonRpcRequest, Message, RequestId, DEFAULT_PROTOCOL_VERSION,
};
use crate::mcp::transport::Transport;
use crate::mcp::types::{
    Implementation, InitializeParams, InitializeResult, ListResourcesResult, ListToolsResult,
    ReadResourceResult, ToolCallParams, ToolCallResult,
};

/// A JSON-RPC client over one pair of streams.
pub struct McpClient<R, W> {
    transport: Transport<R, W>,
    next_id: i64,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> McpClient<R, W> {
    /// Creates a client on `transport`. The first request gets id 1.
    #[must_use]
    pub const fn new(transport: Transport<R, W>) -> Self {
        Self {
            transport,
            next_id: 1,
        }
    }

    /// Sends a request and waits for its response.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Rpc` if the peer answers with an error, or a
    /// connection error if the stream closes or breaks first.
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;

        tracing::debug!(method, id = %id, "Sending request");
        self.transport
            .write_message(&JsonRpcRequest::new(id.clone(), method, params))
            .await?;

        loop {
            let message = match self.transport.read_message().await {
                Ok(Some(message)) => message,
                Ok(None) => return Err(ClientError::ConnectionClosed),
                Err(FrameError::Protocol(e)) => return Err(e.into()),
                Err(FrameError::Parse(e)) => {
                    tracing::warn!(error = %e.error.message, "Skipping malformed message from server");
                    continue;
                }
            };

            if message.id() != Some(&id) {
                tracing::debug!(expected = %id, received = ?message.id(), "Discarding unrelated message");
                continue;
            }

            return match message {
                Message::Response(response) => Ok(response.result),
                Message::Error(error) => Err(ClientError::Rpc {
                    code: error.error.code,
                    message: error.error.message,
                    data: error.error.data,
                }),
                // The server does not send requests to its client.
                Message::Request(_) | Message::Notification(_) | Message::Ignored(_) => continue,
            };
        }
    }

    /// Sends a request and decodes its result.
    ///
    /// # Errors
    ///
    /// As [`Self::request`], plus `ClientError::InvalidResponse` if the
    /// result does not decode as `T`.
    pub async fn request_as<T: DeserializeOwned>(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<T, ClientError> {
        let result = self.request(method, params).await?;
        serde_json::from_value(result).map_err(|source| ClientError::InvalidResponse {
            method: method.to_string(),
            source,
        })
    }

    /// Sends a notification.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be written.
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        tracing::debug!(method, "Sending notification");
        self.transport
            .write_message(&JsonRpcNotification::new(method, params))
            .await?;
        Ok(())
    }

    /// Performs the `initialize` request.
    ///
    /// # Errors
    ///
    /// See [`Self::request_as`].
    pub async fn initialize(&mut self) -> Result<InitializeResult, ClientError> {
        let params = InitializeParams {
            protocol_version: Some(DEFAULT_PROTOCOL_VERSION.to_string()),
            capabilities: json!({}),
            client_info: Some(Implementation::client()),
        };
        self.request_as("initialize", Some(to_params(&params)?)).await
    }

    /// Lists the server's tools.
    ///
    /// # Errors
    ///
    /// See [`Self::request_as`].
    pub async fn list_tools(&mut self) -> Result<ListToolsResult, ClientError> {
        self.request_as("tools/list", None).await
    }

    /// Calls a tool.
    ///
    /// A tool that reports a failure still returns `Ok`, with
    /// `is_error == true`.
    ///
    /// # Errors
    ///
    /// See [`Self::request_as`].
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<ToolCallResult, ClientError> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments,
        };
        self.request_as("tools/call", Some(to_params(&params)?)).await
    }

    /// Lists the server's resources.
    ///
    /// # Errors
    ///
    /// See [`Self::request_as`].
    pub async fn list_resources(&mut self) -> Result<ListResourcesResult, ClientError> {
        self.request_as("resources/list", None).await
    }

    /// Reads a resource.
    ///
    /// # Errors
    ///
    /// See [`Self::request_as`].
    pub async fn read_resource(&mut self, uri: &str) -> Result<ReadResourceResult, ClientError> {
        self.request_as("resources/read", Some(json!({ "uri": uri }))).await
    }

    /// Pings the server.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn ping(&mut self) -> Result<(), ClientError> {
        self.request("ping", None).await.map(drop)
    }

    /// Asks the server to shut down.
    ///
    /// # Errors
    ///
    /// See [`Self::request`].
    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        self.request("shutdown", None).await.map(drop)
    }

    /// Closes the write half, signalling end of input to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be shut down.
    pub async fn close(&mut self) -> Result<(), ClientError> {
        self.transport.close().await?;
        Ok(())
    }
}

fn to_params<T: Serialize>(params: &T) -> Result<Value, ClientError> {
    serde_json::to_value(params).map_err(|source| ClientError::InvalidResponse {
        method: "serialise params".to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::protocol::{JsonRpcError, JsonRpcErrorData, JsonRpcResponse};
    use crate::mcp::transport::{FrameReader, FrameWriter};
    use tokio::io::{duplex, split, AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

    type TestClient = McpClient<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn pair() -> (TestClient, FrameReader<ReadHalf<DuplexStream>>, WriteHalf<DuplexStream>) {
        let (client_io, peer_io) = duplex(64 * 1024);
        let (client_read, client_write) = split(client_io);
        let (peer_read, peer_write) = split(peer_io);
        (
            McpClient::new(Transport::new(client_read, client_write)),
            FrameReader::new(peer_read),
            peer_write,
        )
    }

    async fn next_request(peer: &mut FrameReader<ReadHalf<DuplexStream>>) -> JsonRpcRequest {
        match peer.read_message().await.unwrap().unwrap() {
            Message::Request(request) => request,
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ids_start_at_one_and_increase() {
        let (mut client, mut peer, peer_write) = pair();

        let server = tokio::spawn(async move {
            let mut writer = FrameWriter::new(peer_write);
            let mut ids = Vec::new();
            for _ in 0..3 {
                let request = next_request(&mut peer).await;
                ids.push(request.id.clone());
                writer
                    .write_message(&JsonRpcResponse::success(request.id, json!({})))
                    .await
                    .unwrap();
            }
            ids
        });

        client.ping().await.unwrap();
        client.ping().await.unwrap();
        client.ping().await.unwrap();

        let ids = server.await.unwrap();
        assert_eq!(ids, vec![RequestId::Number(1), RequestId::Number(2), RequestId::Number(3)]);
    }

    #[tokio::test]
    async fn unrelated_messages_are_discarded() {
        let (mut client, mut peer, mut peer_write) = pair();

        let server = tokio::spawn(async move {
            let request = next_request(&mut peer).await;

            // Stale response, garbage, and a notification before the real answer.
            let mut raw = Vec::new();
            raw.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"id\":99,\"result\":{\"stale\":true}}\n");
            raw.extend_from_slice(b"{garbage}\n");
            raw.extend_from_slice(b"{\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\"}\n");
            peer_write.write_all(&raw).await.unwrap();

            let mut writer = FrameWriter::new(peer_write);
            writer
                .write_message(&JsonRpcResponse::success(request.id, json!({ "answer": 42 })))
                .await
                .unwrap();
        });

        let result = client.request("custom/method", None).await.unwrap();
        assert_eq!(result, json!({ "answer": 42 }));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rpc_error_carries_code_and_message() {
        let (mut client, mut peer, peer_write) = pair();

        let server = tokio::spawn(async move {
            let request = next_request(&mut peer).await;
            let mut writer = FrameWriter::new(peer_write);
            let error = JsonRpcError::new(
                Some(request.id),
                JsonRpcErrorData::method_not_found(&request.method).with_data(json!({ "hint": "none" })),
            );
            writer.write_message(&error).await.unwrap();
        });

        let err = client.request("nope", None).await.unwrap_err();
        let ClientError::Rpc { code, message, data } = err else {
            panic!("expected RPC error, got {err:?}");
        };
        assert_eq!(code, -32601);
        assert_eq!(message, "Unknown method 'nope'.");
        assert_eq!(data, Some(json!({ "hint": "none" })));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn closed_connection_is_reported() {
        let (mut client, peer, peer_write) = pair();
        drop(peer);
        drop(peer_write);

        let err = client.ping().await.unwrap_err();
        assert!(matches!(err, ClientError::ConnectionClosed | ClientError::Protocol(_)));
    }

    #[tokio::test]
    async fn typed_result_mismatch_is_invalid_response() {
        let (mut client, mut peer, peer_write) = pair();

        let server = tokio::spawn(async move {
            let request = next_request(&mut peer).await;
            let mut writer = FrameWriter::new(peer_write);
            writer
                .write_message(&JsonRpcResponse::success(request.id, json!({ "tools": 7 })))
                .await
                .unwrap();
        });

        let err = client.list_tools().await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse { ref method, .. } if method == "tools/list"));
        server.await.unwrap();
    }
}
