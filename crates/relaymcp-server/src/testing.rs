//! In-process test peer.
//!
//! [`TestPeer`] plays the client side of a connection against a real
//! [`Server`]: the server runs its full connection loop over an in-memory
//! NDJSON pipe, so tests exercise framing, filters, dispatch and tasks
//! exactly as a subprocess client would.
//!
//! ```ignore
//! let mut peer = TestPeer::start(server);
//! peer.initialize().await?;
//! let pong = peer.request("ping", None).await?;
//! peer.close().await?;
//! ```

use std::collections::VecDeque;
use std::time::Duration;

use relaymcp_core::{McpError, McpResult};
use relaymcp_protocol::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
    RequestId, methods,
};
use relaymcp_transport::{Codec, MessageReader, StdioReader, StdioTransport, Transport};
use serde_json::{Value, json};
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;

use crate::{Server, ServerError};

const PIPE_CAPACITY: usize = 64 * 1024;

/// How long [`TestPeer::recv`] waits before giving up.
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Client side of an in-memory connection to a running server.
pub struct TestPeer {
    reader: StdioReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    codec: Codec,
    next_id: i64,
    stash: VecDeque<JsonRpcMessage>,
    server: JoinHandle<Result<(), ServerError>>,
}

impl TestPeer {
    /// Starts `server` on a fresh connection. Must run inside a tokio
    /// runtime.
    #[must_use]
    pub fn start(server: Server) -> Self {
        let (client, remote) = tokio::io::duplex(PIPE_CAPACITY);
        let (remote_read, remote_write) = tokio::io::split(remote);
        let handle = tokio::spawn(async move {
            server
                .serve(StdioTransport::new(remote_read, remote_write))
                .await
        });

        let (client_read, client_write) = tokio::io::split(client);
        let (reader, _) = StdioTransport::new(client_read, tokio::io::sink()).split();
        Self {
            reader,
            writer: client_write,
            codec: Codec::new(),
            next_id: 1,
            stash: VecDeque::new(),
            server: handle,
        }
    }

    /// Returns a fresh numeric request id.
    pub fn next_id(&mut self) -> RequestId {
        let id = RequestId::Number(self.next_id);
        self.next_id += 1;
        id
    }

    /// Sends one message.
    pub async fn send(&mut self, message: impl Into<JsonRpcMessage>) -> McpResult<()> {
        let bytes = self
            .codec
            .encode(&message.into())
            .map_err(|e| McpError::internal_error(e.to_string()))?;
        self.send_raw(&bytes).await
    }

    /// Writes raw bytes to the server, e.g. a malformed frame.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> McpResult<()> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| McpError::internal_error(e.to_string()))
    }

    /// Sends a notification.
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.send(JsonRpcNotification::new(method, params)).await
    }

    /// Receives the next message, including ones stashed by [`TestPeer::call`].
    ///
    /// # Errors
    ///
    /// Fails on timeout, on a closed connection, or on an undecodable frame.
    pub async fn recv(&mut self) -> McpResult<JsonRpcMessage> {
        if let Some(message) = self.stash.pop_front() {
            return Ok(message);
        }
        self.recv_wire().await
    }

    async fn recv_wire(&mut self) -> McpResult<JsonRpcMessage> {
        match tokio::time::timeout(RECV_TIMEOUT, self.reader.recv()).await {
            Ok(Ok(Some(message))) => Ok(message),
            Ok(Ok(None)) => Err(McpError::internal_error("Server closed the connection")),
            Ok(Err(e)) => Err(McpError::internal_error(e.to_string())),
            Err(_) => Err(McpError::internal_error("Timed out waiting for a message")),
        }
    }

    /// Sends a request with `id` and waits for its response or error.
    ///
    /// Unrelated messages that arrive first are kept for [`TestPeer::recv`].
    pub async fn call(
        &mut self,
        id: RequestId,
        method: &str,
        params: Option<Value>,
    ) -> McpResult<Value> {
        self.send(JsonRpcRequest::new(method, params, id.clone())).await?;
        self.wait_for(&id).await
    }

    /// Sends a request with a fresh id and waits for its answer.
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> McpResult<Value> {
        let id = self.next_id();
        self.call(id, method, params).await
    }

    /// Waits for the answer to request `id`.
    pub async fn wait_for(&mut self, id: &RequestId) -> McpResult<Value> {
        if let Some(pos) = self.stash.iter().position(|m| is_answer_to(m, id)) {
            if let Some(message) = self.stash.remove(pos) {
                return into_outcome(message);
            }
        }
        loop {
            let message = self.recv_wire().await?;
            if is_answer_to(&message, id) {
                return into_outcome(message);
            }
            self.stash.push_back(message);
        }
    }

    /// Answers a request the server sent.
    pub async fn respond(&mut self, id: RequestId, result: Value) -> McpResult<()> {
        self.send(JsonRpcResponse::success(id, result)).await
    }

    /// Performs the `initialize` handshake and sends
    /// `notifications/initialized`. Returns the initialize result.
    pub async fn initialize(&mut self) -> McpResult<Value> {
        let result = self
            .request(
                methods::INITIALIZE,
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": "test-peer", "version": "0.0.0"},
                })),
            )
            .await?;
        self.notify(methods::NOTIFICATION_INITIALIZED, None).await?;
        Ok(result)
    }

    /// Closes the client side and waits for the server to finish.
    ///
    /// # Errors
    ///
    /// Returns the server's error, if it ended with one.
    pub async fn close(mut self) -> Result<(), ServerError> {
        // Only the shutdown matters; the server sees EOF either way.
        let _ = self.writer.shutdown().await;
        match self.server.await {
            Ok(result) => result,
            Err(join) if join.is_panic() => std::panic::resume_unwind(join.into_panic()),
            Err(_) => Ok(()),
        }
    }
}

impl std::fmt::Debug for TestPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestPeer")
            .field("next_id", &self.next_id)
            .field("stashed", &self.stash.len())
            .finish()
    }
}

fn is_answer_to(message: &JsonRpcMessage, id: &RequestId) -> bool {
    match message {
        JsonRpcMessage::Response(resp) => &resp.id == id,
        JsonRpcMessage::Error(err) => err.id.as_ref() == Some(id),
        _ => false,
    }
}

fn into_outcome(message: JsonRpcMessage) -> McpResult<Value> {
    match message {
        JsonRpcMessage::Response(resp) => Ok(resp.result),
        JsonRpcMessage::Error(err) => Err(err.error.into()),
        other => Err(McpError::internal_error(format!(
            "Expected a response, got a {}",
            other.kind()
        ))),
    }
}
