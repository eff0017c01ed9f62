//! MCP session management.
//!
//! A [`Session`] is the per-connection handle shared by the connection loop,
//! every message context, and any background work a handler starts. It owns
//! the outbound queue, the correlation table for server-initiated requests,
//! and the state negotiated during `initialize`.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relaymcp_core::logging::{debug, targets, trace, warn};
use relaymcp_core::{McpError, McpResult, Services};
use relaymcp_protocol::{
    Capabilities, ClientInfo, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RequestId, ServerInfo, methods,
};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::correlation::{CorrelationTable, connection_closed};

/// Handle to one client connection.
///
/// Cloning is cheap; clones refer to the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: String,
    server_info: ServerInfo,
    server_capabilities: Capabilities,
    instructions: Option<String>,
    peer: Mutex<PeerState>,
    outbound: mpsc::UnboundedSender<JsonRpcMessage>,
    correlation: CorrelationTable,
    next_request_id: AtomicI64,
    active_requests: Mutex<HashMap<RequestId, CancellationToken>>,
    services: Services,
}

#[derive(Debug, Default)]
struct PeerState {
    initialized: bool,
    client_info: Option<ClientInfo>,
    client_capabilities: Option<Capabilities>,
    protocol_version: Option<String>,
}

impl Session {
    pub(crate) fn new(
        server_info: ServerInfo,
        server_capabilities: Capabilities,
        instructions: Option<String>,
        services: Services,
        outbound: mpsc::UnboundedSender<JsonRpcMessage>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: uuid::Uuid::new_v4().to_string(),
                server_info,
                server_capabilities,
                instructions,
                peer: Mutex::new(PeerState::default()),
                outbound,
                correlation: CorrelationTable::new(),
                next_request_id: AtomicI64::new(1),
                active_requests: Mutex::new(HashMap::new()),
                services,
            }),
        }
    }

    fn peer(&self) -> MutexGuard<'_, PeerState> {
        self.inner.peer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Unique id of this connection, for logging.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Returns whether the client has completed `initialize`.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.peer().initialized
    }

    /// Records the client's side of the handshake.
    pub(crate) fn initialize(
        &self,
        client_info: ClientInfo,
        client_capabilities: Capabilities,
        protocol_version: String,
    ) {
        let mut peer = self.peer();
        peer.client_info = Some(client_info);
        peer.client_capabilities = Some(client_capabilities);
        peer.protocol_version = Some(protocol_version);
        peer.initialized = true;
    }

    /// Returns the client info if initialized.
    #[must_use]
    pub fn client_info(&self) -> Option<ClientInfo> {
        self.peer().client_info.clone()
    }

    /// Returns the client capabilities if initialized.
    #[must_use]
    pub fn client_capabilities(&self) -> Option<Capabilities> {
        self.peer().client_capabilities.clone()
    }

    /// Returns the negotiated protocol version.
    #[must_use]
    pub fn protocol_version(&self) -> Option<String> {
        self.peer().protocol_version.clone()
    }

    /// Returns the server info.
    #[must_use]
    pub fn server_info(&self) -> &ServerInfo {
        &self.inner.server_info
    }

    /// Returns the server capabilities.
    #[must_use]
    pub fn server_capabilities(&self) -> &Capabilities {
        &self.inner.server_capabilities
    }

    /// Returns the server instructions.
    #[must_use]
    pub fn instructions(&self) -> Option<&str> {
        self.inner.instructions.as_deref()
    }

    /// Returns the service registry.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// Looks up a service by type.
    #[must_use]
    pub fn service<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.inner.services.get::<T>()
    }

    /// Returns the outbound request correlation table.
    #[must_use]
    pub fn correlation(&self) -> &CorrelationTable {
        &self.inner.correlation
    }

    /// Queues a message for the writer.
    pub(crate) fn send_message(&self, message: JsonRpcMessage) -> McpResult<()> {
        trace!(target: targets::SESSION, "queue {}", message.kind());
        self.inner
            .outbound
            .send(message)
            .map_err(|_| connection_closed())
    }

    /// Sends a success response.
    pub fn send_response(&self, id: RequestId, result: Value) -> McpResult<()> {
        self.send_message(JsonRpcResponse::success(id, result).into())
    }

    /// Sends an error response. `None` produces a `null` id.
    pub fn send_error(&self, id: Option<RequestId>, error: McpError) -> McpResult<()> {
        self.send_message(JsonRpcErrorResponse::new(id, error).into())
    }

    /// Sends a notification to the client.
    pub fn send_notification(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.send_message(JsonRpcNotification::new(method, params).into())
    }

    /// Sends a request to the client and waits for its answer.
    ///
    /// Request ids come from a per-session counter. If `cancel` fires first,
    /// the local wait is abandoned, the pending slot is removed and a
    /// `notifications/cancelled` is sent to the client.
    ///
    /// # Errors
    ///
    /// Returns the client's error, a cancellation error, or a
    /// connection-closed error.
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<Value>,
        cancel: &CancellationToken,
    ) -> McpResult<Value> {
        let id = RequestId::Number(self.inner.next_request_id.fetch_add(1, Ordering::Relaxed));
        let pending = self.inner.correlation.register(id.clone())?;

        debug!(target: targets::SESSION, "-> {} (id={})", method, id);
        if let Err(err) = self.send_message(JsonRpcRequest::new(method, params, id.clone()).into()) {
            self.inner.correlation.cancel(&id);
            return Err(err);
        }

        tokio::select! {
            outcome = pending.wait() => outcome,
            () = cancel.cancelled() => {
                self.inner.correlation.cancel(&id);
                let params = serde_json::json!({
                    "requestId": id,
                    "reason": "cancelled by server",
                });
                if let Err(err) = self.send_notification(methods::NOTIFICATION_CANCELLED, Some(params)) {
                    debug!(target: targets::SESSION, "could not send cancellation for {}: {}", id, err);
                }
                Err(McpError::request_cancelled())
            }
        }
    }

    /// Tracks an in-flight inbound request so it can be cancelled by id.
    ///
    /// # Errors
    ///
    /// Returns an invalid-request error if a request with the same id is
    /// still in flight. The earlier request stays tracked.
    pub(crate) fn track_request(
        &self,
        id: RequestId,
        token: CancellationToken,
    ) -> McpResult<ActiveRequestGuard> {
        let mut active = self.active_requests();
        if active.contains_key(&id) {
            warn!(
                target: targets::SESSION,
                "Rejected duplicate in-flight requestId={}", id
            );
            return Err(McpError::invalid_request(format!(
                "Request id {id} is already in flight"
            )));
        }
        active.insert(id.clone(), token);
        Ok(ActiveRequestGuard {
            session: self.clone(),
            id,
        })
    }

    /// Cancels an in-flight inbound request. Returns false if none matched.
    pub(crate) fn cancel_request(&self, id: &RequestId) -> bool {
        let token = self.active_requests().get(id).cloned();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Number of inbound requests currently being handled.
    #[must_use]
    pub fn active_request_count(&self) -> usize {
        self.active_requests().len()
    }

    fn active_requests(&self) -> MutexGuard<'_, HashMap<RequestId, CancellationToken>> {
        self.inner
            .active_requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("initialized", &self.is_initialized())
            .field("pending_outbound", &self.inner.correlation.len())
            .finish()
    }
}

/// Removes an inbound request from the active map when dropped.
pub(crate) struct ActiveRequestGuard {
    session: Session,
    id: RequestId,
}

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.session.active_requests().remove(&self.id);
    }
}

#[cfg(test)]
pub(crate) fn test_session() -> (Session, mpsc::UnboundedReceiver<JsonRpcMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = Session::new(
        ServerInfo::new("test-server", "0.0.0"),
        Capabilities::new(),
        None,
        Services::empty(),
        tx,
    );
    (session, rx)
}
