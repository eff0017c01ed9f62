//! Correlation of outbound requests with their responses.
//!
//! A slot is registered for an id before the request goes out. The reader
//! side resolves it when the matching response (or error) arrives. Each slot
//! is a oneshot channel, so a response is delivered at most once.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use relaymcp_core::logging::{debug, targets, warn};
use relaymcp_core::{McpError, McpResult};
use relaymcp_protocol::RequestId;
use serde_json::Value;
use tokio::sync::oneshot;

/// What the peer answered: a result value or a JSON-RPC error.
pub type ResponseOutcome = McpResult<Value>;

/// Outstanding outbound requests, keyed by request id.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    state: Mutex<TableState>,
}

#[derive(Debug, Default)]
struct TableState {
    pending: HashMap<RequestId, oneshot::Sender<ResponseOutcome>>,
    closed: bool,
}

impl CorrelationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs a pending slot for `id`.
    ///
    /// Must be called before the request is transmitted so that a fast
    /// response cannot arrive ahead of its slot.
    ///
    /// # Errors
    ///
    /// Fails if the id is already pending or the connection has closed.
    pub fn register(&self, id: RequestId) -> McpResult<PendingResponse> {
        let mut state = self.lock();
        if state.closed {
            return Err(connection_closed());
        }
        if state.pending.contains_key(&id) {
            return Err(McpError::invalid_request(format!(
                "Request id {id} is already pending"
            )));
        }
        let (tx, rx) = oneshot::channel();
        state.pending.insert(id.clone(), tx);
        debug!(target: targets::SESSION, "registered pending request {}", id);
        Ok(PendingResponse { id, rx })
    }

    /// Delivers the peer's answer for `id`.
    ///
    /// Returns `false` (and logs a protocol warning) when no slot is pending
    /// for the id, e.g. an unknown or already answered id.
    pub fn resolve(&self, id: &RequestId, outcome: ResponseOutcome) -> bool {
        let slot = self.lock().pending.remove(id);
        let Some(tx) = slot else {
            warn!(
                target: targets::SESSION,
                "Received response for unknown request id {}", id
            );
            return false;
        };
        if tx.send(outcome).is_err() {
            debug!(target: targets::SESSION, "waiter for request {} is gone", id);
        }
        true
    }

    /// Drops the slot for `id` without delivering anything.
    ///
    /// Returns `true` if a slot was pending.
    pub fn cancel(&self, id: &RequestId) -> bool {
        self.lock().pending.remove(id).is_some()
    }

    /// Fails every pending slot and refuses further registrations.
    ///
    /// Returns the number of slots failed.
    pub fn fail_all(&self, error: &McpError) -> usize {
        let drained: Vec<_> = {
            let mut state = self.lock();
            state.closed = true;
            state.pending.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        if count > 0 {
            debug!(target: targets::SESSION, "failed {} pending requests", count);
        }
        count
    }

    /// Returns true if `id` is awaiting a response.
    #[must_use]
    pub fn is_pending(&self, id: &RequestId) -> bool {
        self.lock().pending.contains_key(id)
    }

    /// Number of pending slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The receiving side of a registered slot.
#[derive(Debug)]
pub struct PendingResponse {
    id: RequestId,
    rx: oneshot::Receiver<ResponseOutcome>,
}

impl PendingResponse {
    /// The id this slot answers.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Waits for the answer.
    ///
    /// A slot removed by [`CorrelationTable::cancel`] reports a cancellation.
    pub async fn wait(self) -> ResponseOutcome {
        self.rx.await.unwrap_or_else(|_| Err(McpError::request_cancelled()))
    }
}

/// Error delivered to waiters when the connection goes away.
#[must_use]
pub fn connection_closed() -> McpError {
    McpError::internal_error("Connection closed")
}
