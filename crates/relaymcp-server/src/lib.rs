//! MCP message dispatch engine.
//!
//! This crate turns a transport into a running MCP server:
//! - Session handle with outbound requests and a correlation table
//! - Filter pipeline wrapped around default dispatch
//! - Method router with typed request and notification handlers
//! - Task lifecycle manager for long-running requests
//! - Configuration and logging setup
//!
//! # Example
//!
//! ```ignore
//! use relaymcp_server::{RequestContext, Server, StdioTransport};
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), relaymcp_server::ServerError> {
//!     Server::new("echo", "1.0.0")
//!         .request_handler("echo", |ctx: RequestContext<Value>| async move {
//!             Ok(json!({ "echo": ctx.into_params() }))
//!         })
//!         .build()
//!         .serve_stdio()
//!         .await
//! }
//! ```
//!
//! # Message flow
//!
//! The connection loop reads messages in arrival order. Requests are tracked
//! for cancellation as soon as they are read, and each message then runs on
//! its own tokio task. Ordering holds up to pipeline entry: a message is
//! polled into the filter chain only after the message before it has been
//! polled once, so the synchronous prefix of the outermost filter sees
//! messages in wire order. Past the first suspension point, handlers run
//! concurrently and may finish in any order.
//!
//! Every message, whatever its kind, goes through the connection-wide filters
//! and then the default dispatch. An error that escapes the chain becomes one
//! error response for a request and a log line for anything else; a panic is
//! caught at the same place and reported as an internal error.

#![forbid(unsafe_code)]

mod builder;
mod builtins;
mod config;
mod context;
mod correlation;
mod dispatch;
mod filter;
mod router;
mod session;
mod task_methods;
mod tasks;
pub mod testing;

#[cfg(test)]
mod tests;

pub use builder::ServerBuilder;
pub use builtins::SUPPORTED_PROTOCOL_VERSIONS;
pub use config::{
    CONFIG_ENV, ConfigError, DEFAULT_REQUEST_TIMEOUT_SECS, LoggingConfig, LoggingSection,
    ServerConfig, TaskConfig,
};
pub use context::{MessageContext, NotificationContext, RequestContext};
pub use correlation::{CorrelationTable, PendingResponse, ResponseOutcome, connection_closed};
pub use filter::{Filter, FilteredHandler, MessageHandler, compose};
pub use futures::future::BoxFuture;
pub use relaymcp_transport::{MemoryTransport, StdioTransport, Transport, TransportError};
pub use router::{BoxedNotificationHandler, BoxedRequestHandler, Router, Routes};
pub use session::Session;
pub use task_methods::TaskMethodsFilter;
pub use tasks::{
    DEFAULT_PAGE_SIZE, TaskDefaults, TaskError, TaskManager, TaskOutcome, TaskWaitError,
};
pub use tokio_util::sync::CancellationToken;

use std::panic::AssertUnwindSafe;
use std::pin::pin;
use std::sync::Arc;
use std::task::Poll;

use futures::FutureExt;
use relaymcp_core::logging::{debug, error, info, targets, warn};
use relaymcp_core::{McpError, Services};
use relaymcp_protocol::{Capabilities, JsonRpcMessage, ServerInfo};
use relaymcp_transport::{CodecError, MessageReader, MessageWriter};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::session::ActiveRequestGuard;

/// Errors that end [`Server::serve`].
#[derive(Debug)]
pub enum ServerError {
    /// The transport failed.
    Transport(TransportError),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Transport(e) => write!(f, "Transport failed: {e}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Transport(e) => Some(e),
        }
    }
}

impl From<TransportError> for ServerError {
    fn from(err: TransportError) -> Self {
        ServerError::Transport(err)
    }
}

/// Everything the builder fixes.
pub(crate) struct ServerParts {
    pub(crate) info: ServerInfo,
    pub(crate) capabilities: Capabilities,
    pub(crate) instructions: Option<String>,
    pub(crate) pipeline: Arc<dyn MessageHandler>,
    pub(crate) services: Services,
    pub(crate) max_message_size: usize,
    pub(crate) logging: LoggingConfig,
}

/// An MCP server instance.
///
/// Servers are built using [`ServerBuilder`]. A server is immutable once
/// built; clones share it, and each call to [`Server::serve`] runs one
/// independent connection.
#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerParts>,
}

impl Server {
    /// Creates a new server builder.
    #[must_use]
    #[allow(clippy::new_ret_no_self)]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> ServerBuilder {
        ServerBuilder::new(name, version)
    }

    pub(crate) fn from_parts(parts: ServerParts) -> Self {
        Self {
            inner: Arc::new(parts),
        }
    }

    /// Returns the server info.
    #[must_use]
    pub fn info(&self) -> &ServerInfo {
        &self.inner.info
    }

    /// Returns the server capabilities.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.inner.capabilities
    }

    /// Returns the server instructions.
    #[must_use]
    pub fn instructions(&self) -> Option<&str> {
        self.inner.instructions.as_deref()
    }

    /// Returns the shared services.
    #[must_use]
    pub fn services(&self) -> &Services {
        &self.inner.services
    }

    /// Returns the installed task manager, if any.
    #[must_use]
    pub fn task_manager(&self) -> Option<Arc<TaskManager>> {
        self.inner.services.get::<TaskManager>()
    }

    /// Returns the logging configuration.
    #[must_use]
    pub fn logging(&self) -> &LoggingConfig {
        &self.inner.logging
    }

    /// Serves one connection over the process's stdin/stdout.
    ///
    /// # Errors
    ///
    /// Returns an error if stdin or stdout fails.
    pub async fn serve_stdio(&self) -> Result<(), ServerError> {
        let transport = StdioTransport::stdio().with_max_message_size(self.inner.max_message_size);
        self.serve(transport).await
    }

    /// Serves one connection until the peer disconnects.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails. Undecodable frames are
    /// answered with a parse error and do not end the connection.
    pub async fn serve<T: Transport>(&self, transport: T) -> Result<(), ServerError> {
        self.serve_until(transport, CancellationToken::new()).await
    }

    /// Serves one connection until the peer disconnects or `shutdown` fires.
    ///
    /// On the way out, requests this server sent to the client fail with a
    /// connection-closed error, in-flight inbound requests are cancelled and
    /// awaited, and queued outbound messages are written before the writer
    /// closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport fails.
    pub async fn serve_until<T: Transport>(
        &self,
        transport: T,
        shutdown: CancellationToken,
    ) -> Result<(), ServerError> {
        let (mut reader, writer) = transport.split();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let session = Session::new(
            self.inner.info.clone(),
            self.inner.capabilities.clone(),
            self.inner.instructions.clone(),
            self.inner.services.clone(),
            outbound_tx,
        );
        info!(
            target: targets::SERVER,
            "Session {} started for {} {}",
            session.id(),
            self.inner.info.name,
            self.inner.info.version
        );

        let writer_stop = CancellationToken::new();
        let writer_task = tokio::spawn(write_loop(writer, outbound_rx, writer_stop.clone()));

        let connection = shutdown.child_token();
        let mut in_flight = JoinSet::new();
        let mut last_entry = None;

        let outcome = loop {
            while let Some(joined) = in_flight.try_join_next() {
                log_join_error(joined);
            }

            let next = tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    info!(target: targets::SERVER, "Shutdown requested");
                    break Ok(());
                }
                next = reader.recv() => next,
            };

            match next {
                Ok(Some(message)) => {
                    let cancellation = connection.child_token();
                    let active = match &message {
                        JsonRpcMessage::Request(req) => {
                            match session.track_request(req.id.clone(), cancellation.clone()) {
                                Ok(guard) => Some(guard),
                                Err(err) => {
                                    if let Err(e) = session.send_error(Some(req.id.clone()), err) {
                                        debug!(target: targets::SERVER, "Could not reject duplicate id: {}", e);
                                    }
                                    continue;
                                }
                            }
                        }
                        _ => None,
                    };
                    in_flight.spawn(process_message(
                        Arc::clone(&self.inner.pipeline),
                        session.clone(),
                        message,
                        cancellation,
                        active,
                        EntryTicket::after(&mut last_entry),
                    ));
                }
                Ok(None) | Err(TransportError::Closed) => {
                    info!(target: targets::SERVER, "Client closed the connection");
                    break Ok(());
                }
                Err(TransportError::Codec(err)) => {
                    warn!(target: targets::TRANSPORT, "Rejected inbound frame: {}", err);
                    let reply = match err {
                        CodecError::MessageTooLarge(_) => McpError::invalid_request(err.to_string()),
                        CodecError::Json(_) => McpError::parse_error(err.to_string()),
                    };
                    if let Err(e) = session.send_error(None, reply) {
                        debug!(target: targets::SERVER, "Could not report parse error: {}", e);
                    }
                }
                Err(err) => {
                    error!(target: targets::TRANSPORT, "Transport error: {}", err);
                    break Err(ServerError::Transport(err));
                }
            }
        };

        let failed = session.correlation().fail_all(&connection_closed());
        if failed > 0 {
            debug!(target: targets::SERVER, "Failed {} pending outbound requests", failed);
        }
        connection.cancel();
        while let Some(joined) = in_flight.join_next().await {
            log_join_error(joined);
        }

        writer_stop.cancel();
        let written = match writer_task.await {
            Ok(result) => result.map_err(ServerError::from),
            Err(join) => {
                error!(target: targets::SERVER, "Writer task failed: {}", join);
                Ok(())
            }
        };
        info!(target: targets::SERVER, "Session {} ended", session.id());

        outcome.and(written)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("info", &self.inner.info)
            .field("capabilities", &self.inner.capabilities)
            .finish()
    }
}

/// Drains the outbound queue into the writer until stopped, then flushes
/// what is still queued and closes.
async fn write_loop<W: MessageWriter>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
    stop: CancellationToken,
) -> Result<(), TransportError> {
    loop {
        tokio::select! {
            biased;
            message = outbound.recv() => match message {
                Some(message) => writer.send(&message).await?,
                None => break,
            },
            () = stop.cancelled() => {
                while let Ok(message) = outbound.try_recv() {
                    writer.send(&message).await?;
                }
                break;
            }
        }
    }
    writer.close().await
}

/// Orders pipeline entry across the tasks of one connection.
///
/// Each ticket waits for its predecessor to be polled once, then signals its
/// own successor after its first poll. A predecessor that is dropped early
/// also releases the wait.
struct EntryTicket {
    previous: Option<oneshot::Receiver<()>>,
    entered: oneshot::Sender<()>,
}

impl EntryTicket {
    fn after(last: &mut Option<oneshot::Receiver<()>>) -> Self {
        let (entered, next) = oneshot::channel();
        Self {
            previous: last.replace(next),
            entered,
        }
    }

    async fn wait_turn(&mut self) {
        if let Some(previous) = self.previous.take() {
            // An error only means the predecessor is gone.
            let _ = previous.await;
        }
    }

    fn release(self) {
        let _ = self.entered.send(());
    }
}

/// Runs one inbound message through the pipeline and reports what escapes.
async fn process_message(
    pipeline: Arc<dyn MessageHandler>,
    session: Session,
    message: JsonRpcMessage,
    cancellation: CancellationToken,
    _active: Option<ActiveRequestGuard>,
    mut ticket: EntryTicket,
) {
    let request_id = match &message {
        JsonRpcMessage::Request(req) => Some(req.id.clone()),
        _ => None,
    };
    let kind = message.kind();
    let method = message.method().unwrap_or_default().to_owned();

    ticket.wait_turn().await;
    debug!(target: targets::SERVER, "<- {} {}", kind, method);

    let mut ctx = MessageContext::new(session.clone(), message, cancellation);
    let mut run = pin!(AssertUnwindSafe(pipeline.handle(&mut ctx)).catch_unwind());
    let first = std::future::poll_fn(|cx| Poll::Ready(run.as_mut().poll_unpin(cx))).await;
    ticket.release();
    let caught = match first {
        Poll::Ready(caught) => caught,
        Poll::Pending => run.await,
    };

    let outcome = match caught {
        Ok(result) => result,
        Err(panic) => {
            let detail = tasks::panic_message(panic.as_ref());
            error!(target: targets::SERVER, "Handler for {} panicked: {}", method, detail);
            Err(McpError::internal_error(format!("Handler panicked: {detail}")))
        }
    };

    let Err(err) = outcome else {
        return;
    };
    match request_id {
        Some(id) => {
            debug!(target: targets::SERVER, "{} (id={}) failed: {}", method, id, err);
            if let Err(e) = session.send_error(Some(id), err) {
                debug!(target: targets::SERVER, "Could not send error response: {}", e);
            }
        }
        None => warn!(target: targets::SERVER, "{} {} failed: {}", kind, method, err),
    }
}

fn log_join_error(joined: Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        error!(target: targets::SERVER, "Message task failed: {}", err);
    }
}
