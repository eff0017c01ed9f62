//! relaymcp: an MCP message dispatch engine.
//!
//! This facade re-exports the workspace crates:
//!
//! - [`core`]: errors, logging targets, per-message items and services
//! - [`protocol`]: JSON-RPC envelopes and MCP message types
//! - [`transport`]: NDJSON codec, stdio and in-memory transports
//! - [`server`]: sessions, filters, routing, tasks and the connection loop
//!
//! Most programs only need the [`prelude`].
//!
//! # Example
//!
//! ```ignore
//! use relaymcp::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ServerError> {
//!     LoggingConfig::from_env().init();
//!
//!     Server::new("reports", "0.1.0")
//!         .with_tasks()
//!         .task_request_handler("reports/build", |ctx: RequestContext<serde_json::Value>| async move {
//!             ctx.report_progress(0.5, Some(1.0), Some("collecting"))?;
//!             Ok(serde_json::json!({ "rows": 42 }))
//!         })
//!         .build()
//!         .serve_stdio()
//!         .await
//! }
//! ```

#![forbid(unsafe_code)]

pub use relaymcp_core as core;
pub use relaymcp_protocol as protocol;
pub use relaymcp_server as server;
pub use relaymcp_transport as transport;

pub use relaymcp_server::testing;

/// Commonly used types.
pub mod prelude {
    pub use relaymcp_core::{Items, McpError, McpErrorCode, McpResult, Services};
    pub use relaymcp_protocol::{
        Capabilities, JsonRpcMessage, RequestId, Task, TaskId, TaskStatus, methods,
    };
    pub use relaymcp_server::{
        BoxFuture, CancellationToken, Filter, LoggingConfig, MessageContext, MessageHandler,
        NotificationContext, RequestContext, Server, ServerBuilder, ServerConfig, ServerError,
        Session, TaskManager, TaskOutcome,
    };
    pub use relaymcp_transport::{StdioTransport, Transport, memory_pair};
}
