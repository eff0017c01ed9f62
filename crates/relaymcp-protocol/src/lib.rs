//! MCP protocol types and JSON-RPC implementation.
//!
//! This crate provides:
//! - JSON-RPC 2.0 envelopes that preserve unknown members
//! - Params and results for the methods the core serves itself
//! - Task wire types (snapshots, statuses, task metadata)
//! - Method name constants
//!
//! # Wire Format
//!
//! Messages are JSON objects; the transport crate frames them as
//! newline-delimited JSON (NDJSON).

#![forbid(unsafe_code)]

mod jsonrpc;
mod messages;
pub mod methods;
mod types;

pub use jsonrpc::{
    JSONRPC_VERSION, JsonRpcError, JsonRpcErrorResponse, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use messages::*;
pub use types::*;
