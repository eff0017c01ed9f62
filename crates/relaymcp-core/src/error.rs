//! Error types for MCP operations.
//!
//! Every locally recoverable failure inside the dispatch engine is an
//! [`McpError`]. The server converts it into a JSON-RPC error object at the
//! outermost boundary, so handlers and filters never build wire errors
//! themselves.

use serde::{Deserialize, Serialize};

/// Error codes surfaced through the JSON-RPC error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum McpErrorCode {
    /// Invalid JSON was received (-32700).
    ParseError,
    /// The JSON sent is not a valid request object (-32600).
    InvalidRequest,
    /// The method does not exist or is not available (-32601).
    MethodNotFound,
    /// Invalid method parameters (-32602).
    InvalidParams,
    /// Internal JSON-RPC error (-32603).
    InternalError,
    /// The request did not finish within its timeout (-32001).
    RequestTimeout,
    /// The requested resource does not exist (-32002).
    ResourceNotFound,
    /// The request was cancelled by the peer or the caller (-32800).
    RequestCancelled,
    /// Any other code, passed through unchanged.
    Custom(i32),
}

impl McpErrorCode {
    /// Returns the numeric JSON-RPC code.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::RequestTimeout => -32001,
            Self::ResourceNotFound => -32002,
            Self::RequestCancelled => -32800,
            Self::Custom(code) => code,
        }
    }
}

impl From<McpErrorCode> for i32 {
    fn from(code: McpErrorCode) -> Self {
        code.code()
    }
}

impl From<i32> for McpErrorCode {
    fn from(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            -32001 => Self::RequestTimeout,
            -32002 => Self::ResourceNotFound,
            -32800 => Self::RequestCancelled,
            other => Self::Custom(other),
        }
    }
}

impl Serialize for McpErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for McpErrorCode {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        i32::deserialize(deserializer).map(Self::from)
    }
}

/// An MCP error: a code, a human readable message and optional data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpError {
    /// Error code.
    pub code: McpErrorCode,
    /// Error message.
    pub message: String,
    /// Additional structured data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl McpError {
    /// Creates an error with the given code and message.
    #[must_use]
    pub fn new(code: McpErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// Attaches structured data to the error.
    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Invalid JSON was received.
    #[must_use]
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::ParseError, message)
    }

    /// The message is not a valid request.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::InvalidRequest, message)
    }

    /// No handler is registered for the method.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            McpErrorCode::MethodNotFound,
            format!("Method not found: {method}"),
        )
    }

    /// Params did not match the handler's expected shape.
    #[must_use]
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::InvalidParams, message)
    }

    /// Internal failure.
    #[must_use]
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(McpErrorCode::InternalError, message)
    }

    /// The request was cancelled before it completed.
    #[must_use]
    pub fn request_cancelled() -> Self {
        Self::new(McpErrorCode::RequestCancelled, "Request cancelled")
    }

    /// The request ran past its timeout.
    #[must_use]
    pub fn request_timeout(secs: u64) -> Self {
        Self::new(
            McpErrorCode::RequestTimeout,
            format!("Request timed out after {secs}s"),
        )
    }

    /// The requested resource does not exist.
    #[must_use]
    pub fn resource_not_found(uri: &str) -> Self {
        Self::new(
            McpErrorCode::ResourceNotFound,
            format!("Resource not found: {uri}"),
        )
    }

    /// Returns true if this error reports a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == McpErrorCode::RequestCancelled
    }
}

impl std::fmt::Display for McpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl std::error::Error for McpError {}

impl From<serde_json::Error> for McpError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal_error(format!("Serialization error: {err}"))
    }
}

/// Result alias used throughout the stack.
pub type McpResult<T> = Result<T, McpError>;
