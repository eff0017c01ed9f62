//! JSON-RPC 2.0 message types.
//!
//! Every envelope keeps the top-level members it does not know about in an
//! `extra` map, so a message parsed and serialized again is unchanged.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// The protocol version carried in every message.
pub const JSONRPC_VERSION: &str = "2.0";

fn version() -> String {
    JSONRPC_VERSION.to_owned()
}

/// JSON-RPC request ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer ID.
    Number(i64),
    /// String ID.
    String(String),
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_owned())
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
        }
    }
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version (always "2.0").
    #[serde(default = "version")]
    pub jsonrpc: String,
    /// Request ID.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Request parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Unrecognized top-level members.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JsonRpcRequest {
    /// Creates a new request with the given method and parameters.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: impl Into<RequestId>) -> Self {
        Self {
            jsonrpc: version(),
            id: id.into(),
            method: method.into(),
            params,
            extra: Map::new(),
        }
    }
}

/// JSON-RPC 2.0 notification (a request without an ID).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Protocol version (always "2.0").
    #[serde(default = "version")]
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Notification parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// Unrecognized top-level members.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JsonRpcNotification {
    /// Creates a notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: version(),
            method: method.into(),
            params,
            extra: Map::new(),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code.
    pub code: i32,
    /// Error message.
    pub message: String,
    /// Additional error data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<relaymcp_core::McpError> for JsonRpcError {
    fn from(err: relaymcp_core::McpError) -> Self {
        Self {
            code: err.code.into(),
            message: err.message,
            data: err.data,
        }
    }
}

impl From<JsonRpcError> for relaymcp_core::McpError {
    fn from(err: JsonRpcError) -> Self {
        Self {
            code: err.code.into(),
            message: err.message,
            data: err.data,
        }
    }
}

/// JSON-RPC 2.0 success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Protocol version (always "2.0").
    #[serde(default = "version")]
    pub jsonrpc: String,
    /// Request ID this is responding to.
    pub id: RequestId,
    /// Result payload.
    pub result: Value,
    /// Unrecognized top-level members.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JsonRpcResponse {
    /// Creates a success response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: version(),
            id,
            result,
            extra: Map::new(),
        }
    }
}

/// JSON-RPC 2.0 error response.
///
/// The ID is `None` (serialized as `null`) when the failing message could not
/// be parsed far enough to recover one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorResponse {
    /// Protocol version (always "2.0").
    #[serde(default = "version")]
    pub jsonrpc: String,
    /// Request ID this is responding to.
    pub id: Option<RequestId>,
    /// Error object.
    pub error: JsonRpcError,
    /// Unrecognized top-level members.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JsonRpcErrorResponse {
    /// Creates an error response.
    #[must_use]
    pub fn new(id: Option<RequestId>, error: impl Into<JsonRpcError>) -> Self {
        Self {
            jsonrpc: version(),
            id,
            error: error.into(),
            extra: Map::new(),
        }
    }
}

/// A JSON-RPC message.
///
/// Decoding classifies by members: `method` with `id` is a request, `method`
/// alone a notification, `error` an error response, `result` a response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A success response.
    Response(JsonRpcResponse),
    /// An error response.
    Error(JsonRpcErrorResponse),
    /// A one-way notification.
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Returns the method name for requests and notifications.
    #[must_use]
    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request(req) => Some(&req.method),
            Self::Notification(notif) => Some(&notif.method),
            Self::Response(_) | Self::Error(_) => None,
        }
    }

    /// Returns the correlation ID, if the message carries one.
    #[must_use]
    pub fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => Some(&resp.id),
            Self::Error(err) => err.id.as_ref(),
            Self::Notification(_) => None,
        }
    }

    /// Returns the params for requests and notifications.
    #[must_use]
    pub fn params(&self) -> Option<&Value> {
        match self {
            Self::Request(req) => req.params.as_ref(),
            Self::Notification(notif) => notif.params.as_ref(),
            Self::Response(_) | Self::Error(_) => None,
        }
    }

    /// Short name of the variant, for logging.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Request(_) => "request",
            Self::Response(_) => "response",
            Self::Error(_) => "error",
            Self::Notification(_) => "notification",
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(req: JsonRpcRequest) -> Self {
        Self::Request(req)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(resp: JsonRpcResponse) -> Self {
        Self::Response(resp)
    }
}

impl From<JsonRpcErrorResponse> for JsonRpcMessage {
    fn from(err: JsonRpcErrorResponse) -> Self {
        Self::Error(err)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notif: JsonRpcNotification) -> Self {
        Self::Notification(notif)
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let Some(obj) = value.as_object() else {
            return Err(D::Error::custom("JSON-RPC message must be an object"));
        };

        match obj.get("jsonrpc").and_then(Value::as_str) {
            Some(JSONRPC_VERSION) => {}
            Some(other) => {
                return Err(D::Error::custom(format!(
                    "unsupported JSON-RPC version: {other}"
                )));
            }
            None => return Err(D::Error::custom("missing jsonrpc version")),
        }

        let has_id = obj.get("id").is_some_and(|id| !id.is_null());
        let message = if obj.contains_key("method") {
            if has_id {
                serde_json::from_value(value).map(Self::Request)
            } else {
                serde_json::from_value(value).map(Self::Notification)
            }
        } else if obj.contains_key("error") {
            serde_json::from_value(value).map(Self::Error)
        } else if obj.contains_key("result") {
            serde_json::from_value(value).map(Self::Response)
        } else {
            return Err(D::Error::custom(
                "message has neither method, result nor error",
            ));
        };
        message.map_err(D::Error::custom)
    }
}
