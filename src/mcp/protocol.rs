//! JSON-RPC 2.0 envelopes for MCP over stdio
//!
//! Requests are only ever decoded and responses only ever encoded, so each
//! side derives just the direction it needs.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// MCP protocol revision this server speaks
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// The only JSON-RPC version accepted
pub const JSONRPC_VERSION: &str = "2.0";

/// Incoming request or notification
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,

    pub method: String,

    #[serde(default)]
    pub params: Value,

    /// Absent for notifications
    #[serde(default)]
    pub id: Option<Value>,
}

impl JsonRpcRequest {
    /// Notifications carry no id and never get a response
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn has_valid_version(&self) -> bool {
        self.jsonrpc == JSONRPC_VERSION
    }
}

/// Outgoing response; exactly one of `result` or `error` is written
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    jsonrpc: &'static str,

    #[serde(flatten)]
    body: ResponseBody,

    /// Echoed request id, `null` when the request could not be read
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
enum ResponseBody {
    Result(Value),
    Error(JsonRpcError),
}

impl JsonRpcResponse {
    /// Response for a handled method
    pub fn new(id: Option<Value>, outcome: Result<Value, JsonRpcError>) -> Self {
        let body = match outcome {
            Ok(result) => ResponseBody::Result(result),
            Err(error) => ResponseBody::Error(error),
        };
        Self {
            jsonrpc: JSONRPC_VERSION,
            body,
            id,
        }
    }

    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self::new(id, Err(error))
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, ResponseBody::Error(_))
    }
}

/// Reserved JSON-RPC error codes used by this server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    ParseError = -32700,
    InvalidRequest = -32600,
    MethodNotFound = -32601,
    InvalidParams = -32602,
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
}

impl JsonRpcError {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
        }
    }

    /// The line was not JSON or not a request object
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("Method not found: {}", method))
    }

    /// Unknown tool or prompt names land here too
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParams, message)
    }
}
