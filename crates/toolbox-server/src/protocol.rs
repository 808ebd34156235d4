//! JSON-RPC 2.0 framing for the server side of the stdio connection.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32602;
}

/// A request or notification from the client
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingMessage {
    /// Absent for notifications
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

/// A response to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl OutgoingResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

/// What to do with one line of input
#[derive(Debug)]
pub enum Parsed {
    /// Dispatch to the handler
    Message(IncomingMessage),
    /// Answer immediately without dispatching
    Reject(OutgoingResponse),
    /// A reply to something we never asked; drop it
    Ignore,
}

pub fn parse_line(line: &str) -> Parsed {
    let value: Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => {
            return Parsed::Reject(OutgoingResponse::failure(
                Value::Null,
                error_codes::PARSE_ERROR,
                format!("parse error: {}", e),
            ))
        }
    };

    let id = value.get("id").cloned().unwrap_or(Value::Null);

    if value.get("method").is_none() {
        if value.get("result").is_some() || value.get("error").is_some() {
            return Parsed::Ignore;
        }
        return Parsed::Reject(OutgoingResponse::failure(
            id,
            error_codes::INVALID_REQUEST,
            "invalid request: missing method",
        ));
    }

    match serde_json::from_value(value) {
        Ok(message) => Parsed::Message(message),
        Err(e) => Parsed::Reject(OutgoingResponse::failure(
            id,
            error_codes::INVALID_REQUEST,
            format!("invalid request: {}", e),
        )),
    }
}
