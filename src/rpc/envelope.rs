use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC request sent over HTTP or the WebSocket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// JSON-RPC error structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<JsonRpcError> for Error {
    fn from(e: JsonRpcError) -> Self {
        Error::Rpc {
            code: e.code,
            message: e.message,
        }
    }
}

/// JSON-RPC response, either over HTTP or as a reply on the WebSocket
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Splits the response into its result or its error object
    pub fn into_outcome(self) -> std::result::Result<Value, JsonRpcError> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

/// Allocates request ids and builds request envelopes.
///
/// Ids start at 1 and are unique for the lifetime of the builder.
#[derive(Debug)]
pub struct RequestBuilder {
    next_id: AtomicU64,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestBuilder {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn build(&self, method: &str, params: Vec<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: self.next_id(),
            method: method.to_string(),
            params: Value::Array(params),
        }
    }
}

/// A classified inbound WebSocket frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Reply to one of our requests (subscribe confirmation or unsubscribe ack)
    Response {
        id: u64,
        outcome: std::result::Result<Value, JsonRpcError>,
    },
    /// Push notification for a server-assigned subscription id
    Notification {
        method: String,
        subscription: u64,
        result: Value,
    },
}

impl InboundMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("invalid JSON: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| Error::Protocol("message is not a JSON object".to_string()))?;

        if let Some(params) = object.get("params") {
            if let Some(subscription) = params.get("subscription") {
                let subscription = subscription.as_u64().ok_or_else(|| {
                    Error::Protocol(format!("subscription id is not an unsigned integer: {}", subscription))
                })?;
                let method = object
                    .get("method")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let result = params.get("result").cloned().unwrap_or(Value::Null);
                return Ok(InboundMessage::Notification {
                    method,
                    subscription,
                    result,
                });
            }
        }

        match object.get("id") {
            Some(Value::Number(n)) => {
                let id = n
                    .as_u64()
                    .ok_or_else(|| Error::Protocol(format!("request id is not an unsigned integer: {}", n)))?;
                let response: JsonRpcResponse = serde_json::from_value(value.clone())
                    .map_err(|e| Error::Protocol(format!("malformed response: {}", e)))?;
                if response.result.is_none() && response.error.is_none() {
                    return Err(Error::Protocol(format!("response {} has neither result nor error", id)));
                }
                Ok(InboundMessage::Response {
                    id,
                    outcome: response.into_outcome(),
                })
            }
            Some(Value::Null) => match object.get("error") {
                Some(error) => Err(Error::Protocol(format!("server error without request id: {}", error))),
                None => Err(Error::Protocol("response with null id".to_string())),
            },
            Some(other) => Err(Error::Protocol(format!("unsupported request id: {}", other))),
            None => Err(Error::Protocol(
                "message carries neither an id nor a subscription".to_string(),
            )),
        }
    }
}
