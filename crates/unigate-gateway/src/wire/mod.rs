//! Wire protocol envelopes
//!
//! JSON remote-call messages exchanged with clients and with backend tool
//! servers: `{protocolVersion, id, method, params}` requests answered by
//! `{id, result}` or `{id, error: {code, message, data?}}`. A response with
//! `id = null` reports a failure that occurred before the request could be
//! correlated (unparseable frame, missing id).
//!
//! Frames on the backend transport are newline-delimited single-line JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use unigate_core::DomainError;

/// Protocol revision spoken by this gateway.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_LIST_TOOLS: &str = "tools/list";
pub const METHOD_CALL_TOOL: &str = "tools/call";

/// A remote-call request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEnvelope {
    pub protocol_version: String,
    /// Correlation id chosen by the caller; echoed verbatim in the response.
    pub id: Value,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestEnvelope {
    pub fn new(id: impl Into<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// Error payload of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&DomainError> for ErrorBody {
    fn from(err: &DomainError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
            data: Some(serde_json::json!({ "kind": err.kind() })),
        }
    }
}

/// A response, carrying exactly one of `result` or `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// The originating request id, or `null` when the failure preceded
    /// correlation.
    pub id: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl ResponseEnvelope {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, err: &DomainError) -> Self {
        Self {
            id: id.unwrap_or(Value::Null),
            result: None,
            error: Some(ErrorBody::from(err)),
        }
    }

    /// Collapse into the call outcome. A response carrying neither field is
    /// malformed and treated as a transport error by callers.
    pub fn into_outcome(self) -> Result<Value, ErrorBody> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (_, Some(error)) => Err(error),
            (None, None) => Err(ErrorBody {
                code: DomainError::TransportError(String::new()).code(),
                message: "response carried neither result nor error".to_string(),
                data: None,
            }),
        }
    }
}

/// A server-initiated message with no correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Result payload of the `initialize` handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: Capabilities,
    pub server_info: ServerIdentity,
    /// Session id to carry on every follow-up request.
    pub session_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub tools: ToolsCapability,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerIdentity {
    pub name: String,
    pub version: String,
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self {
            name: "unigate".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Serialize an envelope as one newline-terminated frame.
pub fn encode_frame<T: Serialize>(envelope: &T) -> serde_json::Result<String> {
    let mut frame = serde_json::to_string(envelope)?;
    frame.push('\n');
    Ok(frame)
}
