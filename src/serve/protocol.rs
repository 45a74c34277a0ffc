//! MCP JSON-RPC 2.0 protocol types and line framing.
//!
//! One JSON object per input line, one JSON object per output line.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request. A missing `id` marks a notification; an explicit
/// `"id": null` is kept as `Some(Value::Null)` and still gets a response.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// JSON-RPC 2.0 response. `id` is always present, `null` when unknown.
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: String) -> Self {
        Self {
            jsonrpc: "2.0".into(),
            id,
            result: None,
            error: Some(JsonRpcError { code, message }),
        }
    }
}

/// A decoded input line.
#[derive(Debug)]
pub enum Incoming {
    Request(JsonRpcRequest),
    /// The line could not be decoded; reply with this error.
    Invalid(JsonRpcResponse),
}

/// Decode one input line. Returns `None` for blank lines.
pub fn parse_line(line: &str) -> Option<Incoming> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            warn!("JSON parse error: {} (line: {:?})", e, trimmed);
            return Some(Incoming::Invalid(JsonRpcResponse::error(
                Value::Null,
                PARSE_ERROR,
                format!("Parse error: {}", e),
            )));
        }
    };
    if !value.is_object() {
        return Some(Incoming::Invalid(JsonRpcResponse::error(
            Value::Null,
            INVALID_REQUEST,
            "Invalid Request: expected a JSON object".into(),
        )));
    }
    match serde_json::from_value::<JsonRpcRequest>(value) {
        Ok(req) => Some(Incoming::Request(req)),
        Err(e) => Some(Incoming::Invalid(JsonRpcResponse::error(
            Value::Null,
            INVALID_REQUEST,
            format!("Invalid Request: {}", e),
        ))),
    }
}

/// MCP initialize result.
pub fn initialize_result(server_name: &str, version: &str) -> Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {
            "tools": {}
        },
        "serverInfo": {
            "name": server_name,
            "version": version
        }
    })
}

/// MCP tool definition.
pub fn tool_def(name: &str, description: &str, schema: Value) -> Value {
    serde_json::json!({
        "name": name,
        "description": description,
        "inputSchema": schema
    })
}

/// Build a text content response (MCP tools/call result format).
pub fn text_content(text: &str) -> Value {
    serde_json::json!({
        "content": [{
            "type": "text",
            "text": text
        }]
    })
}

/// Write a JSON-RPC response as a single line.
pub fn write_message(writer: &mut impl std::io::Write, response: &JsonRpcResponse) -> std::io::Result<()> {
    let body = serde_json::to_string(response)?;
    debug!("writing {} bytes", body.len());
    writer.write_all(body.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.flush()
}
