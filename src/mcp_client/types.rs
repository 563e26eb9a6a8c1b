//! Shared types for the MCP client.
//!
//! JSON-RPC 2.0 message types and MCP protocol structures.

use serde::{Deserialize, Serialize};

/// MCP protocol revision sent in `initialize` and the HTTP version header.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request.
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no id, no response).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcNotification {
    pub fn new(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
#[derive(Debug, Clone)]
pub struct JsonRpcResponse {
    pub id: u64,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Classify an inbound JSON value as a response.
    ///
    /// Returns `None` for anything that is not a response to one of our
    /// requests: server requests and notifications (they carry `method`),
    /// non-numeric ids, and messages with neither `result` nor `error`.
    /// A `"result": null` is a valid success.
    pub fn from_value(value: serde_json::Value) -> Option<Self> {
        let serde_json::Value::Object(mut obj) = value else {
            return None;
        };
        if obj.contains_key("method") {
            return None;
        }
        let id = obj.get("id")?.as_u64()?;

        if let Some(raw) = obj.remove("error") {
            if !raw.is_null() {
                let error = serde_json::from_value::<JsonRpcError>(raw).unwrap_or_else(|e| {
                    JsonRpcError {
                        code: error_codes::INTERNAL_ERROR,
                        message: format!("unreadable error object: {e}"),
                        data: None,
                    }
                });
                return Some(Self {
                    id,
                    result: None,
                    error: Some(error),
                });
            }
        }

        let result = obj.remove("result")?;
        Some(Self {
            id,
            result: Some(result),
            error: None,
        })
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

// ─── MCP Protocol Types ──────────────────────────────────────────────────────

/// A tool exposed by a provider, as returned by `tools/list`.
///
/// The input schema is passed through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(
        default = "empty_object_schema",
        rename = "inputSchema",
        alias = "input_schema"
    )]
    pub input_schema: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({"type": "object"})
}

/// `tools/list` response payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    #[serde(default, rename = "nextCursor")]
    pub next_cursor: Option<String>,
}

/// MCP initialize response payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InitializeResult {
    #[serde(default, rename = "protocolVersion")]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default, rename = "serverInfo")]
    pub server_info: Option<ServerInfo>,
}

/// Server info returned in the initialize response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub name: Option<String>,
    pub version: Option<String>,
}

/// Parameters for the `initialize` request.
pub fn initialize_params() -> serde_json::Value {
    serde_json::json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": "toolbridge",
            "version": env!("CARGO_PKG_VERSION"),
        },
    })
}

// ─── Standard JSON-RPC Error Codes ───────────────────────────────────────────

/// Well-known JSON-RPC error codes.
pub mod error_codes {
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_rpc_request_serialization() {
        let req = JsonRpcRequest::new(1, "initialize", None);
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"jsonrpc\":\"2.0\""));
        assert!(json.contains("\"id\":1"));
        assert!(json.contains("\"method\":\"initialize\""));
        // params should be omitted when None
        assert!(!json.contains("params"));
    }

    #[test]
    fn test_notification_has_no_id() {
        let n = JsonRpcNotification::new("notifications/initialized", None);
        let v = serde_json::to_value(&n).unwrap();
        assert!(v.get("id").is_none());
        assert_eq!(v["method"], "notifications/initialized");
    }

    #[test]
    fn test_response_success() {
        let resp =
            JsonRpcResponse::from_value(json!({"jsonrpc": "2.0", "id": 1, "result": {"tools": []}}))
                .unwrap();
        assert_eq!(resp.id, 1);
        assert!(resp.result.is_some());
        assert!(resp.error.is_none());
    }

    #[test]
    fn test_response_null_result_is_success() {
        let resp =
            JsonRpcResponse::from_value(json!({"jsonrpc": "2.0", "id": 4, "result": null})).unwrap();
        assert_eq!(resp.result, Some(serde_json::Value::Null));
    }

    #[test]
    fn test_response_error() {
        let resp = JsonRpcResponse::from_value(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": null,
            "error": {"code": -32601, "message": "Method not found"}
        }))
        .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32601);
        assert_eq!(err.message, "Method not found");
    }

    #[test]
    fn test_echoed_request_is_not_a_response() {
        // What `cat` sends back: our own request, same id, no result/error.
        let echoed = json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"});
        assert!(JsonRpcResponse::from_value(echoed).is_none());

        let bare = json!({"jsonrpc": "2.0", "id": 1});
        assert!(JsonRpcResponse::from_value(bare).is_none());
    }

    #[test]
    fn test_string_id_is_not_correlated() {
        let v = json!({"jsonrpc": "2.0", "id": "1", "result": {}});
        assert!(JsonRpcResponse::from_value(v).is_none());
    }

    #[test]
    fn test_tool_descriptor_defaults() {
        let tool: ToolDescriptor = serde_json::from_str(r#"{"name": "search"}"#).unwrap();
        assert_eq!(tool.description, "");
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn test_tool_descriptor_schema_passthrough() {
        let tool: ToolDescriptor = serde_json::from_value(json!({
            "name": "read_file",
            "description": "Read a file",
            "inputSchema": {"type": "object", "properties": {"path": {"type": "string"}}, "x-custom": 7}
        }))
        .unwrap();
        assert_eq!(tool.input_schema["x-custom"], 7);
    }

    #[test]
    fn test_initialize_params_shape() {
        let p = initialize_params();
        assert_eq!(p["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(p["clientInfo"]["name"], "toolbridge");
    }
}
