//! Shared types for the MCP protocol layer.
//!
//! JSON-RPC 2.0 message types, the MCP wire shapes for tool listing and
//! invocation, and the data model the tool plane is built on: server
//! descriptors, tool schemas, tool calls and results.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::errors::McpError;

// ─── JSON-RPC 2.0 ───────────────────────────────────────────────────────────

/// JSON-RPC 2.0 request message.
///
/// `id: None` makes this a notification; the field is omitted entirely so
/// servers do not mistake it for a request awaiting a response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    /// Create a new JSON-RPC request with an id.
    pub fn new(id: i64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    /// Create a JSON-RPC notification (no id, no response expected).
    pub fn notification(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response message (success or error).
///
/// `id` is optional because server-initiated notifications arrive on the
/// same stream and must be told apart from responses when routing.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Option<i64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<JsonRpcError>,
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    pub data: Option<serde_json::Value>,
}

/// Extract the result from a JSON-RPC response, converting error envelopes
/// to `McpError::Protocol`.
pub fn extract_result(response: JsonRpcResponse) -> Result<serde_json::Value, McpError> {
    if let Some(err) = response.error {
        return Err(McpError::Protocol {
            code: err.code,
            message: err.message,
        });
    }

    response.result.ok_or(McpError::Protocol {
        code: error_codes::INTERNAL_ERROR,
        message: "response missing both result and error".into(),
    })
}

/// Well-known JSON-RPC / MCP error codes.
pub mod error_codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i32 = -32700;
    /// The JSON sent is not a valid Request object.
    pub const INVALID_REQUEST: i32 = -32600;
    /// The method does not exist or is not available.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Internal JSON-RPC error.
    pub const INTERNAL_ERROR: i32 = -32603;
}

// ─── Server Descriptors ─────────────────────────────────────────────────────

/// Transport used to reach an MCP server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Child process with JSON-RPC over stdin/stdout (the default).
    #[default]
    Stdio,
    /// HTTP POST per request.
    Http,
    /// HTTP POST per request with optional SSE/NDJSON streamed responses
    /// and an `mcp-session-id` session token.
    StreamableHttp,
    /// Long-lived WebSocket connection.
    Websocket,
}

impl TransportKind {
    /// Whether this transport reaches a remote endpoint (HTTP or WebSocket)
    /// rather than a spawned subprocess.
    pub fn is_remote(self) -> bool {
        !matches!(self, TransportKind::Stdio)
    }
}

/// How to reach one MCP server. Immutable once admitted to a manager.
///
/// Stdio servers use `command`/`args`/`env`; HTTP and WebSocket servers use
/// `url`/`headers`. Every descriptor must pass the security validator
/// before a manager will store it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Unique name within a session, used as the routing key.
    pub name: String,
    #[serde(default)]
    pub transport: TransportKind,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl ServerDescriptor {
    /// Shorthand for a stdio descriptor.
    pub fn stdio(name: &str, command: &str, args: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::Stdio,
            command: Some(command.to_string()),
            args: args.iter().map(|a| a.to_string()).collect(),
            env: HashMap::new(),
            url: None,
            headers: HashMap::new(),
        }
    }

    /// Shorthand for an HTTP descriptor.
    pub fn http(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::StreamableHttp,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: Some(url.to_string()),
            headers: HashMap::new(),
        }
    }

    /// Shorthand for a WebSocket descriptor.
    pub fn websocket(name: &str, url: &str) -> Self {
        Self {
            name: name.to_string(),
            transport: TransportKind::Websocket,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            url: Some(url.to_string()),
            headers: HashMap::new(),
        }
    }
}

// ─── Tool Schemas ───────────────────────────────────────────────────────────

/// A single property in a tool's parameter schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolProperty {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub description: String,
}

/// JSON-Schema-style parameter object for a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameters {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub properties: BTreeMap<String, ToolProperty>,
    #[serde(default)]
    pub required: Vec<String>,
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self {
            kind: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

/// A tool advertised by an MCP server, as presented to the model.
///
/// `name` is the qualified name: `"server:tool"` for HTTP and WebSocket
/// transports, the raw tool name for stdio. Both forms are accepted
/// downstream; the manager strips the prefix at call time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: ToolParameters,
}

/// Tool entry as it appears on the wire in a `tools/list` result.
#[derive(Debug, Clone, Deserialize)]
pub struct WireTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

/// Result payload of `tools/list`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireToolList {
    #[serde(default)]
    pub tools: Vec<WireTool>,
}

impl ToolSchema {
    /// Build a schema from the wire shape, optionally qualifying the name
    /// with the server prefix (`server:tool`).
    pub fn from_wire(server: &str, tool: WireTool, qualify: bool) -> Self {
        let name = if qualify {
            format!("{server}:{}", tool.name)
        } else {
            tool.name
        };

        let mut parameters = ToolParameters::default();
        if let Some(props) = tool.input_schema.get("properties").and_then(|p| p.as_object()) {
            for (prop_name, prop_value) in props {
                let mut prop = ToolProperty::default();
                if let Some(kind) = prop_value.get("type").and_then(|t| t.as_str()) {
                    prop.kind = kind.to_string();
                }
                if let Some(desc) = prop_value.get("description").and_then(|d| d.as_str()) {
                    prop.description = desc.to_string();
                }
                parameters.properties.insert(prop_name.clone(), prop);
            }
        }
        if let Some(required) = tool.input_schema.get("required").and_then(|r| r.as_array()) {
            for entry in required {
                if let Some(field) = entry.as_str() {
                    parameters.required.push(field.to_string());
                }
            }
        }

        Self {
            name,
            description: tool.description,
            parameters,
        }
    }
}

// ─── Tool Calls and Results ─────────────────────────────────────────────────

/// A tool invocation requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Map<String, serde_json::Value>,
}

impl ToolCall {
    pub fn new(name: &str, arguments: serde_json::Value) -> Self {
        let arguments = match arguments {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            name: name.to_string(),
            arguments,
        }
    }
}

/// The outcome of one tool invocation.
///
/// Tool-level failures ride back to the model inside `error` instead of
/// aborting the batch; `content` may still carry partial output.
#[derive(Debug)]
pub struct ToolResult {
    pub content: String,
    pub error: Option<McpError>,
}

impl ToolResult {
    pub fn ok(content: String) -> Self {
        Self {
            content,
            error: None,
        }
    }

    pub fn err(error: McpError) -> Self {
        Self {
            content: String::new(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Content block inside a `tools/call` result.
#[derive(Debug, Clone, Deserialize)]
pub struct WireContent {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

/// Result payload of `tools/call`.
#[derive(Debug, Clone, Deserialize)]
pub struct WireCallResult {
    #[serde(default)]
    pub content: Vec<WireContent>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl WireCallResult {
    /// Concatenate the text content blocks; `isError` becomes a
    /// `ToolExecution` error carrying that text.
    pub fn into_text(self) -> Result<String, McpError> {
        let text = self
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if self.is_error {
            return Err(McpError::ToolExecution { message: text });
        }
        Ok(text)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
