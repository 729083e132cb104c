//! Transport clients for MCP servers.
//!
//! One client speaks JSON-RPC 2.0 to one server. The three transports
//! (stdio subprocess, HTTP POST, WebSocket) share a single contract:
//! connect, initialize, list tools, call tool, read the cached tool list,
//! close. Requests are correlated to responses by monotonic integer id and
//! every outbound call accepts a deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::mcp::errors::McpError;
use crate::mcp::types::{
    extract_result, JsonRpcResponse, ServerDescriptor, ToolSchema, TransportKind, WireCallResult,
    WireToolList,
};

pub mod http;
pub mod stdio;
pub mod websocket;

use http::HttpClient;
use stdio::StdioClient;
use websocket::WsClient;

/// MCP protocol revision this client speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Client identity advertised in the `initialize` handshake.
const CLIENT_NAME: &str = "toolplane";
const CLIENT_VERSION: &str = "1.0.0";

/// Default deadline for tool-plane calls; the handshake runs unbounded.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(60);

// ─── McpClient ──────────────────────────────────────────────────────────────

#[derive(Debug)]
enum Transport {
    Stdio(StdioClient),
    Http(HttpClient),
    WebSocket(WsClient),
}

/// A connection to one MCP server, over whichever transport its descriptor
/// names.
///
/// Tool names in the cached list are qualified `"server:tool"` for remote
/// transports and raw for stdio; callers strip the prefix before invoking.
#[derive(Debug)]
pub struct McpClient {
    server_name: String,
    transport: Transport,
    tools: RwLock<Vec<ToolSchema>>,
}

impl McpClient {
    /// Dial the server described by the descriptor (spawn the subprocess,
    /// build the HTTP client, or upgrade the WebSocket). No MCP handshake
    /// happens yet; call `initialize` next.
    pub async fn connect(descriptor: &ServerDescriptor) -> Result<Self, McpError> {
        let transport = match descriptor.transport {
            TransportKind::Stdio => Transport::Stdio(StdioClient::spawn(descriptor).await?),
            TransportKind::Http | TransportKind::StreamableHttp => {
                Transport::Http(HttpClient::new(descriptor)?)
            }
            TransportKind::Websocket => Transport::WebSocket(WsClient::connect(descriptor).await?),
        };
        Ok(Self {
            server_name: descriptor.name.clone(),
            transport,
            tools: RwLock::new(Vec::new()),
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    fn initialized_flag(&self) -> &AtomicBool {
        match &self.transport {
            Transport::Stdio(client) => &client.initialized,
            Transport::Http(client) => &client.initialized,
            Transport::WebSocket(client) => &client.initialized,
        }
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        deadline: Option<Duration>,
        capture_session: bool,
    ) -> Result<JsonRpcResponse, McpError> {
        match &self.transport {
            Transport::Stdio(client) => client.request(method, params, deadline).await,
            Transport::Http(client) => {
                client.request(method, params, deadline, capture_session).await
            }
            Transport::WebSocket(client) => client.request(method, params, deadline).await,
        }
    }

    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        match &self.transport {
            Transport::Stdio(client) => client.notify(method, params).await,
            Transport::Http(client) => client.notify(method, params).await,
            Transport::WebSocket(client) => client.notify(method, params).await,
        }
    }

    /// Perform the MCP handshake. Idempotent: a second call is a no-op.
    ///
    /// Sends `initialize` (unbounded deadline), then the
    /// `notifications/initialized` notification.
    pub async fn initialize(&self) -> Result<(), McpError> {
        if self.initialized_flag().load(Ordering::Acquire) {
            return Ok(());
        }

        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": CLIENT_NAME, "version": CLIENT_VERSION },
        });

        let response = self.request("initialize", Some(params), None, true).await?;
        let result = extract_result(response)?;
        tracing::debug!(
            server = %self.server_name,
            server_info = ?result.get("serverInfo"),
            protocol = ?result.get("protocolVersion"),
            "MCP client initialized"
        );

        if let Err(e) = self.notify("notifications/initialized", None).await {
            tracing::warn!(server = %self.server_name, error = %e, "failed to send initialized notification");
        }

        self.initialized_flag().store(true, Ordering::Release);
        Ok(())
    }

    /// Fetch the server's tool list and refresh the cache.
    pub async fn list_tools(&self) -> Result<Vec<ToolSchema>, McpError> {
        let response = self
            .request("tools/list", None, Some(DEFAULT_CALL_TIMEOUT), false)
            .await?;
        let result = extract_result(response)?;
        let wire: WireToolList =
            serde_json::from_value(result).map_err(|e| McpError::Protocol {
                code: crate::mcp::types::error_codes::INTERNAL_ERROR,
                message: format!("malformed tools/list result: {e}"),
            })?;

        let qualify = self.qualifies_names();
        let tools: Vec<ToolSchema> = wire
            .tools
            .into_iter()
            .map(|tool| ToolSchema::from_wire(&self.server_name, tool, qualify))
            .collect();

        if let Ok(mut cache) = self.tools.write() {
            *cache = tools.clone();
        }
        tracing::debug!(server = %self.server_name, count = tools.len(), "MCP tools listed");
        Ok(tools)
    }

    /// Invoke a tool by its raw (unprefixed) name.
    pub async fn call_tool(
        &self,
        raw_name: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
        deadline: Duration,
    ) -> Result<String, McpError> {
        let params = serde_json::json!({
            "name": raw_name,
            "arguments": serde_json::Value::Object(arguments),
        });
        let response = self
            .request("tools/call", Some(params), Some(deadline), false)
            .await
            .map_err(|e| match e {
                // Surface the tool name instead of the method name.
                McpError::Timeout { timeout_ms, .. } => McpError::Timeout {
                    tool: raw_name.to_string(),
                    timeout_ms,
                },
                other => other,
            })?;
        let result = extract_result(response)?;
        let wire: WireCallResult =
            serde_json::from_value(result).map_err(|e| McpError::Protocol {
                code: crate::mcp::types::error_codes::INTERNAL_ERROR,
                message: format!("malformed tools/call result: {e}"),
            })?;
        wire.into_text()
    }

    /// The tool list from the last successful `list_tools`.
    pub fn cached_tools(&self) -> Vec<ToolSchema> {
        self.tools.read().map(|cache| cache.clone()).unwrap_or_default()
    }

    /// Whether this transport qualifies tool names with the server prefix.
    /// Remote transports do; stdio keeps raw names (historical; both forms
    /// are accepted downstream).
    pub fn qualifies_names(&self) -> bool {
        !matches!(self.transport, Transport::Stdio(_))
    }

    /// Shut down the transport.
    pub async fn close(&self) -> Result<(), McpError> {
        match &self.transport {
            Transport::Stdio(client) => client.close().await,
            Transport::Http(client) => client.close().await,
            Transport::WebSocket(client) => client.close().await,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_params_are_bit_exact() {
        let params = serde_json::json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": { "name": CLIENT_NAME, "version": CLIENT_VERSION },
        });
        assert_eq!(params["protocolVersion"], "2024-11-05");
        assert_eq!(params["capabilities"]["tools"], serde_json::json!({}));
        assert_eq!(params["clientInfo"]["version"], "1.0.0");
    }

    #[tokio::test]
    async fn http_client_qualifies_names_and_stdio_does_not() {
        let http = McpClient::connect(&ServerDescriptor::http("remote", "http://host/mcp"))
            .await
            .unwrap();
        assert!(http.qualifies_names());
        assert!(http.cached_tools().is_empty());

        // Stdio qualification is covered via ToolSchema::from_wire tests;
        // spawning requires a live binary.
    }
}
