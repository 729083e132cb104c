//! The tool-plane request surface.
//!
//! These are the request/response shapes the chat front-end feeds into the
//! plane (the front-end itself lives elsewhere): per-request tool options,
//! server-list resolution, and the tool search endpoint's body and result.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::mcp::errors::McpError;
use crate::mcp::types::{ServerDescriptor, ToolParameters};
use crate::plane::discovery::match_tool_pattern;
use crate::plane::manager::ServerManager;

/// Default cap on results returned by a tool search.
const DEFAULT_SEARCH_LIMIT: usize = 20;

// ─── Request Options ────────────────────────────────────────────────────────

/// Tool-plane options carried on a chat request. Messages and inference
/// parameters are opaque to the plane and pass through untouched.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolPlaneOptions {
    #[serde(default)]
    pub mcp_servers: Vec<ServerDescriptor>,
    /// When set, the host's definitions loader auto-enables filesystem-style
    /// servers rooted at this path.
    #[serde(default)]
    pub tools_path: Option<String>,
    /// JIT discovery on/off; off means the full catalog is pre-listed.
    #[serde(default = "default_jit_tools")]
    pub jit_tools: bool,
    /// Tools injected per `mcp_discover` call.
    #[serde(default = "default_jit_max_tools")]
    pub jit_max_tools: usize,
    /// Cap on model tool-calling rounds, enforced by the chat loop.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// Per-call tool deadline in milliseconds.
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout: u64,
    /// Whether raw tool results are echoed in the response body.
    #[serde(default)]
    pub include_tool_results: bool,
}

fn default_jit_tools() -> bool {
    true
}

fn default_jit_max_tools() -> usize {
    5
}

fn default_max_tool_rounds() -> u32 {
    15
}

fn default_tool_timeout_ms() -> u64 {
    30_000
}

impl Default for ToolPlaneOptions {
    fn default() -> Self {
        Self {
            mcp_servers: Vec::new(),
            tools_path: None,
            jit_tools: default_jit_tools(),
            jit_max_tools: default_jit_max_tools(),
            max_tool_rounds: default_max_tool_rounds(),
            tool_timeout: default_tool_timeout_ms(),
            include_tool_results: false,
        }
    }
}

impl ToolPlaneOptions {
    pub fn tool_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.tool_timeout)
    }
}

/// Merge explicit servers with auto-enabled ones (the definitions loader's
/// output for `tools_path`). Explicit servers take precedence over
/// auto-enabled servers with the same name.
pub fn resolve_servers(
    explicit: &[ServerDescriptor],
    auto_enabled: &[ServerDescriptor],
) -> Vec<ServerDescriptor> {
    let mut servers: Vec<ServerDescriptor> = explicit.to_vec();
    for candidate in auto_enabled {
        if !servers.iter().any(|server| server.name == candidate.name) {
            servers.push(candidate.clone());
        }
    }
    servers
}

// ─── Tool Search ────────────────────────────────────────────────────────────

/// Body of a tool search request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolSearchRequest {
    /// Glob pattern to match tool names (e.g., `"*file*"`, `"*git*"`).
    #[serde(default)]
    pub pattern: String,
    /// Max results to return.
    #[serde(default)]
    pub limit: usize,
    /// Servers to search, specified inline like the chat endpoint.
    #[serde(default)]
    pub mcp_servers: Vec<ServerDescriptor>,
}

/// A single search result.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSearchResult {
    pub server: String,
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

/// Search results with the effective pattern echoed back.
#[derive(Debug, Clone, Serialize)]
pub struct ToolSearchResponse {
    pub tools: Vec<ToolSearchResult>,
    pub pattern: String,
    pub total: usize,
}

/// Search the given servers for tools matching a pattern.
///
/// A temporary manager admits the descriptors, connects what it can
/// (unreachable servers are logged and skipped), and matches the union of
/// catalogs. Descriptor validation failures are skipped rather than fatal,
/// matching the best-effort semantics of the search endpoint.
pub async fn search_available_tools(
    request: ToolSearchRequest,
) -> Result<ToolSearchResponse, McpError> {
    let pattern = if request.pattern.is_empty() {
        "*".to_string()
    } else {
        request.pattern
    };
    let limit = if request.limit == 0 {
        DEFAULT_SEARCH_LIMIT
    } else {
        request.limit
    };

    let manager = ServerManager::new(0, 0);
    let mut names: Vec<String> = Vec::new();
    for descriptor in request.mcp_servers {
        let name = descriptor.name.clone();
        match manager.add_server_lazy(descriptor).await {
            Ok(()) => names.push(name),
            Err(e) => {
                tracing::warn!(server = %name, error = %e, "skipping server in tool search");
            }
        }
    }

    for name in &names {
        if let Err(e) = manager.ensure_connected(name).await {
            tracing::warn!(server = %name, error = %e, "failed to connect server for tool search");
        }
    }

    let mut tools: Vec<ToolSearchResult> = Vec::new();
    for (server, schema) in manager.all_cached_tools().await {
        if !match_tool_pattern(&pattern, &schema.name) {
            continue;
        }
        tools.push(ToolSearchResult {
            server,
            name: schema.name,
            description: schema.description,
            parameters: schema.parameters,
        });
        if tools.len() >= limit {
            break;
        }
    }

    manager.close().await;

    let total = tools.len();
    Ok(ToolSearchResponse {
        tools,
        pattern,
        total,
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults_apply() {
        let options: ToolPlaneOptions = serde_json::from_str("{}").unwrap();
        assert!(options.mcp_servers.is_empty());
        assert!(options.jit_tools);
        assert_eq!(options.jit_max_tools, 5);
        assert_eq!(options.max_tool_rounds, 15);
        assert_eq!(options.tool_timeout, 30_000);
        assert!(!options.include_tool_results);
        assert_eq!(options.tool_timeout_duration(), Duration::from_secs(30));
    }

    #[test]
    fn options_parse_with_servers() {
        let body = serde_json::json!({
            "mcp_servers": [
                {"name": "filesystem", "command": "npx", "args": ["-y", "@mcp/fs", "/data"]}
            ],
            "jit_tools": false,
            "jit_max_tools": 8,
            "tool_timeout": 5000
        });
        let options: ToolPlaneOptions = serde_json::from_value(body).unwrap();
        assert_eq!(options.mcp_servers.len(), 1);
        assert!(!options.jit_tools);
        assert_eq!(options.jit_max_tools, 8);
        assert_eq!(options.tool_timeout, 5000);
    }

    #[test]
    fn resolve_servers_explicit_wins() {
        let explicit = vec![ServerDescriptor::stdio("filesystem", "npx", &["/a"])];
        let auto = vec![
            ServerDescriptor::stdio("filesystem", "npx", &["/b"]),
            ServerDescriptor::stdio("git", "npx", &[]),
        ];
        let resolved = resolve_servers(&explicit, &auto);
        assert_eq!(resolved.len(), 2);
        assert_eq!(resolved[0].name, "filesystem");
        assert_eq!(resolved[0].args, vec!["/a"]);
        assert_eq!(resolved[1].name, "git");
    }

    #[test]
    fn resolve_servers_without_auto_is_passthrough() {
        let explicit = vec![ServerDescriptor::stdio("a", "npx", &[])];
        let resolved = resolve_servers(&explicit, &[]);
        assert_eq!(resolved.len(), 1);
    }

    #[tokio::test]
    async fn search_with_no_servers_is_empty() {
        let response = search_available_tools(ToolSearchRequest {
            pattern: String::new(),
            limit: 0,
            mcp_servers: Vec::new(),
        })
        .await
        .unwrap();
        assert!(response.tools.is_empty());
        assert_eq!(response.pattern, "*");
        assert_eq!(response.total, 0);
    }

    #[tokio::test]
    async fn search_skips_invalid_and_unreachable_servers() {
        let response = search_available_tools(ToolSearchRequest {
            pattern: "*".into(),
            limit: 10,
            mcp_servers: vec![
                ServerDescriptor::stdio("shell", "bash", &["-c", "echo"]),
                ServerDescriptor::stdio("ghost", "definitely-not-a-real-binary-xyz", &[]),
            ],
        })
        .await
        .unwrap();
        assert!(response.tools.is_empty());
    }

    #[test]
    fn search_request_parses_with_defaults() {
        let request: ToolSearchRequest = serde_json::from_str(r#"{"pattern": "*git*"}"#).unwrap();
        assert_eq!(request.pattern, "*git*");
        assert_eq!(request.limit, 0);
        assert!(request.mcp_servers.is_empty());
    }
}
