//! Per-session server manager.
//!
//! Owns the set of MCP clients for one session. Servers are admitted
//! lazily: a descriptor sits in the pending map until something needs the
//! server, at which point it is dialed, initialized, and its tool catalog
//! cached. The manager also owns the routing map (qualified tool name →
//! server) and the JIT-discovered tool set presented to the model.
//!
//! Locking discipline: one coarse `RwLock` guards all maps, and the lock is
//! NEVER held across transport I/O: connection state is copied out, the
//! lock dropped, and re-taken to install results. Holding it across a dial
//! or call is the primary deadlock hazard of this design.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::RwLock;

use crate::mcp::errors::McpError;
use crate::mcp::security::validate_descriptor;
use crate::mcp::transport::{McpClient, DEFAULT_CALL_TIMEOUT};
use crate::mcp::types::{ServerDescriptor, ToolCall, ToolResult, ToolSchema};
use crate::plane::discovery::{
    discover_tool_schema, format_discovery_summary, format_no_match_summary, is_discover_call,
    match_tool_pattern,
};

/// Hard cap on servers per session when the caller passes zero.
pub const DEFAULT_MAX_CLIENTS: usize = 10;

/// Tools injected per discovery call when the caller passes zero.
pub const DEFAULT_MAX_TOOLS_PER_DISCOVERY: usize = 5;

#[derive(Default, Debug)]
struct ManagerState {
    /// Connected servers.
    clients: HashMap<String, Arc<McpClient>>,
    /// Admitted but not yet dialed.
    pending: HashMap<String, ServerDescriptor>,
    /// Descriptors of connected servers, kept so a dead server can return
    /// to pending for retry.
    connected_descriptors: HashMap<String, ServerDescriptor>,
    /// Qualified tool name → owning server. The single source of truth for
    /// where a call is sent.
    routing: HashMap<String, String>,
    /// Full catalog per connected server, filled on first list and
    /// invalidated only on reconnect.
    catalog: HashMap<String, Vec<ToolSchema>>,
    /// Model-visible discovered subset, in insertion order.
    discovered: IndexMap<String, ToolSchema>,
    closed: bool,
}

/// Manages the MCP servers of one session and executes tool calls.
#[derive(Debug)]
pub struct ServerManager {
    state: RwLock<ManagerState>,
    max_clients: usize,
    max_tools_per_discovery: usize,
    tool_timeout: Duration,
}

impl ServerManager {
    /// Create a manager. Zero values fall back to the defaults
    /// (10 clients, 5 tools per discovery, 60 s tool timeout).
    pub fn new(max_clients: usize, max_tools_per_discovery: usize) -> Self {
        Self {
            state: RwLock::new(ManagerState::default()),
            max_clients: if max_clients == 0 {
                DEFAULT_MAX_CLIENTS
            } else {
                max_clients
            },
            max_tools_per_discovery: if max_tools_per_discovery == 0 {
                DEFAULT_MAX_TOOLS_PER_DISCOVERY
            } else {
                max_tools_per_discovery
            },
            tool_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    /// Override the per-call deadline for tool execution.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        if !timeout.is_zero() {
            self.tool_timeout = timeout;
        }
        self
    }

    pub fn max_tools_per_discovery(&self) -> usize {
        self.max_tools_per_discovery
    }

    // ─── Admission ──────────────────────────────────────────────────────

    /// Validate a descriptor and store it for lazy connection. O(1), no I/O.
    pub async fn add_server_lazy(&self, descriptor: ServerDescriptor) -> Result<(), McpError> {
        validate_descriptor(&descriptor)?;

        let mut state = self.state.write().await;
        if state.closed {
            return Err(McpError::ManagerClosed);
        }
        if state.clients.len() + state.pending.len() >= self.max_clients {
            return Err(McpError::Config {
                reason: format!(
                    "maximum number of MCP servers reached ({})",
                    self.max_clients
                ),
            });
        }
        if state.clients.contains_key(&descriptor.name)
            || state.pending.contains_key(&descriptor.name)
        {
            return Err(McpError::Config {
                reason: format!("MCP server '{}' already exists", descriptor.name),
            });
        }

        tracing::debug!(server = %descriptor.name, "MCP server registered for lazy connection");
        state.pending.insert(descriptor.name.clone(), descriptor);
        Ok(())
    }

    // ─── Connection ─────────────────────────────────────────────────────

    /// Connect a pending server: dial, handshake, list tools, install the
    /// catalog and routing entries. A failure at any stage closes the
    /// half-open client and leaves the descriptor pending for retry.
    pub async fn ensure_connected(&self, name: &str) -> Result<(), McpError> {
        let descriptor = {
            let state = self.state.read().await;
            if state.closed {
                return Err(McpError::ManagerClosed);
            }
            if state.clients.contains_key(name) {
                return Ok(());
            }
            state
                .pending
                .get(name)
                .cloned()
                .ok_or_else(|| McpError::Config {
                    reason: format!("server '{name}' not configured"),
                })?
        };

        // Dial + handshake + list, lock released.
        let client = McpClient::connect(&descriptor).await?;
        if let Err(e) = client.initialize().await {
            let _ = client.close().await;
            return Err(e);
        }
        let tools = match client.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                let _ = client.close().await;
                return Err(e);
            }
        };

        let stale = {
            let mut state = self.state.write().await;
            if state.closed {
                drop(state);
                let _ = client.close().await;
                return Err(McpError::ManagerClosed);
            }
            if state.clients.contains_key(name) {
                // Lost a connect race; keep the established client.
                Some(client)
            } else {
                for tool in &tools {
                    state.routing.insert(tool.name.clone(), name.to_string());
                }
                tracing::info!(server = %name, tools = tools.len(), "lazily connected to MCP server");
                state.catalog.insert(name.to_string(), tools);
                state.pending.remove(name);
                state
                    .connected_descriptors
                    .insert(name.to_string(), descriptor);
                state.clients.insert(name.to_string(), Arc::new(client));
                None
            }
        };

        if let Some(client) = stale {
            let _ = client.close().await;
        }
        Ok(())
    }

    /// Cached tool catalog of a server, connecting it first if needed.
    pub async fn tools_from_server(&self, name: &str) -> Result<Vec<ToolSchema>, McpError> {
        self.ensure_connected(name).await?;
        let state = self.state.read().await;
        state
            .catalog
            .get(name)
            .cloned()
            .ok_or_else(|| McpError::Config {
                reason: format!("server '{name}' not found"),
            })
    }

    /// Drop a dead client: its routing entries and catalog go away and the
    /// descriptor returns to pending so callers may retry. The discovered
    /// schemas stay model-visible for the life of the session and become
    /// routable again on reconnect.
    async fn mark_server_dead(&self, name: &str) -> Option<Arc<McpClient>> {
        let mut state = self.state.write().await;
        let client = state.clients.remove(name);
        if client.is_some() {
            if let Some(descriptor) = state.connected_descriptors.remove(name) {
                state.pending.insert(name.to_string(), descriptor);
            }
            state.routing.retain(|_, server| server != name);
            state.catalog.remove(name);
            tracing::warn!(server = %name, "MCP server marked dead, descriptor returned to pending");
        }
        client
    }

    // ─── Introspection ──────────────────────────────────────────────────

    pub async fn connected_servers(&self) -> Vec<String> {
        self.state.read().await.clients.keys().cloned().collect()
    }

    pub async fn pending_server_count(&self) -> usize {
        self.state.read().await.pending.len()
    }

    pub async fn discovered_tool_count(&self) -> usize {
        self.state.read().await.discovered.len()
    }

    pub async fn is_tool_discovered(&self, name: &str) -> bool {
        self.state.read().await.discovered.contains_key(name)
    }

    pub async fn routed_server_for(&self, tool: &str) -> Option<String> {
        self.state.read().await.routing.get(tool).cloned()
    }

    /// The model-visible tool set: `mcp_discover` first, then every
    /// discovered tool in insertion order.
    pub async fn active_tools(&self) -> Vec<ToolSchema> {
        let state = self.state.read().await;
        let mut tools = Vec::with_capacity(state.discovered.len() + 1);
        tools.push(discover_tool_schema());
        tools.extend(state.discovered.values().cloned());
        tools
    }

    /// Every cached tool with its owning server, across connected servers.
    pub async fn all_cached_tools(&self) -> Vec<(String, ToolSchema)> {
        let state = self.state.read().await;
        let mut tools = Vec::new();
        for (server, catalog) in &state.catalog {
            for tool in catalog {
                tools.push((server.clone(), tool.clone()));
            }
        }
        tools
    }

    // ─── Execution ──────────────────────────────────────────────────────

    /// Execute one tool call. `mcp_discover` is handled by the discovery
    /// engine; everything else routes through the routing map. Tool-level
    /// failures ride back inside the result.
    pub async fn execute_tool(&self, call: &ToolCall) -> ToolResult {
        if is_discover_call(call) {
            let pattern = call
                .arguments
                .get("pattern")
                .and_then(|value| value.as_str())
                .unwrap_or("*")
                .to_string();
            return match self.handle_discovery(&pattern).await {
                Ok((_, summary)) => ToolResult::ok(summary),
                Err(e) => ToolResult::err(e),
            };
        }

        let (client, server_name) = {
            let state = self.state.read().await;
            if state.closed {
                return ToolResult::err(McpError::ManagerClosed);
            }
            let Some(server) = state.routing.get(&call.name) else {
                return ToolResult::err(McpError::NotFound {
                    name: call.name.clone(),
                });
            };
            let Some(client) = state.clients.get(server) else {
                return ToolResult::err(McpError::Transport {
                    server: server.clone(),
                    reason: "client not connected".into(),
                });
            };
            (client.clone(), server.clone())
        };

        // Catalogs may carry "server:tool" qualified names; servers expect
        // the raw name.
        let raw_name = call
            .name
            .strip_prefix(&format!("{server_name}:"))
            .unwrap_or(&call.name);

        match client
            .call_tool(raw_name, call.arguments.clone(), self.tool_timeout)
            .await
        {
            Ok(content) => {
                tracing::debug!(
                    tool = %call.name,
                    server = %server_name,
                    result_length = content.len(),
                    "MCP tool executed"
                );
                ToolResult::ok(content)
            }
            Err(e) => {
                tracing::debug!(tool = %call.name, server = %server_name, error = %e, "MCP tool execution failed");
                if matches!(e, McpError::Transport { .. }) {
                    if let Some(dead) = self.mark_server_dead(&server_name).await {
                        let _ = dead.close().await;
                    }
                }
                ToolResult::err(e)
            }
        }
    }

    // ─── JIT Discovery ──────────────────────────────────────────────────

    /// Run a discovery turn: connect pending servers (failures logged and
    /// skipped), scan connected catalogs for pattern matches up to the
    /// per-discovery cap, grow the discovered set, and produce the summary
    /// fed back to the model. Returns `(newly injected schemas, summary)`.
    pub async fn handle_discovery(
        &self,
        pattern: &str,
    ) -> Result<(Vec<ToolSchema>, String), McpError> {
        let pending_names: Vec<String> = {
            let state = self.state.read().await;
            if state.closed {
                return Err(McpError::ManagerClosed);
            }
            state.pending.keys().cloned().collect()
        };

        let mut searched: Vec<String> = Vec::new();
        for name in pending_names {
            searched.push(name.clone());
            if let Err(e) = self.ensure_connected(&name).await {
                tracing::warn!(
                    server = %name,
                    error = %e,
                    "JIT: failed to connect to MCP server for discovery"
                );
            }
        }

        let mut state = self.state.write().await;
        if state.closed {
            return Err(McpError::ManagerClosed);
        }

        // Scan catalogs. Catalog order across servers is map order, i.e.
        // implementation-defined; the cap keeps the first matches seen.
        let mut matched: Vec<(String, ToolSchema)> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        'scan: for (server, catalog) in &state.catalog {
            if !searched.contains(server) {
                searched.push(server.clone());
            }
            for tool in catalog {
                if seen.contains(&tool.name) {
                    continue;
                }
                if match_tool_pattern(pattern, &tool.name) {
                    seen.insert(tool.name.clone());
                    matched.push((server.clone(), tool.clone()));
                    if matched.len() >= self.max_tools_per_discovery {
                        break 'scan;
                    }
                }
            }
        }

        if matched.is_empty() {
            return Ok((Vec::new(), format_no_match_summary(pattern, &searched)));
        }

        let mut new_tools = Vec::new();
        let mut already_known = 0;
        for (server, tool) in &matched {
            state.routing.insert(tool.name.clone(), server.clone());
            if state.discovered.contains_key(&tool.name) {
                already_known += 1;
            } else {
                state.discovered.insert(tool.name.clone(), tool.clone());
                new_tools.push(tool.clone());
            }
        }

        let schemas: Vec<ToolSchema> = matched.into_iter().map(|(_, tool)| tool).collect();
        let summary = format_discovery_summary(pattern, &schemas, already_known);

        tracing::info!(
            pattern = %pattern,
            found = schemas.len(),
            new = new_tools.len(),
            already_known,
            "JIT: discovery completed"
        );

        Ok((new_tools, summary))
    }

    // ─── Teardown ───────────────────────────────────────────────────────

    /// Close every client and clear all state. Client close errors are
    /// aggregated into a log line, never a failure; closing twice is a
    /// no-op.
    pub async fn close(&self) {
        let clients: Vec<Arc<McpClient>> = {
            let mut state = self.state.write().await;
            if state.closed {
                return;
            }
            state.closed = true;
            state.pending.clear();
            state.connected_descriptors.clear();
            state.routing.clear();
            state.catalog.clear();
            state.discovered.clear();
            state.clients.drain().map(|(_, client)| client).collect()
        };

        let mut failures: Vec<String> = Vec::new();
        for client in clients {
            if let Err(e) = client.close().await {
                failures.push(format!("{}: {e}", client.server_name()));
            }
        }
        if !failures.is_empty() {
            tracing::warn!(errors = ?failures, "errors closing MCP clients");
        }
        tracing::debug!("server manager closed");
    }

    pub async fn is_closed(&self) -> bool {
        self.state.read().await.closed
    }

    // ─── Test support ───────────────────────────────────────────────────

    /// Install a catalog entry directly, standing in for a connected
    /// server's listing.
    #[cfg(test)]
    pub(crate) async fn seed_catalog(&self, server: &str, tools: Vec<ToolSchema>) {
        let mut state = self.state.write().await;
        state.catalog.insert(server.to_string(), tools);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
