//! Tool-plane runtime for a language-model serving system.
//!
//! `toolplane` lets a chat loop discover and invoke external tools exposed
//! by MCP (Model Context Protocol) servers. Each session owns a
//! [`ServerManager`] that multiplexes server connections over stdio,
//! HTTP/streamable-http, and WebSocket transports, connecting lazily: the
//! model starts with a single `mcp_discover` meta-tool and grows its tool
//! surface on demand. Batches of tool calls are analysed for dependencies
//! and dispatched parallel-within-group, serial-across-groups.
//!
//! Typical flow:
//! 1. Resolve a descriptor list and session id, then
//!    [`SessionRegistry::get_or_create`] the session's manager.
//! 2. [`inject_bootstrap`] the JIT system prompt and present
//!    [`ServerManager::active_tools`] to the model.
//! 3. For each assistant turn with tool calls, [`plan_execution`] the batch
//!    and [`execute_plan`] it; discovery calls grow the active tool set,
//!    real calls route to their owning server.
//! 4. Tear the session down via the registry when it goes idle.

pub mod mcp;
pub mod plane;
pub mod session;

// Re-exports for convenience
pub use mcp::{
    McpClient, McpError, ServerDescriptor, ToolCall, ToolResult, ToolSchema, TransportKind,
};
pub use plane::{
    execute_batch, execute_plan, plan_execution, ExecutionPlan, ServerManager, DISCOVER_TOOL_NAME,
};
pub use session::{
    inject_bootstrap, resolve_servers, search_available_tools, Message, SessionRegistry,
    ToolPlaneOptions, ToolSearchRequest, ToolSearchResponse,
};
