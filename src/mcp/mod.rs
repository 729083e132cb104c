//! MCP protocol layer.
//!
//! This module handles everything below the per-session tool plane:
//! - JSON-RPC 2.0 and MCP wire types
//! - The tool-plane error taxonomy
//! - Security validation of server descriptors before any subprocess spawn
//! - The three transport clients (stdio, HTTP/streamable-http, WebSocket)

pub mod errors;
pub mod security;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use errors::McpError;
pub use transport::{McpClient, DEFAULT_CALL_TIMEOUT, MCP_PROTOCOL_VERSION};
pub use types::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ServerDescriptor, ToolCall, ToolParameters,
    ToolProperty, ToolResult, ToolSchema, TransportKind,
};
