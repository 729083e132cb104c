//! Tool-plane error types.

use thiserror::Error;

/// Errors raised by the MCP tool plane.
///
/// Tool-level kinds (`ToolExecution`, `Timeout`, `NotFound`) are returned to
/// the model as tool output so it can recover; session-level kinds
/// (`Config`, `ManagerClosed`) surface to the caller.
#[derive(Debug, Error)]
pub enum McpError {
    /// Invalid descriptor or failed security check. Never retried.
    #[error("invalid server configuration: {reason}")]
    Config { reason: String },

    /// Connect, read, or write failure. The owning client is considered
    /// dead and its descriptor returns to pending.
    #[error("transport error for server '{server}': {reason}")]
    Transport { server: String, reason: String },

    /// JSON-RPC error envelope or non-2xx HTTP status, surfaced as-is.
    #[error("protocol error [{code}]: {message}")]
    Protocol { code: i32, message: String },

    /// The tool ran and reported `isError: true`; the message carries the
    /// concatenated text content.
    #[error("tool execution failed: {message}")]
    ToolExecution { message: String },

    /// The call exceeded its deadline.
    #[error("call '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// Tool name absent from the routing map. Distinguished from discovery
    /// misses so the model knows to call `mcp_discover` again.
    #[error("tool '{name}' not found")]
    NotFound { name: String },

    /// The session's manager has been torn down.
    #[error("server manager is closed")]
    ManagerClosed,
}

impl McpError {
    /// Whether this error should surface to the caller rather than ride
    /// back to the model as tool output.
    pub fn is_session_error(&self) -> bool {
        matches!(self, McpError::Config { .. } | McpError::ManagerClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = McpError::Transport {
            server: "filesystem".into(),
            reason: "stdout closed".into(),
        };
        let text = err.to_string();
        assert!(text.contains("filesystem"));
        assert!(text.contains("stdout closed"));
    }

    #[test]
    fn session_error_classification() {
        assert!(McpError::ManagerClosed.is_session_error());
        assert!(McpError::Config {
            reason: "bad".into()
        }
        .is_session_error());
        assert!(!McpError::NotFound {
            name: "read_file".into()
        }
        .is_session_error());
        assert!(!McpError::Timeout {
            tool: "read_file".into(),
            timeout_ms: 1000
        }
        .is_session_error());
    }
}
