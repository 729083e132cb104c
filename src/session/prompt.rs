//! Bootstrap system-prompt injection.
//!
//! When JIT discovery is on, the model needs to be told that it starts with
//! only `mcp_discover` and how to grow its tool surface. The instruction
//! block is fixed text that must survive round-trips through existing
//! system prompts without reordering; when a filesystem-style server is
//! present, its root path is appended so the model stays inside it.

use serde::{Deserialize, Serialize};

use crate::mcp::types::ServerDescriptor;

/// Minimal chat message shape. Conversations are opaque to the tool plane;
/// this is just enough structure to find or create the system message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// The fixed JIT instruction block.
const JIT_INSTRUCTIONS: &str = r#"You have access to external tools via MCP (Model Context Protocol).

IMPORTANT: You start with only one tool: mcp_discover. To access other tools (file operations, etc.), you MUST first call mcp_discover to find and enable them.

Example workflow:
1. User asks to read a file
2. You call: mcp_discover(pattern="*file*")
3. Tools like read_file, write_file become available
4. You call the discovered tool: read_file(path="example.txt")

For multi-step tasks, issue a discovery for each capability you need.
Call mcp_discover with patterns like "*file*", "*search*", "*git*", or "*" to see all tools.
"#;

/// Build the bootstrap context for a session's servers.
pub fn jit_bootstrap_context(descriptors: &[ServerDescriptor]) -> String {
    let mut context = String::from(JIT_INSTRUCTIONS);

    for descriptor in descriptors {
        if let Some(root) = filesystem_root(descriptor) {
            context.push_str(&format!(
                "\nFilesystem working directory: {root}\nAll file paths must be within this directory.\n"
            ));
        }
    }

    context
}

/// Extract the working directory from a filesystem-style server descriptor.
/// The root is conventionally the last command argument.
pub fn filesystem_root(descriptor: &ServerDescriptor) -> Option<String> {
    let command = descriptor.command.as_deref().unwrap_or_default();
    let is_filesystem = command.contains("filesystem")
        || descriptor.args.iter().any(|arg| arg.contains("filesystem"));

    if is_filesystem {
        descriptor.args.last().cloned()
    } else {
        None
    }
}

/// Prepend the bootstrap context to the conversation's system message.
///
/// An existing leading system message keeps its content after the context
/// (separated by a newline); otherwise a new system message is inserted at
/// the front. Later messages are never reordered.
pub fn inject_bootstrap(
    mut messages: Vec<Message>,
    descriptors: &[ServerDescriptor],
) -> Vec<Message> {
    let context = jit_bootstrap_context(descriptors);

    match messages.first_mut() {
        Some(first) if first.role == "system" => {
            first.content = format!("{context}\n{}", first.content);
        }
        _ => {
            messages.insert(0, Message::system(context));
        }
    }

    messages
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn user(content: &str) -> Message {
        Message {
            role: "user".to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn context_contains_workflow_and_patterns() {
        let context = jit_bootstrap_context(&[]);
        assert!(context.contains("mcp_discover"));
        assert!(context.contains("mcp_discover(pattern=\"*file*\")"));
        assert!(context.contains("read_file(path=\"example.txt\")"));
        assert!(context.contains("issue a discovery for each capability"));
    }

    #[test]
    fn filesystem_root_is_last_argument() {
        let desc = ServerDescriptor::stdio(
            "filesystem",
            "npx",
            &["-y", "@modelcontextprotocol/server-filesystem", "/data/docs"],
        );
        assert_eq!(filesystem_root(&desc).as_deref(), Some("/data/docs"));

        let other = ServerDescriptor::stdio("git", "npx", &["-y", "@mcp/git"]);
        assert_eq!(filesystem_root(&other), None);
    }

    #[test]
    fn context_includes_filesystem_root() {
        let desc = ServerDescriptor::stdio("fs", "mcp-server-filesystem", &["/workspace"]);
        let context = jit_bootstrap_context(&[desc]);
        assert!(context.contains("Filesystem working directory: /workspace"));
    }

    #[test]
    fn inject_creates_system_message_when_absent() {
        let messages = inject_bootstrap(vec![user("read my file")], &[]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("mcp_discover"));
        assert_eq!(messages[1], user("read my file"));
    }

    #[test]
    fn inject_prepends_to_existing_system_message() {
        let messages = vec![Message::system("You are helpful."), user("hi")];
        let injected = inject_bootstrap(messages, &[]);
        assert_eq!(injected.len(), 2);
        assert!(injected[0].content.starts_with("You have access to external tools"));
        assert!(injected[0].content.ends_with("You are helpful."));
    }

    #[test]
    fn inject_preserves_message_order() {
        let messages = vec![user("one"), user("two")];
        let injected = inject_bootstrap(messages, &[]);
        assert_eq!(injected[1], user("one"));
        assert_eq!(injected[2], user("two"));
    }
}
