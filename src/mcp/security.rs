//! Security validation for server descriptors.
//!
//! Every descriptor passes through `validate_descriptor` before a manager
//! admits it. The checks are fail-closed: subprocess descriptors must name
//! a command outside the deny-list and carry arguments free of shell
//! metacharacters; remote descriptors keep the name rules and must carry a
//! URL.

use super::errors::McpError;
use super::types::{ServerDescriptor, TransportKind};

// ─── Policy ─────────────────────────────────────────────────────────────────

/// Characters never allowed in a server name.
const NAME_FORBIDDEN: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Maximum server name length.
const NAME_MAX_LEN: usize = 100;

/// Commands that are never spawned: shells, privilege escalation,
/// destructive utilities, and ad-hoc network clients.
const COMMAND_DENY_LIST: &[&str] = &[
    "sh", "bash", "zsh", "dash", "ksh", "fish", // shells
    "sudo", "su", "doas", // privilege escalation
    "rm", "dd", "mkfs", // destructive
    "curl", "wget", "nc", "ncat", "socat", // ad-hoc network
];

/// Shell metacharacters forbidden in arguments and env-var names.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '{', '}', '<', '>', '\n',
];

/// Leading-dash arguments longer than this are rejected as suspicious.
const MAX_FLAG_ARG_LEN: usize = 50;

// ─── Validation ─────────────────────────────────────────────────────────────

/// Validate a descriptor against the security policy.
///
/// Returns `McpError::Config` naming the first violated rule.
pub fn validate_descriptor(descriptor: &ServerDescriptor) -> Result<(), McpError> {
    validate_name(&descriptor.name)?;

    if descriptor.transport.is_remote() {
        // Remote transports skip command checks but still need an endpoint.
        if descriptor
            .url
            .as_deref()
            .map(|url| url.trim().is_empty())
            .unwrap_or(true)
        {
            return reject(descriptor, "url is required for remote transports");
        }
        return Ok(());
    }

    let command = match descriptor.command.as_deref() {
        Some(command) if !command.is_empty() => command,
        _ => return reject(descriptor, "command cannot be empty"),
    };

    if command.contains("..") {
        return reject(descriptor, "command path cannot contain '..'");
    }

    if is_denied_command(command) {
        return reject(
            descriptor,
            &format!("command '{command}' is not allowed for security reasons"),
        );
    }

    for arg in &descriptor.args {
        if arg.contains("..") {
            return reject(descriptor, &format!("suspicious argument detected: {arg}"));
        }
        if arg.starts_with('-') && arg.len() > MAX_FLAG_ARG_LEN {
            return reject(descriptor, &format!("suspicious argument detected: {arg}"));
        }
        if has_shell_metacharacters(arg) {
            return reject(
                descriptor,
                &format!("argument contains shell metacharacters: {arg}"),
            );
        }
    }

    for key in descriptor.env.keys() {
        if has_shell_metacharacters(key) {
            return reject(
                descriptor,
                &format!("environment variable name contains invalid characters: {key}"),
            );
        }
    }

    Ok(())
}

fn validate_name(name: &str) -> Result<(), McpError> {
    if name.is_empty() {
        return Err(McpError::Config {
            reason: "server name cannot be empty".into(),
        });
    }
    if name.len() > NAME_MAX_LEN {
        return Err(McpError::Config {
            reason: format!("server name too long (max {NAME_MAX_LEN} characters)"),
        });
    }
    if name.contains(NAME_FORBIDDEN) {
        return Err(McpError::Config {
            reason: "server name contains invalid characters".into(),
        });
    }
    Ok(())
}

/// Check a command against the deny-list, including its basename so full
/// paths like `/bin/bash` cannot slip past.
fn is_denied_command(command: &str) -> bool {
    let basename = command.rsplit(['/', '\\']).next().unwrap_or(command);
    COMMAND_DENY_LIST
        .iter()
        .any(|denied| *denied == command || *denied == basename)
}

/// Whether a string contains shell metacharacters.
pub fn has_shell_metacharacters(value: &str) -> bool {
    value.contains(SHELL_METACHARACTERS)
}

fn reject(descriptor: &ServerDescriptor, reason: &str) -> Result<(), McpError> {
    tracing::warn!(
        server = %descriptor.name,
        reason = %reason,
        "rejected server descriptor"
    );
    Err(McpError::Config {
        reason: reason.to_string(),
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::ServerDescriptor;

    #[test]
    fn accepts_plain_stdio_descriptor() {
        let desc = ServerDescriptor::stdio("filesystem", "npx", &["-y", "@mcp/fs", "/data"]);
        assert!(validate_descriptor(&desc).is_ok());
    }

    #[test]
    fn rejects_shell_command() {
        let desc = ServerDescriptor::stdio("evil", "bash", &["-c", "echo"]);
        let err = validate_descriptor(&desc).unwrap_err();
        assert!(matches!(err, McpError::Config { .. }));
    }

    #[test]
    fn rejects_shell_command_by_basename() {
        let desc = ServerDescriptor::stdio("evil", "/bin/bash", &[]);
        assert!(validate_descriptor(&desc).is_err());
    }

    #[test]
    fn rejects_privilege_escalation_and_network_tools() {
        for command in ["sudo", "su", "doas", "rm", "dd", "mkfs", "curl", "wget", "nc"] {
            let desc = ServerDescriptor::stdio("s", command, &[]);
            assert!(
                validate_descriptor(&desc).is_err(),
                "{command} should be denied"
            );
        }
    }

    #[test]
    fn rejects_shell_metacharacters_in_args() {
        let desc = ServerDescriptor::stdio("fs", "npx", &["-y", "@mcp/fs", "/data;rm -rf /"]);
        let err = validate_descriptor(&desc).unwrap_err();
        match err {
            McpError::Config { reason } => assert!(reason.contains("shell metacharacters")),
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn rejects_parent_dir_traversal() {
        let desc = ServerDescriptor::stdio("fs", "npx", &["../../etc/passwd"]);
        assert!(validate_descriptor(&desc).is_err());

        let desc = ServerDescriptor::stdio("fs", "../bin/server", &[]);
        assert!(validate_descriptor(&desc).is_err());
    }

    #[test]
    fn rejects_overlong_flag_argument() {
        let long_flag = format!("-{}", "x".repeat(60));
        let desc = ServerDescriptor::stdio("fs", "npx", &[long_flag.as_str()]);
        assert!(validate_descriptor(&desc).is_err());

        // A long positional argument is fine.
        let long_path = format!("/{}", "x".repeat(60));
        let desc = ServerDescriptor::stdio("fs", "npx", &[long_path.as_str()]);
        assert!(validate_descriptor(&desc).is_ok());
    }

    #[test]
    fn rejects_bad_env_var_name() {
        let mut desc = ServerDescriptor::stdio("fs", "npx", &[]);
        desc.env.insert("PATH$(whoami)".into(), "x".into());
        assert!(validate_descriptor(&desc).is_err());
    }

    #[test]
    fn name_rules() {
        let mut desc = ServerDescriptor::stdio("", "npx", &[]);
        assert!(validate_descriptor(&desc).is_err());

        desc.name = "a/b".into();
        assert!(validate_descriptor(&desc).is_err());

        desc.name = "x".repeat(101);
        assert!(validate_descriptor(&desc).is_err());

        desc.name = "fine-name_01".into();
        assert!(validate_descriptor(&desc).is_ok());
    }

    #[test]
    fn remote_descriptor_skips_command_checks_but_needs_url() {
        // Name validation still applies.
        let mut desc = ServerDescriptor::http("bad:name", "http://host/mcp");
        assert!(validate_descriptor(&desc).is_err());

        desc.name = "remote".into();
        assert!(validate_descriptor(&desc).is_ok());

        desc.url = None;
        assert!(validate_descriptor(&desc).is_err());
    }
}
