//! Just-in-time tool discovery.
//!
//! The model starts each session with a single meta-tool, `mcp_discover`.
//! Calling it with a pattern searches the catalogs of the session's servers
//! and injects the matching tool schemas into the model-visible set. This
//! module holds the stateless half of that machinery: the meta-tool schema,
//! the pattern matcher, and the textual summaries fed back to the model.
//! The stateful search lives on `ServerManager`.

use crate::mcp::types::{ToolCall, ToolParameters, ToolProperty, ToolSchema};

/// Name of the built-in discovery meta-tool.
pub const DISCOVER_TOOL_NAME: &str = "mcp_discover";

/// Maximum description length in discovery summaries.
const SUMMARY_DESC_LIMIT: usize = 80;

/// Schema of the `mcp_discover` meta-tool. Always present in the
/// model-visible tool set regardless of discovery state.
pub fn discover_tool_schema() -> ToolSchema {
    let mut parameters = ToolParameters::default();
    parameters.properties.insert(
        "pattern".to_string(),
        ToolProperty {
            kind: "string".to_string(),
            description: "Glob pattern to match tool names (e.g., '*file*', '*git*')".to_string(),
        },
    );
    parameters.required.push("pattern".to_string());

    ToolSchema {
        name: DISCOVER_TOOL_NAME.to_string(),
        description: r#"Search for available tools by capability pattern.

WHEN TO USE: Call this when you need a tool you don't currently have.
After calling, matching tools become available for your next action.

PATTERNS:
- "*file*" or "*read*" - File operations (read, write, list, search)
- "*git*" - Git operations (status, commit, diff, log)
- "*sql*" or "*postgres*" or "*database*" - Database operations
- "*search*" - Search capabilities
- "*http*" or "*fetch*" - HTTP/API operations
- "*" - List all available tools (use sparingly)

RETURNS: Description of discovered tools. Use them in your next response."#
            .to_string(),
        parameters,
    }
}

/// Whether a tool call targets the discovery meta-tool.
pub fn is_discover_call(call: &ToolCall) -> bool {
    call.name == DISCOVER_TOOL_NAME
}

// ─── Pattern Matching ───────────────────────────────────────────────────────

/// Check whether a tool name matches a discovery pattern.
///
/// Case-insensitive. Decision order:
/// 1. exact equality
/// 2. `"*"` matches everything
/// 3. a pattern with a leading or trailing `*` matches as a substring of
///    the stripped text (`"*file*"` → contains `"file"`)
/// 4. full glob semantics (`*`, `?`, `[a-z]` classes)
/// 5. a pattern with no edge wildcards matches as a plain substring
///
/// Step 3 vs 4 gives `"git:*"` anchored-glob behavior while bare `"git"`
/// falls through to substring matching; that asymmetry is inherited
/// behavior and deliberately kept.
pub fn match_tool_pattern(pattern: &str, tool_name: &str) -> bool {
    let pattern = pattern.to_lowercase();
    let tool_name = tool_name.to_lowercase();

    if pattern == tool_name {
        return true;
    }

    if pattern == "*" {
        return true;
    }

    let trimmed = pattern.trim_matches('*');
    if !trimmed.is_empty() && trimmed != pattern && tool_name.contains(trimmed) {
        return true;
    }

    if glob_match(&pattern, &tool_name) {
        return true;
    }

    if !pattern.starts_with('*') && !pattern.ends_with('*') && tool_name.contains(&pattern) {
        return true;
    }

    false
}

/// Glob matching over the full name: `*` any run, `?` one char,
/// `[a-z]` / `[^a-z]` character classes. Malformed patterns match nothing.
fn glob_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let name: Vec<char> = name.chars().collect();
    glob_here(&pattern, &name)
}

fn glob_here(pattern: &[char], name: &[char]) -> bool {
    let Some(&first) = pattern.first() else {
        return name.is_empty();
    };

    match first {
        '*' => (0..=name.len()).any(|skip| glob_here(&pattern[1..], &name[skip..])),
        '?' => !name.is_empty() && glob_here(&pattern[1..], &name[1..]),
        '[' => {
            let Some(&candidate) = name.first() else {
                return false;
            };
            match class_match(&pattern[1..], candidate) {
                Some((matched, consumed)) => {
                    matched && glob_here(&pattern[1 + consumed..], &name[1..])
                }
                None => false,
            }
        }
        literal => {
            !name.is_empty() && name[0] == literal && glob_here(&pattern[1..], &name[1..])
        }
    }
}

/// Match one character against a class body (the slice after `[`).
/// Returns `(matched, chars consumed including the closing bracket)`, or
/// `None` if the class never closes.
fn class_match(body: &[char], candidate: char) -> Option<(bool, usize)> {
    let mut index = 0;
    let mut negated = false;
    if body.first() == Some(&'^') {
        negated = true;
        index += 1;
    }

    let mut matched = false;
    let mut first_entry = true;
    while index < body.len() && (first_entry || body[index] != ']') {
        first_entry = false;
        let low = body[index];
        if index + 2 < body.len() && body[index + 1] == '-' && body[index + 2] != ']' {
            let high = body[index + 2];
            if low <= candidate && candidate <= high {
                matched = true;
            }
            index += 3;
        } else {
            if candidate == low {
                matched = true;
            }
            index += 1;
        }
    }

    if index >= body.len() {
        return None; // unterminated class
    }
    Some((matched != negated, index + 1))
}

// ─── Summaries ──────────────────────────────────────────────────────────────

/// Truncate a description on a char boundary, appending `...` when cut.
fn truncate_description(description: &str) -> String {
    if description.chars().count() <= SUMMARY_DESC_LIMIT {
        return description.to_string();
    }
    let cut: String = description.chars().take(SUMMARY_DESC_LIMIT - 3).collect();
    format!("{cut}...")
}

/// Summary for a discovery turn that matched at least one tool.
///
/// `already_known` counts matches that were in the discovered set before
/// this turn; the closing sentence appears only when new tools arrived.
pub fn format_discovery_summary(
    pattern: &str,
    matches: &[ToolSchema],
    already_known: usize,
) -> String {
    let lines: Vec<String> = matches
        .iter()
        .map(|tool| format!("- {}: {}", tool.name, truncate_description(&tool.description)))
        .collect();

    let mut summary = format!(
        "Found {} tools matching '{}':\n{}",
        matches.len(),
        pattern,
        lines.join("\n")
    );

    if already_known > 0 {
        summary.push_str(&format!("\n\n({already_known} tools were already available)"));
    }

    if matches.len() > already_known {
        summary.push_str(
            "\n\nThese tools are now available. Call them directly in your next response.",
        );
    }

    summary
}

/// Summary for a discovery turn with zero matches, listing the servers the
/// pass touched and hinting at common patterns.
pub fn format_no_match_summary(pattern: &str, searched_servers: &[String]) -> String {
    format!(
        "No tools found matching pattern '{}'. Searched servers: {}. \
         Try a different pattern like '*file*', '*git*', or '*' to see all.",
        pattern,
        searched_servers.join(", ")
    )
}

// ─── Tests ──────────────────────────────────────────────────────────────────
