//! Execution planning for tool-call batches.
//!
//! Analyses an ordered batch of tool calls and decides which may run in
//! parallel. The heuristic errs on the side of safety: any plausibly
//! dependent file operation serializes the whole batch, at the cost of some
//! missed parallelism.

use serde::Serialize;

use crate::mcp::types::ToolCall;

/// Tool-name substrings that mark a call as a write operation.
const WRITE_MARKERS: &[&str] = &["write", "create", "edit", "append"];

/// Tool-name substrings that mark a call as a read operation.
const READ_MARKERS: &[&str] = &["read", "list", "get"];

/// Adjacent-name pairs that imply an ordering dependency.
const ORDERING_PAIRS: &[(&str, &str)] = &[
    ("create", "read"),
    ("write", "read"),
    ("1", "2"),
    ("first", "second"),
    ("init", "use"),
];

/// Execution strategy for a batch of tool calls.
///
/// `groups` holds indices into the original batch: calls within a group run
/// concurrently, groups run in order. Every index appears exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPlan {
    pub sequential: bool,
    pub groups: Vec<Vec<usize>>,
    pub reason: String,
}

/// Analyse a batch and emit parallel/sequential groups.
pub fn plan_execution(calls: &[ToolCall]) -> ExecutionPlan {
    if calls.is_empty() {
        return ExecutionPlan {
            sequential: false,
            groups: Vec::new(),
            reason: "Empty batch".to_string(),
        };
    }
    if calls.len() == 1 {
        return ExecutionPlan {
            sequential: false,
            groups: vec![vec![0]],
            reason: "Single tool call".to_string(),
        };
    }

    let mut has_writes = false;
    let mut has_reads = false;
    // Operand → indices of calls touching it.
    let mut operand_targets: Vec<(String, Vec<usize>)> = Vec::new();

    for (index, call) in calls.iter().enumerate() {
        // Marker matching is case-sensitive: tool names are conventionally
        // lowercase, and an unrecognized casing falls through to parallel.
        let name = call.name.as_str();
        let is_write = WRITE_MARKERS.iter().any(|marker| name.contains(marker));
        let is_read = READ_MARKERS.iter().any(|marker| name.contains(marker));

        if is_write {
            has_writes = true;
        }
        if is_read {
            has_reads = true;
        }

        if is_write || is_read {
            if let Some(operand) = extract_operand(call) {
                match operand_targets.iter_mut().find(|(op, _)| *op == operand) {
                    Some((_, indices)) => indices.push(index),
                    None => operand_targets.push((operand, vec![index])),
                }
            }
        }
    }

    let mut sequential = false;
    let mut reason = "Can execute in parallel".to_string();

    if has_writes && has_reads {
        sequential = true;
        reason = "Mixed read and write operations detected".to_string();
    }

    if !sequential {
        for (operand, indices) in &operand_targets {
            if indices.len() > 1 {
                sequential = true;
                reason = format!("Multiple operations on the same file: {operand}");
                break;
            }
        }
    }

    if !sequential {
        for pair in calls.windows(2) {
            let current = pair[0].name.as_str();
            let next = pair[1].name.as_str();
            if ORDERING_PAIRS
                .iter()
                .any(|(a, b)| current.contains(a) && next.contains(b))
            {
                sequential = true;
                reason = "Tool names suggest sequential dependency".to_string();
                break;
            }
        }
    }

    let groups = if sequential {
        (0..calls.len()).map(|index| vec![index]).collect()
    } else {
        vec![(0..calls.len()).collect()]
    };

    tracing::debug!(
        sequential,
        reason = %reason,
        tool_count = calls.len(),
        "execution plan analysed"
    );

    ExecutionPlan {
        sequential,
        groups,
        reason,
    }
}

/// Pull the file-ish operand out of a call's `path` or `file` argument,
/// when string-typed.
fn extract_operand(call: &ToolCall) -> Option<String> {
    for key in ["path", "file"] {
        if let Some(value) = call.arguments.get(key).and_then(|value| value.as_str()) {
            return Some(value.to_string());
        }
    }
    None
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: serde_json::Value) -> ToolCall {
        ToolCall::new(name, args)
    }

    fn scheduled_indices(plan: &ExecutionPlan) -> Vec<usize> {
        plan.groups.iter().flatten().copied().collect()
    }

    #[test]
    fn empty_batch_yields_empty_plan() {
        let plan = plan_execution(&[]);
        assert!(!plan.sequential);
        assert!(plan.groups.is_empty());
    }

    #[test]
    fn single_call_is_one_parallel_group() {
        let plan = plan_execution(&[call("read_file", serde_json::json!({"path": "/a"}))]);
        assert!(!plan.sequential);
        assert_eq!(plan.groups, vec![vec![0]]);
        assert_eq!(plan.reason, "Single tool call");
    }

    #[test]
    fn mixed_write_then_read_serializes() {
        let calls = [
            call("write_file", serde_json::json!({"path": "/a"})),
            call("read_file", serde_json::json!({"path": "/a"})),
        ];
        let plan = plan_execution(&calls);
        assert!(plan.sequential);
        assert_eq!(plan.groups, vec![vec![0], vec![1]]);
        assert!(plan.reason.contains("read and write"));
    }

    #[test]
    fn independent_reads_run_in_parallel() {
        let calls = [
            call("list_directory", serde_json::json!({"path": "/a"})),
            call("read_file", serde_json::json!({"path": "/b"})),
        ];
        let plan = plan_execution(&calls);
        assert!(!plan.sequential);
        assert_eq!(plan.groups, vec![vec![0, 1]]);
    }

    #[test]
    fn same_operand_serializes_and_names_it() {
        let calls = [
            call("read_file", serde_json::json!({"path": "/shared.txt"})),
            call("get_file_info", serde_json::json!({"file": "/shared.txt"})),
        ];
        let plan = plan_execution(&calls);
        assert!(plan.sequential);
        assert!(plan.reason.contains("/shared.txt"));
    }

    #[test]
    fn ordering_pairs_serialize() {
        let cases = [
            ("create_directory", "read_file"),
            ("step_1", "step_2"),
            ("first_pass", "second_pass"),
            ("init_db", "use_db"),
        ];
        for (first, second) in cases {
            let calls = [
                call(first, serde_json::json!({})),
                call(second, serde_json::json!({})),
            ];
            let plan = plan_execution(&calls);
            assert!(plan.sequential, "{first} -> {second} should serialize");
            assert_eq!(plan.reason, "Tool names suggest sequential dependency");
        }
    }

    #[test]
    fn every_call_scheduled_exactly_once() {
        let calls: Vec<ToolCall> = (0..7)
            .map(|i| call(&format!("tool_{i}"), serde_json::json!({})))
            .collect();
        let plan = plan_execution(&calls);
        let mut indices = scheduled_indices(&plan);
        indices.sort_unstable();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());

        // Same property for a sequential plan.
        let calls = [
            call("write_file", serde_json::json!({"path": "/a"})),
            call("read_file", serde_json::json!({"path": "/b"})),
            call("list_directory", serde_json::json!({"path": "/c"})),
        ];
        let plan = plan_execution(&calls);
        assert!(plan.sequential);
        let mut indices = scheduled_indices(&plan);
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn marker_matching_is_case_sensitive() {
        // "WriteFile"/"ReadFile" match no lowercase marker, so the batch is
        // parallel even though both touch the same path.
        let calls = [
            call("WriteFile", serde_json::json!({"path": "/a"})),
            call("ReadFile", serde_json::json!({"path": "/a"})),
        ];
        let plan = plan_execution(&calls);
        assert!(!plan.sequential);
        assert_eq!(plan.groups, vec![vec![0, 1]]);

        // Same for the ordering pairs.
        let calls = [
            call("Create_entry", serde_json::json!({})),
            call("Read_entry", serde_json::json!({})),
        ];
        let plan = plan_execution(&calls);
        assert!(!plan.sequential);
    }

    #[test]
    fn non_string_operand_is_ignored() {
        let calls = [
            call("read_file", serde_json::json!({"path": 42})),
            call("get_file_info", serde_json::json!({"path": 42})),
        ];
        let plan = plan_execution(&calls);
        // Numbers are not extractable operands, so no conflict is seen.
        assert!(!plan.sequential);
    }
}
