//! Plan execution.
//!
//! Runs an `ExecutionPlan` against a manager: groups in order, calls within
//! a group concurrently. The output array is indexed by the original call
//! position regardless of completion order, and individual failures never
//! abort the batch; each slot carries its own error.

use futures::future::join_all;

use crate::mcp::errors::McpError;
use crate::mcp::types::{ToolCall, ToolResult};
use crate::plane::manager::ServerManager;
use crate::plane::planner::{plan_execution, ExecutionPlan};

/// Execute tool calls according to a plan.
pub async fn execute_plan(
    manager: &ServerManager,
    calls: &[ToolCall],
    plan: &ExecutionPlan,
) -> Vec<ToolResult> {
    let mut slots: Vec<Option<ToolResult>> = Vec::with_capacity(calls.len());
    slots.resize_with(calls.len(), || None);

    for group in &plan.groups {
        let futures = group.iter().filter_map(|&index| {
            calls.get(index).map(|call| async move {
                (index, manager.execute_tool(call).await)
            })
        });

        for (index, result) in join_all(futures).await {
            slots[index] = Some(result);
        }
    }

    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                // A call the plan never scheduled; surface it rather than
                // silently dropping the slot.
                ToolResult::err(McpError::Config {
                    reason: "call not scheduled by execution plan".into(),
                })
            })
        })
        .collect()
}

/// Plan and execute a batch in one step.
pub async fn execute_batch(manager: &ServerManager, calls: &[ToolCall]) -> Vec<ToolResult> {
    let plan = plan_execution(calls);
    execute_plan(manager, calls, &plan).await
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::ToolSchema;

    fn discover_call(pattern: &str) -> ToolCall {
        ToolCall::new("mcp_discover", serde_json::json!({ "pattern": pattern }))
    }

    fn schema(name: &str) -> ToolSchema {
        ToolSchema {
            name: name.to_string(),
            description: String::new(),
            parameters: Default::default(),
        }
    }

    #[tokio::test]
    async fn output_is_indexed_by_call_position() {
        let manager = ServerManager::new(10, 5);
        manager
            .seed_catalog(
                "git",
                vec![schema("git:status"), schema("git:diff"), schema("git:log")],
            )
            .await;

        let calls = vec![
            discover_call("git:status"),
            discover_call("*nonexistent*"),
            discover_call("git:diff"),
        ];
        let plan = plan_execution(&calls);
        let results = execute_plan(&manager, &calls, &plan).await;

        assert_eq!(results.len(), calls.len());
        assert!(results[0].content.contains("git:status"));
        assert!(results[1].content.contains("No tools found"));
        assert!(results[2].content.contains("git:diff"));
    }

    #[tokio::test]
    async fn failures_do_not_abort_the_batch() {
        let manager = ServerManager::new(10, 5);

        let calls = vec![
            ToolCall::new("missing:tool", serde_json::json!({})),
            discover_call("*"),
        ];
        let plan = plan_execution(&calls);
        let results = execute_plan(&manager, &calls, &plan).await;

        assert_eq!(results.len(), 2);
        assert!(matches!(results[0].error, Some(McpError::NotFound { .. })));
        // The discovery call still ran (no servers, so a no-match summary).
        assert!(results[1].is_ok());
    }

    #[tokio::test]
    async fn sequential_plan_executes_all_groups() {
        let manager = ServerManager::new(10, 5);

        // write + read serializes into singleton groups; neither tool is
        // routable, so each slot carries its own NotFound.
        let calls = vec![
            ToolCall::new("write_file", serde_json::json!({"path": "/a"})),
            ToolCall::new("read_file", serde_json::json!({"path": "/a"})),
        ];
        let plan = plan_execution(&calls);
        assert!(plan.sequential);
        let results = execute_plan(&manager, &calls, &plan).await;
        assert_eq!(results.len(), 2);
        assert!(results
            .iter()
            .all(|result| matches!(result.error, Some(McpError::NotFound { .. }))));
    }

    #[tokio::test]
    async fn parallel_discoveries_share_one_group() {
        let manager = ServerManager::new(10, 5);
        manager
            .seed_catalog("fs", vec![schema("write_file"), schema("read_file")])
            .await;

        let calls = vec![discover_call("write_file"), discover_call("read_file")];
        let plan = plan_execution(&calls);
        let results = execute_plan(&manager, &calls, &plan).await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|result| result.is_ok()));
        assert_eq!(manager.discovered_tool_count().await, 2);
    }

    #[tokio::test]
    async fn execute_batch_plans_and_runs() {
        let manager = ServerManager::new(10, 5);
        let results = execute_batch(&manager, &[discover_call("*")]).await;
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[tokio::test]
    async fn empty_batch_produces_empty_output() {
        let manager = ServerManager::new(10, 5);
        let results = execute_batch(&manager, &[]).await;
        assert!(results.is_empty());
    }
}
