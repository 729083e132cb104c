//! JSON-RPC over child-process stdio.
//!
//! Spawns the (already validated) server command with piped stdio and
//! speaks newline-delimited JSON frames. A reader task continuously parses
//! stdout and routes responses by id to per-request channels; stderr is
//! captured for diagnostics; a watcher task fails outstanding requests when
//! the child exits.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};

use crate::mcp::errors::McpError;
use crate::mcp::types::{JsonRpcRequest, JsonRpcResponse, ServerDescriptor};

/// Graceful-shutdown window before the child is killed.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

/// A running stdio MCP server process.
#[derive(Debug)]
pub struct StdioClient {
    server_name: String,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicI64,
    pub(crate) initialized: AtomicBool,
}

impl StdioClient {
    /// Spawn the server process and start the reader tasks.
    pub async fn spawn(descriptor: &ServerDescriptor) -> Result<Self, McpError> {
        let command = descriptor.command.as_deref().ok_or_else(|| McpError::Config {
            reason: "command is required for stdio transport".into(),
        })?;

        tracing::debug!(
            server = %descriptor.name,
            command = %command,
            args = ?descriptor.args,
            "spawning MCP stdio server"
        );

        let mut cmd = Command::new(command);
        cmd.args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| McpError::Transport {
            server: descriptor.name.clone(),
            reason: format!("failed to spawn '{command}': {e}"),
        })?;

        let stdin = child.stdin.take().ok_or_else(|| McpError::Transport {
            server: descriptor.name.clone(),
            reason: "failed to capture stdin".into(),
        })?;
        let stdout = child.stdout.take().ok_or_else(|| McpError::Transport {
            server: descriptor.name.clone(),
            reason: "failed to capture stdout".into(),
        })?;
        let stderr = child.stderr.take();

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        // Reader task: route stdout frames by id, log everything else.
        {
            let pending = pending.clone();
            let server = descriptor.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                        Ok(response) => match response.id {
                            Some(id) => {
                                if let Some(tx) = pending.lock().await.remove(&id) {
                                    let _ = tx.send(response);
                                } else {
                                    tracing::debug!(
                                        server = %server,
                                        id,
                                        "response for unknown request id"
                                    );
                                }
                            }
                            None => {
                                tracing::debug!(server = %server, "server notification");
                            }
                        },
                        Err(_) => {
                            // Not JSON-RPC; servers sometimes log to stdout.
                            tracing::debug!(server = %server, line = %trimmed, "non-JSON stdout line");
                        }
                    }
                }
                // Stream ended: the process is gone, fail outstanding calls.
                pending.lock().await.clear();
                tracing::debug!(server = %server, "stdio reader exited");
            });
        }

        // Stderr capture for diagnostics.
        if let Some(stderr) = stderr {
            let server = descriptor.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %server, stderr = %line, "server stderr");
                }
            });
        }

        Ok(Self {
            server_name: descriptor.name.clone(),
            child: Mutex::new(Some(child)),
            stdin: Mutex::new(Some(stdin)),
            pending,
            next_id: AtomicI64::new(1),
            initialized: AtomicBool::new(false),
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    fn next_request_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn write_frame(&self, request: &JsonRpcRequest) -> Result<(), McpError> {
        let mut payload = serde_json::to_string(request).map_err(|e| McpError::Transport {
            server: self.server_name.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;
        payload.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| McpError::Transport {
            server: self.server_name.clone(),
            reason: "stdin closed".into(),
        })?;
        stdin
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| McpError::Transport {
                server: self.server_name.clone(),
                reason: format!("failed to write to stdin: {e}"),
            })?;
        stdin.flush().await.map_err(|e| McpError::Transport {
            server: self.server_name.clone(),
            reason: format!("failed to flush stdin: {e}"),
        })
    }

    /// Send a request and wait for the matching response.
    ///
    /// `deadline: None` waits indefinitely (handshake); otherwise the
    /// pending entry is dropped on timeout so a late response is discarded.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        deadline: Option<Duration>,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id, method, params);

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.write_frame(&request).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match deadline {
            Some(duration) => match tokio::time::timeout(duration, rx).await {
                Ok(result) => result,
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    return Err(McpError::Timeout {
                        tool: method.to_string(),
                        timeout_ms: duration.as_millis() as u64,
                    });
                }
            },
            None => rx.await,
        };

        response.map_err(|_| McpError::Transport {
            server: self.server_name.clone(),
            reason: "server closed before responding".into(),
        })
    }

    /// Send a notification (no id, no response expected).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let request = JsonRpcRequest::notification(method, params);
        self.write_frame(&request).await
    }

    /// Shut down the child: close stdin as the graceful signal, wait up to
    /// five seconds, then kill.
    pub async fn close(&self) -> Result<(), McpError> {
        self.stdin.lock().await.take();

        let mut child = match self.child.lock().await.take() {
            Some(child) => child,
            None => return Ok(()), // already closed
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.server_name, ?status, "server exited");
            }
            _ => {
                tracing::debug!(server = %self.server_name, "server did not exit, killing");
                let _ = child.kill().await;
            }
        }

        self.pending.lock().await.clear();
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::ServerDescriptor;

    #[tokio::test]
    async fn spawn_of_missing_binary_is_transport_error() {
        let desc = ServerDescriptor::stdio("ghost", "definitely-not-a-real-binary-xyz", &[]);
        let err = StdioClient::spawn(&desc).await.unwrap_err();
        assert!(matches!(err, McpError::Transport { .. }));
    }

    #[tokio::test]
    async fn descriptor_without_command_is_config_error() {
        let mut desc = ServerDescriptor::stdio("fs", "npx", &[]);
        desc.command = None;
        let err = StdioClient::spawn(&desc).await.unwrap_err();
        assert!(matches!(err, McpError::Config { .. }));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        // `cat` stays alive reading stdin; closing twice must not error.
        let desc = ServerDescriptor::stdio("cat", "cat", &[]);
        let client = match StdioClient::spawn(&desc).await {
            Ok(client) => client,
            // Environment without `cat`; nothing further to assert.
            Err(_) => return,
        };
        client.close().await.unwrap();
        client.close().await.unwrap();
    }
}
