//! Session registry.
//!
//! Maps session ids to server managers. A session is reused when a request
//! arrives with the same id AND the same server configuration; a changed
//! configuration closes the old manager and installs a fresh one. An idle
//! sweep interface lets a host close sessions untouched past a TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::mcp::errors::McpError;
use crate::mcp::types::ServerDescriptor;
use crate::plane::manager::ServerManager;

struct SessionEntry {
    manager: Arc<ServerManager>,
    fingerprint: String,
    last_used: Instant,
}

/// Registry of live sessions, keyed by session id.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the caller's session id, assigning a fresh UUID when absent.
    /// The id is echoed back to the caller as `task_id`.
    pub fn ensure_session_id(supplied: Option<&str>) -> String {
        match supplied {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Get the manager for a session, creating or replacing it as needed.
    ///
    /// Reuse requires both the same session id and the same descriptor
    /// fingerprint; on mismatch the old manager is closed and a new one
    /// admits every descriptor lazily. Descriptor validation failures
    /// surface as `Config` errors and leave no partial session behind.
    pub async fn get_or_create(
        &self,
        session_id: &str,
        descriptors: &[ServerDescriptor],
        max_tools_per_discovery: usize,
        tool_timeout: Duration,
    ) -> Result<Arc<ServerManager>, McpError> {
        let fingerprint = config_fingerprint(descriptors);

        let existing = {
            let mut sessions = self.sessions.write().await;
            if let Some(entry) = sessions.get_mut(session_id) {
                if entry.fingerprint == fingerprint {
                    entry.last_used = Instant::now();
                    tracing::debug!(session = %session_id, "reusing MCP session manager");
                    return Ok(entry.manager.clone());
                }
            }
            sessions.remove(session_id).map(|entry| entry.manager)
        };

        if let Some(old) = existing {
            tracing::info!(session = %session_id, "server configuration changed, replacing manager");
            old.close().await;
        }

        let manager = ServerManager::new(0, max_tools_per_discovery).with_tool_timeout(tool_timeout);
        for descriptor in descriptors {
            manager.add_server_lazy(descriptor.clone()).await?;
        }
        let manager = Arc::new(manager);

        let mut sessions = self.sessions.write().await;
        // A racing request may have installed the session meanwhile; the
        // later writer wins and the loser's manager is dropped unused.
        sessions.insert(
            session_id.to_string(),
            SessionEntry {
                manager: manager.clone(),
                fingerprint,
                last_used: Instant::now(),
            },
        );
        tracing::info!(
            session = %session_id,
            servers = descriptors.len(),
            "created MCP session manager"
        );
        Ok(manager)
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close and remove one session. Unknown ids are a no-op.
    pub async fn close_session(&self, session_id: &str) {
        let entry = self.sessions.write().await.remove(session_id);
        if let Some(entry) = entry {
            entry.manager.close().await;
            tracing::info!(session = %session_id, "session closed");
        }
    }

    /// Close sessions idle longer than `ttl`. Intended to be driven by a
    /// host-owned background sweep; returns the number closed.
    pub async fn close_idle(&self, ttl: Duration) -> usize {
        let expired: Vec<(String, Arc<ServerManager>)> = {
            let mut sessions = self.sessions.write().await;
            let cutoff = Instant::now();
            let expired_ids: Vec<String> = sessions
                .iter()
                .filter(|(_, entry)| cutoff.duration_since(entry.last_used) > ttl)
                .map(|(id, _)| id.clone())
                .collect();
            expired_ids
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|entry| (id, entry.manager)))
                .collect()
        };

        let count = expired.len();
        for (id, manager) in expired {
            manager.close().await;
            tracing::info!(session = %id, "idle session closed");
        }
        count
    }

    /// Close every session.
    pub async fn close_all(&self) {
        let managers: Vec<(String, Arc<ServerManager>)> = {
            let mut sessions = self.sessions.write().await;
            sessions
                .drain()
                .map(|(id, entry)| (id, entry.manager))
                .collect()
        };
        for (id, manager) in managers {
            manager.close().await;
            tracing::debug!(session = %id, "session closed during shutdown");
        }
    }
}

/// Stable fingerprint of a descriptor list: SHA-256 over its canonical JSON,
/// in caller order. Reordering the list intentionally re-creates the
/// session.
pub fn config_fingerprint(descriptors: &[ServerDescriptor]) -> String {
    let canonical = serde_json::to_vec(descriptors).unwrap_or_default();
    let digest = Sha256::digest(&canonical);
    format!("{digest:x}")
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptors() -> Vec<ServerDescriptor> {
        vec![ServerDescriptor::stdio(
            "filesystem",
            "npx",
            &["-y", "@mcp/fs", "/data"],
        )]
    }

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn same_id_and_config_reuses_manager() {
        let registry = SessionRegistry::new();
        let first = registry
            .get_or_create("s1", &descriptors(), 5, TIMEOUT)
            .await
            .unwrap();
        let second = registry
            .get_or_create("s1", &descriptors(), 5, TIMEOUT)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn changed_config_replaces_manager() {
        let registry = SessionRegistry::new();
        let first = registry
            .get_or_create("s1", &descriptors(), 5, TIMEOUT)
            .await
            .unwrap();

        let mut changed = descriptors();
        changed.push(ServerDescriptor::stdio("git", "npx", &["-y", "@mcp/git"]));
        let second = registry
            .get_or_create("s1", &changed, 5, TIMEOUT)
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        // The replaced manager was torn down.
        assert!(first.is_closed().await);
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn invalid_descriptor_creates_no_session() {
        let registry = SessionRegistry::new();
        let bad = vec![ServerDescriptor::stdio("shell", "bash", &["-c", "echo"])];
        let err = registry
            .get_or_create("s1", &bad, 5, TIMEOUT)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Config { .. }));
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn close_session_tears_down_manager() {
        let registry = SessionRegistry::new();
        let manager = registry
            .get_or_create("s1", &descriptors(), 5, TIMEOUT)
            .await
            .unwrap();
        registry.close_session("s1").await;
        assert!(manager.is_closed().await);
        assert_eq!(registry.session_count().await, 0);

        // Unknown session is a no-op.
        registry.close_session("nope").await;
    }

    #[tokio::test]
    async fn idle_sweep_only_closes_stale_sessions() {
        let registry = SessionRegistry::new();
        registry
            .get_or_create("fresh", &descriptors(), 5, TIMEOUT)
            .await
            .unwrap();
        let closed = registry.close_idle(Duration::from_secs(3600)).await;
        assert_eq!(closed, 0);
        assert_eq!(registry.session_count().await, 1);

        let closed = registry.close_idle(Duration::ZERO).await;
        assert_eq!(closed, 1);
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn close_all_drains_registry() {
        let registry = SessionRegistry::new();
        registry
            .get_or_create("a", &descriptors(), 5, TIMEOUT)
            .await
            .unwrap();
        registry
            .get_or_create("b", &descriptors(), 5, TIMEOUT)
            .await
            .unwrap();
        registry.close_all().await;
        assert_eq!(registry.session_count().await, 0);
    }

    #[test]
    fn fingerprint_is_stable_and_order_sensitive() {
        let a = ServerDescriptor::stdio("a", "npx", &[]);
        let b = ServerDescriptor::stdio("b", "npx", &[]);
        assert_eq!(
            config_fingerprint(&[a.clone(), b.clone()]),
            config_fingerprint(&[a.clone(), b.clone()])
        );
        assert_ne!(
            config_fingerprint(&[a.clone(), b.clone()]),
            config_fingerprint(&[b, a])
        );
    }

    #[test]
    fn ensure_session_id_assigns_uuid_when_missing() {
        assert_eq!(SessionRegistry::ensure_session_id(Some("keep")), "keep");
        let assigned = SessionRegistry::ensure_session_id(None);
        assert!(!assigned.is_empty());
        let blank = SessionRegistry::ensure_session_id(Some("  "));
        assert!(!blank.trim().is_empty());
        assert_ne!(blank, "  ");
    }
}
