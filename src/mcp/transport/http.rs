//! JSON-RPC over HTTP POST (streamable-http transport).
//!
//! Every request is a POST to the server endpoint. The `initialize`
//! response may carry an `mcp-session-id` header, which is replayed
//! byte-for-byte on every subsequent request. Responses arrive either as a
//! single JSON body or as an SSE/NDJSON line stream, decided by the
//! response Content-Type; in the streaming case the frame matching the
//! request id wins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use futures::StreamExt;

use crate::mcp::errors::McpError;
use crate::mcp::types::{JsonRpcRequest, JsonRpcResponse, ServerDescriptor};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const POOL_MAX_IDLE_PER_HOST: usize = 8;

const JSON_CONTENT_TYPE: &str = "application/json";
const JSON_AND_SSE_ACCEPT: &str = "application/json, text/event-stream";
const SESSION_ID_HEADER: &str = "mcp-session-id";

/// An MCP server reached over HTTP POST.
#[derive(Debug)]
pub struct HttpClient {
    server_name: String,
    url: String,
    headers: HashMap<String, String>,
    client: reqwest::Client,
    session_id: RwLock<Option<String>>,
    next_id: AtomicI64,
    pub(crate) initialized: AtomicBool,
}

impl HttpClient {
    /// Build the pooled HTTP client for a descriptor. No connection is
    /// established until the first request.
    pub fn new(descriptor: &ServerDescriptor) -> Result<Self, McpError> {
        let url = descriptor.url.clone().ok_or_else(|| McpError::Config {
            reason: "url is required for HTTP transports".into(),
        })?;

        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_idle_timeout(POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .build()
            .map_err(|e| McpError::Transport {
                server: descriptor.name.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            server_name: descriptor.name.clone(),
            url,
            headers: descriptor.headers.clone(),
            client,
            session_id: RwLock::new(None),
            next_id: AtomicI64::new(1),
            initialized: AtomicBool::new(false),
        })
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// The session token captured from the `initialize` response, if any.
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().ok().and_then(|guard| guard.clone())
    }

    fn build_post(&self, body: &JsonRpcRequest) -> Result<reqwest::RequestBuilder, McpError> {
        let payload = serde_json::to_vec(body).map_err(|e| McpError::Transport {
            server: self.server_name.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", JSON_CONTENT_TYPE)
            .header("Accept", JSON_AND_SSE_ACCEPT)
            .body(payload);

        if let Some(session_id) = self.session_id() {
            request = request.header(SESSION_ID_HEADER, session_id);
        }
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        Ok(request)
    }

    /// Send a request and return the response with the matching id.
    ///
    /// `capture_session` is set on `initialize` to record the
    /// `mcp-session-id` response header.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        deadline: Option<Duration>,
        capture_session: bool,
    ) -> Result<JsonRpcResponse, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = JsonRpcRequest::new(id, method, params);

        let mut request = self.build_post(&body)?;
        if let Some(duration) = deadline {
            request = request.timeout(duration);
        }

        tracing::debug!(server = %self.server_name, method = %method, id, "sending MCP HTTP request");

        let response = request.send().await.map_err(|e| self.map_reqwest_error(method, deadline, e))?;

        if capture_session {
            if let Some(session_id) = response
                .headers()
                .get(SESSION_ID_HEADER)
                .and_then(|value| value.to_str().ok())
            {
                tracing::debug!(server = %self.server_name, session = %session_id, "captured MCP session id");
                if let Ok(mut guard) = self.session_id.write() {
                    *guard = Some(session_id.to_string());
                }
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Protocol {
                code: status.as_u16() as i32,
                message: format!("HTTP error {}: {}", status.as_u16(), body),
            });
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream")
            || content_type.starts_with("application/x-ndjson")
        {
            return self.read_streaming_response(response, id).await;
        }

        response.json().await.map_err(|e| McpError::Transport {
            server: self.server_name.clone(),
            reason: format!("failed to decode response: {e}"),
        })
    }

    /// Scan an SSE/NDJSON body until the frame with the expected id arrives.
    async fn read_streaming_response(
        &self,
        response: reqwest::Response,
        expected_id: i64,
    ) -> Result<JsonRpcResponse, McpError> {
        let mut stream = response.bytes_stream();
        let mut buffer = LineBuffer::default();

        loop {
            let chunk = match stream.next().await {
                Some(Ok(chunk)) => chunk,
                Some(Err(e)) => {
                    return Err(McpError::Transport {
                        server: self.server_name.clone(),
                        reason: format!("error reading stream: {e}"),
                    })
                }
                None => break,
            };

            for line in buffer.push(&chunk) {
                if let Some(response) = self.parse_stream_line(&line, expected_id) {
                    return Ok(response);
                }
            }
        }

        for line in buffer.finish() {
            if let Some(response) = self.parse_stream_line(&line, expected_id) {
                return Ok(response);
            }
        }

        Err(McpError::Transport {
            server: self.server_name.clone(),
            reason: "no response received for request".into(),
        })
    }

    fn parse_stream_line(&self, line: &str, expected_id: i64) -> Option<JsonRpcResponse> {
        let data = parse_stream_data(line)?;
        match serde_json::from_str::<JsonRpcResponse>(data) {
            Ok(response) if response.id == Some(expected_id) => Some(response),
            Ok(_) => None,
            Err(_) => {
                tracing::debug!(server = %self.server_name, "skipping non-JSON stream line");
                None
            }
        }
    }

    /// Send a notification: fire-and-forget POST without an id.
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        let body = JsonRpcRequest::notification(method, params);
        let request = self.build_post(&body)?;
        let response = request
            .send()
            .await
            .map_err(|e| self.map_reqwest_error(method, None, e))?;
        // Body is irrelevant for notifications; drain and drop.
        let _ = response.bytes().await;
        Ok(())
    }

    /// Release pooled connections. The client holds no other resources.
    pub async fn close(&self) -> Result<(), McpError> {
        tracing::debug!(server = %self.server_name, "closing MCP HTTP client");
        Ok(())
    }

    fn map_reqwest_error(
        &self,
        method: &str,
        deadline: Option<Duration>,
        error: reqwest::Error,
    ) -> McpError {
        if error.is_timeout() {
            McpError::Timeout {
                tool: method.to_string(),
                timeout_ms: deadline.map(|d| d.as_millis() as u64).unwrap_or(0),
            }
        } else {
            McpError::Transport {
                server: self.server_name.clone(),
                reason: format!("HTTP request failed: {error}"),
            }
        }
    }
}

// ─── Stream line handling ───────────────────────────────────────────────────

/// Strip SSE framing from a line: `data: ` prefixes removed, keep-alives
/// and `[DONE]` markers dropped. Returns the JSON payload, if any.
fn parse_stream_data(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let data = trimmed
        .strip_prefix("data: ")
        .or_else(|| trimmed.strip_prefix("data:"))
        .unwrap_or(trimmed)
        .trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Accumulates body bytes and yields complete lines, tolerating frames
/// split across chunk boundaries.
#[derive(Default)]
struct LineBuffer {
    buffer: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative) = self.buffer[search_index..].iter().position(|b| *b == b'\n') {
            let newline_index = search_index + relative;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }
            if let Ok(text) = std::str::from_utf8(&self.buffer[search_index..line_end]) {
                if !text.trim().is_empty() {
                    lines.push(text.trim().to_string());
                }
            }
            search_index = newline_index + 1;
        }

        if flush {
            if let Ok(text) = std::str::from_utf8(&self.buffer[search_index..]) {
                if !text.trim().is_empty() {
                    lines.push(text.trim().to_string());
                }
            }
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_splits_across_chunks() {
        let mut buffer = LineBuffer::default();
        let first = buffer.push(b"data: {\"id\":1");
        assert!(first.is_empty());
        let second = buffer.push(b",\"result\":{}}\ndata: partial");
        assert_eq!(second, vec!["data: {\"id\":1,\"result\":{}}"]);
        let rest = buffer.finish();
        assert_eq!(rest, vec!["data: partial"]);
    }

    #[test]
    fn line_buffer_handles_crlf() {
        let mut buffer = LineBuffer::default();
        let lines = buffer.push(b"one\r\ntwo\r\n");
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn stream_data_strips_sse_prefix() {
        assert_eq!(parse_stream_data("data: {\"id\":1}"), Some("{\"id\":1}"));
        assert_eq!(parse_stream_data("data:{\"id\":1}"), Some("{\"id\":1}"));
        assert_eq!(parse_stream_data("{\"id\":1}"), Some("{\"id\":1}"));
    }

    #[test]
    fn stream_data_drops_done_and_blanks() {
        assert_eq!(parse_stream_data(""), None);
        assert_eq!(parse_stream_data("   "), None);
        assert_eq!(parse_stream_data("data: [DONE]"), None);
        assert_eq!(parse_stream_data("data:"), None);
    }

    #[test]
    fn client_requires_url() {
        let mut desc = crate::mcp::types::ServerDescriptor::http("remote", "http://host/mcp");
        desc.url = None;
        assert!(matches!(
            HttpClient::new(&desc).unwrap_err(),
            McpError::Config { .. }
        ));
    }

    #[test]
    fn session_id_starts_empty() {
        let desc = crate::mcp::types::ServerDescriptor::http("remote", "http://host/mcp");
        let client = HttpClient::new(&desc).unwrap();
        assert!(client.session_id().is_none());
    }
}
