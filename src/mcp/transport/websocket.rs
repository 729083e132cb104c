//! JSON-RPC over a long-lived WebSocket connection.
//!
//! The connection is established by upgrading HTTP with the descriptor's
//! custom headers. A single reader task consumes frames and routes
//! responses by id to per-request channels; writes are serialized by a
//! mutex over the sink. Close sends a normal-closure frame and cancels the
//! reader, so pending calls observe cancellation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{oneshot, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::mcp::errors::McpError;
use crate::mcp::types::{JsonRpcRequest, JsonRpcResponse, ServerDescriptor};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = Arc<Mutex<SplitSink<WsStream, Message>>>;
type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

/// An MCP server reached over WebSocket.
#[derive(Debug)]
pub struct WsClient {
    server_name: String,
    sink: WsSink,
    pending: PendingMap,
    next_id: AtomicI64,
    cancel: CancellationToken,
    pub(crate) initialized: AtomicBool,
}

impl WsClient {
    /// Dial the server and start the reader task.
    pub async fn connect(descriptor: &ServerDescriptor) -> Result<Self, McpError> {
        let url = descriptor.url.clone().ok_or_else(|| McpError::Config {
            reason: "url is required for websocket transport".into(),
        })?;

        let mut request = url.clone().into_client_request().map_err(|e| McpError::Config {
            reason: format!("invalid websocket url: {e}"),
        })?;
        for (key, value) in &descriptor.headers {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| McpError::Config {
                reason: format!("invalid websocket header name '{key}'"),
            })?;
            let value = HeaderValue::from_str(value).map_err(|_| McpError::Config {
                reason: format!("invalid websocket header value for '{key}'"),
            })?;
            request.headers_mut().insert(name, value);
        }

        tracing::debug!(server = %descriptor.name, url = %url, "connecting MCP websocket");

        let (stream, _) = connect_async(request).await.map_err(|e| McpError::Transport {
            server: descriptor.name.clone(),
            reason: format!("websocket connect failed: {e}"),
        })?;

        let (sink, read) = stream.split();
        let sink: WsSink = Arc::new(Mutex::new(sink));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        Self::spawn_reader(
            descriptor.name.clone(),
            read,
            sink.clone(),
            pending.clone(),
            cancel.clone(),
        );

        Ok(Self {
            server_name: descriptor.name.clone(),
            sink,
            pending,
            next_id: AtomicI64::new(1),
            cancel,
            initialized: AtomicBool::new(false),
        })
    }

    fn spawn_reader(
        server: String,
        mut read: SplitStream<WsStream>,
        sink: WsSink,
        pending: PendingMap,
        cancel: CancellationToken,
    ) {
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = cancel.cancelled() => break,
                    frame = read.next() => frame,
                };

                let message = match frame {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => {
                        tracing::debug!(server = %server, error = %e, "websocket read error");
                        break;
                    }
                    None => break,
                };

                match message {
                    Message::Text(text) => {
                        Self::route_frame(&server, text.as_bytes(), &pending).await;
                    }
                    Message::Binary(data) => {
                        Self::route_frame(&server, &data, &pending).await;
                    }
                    Message::Ping(payload) => {
                        let _ = sink.lock().await.send(Message::Pong(payload)).await;
                    }
                    Message::Pong(_) | Message::Frame(_) => {}
                    Message::Close(frame) => {
                        tracing::debug!(server = %server, ?frame, "websocket closed by server");
                        break;
                    }
                }
            }

            // Fail outstanding calls: dropping the senders wakes the waiters.
            pending.lock().await.clear();
            tracing::debug!(server = %server, "websocket reader exited");
        });
    }

    async fn route_frame(server: &str, payload: &[u8], pending: &PendingMap) {
        let response = match serde_json::from_slice::<JsonRpcResponse>(payload) {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(server = %server, error = %e, "failed to parse websocket frame");
                return;
            }
        };
        match response.id {
            Some(id) => {
                if let Some(tx) = pending.lock().await.remove(&id) {
                    let _ = tx.send(response);
                } else {
                    tracing::debug!(server = %server, id, "response for unknown request id");
                }
            }
            None => {
                tracing::debug!(server = %server, "server notification");
            }
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    async fn write_frame(&self, request: &JsonRpcRequest) -> Result<(), McpError> {
        let payload = serde_json::to_string(request).map_err(|e| McpError::Transport {
            server: self.server_name.clone(),
            reason: format!("failed to serialize request: {e}"),
        })?;
        self.sink
            .lock()
            .await
            .send(Message::Text(payload))
            .await
            .map_err(|e| McpError::Transport {
                server: self.server_name.clone(),
                reason: format!("failed to send websocket message: {e}"),
            })
    }

    /// Send a request and wait for the matching response.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        deadline: Option<Duration>,
    ) -> Result<JsonRpcResponse, McpError> {
        if self.cancel.is_cancelled() {
            return Err(McpError::Transport {
                server: self.server_name.clone(),
                reason: "websocket connection closed".into(),
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
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
            reason: "connection closed before responding".into(),
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

    /// Send a normal-closure frame and cancel the reader; pending calls
    /// observe the cancellation as a transport error.
    pub async fn close(&self) -> Result<(), McpError> {
        tracing::debug!(server = %self.server_name, "closing MCP websocket client");
        self.cancel.cancel();
        let close = Message::Close(Some(CloseFrame {
            code: CloseCode::Normal,
            reason: "".into(),
        }));
        let _ = self.sink.lock().await.send(close).await;
        self.pending.lock().await.clear();
        Ok(())
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
