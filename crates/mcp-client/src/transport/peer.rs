//! JSON-RPC multiplexing over a pair of byte streams.
//!
//! Requests are written under a writer lock and their waiters parked in a
//! pending table keyed by id. A single reader task decodes frames and
//! routes responses to waiters in whatever order they arrive, answers
//! server-initiated requests, and logs notifications. Once the peer is
//! closed every current and future waiter fails with the close reason.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::{ExitInfo, TransportError};
use crate::framing::{self, FrameBuffer, Framing};
use crate::protocol::{IncomingMessage, JsonRpcNotification, JsonRpcRequest, JSONRPC_VERSION, METHOD_NOT_FOUND};

type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;
type Waiter = oneshot::Sender<Result<Value, TransportError>>;

const READ_CHUNK: usize = 16 * 1024;

/// What the reader does when the stream ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EofPolicy {
    /// Fail pending requests right away.
    Close,
    /// Leave it to whoever owns the process; its exit status is the better error.
    Ignore,
}

#[derive(Debug, Clone)]
pub(crate) enum CloseReason {
    Stopped,
    Exited(ExitInfo),
    Failed(String),
}

impl CloseReason {
    fn to_error(&self) -> TransportError {
        match self {
            CloseReason::Stopped => TransportError::NotRunning,
            CloseReason::Exited(status) => TransportError::ProcessExited(*status),
            CloseReason::Failed(msg) => TransportError::Protocol(msg.clone()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pending table
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct PendingState {
    waiters: HashMap<u64, Waiter>,
    closed: Option<CloseReason>,
}

#[derive(Default)]
struct Pending {
    state: Mutex<PendingState>,
}

impl Pending {
    fn register(&self, id: u64) -> Result<oneshot::Receiver<Result<Value, TransportError>>, TransportError> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.closed {
            return Err(reason.to_error());
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.insert(id, tx);
        Ok(rx)
    }

    fn complete(&self, id: u64, result: Result<Value, TransportError>) -> bool {
        let waiter = self.state.lock().waiters.remove(&id);
        match waiter {
            // The receiver may have given up (timeout); that is fine.
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    fn remove(&self, id: u64) {
        self.state.lock().waiters.remove(&id);
    }

    /// First close wins. Returns how many waiters were failed.
    fn close(&self, reason: CloseReason) -> usize {
        let waiters: Vec<Waiter> = {
            let mut state = self.state.lock();
            if state.closed.is_some() {
                return 0;
            }
            state.closed = Some(reason.clone());
            state.waiters.drain().map(|(_, tx)| tx).collect()
        };
        let failed = waiters.len();
        for tx in waiters {
            let _ = tx.send(Err(reason.to_error()));
        }
        failed
    }

    fn closed(&self) -> Option<CloseReason> {
        self.state.lock().closed.clone()
    }

    fn len(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

/// Removes a waiter whose caller stopped waiting (timeout, cancellation).
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Peer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Shared {
    server_id: String,
    framing: Framing,
    writer: tokio::sync::Mutex<Option<BoxWriter>>,
    pending: Pending,
}

impl Shared {
    async fn write_message<T: Serialize>(&self, message: &T) -> Result<(), TransportError> {
        let body = serde_json::to_vec(message)?;
        let frame = framing::encode(self.framing, &body);
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(|| {
            self.pending
                .closed()
                .map(|r| r.to_error())
                .unwrap_or(TransportError::NotRunning)
        })?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn dispatch(&self, frame: &[u8]) {
        match IncomingMessage::parse(frame) {
            Ok(IncomingMessage::Response(resp)) => {
                let id = resp.id;
                let result = resp.into_result().map_err(TransportError::Rpc);
                if !self.pending.complete(id, result) {
                    tracing::debug!(server_id = %self.server_id, id, "response for unknown or abandoned request");
                }
            }
            Ok(IncomingMessage::Request { id, method }) => {
                let reply = if method == "ping" {
                    json!({ "jsonrpc": JSONRPC_VERSION, "id": id, "result": {} })
                } else {
                    tracing::debug!(server_id = %self.server_id, method = %method, "declining server request");
                    json!({
                        "jsonrpc": JSONRPC_VERSION,
                        "id": id,
                        "error": { "code": METHOD_NOT_FOUND, "message": format!("method not supported: {method}") },
                    })
                };
                if let Err(e) = self.write_message(&reply).await {
                    tracing::debug!(server_id = %self.server_id, error = %e, "failed to answer server request");
                }
            }
            Ok(IncomingMessage::Notification { method }) => {
                tracing::debug!(server_id = %self.server_id, method = %method, "MCP server notification");
            }
            Err(e) => {
                tracing::debug!(server_id = %self.server_id, error = %e, "ignoring unparseable message");
            }
        }
    }
}

/// Cloneable handle to one JSON-RPC conversation.
#[derive(Clone)]
pub(crate) struct RpcPeer {
    shared: Arc<Shared>,
    next_id: Arc<AtomicU64>,
    reader: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RpcPeer {
    pub(crate) fn spawn<R, W>(server_id: &str, reader: R, writer: W, framing: Framing, eof: EofPolicy) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let shared = Arc::new(Shared {
            server_id: server_id.to_string(),
            framing,
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            pending: Pending::default(),
        });
        let task = tokio::spawn(read_loop(reader, shared.clone(), eof));
        Self {
            shared,
            next_id: Arc::new(AtomicU64::new(1)),
            reader: Arc::new(Mutex::new(Some(task))),
        }
    }

    pub(crate) async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.shared.pending.register(id)?;
        let _guard = PendingGuard {
            pending: &self.shared.pending,
            id,
        };

        tracing::debug!(server_id = %self.shared.server_id, id, method, "sending MCP request");
        if let Err(e) = self.shared.write_message(&JsonRpcRequest::new(id, method, params)).await {
            return Err(self.shared.pending.closed().map(|r| r.to_error()).unwrap_or(e));
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(self
                .shared
                .pending
                .closed()
                .map(|r| r.to_error())
                .unwrap_or(TransportError::NotRunning)),
        }
    }

    pub(crate) async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        if let Some(reason) = self.shared.pending.closed() {
            return Err(reason.to_error());
        }
        tracing::debug!(server_id = %self.shared.server_id, method, "sending MCP notification");
        self.shared
            .write_message(&JsonRpcNotification::new(method, params))
            .await
    }

    /// Fail every waiter with `reason`. Later closes are ignored.
    pub(crate) fn close(&self, reason: CloseReason) -> usize {
        self.shared.pending.close(reason)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.pending.closed().is_some()
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Drop the writer so the other side sees EOF.
    pub(crate) async fn close_writer(&self) {
        let writer = self.shared.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::debug!(server_id = %self.shared.server_id, error = %e, "error closing writer");
            }
        }
    }

    /// Wait up to `limit` for the reader to drain, then abort it.
    pub(crate) async fn join_reader(&self, limit: Duration) {
        let handle = self.reader.lock().take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(limit, &mut handle).await.is_err() {
                handle.abort();
            }
        }
    }

    pub(crate) fn abort_reader(&self) {
        if let Some(handle) = self.reader.lock().take() {
            handle.abort();
        }
    }
}

async fn read_loop<R>(mut reader: R, shared: Arc<Shared>, eof: EofPolicy)
where
    R: AsyncRead + Send + Unpin,
{
    let mut frames = FrameBuffer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(server_id = %shared.server_id, error = %e, "read error on MCP channel");
                break;
            }
        };
        frames.extend(&chunk[..n]);
        loop {
            match frames.next_frame() {
                Ok(Some(frame)) => shared.dispatch(&frame).await,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(server_id = %shared.server_id, error = %e, "unrecoverable framing error");
                    shared.pending.close(CloseReason::Failed(e.to_string()));
                    return;
                }
            }
        }
    }

    if frames.discarded_lines() > 0 {
        tracing::debug!(
            server_id = %shared.server_id,
            discarded = frames.discarded_lines(),
            "non-protocol lines were skipped on stdout"
        );
    }
    if eof == EofPolicy::Close {
        shared
            .pending
            .close(CloseReason::Failed("server closed the connection".into()));
    }
}
