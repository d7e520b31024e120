use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use super::peer::{CloseReason, EofPolicy, RpcPeer};
use super::McpTransport;
use crate::diagnostics::{Diagnostics, TransportKind};
use crate::error::TransportError;
use crate::framing::Framing;

/// JSON-RPC over an arbitrary reader/writer pair, e.g. an in-process
/// server or a socket someone else connected.
pub struct StreamTransport {
    server_id: String,
    peer: RpcPeer,
}

impl StreamTransport {
    pub fn new<R, W>(server_id: &str, reader: R, writer: W, framing: Framing) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            server_id: server_id.to_string(),
            peer: RpcPeer::spawn(server_id, reader, writer, framing, EofPolicy::Close),
        }
    }
}

#[async_trait]
impl McpTransport for StreamTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        self.peer.request(method, params).await
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        self.peer.notify(method, params).await
    }

    fn is_alive(&self) -> bool {
        !self.peer.is_closed()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics::new(&self.server_id, TransportKind::Stream)
    }

    async fn shutdown(&self) {
        self.peer.close(CloseReason::Stopped);
        self.peer.close_writer().await;
        self.peer.abort_reader();
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        self.peer.abort_reader();
    }
}
