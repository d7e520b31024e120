//! MCP transport layer.
//!
//! A transport moves JSON-RPC messages to one server and back:
//! - **Stdio**: spawn a child process, frames over stdin/stdout.
//! - **Http**: POST each message, JSON or event-stream responses.
//! - **Stream**: any in-process byte stream pair.
//!
//! Transports know nothing about timeouts or the MCP handshake; that is
//! the client's job. They do know how to describe themselves when things
//! go wrong, see [`McpTransport::diagnostics`].

mod http;
pub(crate) mod peer;
mod stdio;
mod stream;

pub use http::{resolve_headers, HttpTransport};
pub use stdio::StdioTransport;
pub use stream::StreamTransport;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use mh_domain::config::{LaunchConfig, ServerConfig, StdioTransportConfig, TransportConfig};

use crate::diagnostics::{Diagnostics, TransportKind};
use crate::error::{ExitInfo, McpError, TransportError};
use crate::launch::{LaunchPlan, LaunchSettings};

/// A live channel to one MCP server.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and wait for the matching response's `result`.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError>;

    fn is_alive(&self) -> bool;

    /// Exit status of the server process, once it has exited.
    fn exit_status(&self) -> Option<ExitInfo> {
        None
    }

    fn kind(&self) -> TransportKind;

    /// Snapshot of what is known about this connection, for error reports.
    fn diagnostics(&self) -> Diagnostics;

    /// Tear down. Pending requests fail with [`TransportError::NotRunning`].
    /// Safe to call more than once.
    async fn shutdown(&self);
}

/// Opens transports for server configs.
///
/// The seam tests use to run the client and hub against fakes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, server: &ServerConfig) -> Result<Arc<dyn McpTransport>, McpError>;
}

/// Spawns processes and talks HTTP.
pub struct DefaultConnector {
    launch: LaunchSettings,
    http: reqwest::Client,
}

impl DefaultConnector {
    pub fn new(launch: LaunchSettings) -> Self {
        Self {
            launch,
            http: reqwest::Client::new(),
        }
    }

    pub fn from_config(config: &LaunchConfig) -> Self {
        Self::new(LaunchSettings::from_config(config))
    }

    pub fn launch_settings(&self) -> &LaunchSettings {
        &self.launch
    }

    /// Plan a launch on the blocking pool; planning walks directories and
    /// may write isolation files.
    async fn plan(&self, server: &ServerConfig, stdio: &StdioTransportConfig) -> Result<LaunchPlan, McpError> {
        let server_id = server.id.clone();
        let stdio = stdio.clone();
        let settings = self.launch.clone();
        tokio::task::spawn_blocking(move || LaunchPlan::prepare(&server_id, &stdio, &settings))
            .await
            .map_err(|join| McpError::ProcessLaunchFailed {
                server: server.id.clone(),
                source: std::io::Error::other(join),
                diagnostics: Box::new(Diagnostics::for_config(server)),
            })?
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn connect(&self, server: &ServerConfig) -> Result<Arc<dyn McpTransport>, McpError> {
        match &server.transport {
            TransportConfig::Stdio(stdio) => {
                let plan = self.plan(server, stdio).await?;
                let transport =
                    StdioTransport::spawn(&server.id, &plan, stdio.framing, self.launch.stderr_capacity)?;
                Ok(Arc::new(transport))
            }
            TransportConfig::Http(http) => {
                let transport = HttpTransport::new(&server.id, http, self.http.clone()).map_err(|source| {
                    McpError::RequestFailed {
                        server: server.id.clone(),
                        method: "connect".into(),
                        transport: TransportKind::Http,
                        source,
                        diagnostics: Box::new(Diagnostics::for_config(server)),
                    }
                })?;
                Ok(Arc::new(transport))
            }
        }
    }
}
