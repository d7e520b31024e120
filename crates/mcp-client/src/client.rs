//! Protocol client for one MCP server.
//!
//! The client owns at most one live session (transport plus handshake
//! result). Every operation first makes sure a session exists, opening
//! one on demand; concurrent callers share a single handshake. Each
//! request is raced against its configured ceiling and every failure is
//! turned into an [`McpError`] carrying the transport's diagnostics.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use mh_domain::config::{ClientConfig, Config, ServerConfig, TimeoutConfig};
use mh_domain::tool::ToolOutput;

use crate::diagnostics::Diagnostics;
use crate::error::{McpError, TransportError};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, ListToolsParams, ListToolsResult, ToolInfo,
};
use crate::transport::{Connector, McpTransport};

pub const METHOD_INITIALIZE: &str = "initialize";
pub const METHOD_INITIALIZED: &str = "notifications/initialized";
pub const METHOD_TOOLS_LIST: &str = "tools/list";
pub const METHOD_TOOLS_CALL: &str = "tools/call";

/// Timeouts and client identity shared by every client.
#[derive(Debug, Clone, Default)]
pub struct ClientSettings {
    pub timeouts: TimeoutConfig,
    pub client: ClientConfig,
}

impl From<&Config> for ClientSettings {
    fn from(config: &Config) -> Self {
        Self {
            timeouts: config.timeouts,
            client: config.client.clone(),
        }
    }
}

struct Session {
    transport: Arc<dyn McpTransport>,
    init: InitializeResult,
}

#[derive(Default)]
struct ClientState {
    session: Option<Arc<Session>>,
    /// Transport whose handshake is in flight, so `stop` can cut it short.
    connecting: Option<Arc<dyn McpTransport>>,
    /// Bumped by `stop`; a handshake that started under an older
    /// generation is discarded.
    generation: u64,
}

pub struct McpClient {
    server: ServerConfig,
    connector: Arc<dyn Connector>,
    settings: ClientSettings,
    state: parking_lot::Mutex<ClientState>,
    handshake: tokio::sync::Mutex<()>,
}

impl McpClient {
    pub fn new(server: ServerConfig, connector: Arc<dyn Connector>, settings: ClientSettings) -> Self {
        Self {
            server,
            connector,
            settings,
            state: parking_lot::Mutex::new(ClientState::default()),
            handshake: tokio::sync::Mutex::new(()),
        }
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn is_connected(&self) -> bool {
        self.state
            .lock()
            .session
            .as_ref()
            .is_some_and(|s| s.transport.is_alive())
    }

    /// What the server said about itself in the handshake.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.state.lock().session.as_ref().map(|s| s.init.clone())
    }

    /// Connect and handshake if not already done.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        Ok(self.session().await?.init.clone())
    }

    /// Every tool the server offers, following pagination to the end.
    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>, McpError> {
        let ceiling = self.settings.timeouts.request();
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();

        loop {
            let params = ListToolsParams { cursor: cursor.clone() };
            let page: ListToolsResult = self.call(METHOD_TOOLS_LIST, &params, ceiling).await?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => {
                    if !seen.insert(next.clone()) {
                        return Err(self.protocol_failure(
                            METHOD_TOOLS_LIST,
                            format!("server repeated pagination cursor {next:?}"),
                        ));
                    }
                    cursor = Some(next);
                }
                _ => break,
            }
        }

        tracing::debug!(server_id = %self.server.id, count = tools.len(), "listed MCP tools");
        Ok(tools)
    }

    /// Invoke a tool. A tool that reports its own failure still returns
    /// `Ok` with `is_error` set.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolOutput, McpError> {
        let arguments = if arguments.is_null() { json!({}) } else { arguments };
        let params = CallToolParams {
            name,
            arguments: &arguments,
        };
        let started = Instant::now();
        let result: CallToolResult = self
            .call(METHOD_TOOLS_CALL, &params, self.settings.timeouts.tool_call())
            .await?;
        tracing::debug!(
            server_id = %self.server.id,
            tool = name,
            is_error = result.is_error,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "MCP tool call finished"
        );
        Ok(ToolOutput {
            text: result.joined_text(),
            is_error: result.is_error,
        })
    }

    /// Tear down the session, failing anything in flight. Idempotent.
    pub async fn stop(&self) {
        let (session, connecting) = {
            let mut state = self.state.lock();
            state.generation += 1;
            (state.session.take(), state.connecting.take())
        };
        if let Some(transport) = connecting {
            transport.shutdown().await;
        }
        if let Some(session) = session {
            session.transport.shutdown().await;
            tracing::info!(server_id = %self.server.id, "MCP client stopped");
        }
    }

    // ── Session management ─────────────────────────────────────────

    fn live_session(&self) -> Option<Arc<Session>> {
        self.state
            .lock()
            .session
            .as_ref()
            .filter(|s| s.transport.is_alive())
            .cloned()
    }

    async fn session(&self) -> Result<Arc<Session>, McpError> {
        if let Some(session) = self.live_session() {
            return Ok(session);
        }

        let _gate = self.handshake.lock().await;
        if let Some(session) = self.live_session() {
            return Ok(session);
        }

        let (stale, generation) = {
            let mut state = self.state.lock();
            (state.session.take(), state.generation)
        };
        if let Some(stale) = stale {
            tracing::warn!(
                server_id = %self.server.id,
                exit = ?stale.transport.exit_status(),
                "MCP connection lost, reconnecting"
            );
            stale.transport.shutdown().await;
        }

        let session = Arc::new(self.open_session(generation).await?);

        let current = {
            let mut state = self.state.lock();
            state.connecting = None;
            if state.generation == generation {
                state.session = Some(session.clone());
                true
            } else {
                false
            }
        };
        if !current {
            session.transport.shutdown().await;
            return Err(self.not_running());
        }
        Ok(session)
    }

    async fn open_session(&self, generation: u64) -> Result<Session, McpError> {
        let transport = self.connector.connect(&self.server).await?;
        let current = {
            let mut state = self.state.lock();
            let current = state.generation == generation;
            if current {
                state.connecting = Some(transport.clone());
            }
            current
        };
        if !current {
            transport.shutdown().await;
            return Err(self.not_running());
        }

        let ceiling = self.settings.timeouts.handshake();
        let started = Instant::now();
        let handshake = async {
            let params = serde_json::to_value(InitializeParams::from_config(&self.settings.client))?;
            let result = transport.request(METHOD_INITIALIZE, Some(params)).await?;
            let init: InitializeResult = serde_json::from_value(result)?;
            transport.notify(METHOD_INITIALIZED, None).await?;
            Ok::<_, TransportError>(init)
        };

        let outcome = tokio::time::timeout(ceiling, handshake).await;
        let error = match outcome {
            Ok(Ok(init)) => {
                if init.protocol_version != self.settings.client.protocol_version {
                    tracing::info!(
                        server_id = %self.server.id,
                        requested = %self.settings.client.protocol_version,
                        negotiated = %init.protocol_version,
                        "MCP server negotiated a different protocol version"
                    );
                }
                tracing::info!(
                    server_id = %self.server.id,
                    server_name = init.server_info.as_ref().map(|i| i.name.as_str()).unwrap_or(""),
                    transport = %transport.kind(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "MCP server initialized"
                );
                return Ok(Session { transport, init });
            }
            Ok(Err(e)) => self.enrich(transport.as_ref(), METHOD_INITIALIZE, e),
            Err(_) => self.timed_out(transport.as_ref(), METHOD_INITIALIZE, ceiling),
        };

        self.state.lock().connecting = None;
        transport.shutdown().await;
        tracing::warn!(server_id = %self.server.id, error = %first_line(&error), "MCP handshake failed");
        Err(error)
    }

    // ── Requests ───────────────────────────────────────────────────

    async fn call<P: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
        ceiling: Duration,
    ) -> Result<T, McpError> {
        let session = self.session().await?;
        let transport = session.transport.as_ref();
        let params = serde_json::to_value(params).map_err(|e| self.enrich(transport, method, e.into()))?;

        match tokio::time::timeout(ceiling, transport.request(method, Some(params))).await {
            Ok(Ok(value)) => {
                serde_json::from_value(value).map_err(|e| self.enrich(transport, method, TransportError::Json(e)))
            }
            Ok(Err(e)) => Err(self.enrich(transport, method, e)),
            Err(_) => {
                tracing::warn!(
                    server_id = %self.server.id,
                    method,
                    ceiling_ms = ceiling.as_millis() as u64,
                    "MCP request timed out"
                );
                Err(self.timed_out(transport, method, ceiling))
            }
        }
    }

    // ── Error construction ─────────────────────────────────────────

    fn enrich(&self, transport: &dyn McpTransport, method: &str, error: TransportError) -> McpError {
        let server = self.server.id.clone();
        if matches!(error, TransportError::NotRunning) {
            return McpError::NotRunning { server };
        }
        let diagnostics = Box::new(transport.diagnostics());
        // A recorded exit explains any failure that followed it.
        if let Some(status) = transport.exit_status() {
            return McpError::ProcessExited {
                server,
                status,
                diagnostics,
            };
        }
        match error {
            TransportError::ProcessExited(status) => McpError::ProcessExited {
                server,
                status,
                diagnostics,
            },
            source => McpError::RequestFailed {
                server,
                method: method.to_string(),
                transport: transport.kind(),
                source,
                diagnostics,
            },
        }
    }

    fn timed_out(&self, transport: &dyn McpTransport, method: &str, ceiling: Duration) -> McpError {
        McpError::TimedOut {
            server: self.server.id.clone(),
            method: method.to_string(),
            ceiling,
            transport: transport.kind(),
            diagnostics: Box::new(transport.diagnostics()),
        }
    }

    fn protocol_failure(&self, method: &str, message: String) -> McpError {
        let session = self.state.lock().session.clone();
        match session {
            Some(session) => self.enrich(session.transport.as_ref(), method, TransportError::Protocol(message)),
            None => {
                let diagnostics = Diagnostics::for_config(&self.server);
                McpError::RequestFailed {
                    server: self.server.id.clone(),
                    method: method.to_string(),
                    transport: diagnostics.transport,
                    source: TransportError::Protocol(message),
                    diagnostics: Box::new(diagnostics),
                }
            }
        }
    }

    fn not_running(&self) -> McpError {
        McpError::NotRunning {
            server: self.server.id.clone(),
        }
    }
}

fn first_line(error: &McpError) -> String {
    error.to_string().lines().next().unwrap_or_default().to_string()
}
