//! `McpHub`: pools connections and routes tool calls.
//!
//! Persistent servers keep one client per server id, replaced whenever
//! the transport or lifecycle config changes. Ephemeral servers get a
//! fresh client per operation which is stopped afterwards no matter how
//! the operation ended.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use mh_domain::config::{Config, Lifecycle, ServerConfig};
use mh_domain::tool::{ToolDefinition, ToolOutput, ToolSource};

use crate::client::{ClientSettings, McpClient};
use crate::error::McpError;
use crate::protocol::ToolInfo;
use crate::routing::{RoutingSnapshot, SnapshotBuilder};
use crate::transport::{Connector, DefaultConnector};

/// Result of one listing pass.
#[derive(Debug, Default)]
pub struct ToolListing {
    pub definitions: Vec<ToolDefinition>,
    /// Routes every name in `definitions`, and nothing else.
    pub snapshot: RoutingSnapshot,
    /// Servers that could not be listed; their tools are absent.
    pub failures: Vec<ServerFailure>,
}

#[derive(Debug)]
pub struct ServerFailure {
    pub server_id: String,
    pub error: McpError,
}

struct Pooled {
    server: ServerConfig,
    client: Arc<McpClient>,
}

pub struct McpHub {
    connector: Arc<dyn Connector>,
    settings: ClientSettings,
    pool: parking_lot::Mutex<HashMap<String, Pooled>>,
}

impl McpHub {
    /// A hub that launches real processes and talks real HTTP.
    pub fn new(config: &Config) -> Self {
        Self::with_connector(
            Arc::new(DefaultConnector::from_config(&config.launch)),
            ClientSettings::from(config),
        )
    }

    pub fn with_connector(connector: Arc<dyn Connector>, settings: ClientSettings) -> Self {
        Self {
            connector,
            settings,
            pool: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Every tool `server` offers, including disabled ones.
    pub async fn list_tools(&self, server: &ServerConfig) -> Result<Vec<ToolInfo>, McpError> {
        let lease = self.acquire(server).await;
        let result = lease.client.list_tools().await;
        lease.release().await;
        result
    }

    /// Definitions for every enabled server's tools plus the snapshot that
    /// routes them.
    ///
    /// Servers are listed concurrently; names are assigned afterwards in
    /// `servers` order so the outcome does not depend on who answered first.
    pub async fn tool_definitions(&self, servers: &[ServerConfig]) -> ToolListing {
        let enabled: Vec<&ServerConfig> = servers.iter().filter(|s| s.is_enabled).collect();
        let results = futures_util::future::join_all(enabled.iter().map(|s| self.list_tools(s))).await;

        let mut listing = ToolListing::default();
        let mut builder = SnapshotBuilder::new();
        for (server, result) in enabled.into_iter().zip(results) {
            let tools = match result {
                Ok(tools) => tools,
                Err(error) => {
                    let summary = error.to_string();
                    tracing::warn!(
                        server_id = %server.id,
                        error = %summary.lines().next().unwrap_or_default(),
                        "skipping MCP server that failed to list tools"
                    );
                    listing.failures.push(ServerFailure {
                        server_id: server.id.clone(),
                        error,
                    });
                    continue;
                }
            };

            let shared = Arc::new(server.clone());
            for tool in tools {
                if server.is_tool_disabled(&tool.name) {
                    continue;
                }
                let name = builder.add(&shared, &tool.name);
                listing.definitions.push(ToolDefinition {
                    id: ToolDefinition::tool_id(&server.id, &tool.name),
                    name,
                    description: tool.description,
                    parameters: tool.input_schema,
                    source: ToolSource {
                        server_id: server.id.clone(),
                        server_name: server.display_name().to_string(),
                        tool_name: tool.name,
                        run_automatically: server.run_tools_automatically,
                    },
                });
            }
        }
        listing.snapshot = builder.finish();

        tracing::debug!(
            servers = servers.len(),
            tools = listing.definitions.len(),
            failures = listing.failures.len(),
            "built MCP tool listing"
        );
        listing
    }

    /// Run the tool `function_name` names in `snapshot`.
    pub async fn execute_tool(
        &self,
        function_name: &str,
        arguments: Value,
        snapshot: &RoutingSnapshot,
    ) -> Result<ToolOutput, McpError> {
        let route = snapshot.resolve(function_name).ok_or_else(|| McpError::UnknownTool {
            name: function_name.to_string(),
        })?;
        tracing::debug!(
            function = function_name,
            server_id = %route.server.id,
            tool = %route.tool_name,
            "dispatching MCP tool call"
        );
        let lease = self.acquire(&route.server).await;
        let result = lease.client.call_tool(&route.tool_name, arguments).await;
        lease.release().await;
        result
    }

    /// Stop and forget the pooled connection for `server_id`, if any.
    pub async fn stop_server(&self, server_id: &str) {
        let pooled = self.pool.lock().remove(server_id);
        if let Some(pooled) = pooled {
            pooled.client.stop().await;
        }
    }

    pub async fn stop_all(&self) {
        let drained: Vec<Pooled> = self.pool.lock().drain().map(|(_, p)| p).collect();
        futures_util::future::join_all(drained.iter().map(|p| p.client.stop())).await;
        if !drained.is_empty() {
            tracing::info!(count = drained.len(), "stopped pooled MCP connections");
        }
    }

    pub fn pooled_server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pool.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The client to use for one operation on `server`.
    async fn acquire(&self, server: &ServerConfig) -> Lease {
        let (lease, retired) = self.checkout(server);
        if let Some(old) = retired {
            tracing::info!(server_id = %server.id, "MCP server config changed, replacing connection");
            old.stop().await;
        }
        lease
    }

    /// Pool bookkeeping only; never awaits.
    fn checkout(&self, server: &ServerConfig) -> (Lease, Option<Arc<McpClient>>) {
        let mut pool = self.pool.lock();

        if server.lifecycle == Lifecycle::Ephemeral {
            let retired = pool.remove(&server.id).map(|p| p.client);
            return (Lease::new(self.new_client(server), true), retired);
        }

        if let Some(pooled) = pool.get_mut(&server.id) {
            if pooled.server.same_connection(server) {
                pooled.server = server.clone();
                return (Lease::new(pooled.client.clone(), false), None);
            }
        }

        let client = self.new_client(server);
        let retired = pool
            .insert(
                server.id.clone(),
                Pooled {
                    server: server.clone(),
                    client: client.clone(),
                },
            )
            .map(|p| p.client);
        (Lease::new(client, false), retired)
    }

    fn new_client(&self, server: &ServerConfig) -> Arc<McpClient> {
        Arc::new(McpClient::new(
            server.clone(),
            self.connector.clone(),
            self.settings.clone(),
        ))
    }
}

/// One operation's hold on a client.
///
/// Ephemeral leases stop their client on release; if the operation is
/// cancelled before release, `Drop` schedules the stop instead.
struct Lease {
    client: Arc<McpClient>,
    ephemeral: bool,
    released: bool,
}

impl Lease {
    fn new(client: Arc<McpClient>, ephemeral: bool) -> Self {
        Self {
            client,
            ephemeral,
            released: false,
        }
    }

    async fn release(mut self) {
        self.released = true;
        if self.ephemeral {
            self.client.stop().await;
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.ephemeral && !self.released {
            let client = self.client.clone();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { client.stop().await });
            }
        }
    }
}
