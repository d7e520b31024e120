//! MCP server configuration types.
//!
//! These are plain values produced by whatever stores server definitions
//! (the CLI reads them from TOML). The runtime in `mh-mcp-client` consumes
//! them per call and never mutates them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Configuration for a single MCP server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Unique identifier (used in function naming: `{id}__{tool}`).
    pub id: String,

    /// Human-readable name. Falls back to `id` when empty.
    #[serde(default)]
    pub name: String,

    #[serde(default = "d_true")]
    pub is_enabled: bool,

    /// Policy hint for the caller; the runtime only passes it through.
    #[serde(default)]
    pub run_tools_automatically: bool,

    #[serde(default)]
    pub lifecycle: Lifecycle,

    pub transport: TransportConfig,

    /// Tool names that are never exposed from this server.
    #[serde(default)]
    pub disabled_tools: BTreeSet<String>,
}

impl ServerConfig {
    /// Convenience constructor for a persistent stdio server.
    pub fn stdio(id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            is_enabled: true,
            run_tools_automatically: false,
            lifecycle: Lifecycle::Persistent,
            transport: TransportConfig::Stdio(StdioTransportConfig {
                command: command.into(),
                args: Vec::new(),
                env: BTreeMap::new(),
                framing: Framing::default(),
            }),
            disabled_tools: BTreeSet::new(),
        }
    }

    /// Convenience constructor for a persistent HTTP server.
    pub fn http(id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            is_enabled: true,
            run_tools_automatically: false,
            lifecycle: Lifecycle::Persistent,
            transport: TransportConfig::Http(HttpTransportConfig {
                endpoint: endpoint.into(),
                streaming: true,
                headers: BTreeMap::new(),
                bearer_token: None,
            }),
            disabled_tools: BTreeSet::new(),
        }
    }

    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Whether a connection opened for `other` can serve `self`.
    ///
    /// Compares transport and lifecycle by value; name, enablement and
    /// the disabled-tool set do not affect the live connection.
    pub fn same_connection(&self, other: &ServerConfig) -> bool {
        self.transport == other.transport && self.lifecycle == other.lifecycle
    }

    pub fn is_tool_disabled(&self, tool_name: &str) -> bool {
        self.disabled_tools.contains(tool_name)
    }
}

/// Whether a server's connection is kept warm across calls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    #[default]
    Persistent,
    Ephemeral,
}

/// How to reach a server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    Stdio(StdioTransportConfig),
    Http(HttpTransportConfig),
}

impl TransportConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportConfig::Stdio(_) => "stdio",
            TransportConfig::Http(_) => "http",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StdioTransportConfig {
    /// Command line; may carry shell-quoted arguments (e.g. `"npx -y pkg"`).
    pub command: String,

    /// Extra arguments appended after those parsed from `command`.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides for the spawned process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Framing used for messages written to the server.
    #[serde(default)]
    pub framing: Framing,
}

/// Message framing on a stdio channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// `Content-Length: N` header, blank line, body.
    #[default]
    ContentLength,
    /// One JSON object per line.
    Newline,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HttpTransportConfig {
    pub endpoint: String,

    /// Accept event-stream responses in addition to plain JSON.
    #[serde(default = "d_true")]
    pub streaming: bool,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Shorthand for `Authorization: Bearer <token>`; overrides any
    /// explicit `Authorization` header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,
}

fn d_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_falls_back_to_id() {
        let mut cfg = ServerConfig::stdio("fs", "mcp-fs-server");
        assert_eq!(cfg.display_name(), "fs");
        cfg.name = "Filesystem".into();
        assert_eq!(cfg.display_name(), "Filesystem");
    }

    #[test]
    fn same_connection_ignores_metadata() {
        let a = ServerConfig::stdio("fs", "mcp-fs-server");
        let mut b = a.clone();
        b.name = "renamed".into();
        b.run_tools_automatically = true;
        b.disabled_tools.insert("delete_file".into());
        assert!(a.same_connection(&b));
    }

    #[test]
    fn same_connection_detects_transport_change() {
        let a = ServerConfig::stdio("fs", "mcp-fs-server");
        let mut b = a.clone();
        if let TransportConfig::Stdio(stdio) = &mut b.transport {
            stdio.env.insert("DEBUG".into(), "1".into());
        }
        assert!(!a.same_connection(&b));
    }

    #[test]
    fn same_connection_detects_lifecycle_change() {
        let a = ServerConfig::stdio("fs", "mcp-fs-server");
        let b = a.clone().with_lifecycle(Lifecycle::Ephemeral);
        assert!(!a.same_connection(&b));
    }

    #[test]
    fn deserialize_tagged_transport() {
        let raw = r#"{
            "id": "remote",
            "transport": { "type": "http", "endpoint": "https://example.com/mcp" }
        }"#;
        let cfg: ServerConfig = serde_json::from_str(raw).unwrap();
        assert!(cfg.is_enabled);
        assert_eq!(cfg.lifecycle, Lifecycle::Persistent);
        match cfg.transport {
            TransportConfig::Http(http) => {
                assert_eq!(http.endpoint, "https://example.com/mcp");
                assert!(http.streaming);
                assert!(http.bearer_token.is_none());
            }
            other => panic!("expected http transport, got {other:?}"),
        }
    }

    #[test]
    fn http_transport_requires_endpoint() {
        let raw = r#"{
            "id": "bad",
            "transport": { "type": "http", "command": "npx" }
        }"#;
        assert!(serde_json::from_str::<ServerConfig>(raw).is_err());
    }
}
