mod mcp;
mod runtime;

pub use mcp::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub launch: LaunchConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

impl Config {
    pub fn enabled_servers(&self) -> impl Iterator<Item = &ServerConfig> {
        self.servers.iter().filter(|s| s.is_enabled)
    }

    pub fn server(&self, id: &str) -> Option<&ServerConfig> {
        self.servers.iter().find(|s| s.id == id)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |severity, field: String, message: &str| {
            errors.push(ConfigError {
                severity,
                field,
                message: message.into(),
            });
        };

        for (field, value) in [
            ("timeouts.handshake_ms", self.timeouts.handshake_ms),
            ("timeouts.request_ms", self.timeouts.request_ms),
            ("timeouts.tool_call_ms", self.timeouts.tool_call_ms),
        ] {
            if value == 0 {
                push(ConfigSeverity::Error, field.into(), "timeout must be greater than 0");
            }
        }

        if self.launch.stderr_capacity_bytes == 0 {
            push(
                ConfigSeverity::Warning,
                "launch.stderr_capacity_bytes".into(),
                "stderr capture disabled; process failures will carry no stderr tail",
            );
        }

        let mut seen = HashSet::new();
        for (i, server) in self.servers.iter().enumerate() {
            if server.id.trim().is_empty() {
                push(
                    ConfigSeverity::Error,
                    format!("servers[{i}].id"),
                    "server id must not be empty",
                );
            } else if !seen.insert(server.id.as_str()) {
                push(
                    ConfigSeverity::Error,
                    format!("servers[{i}].id"),
                    "duplicate server id",
                );
            }

            match &server.transport {
                TransportConfig::Stdio(stdio) => {
                    if stdio.command.trim().is_empty() {
                        push(
                            ConfigSeverity::Error,
                            format!("servers[{i}].transport.command"),
                            "command must not be empty",
                        );
                    }
                }
                TransportConfig::Http(http) => {
                    let endpoint = http.endpoint.trim();
                    if endpoint.is_empty() {
                        push(
                            ConfigSeverity::Error,
                            format!("servers[{i}].transport.endpoint"),
                            "endpoint must not be empty",
                        );
                    } else if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                        push(
                            ConfigSeverity::Error,
                            format!("servers[{i}].transport.endpoint"),
                            "endpoint must be an http:// or https:// URL",
                        );
                    } else if endpoint.starts_with("http://") && http.bearer_token.is_some() {
                        push(
                            ConfigSeverity::Warning,
                            format!("servers[{i}].transport.bearer_token"),
                            "bearer token will be sent over plain http",
                        );
                    }
                }
            }

            if !server.is_enabled && !server.disabled_tools.is_empty() {
                push(
                    ConfigSeverity::Warning,
                    format!("servers[{i}].disabled_tools"),
                    "server is disabled; disabled_tools has no effect",
                );
            }
        }

        errors
    }
}
