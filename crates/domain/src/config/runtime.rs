use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timeouts
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-operation-class ceilings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Spawn + `initialize` + `notifications/initialized`. Servers launched
    /// through package runners may need to download and boot a runtime.
    #[serde(default = "d_60000")]
    pub handshake_ms: u64,
    /// Ordinary requests, including each `tools/list` page.
    #[serde(default = "d_30000")]
    pub request_ms: u64,
    /// `tools/call`.
    #[serde(default = "d_120000")]
    pub tool_call_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_ms: 60_000,
            request_ms: 30_000,
            tool_call_ms: 120_000,
        }
    }
}

impl TimeoutConfig {
    pub fn handshake(&self) -> Duration {
        Duration::from_millis(self.handshake_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn tool_call(&self) -> Duration {
        Duration::from_millis(self.tool_call_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Process launch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Root for per-server isolation trees. Defaults to `<data dir>/mcphub`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_dir: Option<PathBuf>,

    /// Working directory for ordinary servers. Defaults to the home directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Directories searched after `PATH` and before the built-in list.
    #[serde(default)]
    pub extra_path_dirs: Vec<PathBuf>,

    /// Bytes of stderr retained per process for diagnostics.
    #[serde(default = "d_32768")]
    pub stderr_capacity_bytes: usize,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            support_dir: None,
            working_dir: None,
            extra_path_dirs: Vec::new(),
            stderr_capacity_bytes: 32 * 1024,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client identity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What the runtime announces in `initialize`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default = "d_client_name")]
    pub name: String,
    #[serde(default = "d_client_version")]
    pub version: String,
    #[serde(default = "d_protocol_version")]
    pub protocol_version: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: d_client_name(),
            version: d_client_version(),
            protocol_version: d_protocol_version(),
        }
    }
}

fn d_client_name() -> String {
    "mcphub".into()
}

fn d_client_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn d_protocol_version() -> String {
    "2024-11-05".into()
}

fn d_60000() -> u64 {
    60_000
}

fn d_30000() -> u64 {
    30_000
}

fn d_120000() -> u64 {
    120_000
}

fn d_32768() -> usize {
    32 * 1024
}
