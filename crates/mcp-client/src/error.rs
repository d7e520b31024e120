use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::diagnostics::{Diagnostics, TransportKind};
use crate::framing::FrameError;
use crate::launch::command::CommandLineError;
use crate::launch::isolation::IsolationError;
use crate::protocol::JsonRpcError;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Exit status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a server process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<std::process::ExitStatus> for ExitInfo {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = std::os::unix::process::ExitStatusExt::signal(&status);
        #[cfg(not(unix))]
        let signal = None;
        Self {
            code: status.code(),
            signal,
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {code}"),
            (None, Some(signal)) => write!(f, "killed by signal {signal}"),
            (None, None) => f.write_str("unknown exit status"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Failures below the protocol client, without diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Rpc(#[from] JsonRpcError),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("framing error: {0}")]
    Frame(#[from] FrameError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("process exited ({0})")]
    ProcessExited(ExitInfo),

    #[error("connection is not running")]
    NotRunning,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Errors surfaced to callers of the client and hub.
///
/// A tool that ran and reported its own failure is not an error; see
/// [`mh_domain::tool::ToolOutput::is_error`].
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("MCP server '{server}' is not running")]
    NotRunning { server: String },

    #[error("MCP server '{server}': invalid command {command:?}: {reason}")]
    InvalidCommand {
        server: String,
        command: String,
        reason: CommandLineError,
    },

    #[error(
        "MCP server '{server}': executable '{program}' not found\n  working directory: {}\n  searched: {searched}",
        .working_dir.display()
    )]
    ExecutableNotFound {
        server: String,
        program: String,
        working_dir: PathBuf,
        searched: String,
    },

    #[error("MCP server '{server}': environment setup failed: {source}")]
    EnvironmentSetupFailed {
        server: String,
        #[source]
        source: IsolationError,
    },

    #[error("MCP server '{server}': failed to launch process: {source}\n{diagnostics}")]
    ProcessLaunchFailed {
        server: String,
        #[source]
        source: std::io::Error,
        diagnostics: Box<Diagnostics>,
    },

    #[error("MCP server '{server}': process exited ({status})\n{diagnostics}")]
    ProcessExited {
        server: String,
        status: ExitInfo,
        diagnostics: Box<Diagnostics>,
    },

    #[error(
        "MCP server '{server}': {method} timed out after {}ms ({transport})\n{diagnostics}",
        .ceiling.as_millis()
    )]
    TimedOut {
        server: String,
        method: String,
        ceiling: Duration,
        transport: TransportKind,
        diagnostics: Box<Diagnostics>,
    },

    #[error("MCP server '{server}': {method} failed ({transport}): {source}\n{diagnostics}")]
    RequestFailed {
        server: String,
        method: String,
        transport: TransportKind,
        #[source]
        source: TransportError,
        diagnostics: Box<Diagnostics>,
    },

    #[error("unknown tool '{name}'")]
    UnknownTool { name: String },
}

impl McpError {
    /// The server the error concerns, when there is one.
    pub fn server_id(&self) -> Option<&str> {
        match self {
            McpError::NotRunning { server }
            | McpError::InvalidCommand { server, .. }
            | McpError::ExecutableNotFound { server, .. }
            | McpError::EnvironmentSetupFailed { server, .. }
            | McpError::ProcessLaunchFailed { server, .. }
            | McpError::ProcessExited { server, .. }
            | McpError::TimedOut { server, .. }
            | McpError::RequestFailed { server, .. } => Some(server),
            McpError::UnknownTool { .. } => None,
        }
    }

    pub fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            McpError::ProcessLaunchFailed { diagnostics, .. }
            | McpError::ProcessExited { diagnostics, .. }
            | McpError::TimedOut { diagnostics, .. }
            | McpError::RequestFailed { diagnostics, .. } => Some(diagnostics),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, McpError::TimedOut { .. })
    }
}
