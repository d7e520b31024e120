//! Diagnostics attached to every connection-level failure.
//!
//! The goal is that a user staring at a broken third-party server config
//! can fix it from the error message alone: what was launched, where,
//! with which environment overrides, and what it printed before dying.
//! Header values and environment values are never included; names are.

use std::fmt;
use std::path::PathBuf;

use mh_domain::config::{ServerConfig, TransportConfig};

/// Characters of stderr rendered in `Display`; the full tail stays in
/// [`Diagnostics::stderr_tail`].
const STDERR_DISPLAY_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Stdio,
    Http,
    /// In-process byte stream.
    Stream,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
            TransportKind::Stream => "stream",
        })
    }
}

/// How a stdio server was launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchInfo {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Names of variables set on top of the caller's environment.
    pub env_overrides: Vec<String>,
    pub isolation_root: Option<PathBuf>,
    /// The injected `PATH`.
    pub search_path: String,
    pub pid: Option<u32>,
}

/// Where an HTTP server lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpInfo {
    pub endpoint: String,
    pub streaming: bool,
    pub header_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostics {
    pub server_id: String,
    pub transport: TransportKind,
    pub launch: Option<LaunchInfo>,
    pub http: Option<HttpInfo>,
    pub stderr_tail: Option<String>,
}

impl Diagnostics {
    pub fn new(server_id: impl Into<String>, transport: TransportKind) -> Self {
        Self {
            server_id: server_id.into(),
            transport,
            launch: None,
            http: None,
            stderr_tail: None,
        }
    }

    /// What is known from configuration alone, before anything was launched.
    pub fn for_config(server: &ServerConfig) -> Self {
        match &server.transport {
            TransportConfig::Stdio(_) => Self::new(&server.id, TransportKind::Stdio),
            TransportConfig::Http(http) => {
                let mut header_names: Vec<String> = http.headers.keys().cloned().collect();
                if http.bearer_token.is_some()
                    && !header_names.iter().any(|h| h.eq_ignore_ascii_case("authorization"))
                {
                    header_names.push("Authorization".into());
                }
                Self {
                    http: Some(HttpInfo {
                        endpoint: http.endpoint.clone(),
                        streaming: http.streaming,
                        header_names,
                    }),
                    ..Self::new(&server.id, TransportKind::Http)
                }
            }
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "  transport: {}", self.transport)?;
        if let Some(launch) = &self.launch {
            write!(f, "\n  command: {}", launch.executable.display())?;
            for arg in &launch.args {
                write!(f, " {}", quote_arg(arg))?;
            }
            write!(f, "\n  working directory: {}", launch.working_dir.display())?;
            if let Some(pid) = launch.pid {
                write!(f, "\n  pid: {pid}")?;
            }
            if !launch.env_overrides.is_empty() {
                write!(f, "\n  environment overrides: {}", launch.env_overrides.join(", "))?;
            }
            if let Some(root) = &launch.isolation_root {
                write!(f, "\n  isolation root: {}", root.display())?;
            }
            write!(f, "\n  PATH: {}", launch.search_path)?;
        }
        if let Some(http) = &self.http {
            write!(f, "\n  endpoint: {}", http.endpoint)?;
            write!(f, "\n  streaming: {}", http.streaming)?;
            if !http.header_names.is_empty() {
                write!(f, "\n  headers: {}", http.header_names.join(", "))?;
            }
        }
        match &self.stderr_tail {
            Some(tail) => {
                let shown = tail_chars(tail, STDERR_DISPLAY_CHARS);
                write!(f, "\n  stderr:")?;
                for line in shown.lines() {
                    write!(f, "\n    {line}")?;
                }
            }
            None if self.launch.is_some() => write!(f, "\n  stderr: (empty)")?,
            None => {}
        }
        Ok(())
    }
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && !arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    let skip = text
        .char_indices()
        .nth(count - max)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &text[skip..]
}
