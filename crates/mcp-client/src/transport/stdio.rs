//! Child-process transport.
//!
//! The process is owned by a monitor task. The monitor waits for exit (or
//! a stop request, in which case it closes stdin, allows a short grace
//! period and then kills), lets stdout and stderr drain, publishes the exit
//! status and only then fails outstanding requests. Callers therefore see
//! "process exited with code N" rather than a bare broken pipe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::peer::{CloseReason, EofPolicy, RpcPeer};
use super::McpTransport;
use crate::diagnostics::{Diagnostics, LaunchInfo, TransportKind};
use crate::error::{ExitInfo, McpError, TransportError};
use crate::framing::Framing;
use crate::launch::LaunchPlan;
use crate::stderr::{self, StderrTail};

/// How long a stopped server gets to exit after stdin closes.
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Bound on waiting for stdout/stderr to drain after exit.
const DRAIN_SETTLE: Duration = Duration::from_millis(500);

/// After a write fails, how long to wait for the exit status to show up.
const EXIT_SETTLE: Duration = Duration::from_millis(250);

pub struct StdioTransport {
    server_id: String,
    peer: RpcPeer,
    launch: LaunchInfo,
    stderr: StderrTail,
    exit: watch::Receiver<Option<ExitInfo>>,
    stop: CancellationToken,
    monitor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl StdioTransport {
    pub fn spawn(
        server_id: &str,
        plan: &LaunchPlan,
        framing: Framing,
        stderr_capacity: usize,
    ) -> Result<Self, McpError> {
        let launch_failed = |source: std::io::Error| McpError::ProcessLaunchFailed {
            server: server_id.to_string(),
            source,
            diagnostics: Box::new(Diagnostics {
                launch: Some(plan.launch_info(None)),
                ..Diagnostics::new(server_id, TransportKind::Stdio)
            }),
        };

        let mut child = plan.command().spawn().map_err(launch_failed)?;
        let pid = child.id();
        let stdin = child.stdin.take().ok_or_else(|| launch_failed(missing_pipe("stdin")))?;
        let stdout = child.stdout.take().ok_or_else(|| launch_failed(missing_pipe("stdout")))?;
        let stderr_pipe = child.stderr.take().ok_or_else(|| launch_failed(missing_pipe("stderr")))?;

        let tail = StderrTail::new(stderr_capacity);
        let drain_cancel = CancellationToken::new();
        let drain = stderr::spawn_drain(stderr_pipe, tail.clone(), drain_cancel.clone());
        let peer = RpcPeer::spawn(server_id, stdout, stdin, framing, EofPolicy::Ignore);

        let (exit_tx, exit_rx) = watch::channel(None);
        let stop = CancellationToken::new();
        let monitor = tokio::spawn(supervise(Supervised {
            server_id: server_id.to_string(),
            child,
            peer: peer.clone(),
            exit: exit_tx,
            stop: stop.clone(),
            drain,
            drain_cancel,
        }));

        tracing::info!(
            server_id,
            pid = pid.unwrap_or_default(),
            executable = %plan.executable.display(),
            "spawned MCP server process"
        );

        Ok(Self {
            server_id: server_id.to_string(),
            peer,
            launch: plan.launch_info(pid),
            stderr: tail,
            exit: exit_rx,
            stop,
            monitor: tokio::sync::Mutex::new(Some(monitor)),
            stopped: AtomicBool::new(false),
        })
    }

    /// Wait up to `limit` for the process to have exited.
    async fn await_exit(&self, limit: Duration) -> Option<ExitInfo> {
        let mut rx = self.exit.clone();
        let waited = tokio::time::timeout(limit, rx.wait_for(Option::is_some)).await;
        match waited {
            Ok(Ok(status)) => *status,
            _ => None,
        }
    }
}

fn missing_pipe(name: &str) -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        format!("failed to capture child {name}"),
    )
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        match self.peer.request(method, params).await {
            // A broken pipe usually means the process is on its way out.
            Err(TransportError::Io(e)) => match self.await_exit(EXIT_SETTLE).await {
                Some(status) => Err(TransportError::ProcessExited(status)),
                None => Err(TransportError::Io(e)),
            },
            other => other,
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        match self.peer.notify(method, params).await {
            Err(TransportError::Io(e)) => match self.await_exit(EXIT_SETTLE).await {
                Some(status) => Err(TransportError::ProcessExited(status)),
                None => Err(TransportError::Io(e)),
            },
            other => other,
        }
    }

    fn is_alive(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.exit_status().is_none() && !self.peer.is_closed()
    }

    fn exit_status(&self) -> Option<ExitInfo> {
        *self.exit.borrow()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Stdio
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            launch: Some(self.launch.clone()),
            stderr_tail: self.stderr.snapshot(),
            ..Diagnostics::new(&self.server_id, TransportKind::Stdio)
        }
    }

    async fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let failed = self.peer.close(CloseReason::Stopped);
        self.stop.cancel();
        let monitor = self.monitor.lock().await.take();
        if let Some(handle) = monitor {
            if let Err(e) = handle.await {
                tracing::debug!(server_id = %self.server_id, error = %e, "MCP monitor task ended abnormally");
            }
        }
        tracing::debug!(server_id = %self.server_id, failed, "MCP server transport shut down");
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // The monitor owns the child; asking it to stop is enough.
        self.stop.cancel();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Process monitor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Supervised {
    server_id: String,
    child: Child,
    peer: RpcPeer,
    exit: watch::Sender<Option<ExitInfo>>,
    stop: CancellationToken,
    drain: JoinHandle<()>,
    drain_cancel: CancellationToken,
}

async fn supervise(s: Supervised) {
    let Supervised {
        server_id,
        mut child,
        peer,
        exit,
        stop,
        drain,
        drain_cancel,
    } = s;

    let status = tokio::select! {
        status = child.wait() => status,
        _ = stop.cancelled() => {
            peer.close_writer().await;
            match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                Ok(status) => status,
                Err(_) => {
                    tracing::warn!(server_id = %server_id, "MCP server ignored stdin close, killing");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(server_id = %server_id, error = %e, "failed to kill MCP server process");
                    }
                    child.wait().await
                }
            }
        }
    };

    let status = match status {
        Ok(status) => ExitInfo::from(status),
        Err(e) => {
            tracing::warn!(server_id = %server_id, error = %e, "error waiting for MCP server process");
            ExitInfo::default()
        }
    };

    // Responses already written and last words on stderr still count.
    peer.join_reader(DRAIN_SETTLE).await;
    let _ = tokio::time::timeout(DRAIN_SETTLE, drain).await;
    drain_cancel.cancel();

    exit.send_replace(Some(status));
    let failed = peer.close(CloseReason::Exited(status));
    peer.close_writer().await;

    if stop.is_cancelled() {
        tracing::debug!(server_id = %server_id, %status, "MCP server process stopped");
    } else {
        tracing::warn!(server_id = %server_id, %status, failed, "MCP server process exited");
    }
}
