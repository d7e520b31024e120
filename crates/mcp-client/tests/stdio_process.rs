//! Real child processes driven through the default connector.

#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use mh_mcp_client::config::{Framing, ServerConfig, TimeoutConfig, TransportConfig};
use mh_mcp_client::launch::LaunchSettings;
use mh_mcp_client::{ClientSettings, DefaultConnector, McpClient, McpError};

const PATH: &str = "/usr/bin:/bin";

/// Answers initialize, tools/list and tools/call over newline framing.
const LINE_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{},"serverInfo":{"name":"line-server","version":"1.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"echo","inputSchema":{"type":"object"}}]}}\n' "$id" ;;
    *'"method":"tools/call"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$id" ;;
  esac
done
"#;

fn shell(id: &str, script: &str) -> ServerConfig {
    let mut server = ServerConfig::stdio(id, "sh");
    if let TransportConfig::Stdio(stdio) = &mut server.transport {
        stdio.args = vec!["-c".into(), script.into()];
        stdio.framing = Framing::Newline;
    }
    server
}

fn client(dir: &TempDir, server: ServerConfig, timeouts: TimeoutConfig) -> McpClient {
    let connector = DefaultConnector::new(LaunchSettings::with_path(dir.path(), None, PATH));
    let settings = ClientSettings {
        timeouts,
        ..ClientSettings::default()
    };
    McpClient::new(server, Arc::new(connector), settings)
}

fn short_handshake() -> TimeoutConfig {
    TimeoutConfig {
        handshake_ms: 300,
        request_ms: 2_000,
        tool_call_ms: 2_000,
    }
}

#[tokio::test]
async fn shell_server_answers_a_full_session() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir, shell("line", LINE_SERVER), TimeoutConfig::default());

    let init = client.initialize().await.unwrap();
    assert_eq!(init.server_info.unwrap().name, "line-server");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");

    let out = client.call_tool("echo", json!({ "text": "ping" })).await.unwrap();
    assert_eq!(out.text, "pong");
    assert!(!out.is_error);

    client.stop().await;
    assert!(!client.is_connected());
}

#[tokio::test]
async fn early_exit_reports_code_and_stderr() {
    let dir = TempDir::new().unwrap();
    let server = shell("crashy", "head -c 1 >/dev/null; echo boom >&2; exit 7");
    let client = client(&dir, server, TimeoutConfig::default());

    let err = client.initialize().await.unwrap_err();
    match &err {
        McpError::ProcessExited {
            server,
            status,
            diagnostics,
        } => {
            assert_eq!(server, "crashy");
            assert_eq!(status.code, Some(7));
            assert!(diagnostics.stderr_tail.as_deref().unwrap_or("").contains("boom"));
            assert!(diagnostics.launch.as_ref().and_then(|l| l.pid).is_some());
        }
        other => panic!("expected ProcessExited, got {other}"),
    }
    let rendered = err.to_string();
    assert!(rendered.contains("exit code 7"), "{rendered}");
    assert!(rendered.contains("boom"), "{rendered}");
}

#[tokio::test]
async fn silent_server_times_out_during_handshake() {
    let dir = TempDir::new().unwrap();
    let client = client(&dir, shell("mute", "cat >/dev/null"), short_handshake());

    let started = std::time::Instant::now();
    let err = client.initialize().await.unwrap_err();
    assert!(err.is_timeout(), "got {err}");
    match err {
        McpError::TimedOut { method, ceiling, .. } => {
            assert_eq!(method, "initialize");
            assert_eq!(ceiling, Duration::from_millis(300));
        }
        other => panic!("expected TimedOut, got {other}"),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn missing_executable_is_reported_with_search_path() {
    let dir = TempDir::new().unwrap();
    let server = ServerConfig::stdio("ghost", "definitely-not-an-mcp-server-binary --flag");
    let client = client(&dir, server, short_handshake());

    match client.initialize().await.unwrap_err() {
        McpError::ExecutableNotFound {
            server,
            program,
            searched,
            ..
        } => {
            assert_eq!(server, "ghost");
            assert_eq!(program, "definitely-not-an-mcp-server-binary");
            assert!(searched.contains("/usr/bin"));
        }
        other => panic!("expected ExecutableNotFound, got {other}"),
    }
}

#[tokio::test]
async fn unbalanced_quotes_are_an_invalid_command() {
    let dir = TempDir::new().unwrap();
    let server = ServerConfig::stdio("broken", "npx \"unterminated");
    let client = client(&dir, server, short_handshake());

    let err = client.initialize().await.unwrap_err();
    assert!(matches!(err, McpError::InvalidCommand { .. }), "got {err}");
}

#[tokio::test]
async fn stop_fails_a_pending_call_with_not_running() {
    let dir = TempDir::new().unwrap();
    // Completes the handshake, then ignores everything.
    let script = r#"
IFS= read -r line
id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{}}}\n' "$id"
cat >/dev/null
"#;
    let client = Arc::new(client(&dir, shell("stuck", script), TimeoutConfig::default()));
    client.initialize().await.unwrap();

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.call_tool("wait", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.stop().await;

    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, McpError::NotRunning { ref server } if server == "stuck"), "got {err}");
}

#[tokio::test(flavor = "current_thread")]
async fn package_launcher_connects_on_a_single_threaded_runtime() {
    let dir = TempDir::new().unwrap();
    let script = dir.path().join("server.sh");
    std::fs::write(&script, LINE_SERVER).unwrap();
    let bin = dir.path().join("bin");
    std::fs::create_dir_all(&bin).unwrap();
    let npx = bin.join("npx");
    std::fs::write(&npx, format!("#!/bin/sh\nexec sh '{}'\n", script.display())).unwrap();
    std::fs::set_permissions(&npx, std::fs::Permissions::from_mode(0o755)).unwrap();

    let support = dir.path().join("support");
    let settings = LaunchSettings::with_path(&support, None, format!("{}:{PATH}", bin.display()));
    let mut server = ServerConfig::stdio("pkg", "npx -y @scope/server");
    if let TransportConfig::Stdio(stdio) = &mut server.transport {
        stdio.framing = Framing::Newline;
    }
    let client = McpClient::new(server, Arc::new(DefaultConnector::new(settings)), ClientSettings::default());

    let init = client.initialize().await.unwrap();
    assert_eq!(init.server_info.unwrap().name, "line-server");
    assert!(support.join("isolation/pkg/work").is_dir());
    client.stop().await;
}
