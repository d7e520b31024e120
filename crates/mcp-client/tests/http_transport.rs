//! HTTP transport against a local axum server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;

use mh_mcp_client::config::ServerConfig;
use mh_mcp_client::launch::LaunchSettings;
use mh_mcp_client::transport::HttpTransport;
use mh_mcp_client::{ClientSettings, DefaultConnector, McpClient, McpError, McpTransport, TransportError};

const SESSION: &str = "sess-42";

#[derive(Debug, Clone)]
struct Seen {
    method: String,
    session: Option<String>,
    authorization: Option<String>,
    accept: Option<String>,
}

#[derive(Clone, Default)]
struct Server {
    seen: Arc<Mutex<Vec<Seen>>>,
    deletes: Arc<AtomicUsize>,
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
}

async fn rpc(State(server): State<Server>, headers: HeaderMap, Json(msg): Json<Value>) -> Response {
    let method = msg["method"].as_str().unwrap_or_default().to_string();
    server.seen.lock().push(Seen {
        method: method.clone(),
        session: header(&headers, "mcp-session-id"),
        authorization: header(&headers, "authorization"),
        accept: header(&headers, "accept"),
    });

    let Some(id) = msg.get("id").cloned() else {
        return StatusCode::ACCEPTED.into_response();
    };
    match method.as_str() {
        "initialize" => (
            [("mcp-session-id", SESSION)],
            Json(json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": "2024-11-05",
                    "capabilities": { "tools": {} },
                    "serverInfo": { "name": "axum-mcp", "version": "0.1.0" }
                }
            })),
        )
            .into_response(),
        // Event stream: a progress notification, then the response split
        // over two data lines.
        "tools/list" => {
            let body = format!(
                "event: message\ndata: {{\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\"}}\n\n\
                 event: message\ndata: {{\"jsonrpc\":\"2.0\",\"id\":{id},\n\
                 data: \"result\":{{\"tools\":[{{\"name\":\"lookup\",\"inputSchema\":{{\"type\":\"object\"}}}}]}}}}\n\n"
            );
            ([(CONTENT_TYPE, "text/event-stream")], body).into_response()
        }
        "tools/call" if msg["params"]["name"] == "explode" => {
            (StatusCode::INTERNAL_SERVER_ERROR, "upstream exploded").into_response()
        }
        "tools/call" => Json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "content": [
                    { "type": "text", "text": "first" },
                    { "type": "text", "text": "second" }
                ],
                "isError": false
            }
        }))
        .into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn end_session(State(server): State<Server>, headers: HeaderMap) -> StatusCode {
    if header(&headers, "mcp-session-id").as_deref() == Some(SESSION) {
        server.deletes.fetch_add(1, Ordering::SeqCst);
    }
    StatusCode::NO_CONTENT
}

async fn spawn_server() -> (Server, String) {
    let server = Server::default();
    let app = Router::new()
        .route("/mcp", post(rpc).delete(end_session))
        .with_state(server.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (server, format!("http://{addr}/mcp"))
}

fn client(dir: &TempDir, config: ServerConfig) -> McpClient {
    let connector = DefaultConnector::new(LaunchSettings::with_path(dir.path(), None, "/usr/bin"));
    McpClient::new(config, Arc::new(connector), ClientSettings::default())
}

#[tokio::test]
async fn session_id_is_replayed_and_ended_on_stop() {
    let (server, endpoint) = spawn_server().await;
    let dir = TempDir::new().unwrap();
    let mut config = ServerConfig::http("remote", &endpoint);
    if let mh_mcp_client::TransportConfig::Http(http) = &mut config.transport {
        http.headers.insert("authorization".into(), "Basic old".into());
        http.bearer_token = Some("t0k".into());
    }
    let client = client(&dir, config);

    let init = client.initialize().await.unwrap();
    assert_eq!(init.server_info.unwrap().name, "axum-mcp");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "lookup");

    let out = client.call_tool("lookup", json!({ "q": "x" })).await.unwrap();
    assert_eq!(out.text, "first\nsecond");

    client.stop().await;
    assert_eq!(server.deletes.load(Ordering::SeqCst), 1);

    let seen = server.seen.lock().clone();
    let methods: Vec<&str> = seen.iter().map(|s| s.method.as_str()).collect();
    assert_eq!(
        methods,
        vec!["initialize", "notifications/initialized", "tools/list", "tools/call"]
    );
    assert_eq!(seen[0].session, None);
    assert!(seen[1..].iter().all(|s| s.session.as_deref() == Some(SESSION)));
    assert!(seen.iter().all(|s| s.authorization.as_deref() == Some("Bearer t0k")));
    assert!(seen[0].accept.as_deref().unwrap_or("").contains("text/event-stream"));
}

#[tokio::test]
async fn error_status_carries_body_excerpt() {
    let (_server, endpoint) = spawn_server().await;
    let dir = TempDir::new().unwrap();
    let client = client(&dir, ServerConfig::http("remote", &endpoint));

    let err = client.call_tool("explode", json!({})).await.unwrap_err();
    match &err {
        McpError::RequestFailed { method, source, .. } => {
            assert_eq!(method, "tools/call");
            match source {
                TransportError::HttpStatus { status, body } => {
                    assert_eq!(*status, 500);
                    assert_eq!(body, "upstream exploded");
                }
                other => panic!("expected HttpStatus, got {other}"),
            }
        }
        other => panic!("expected RequestFailed, got {other}"),
    }
    let rendered = err.to_string();
    assert!(rendered.contains(&endpoint), "{rendered}");
}

#[tokio::test]
async fn plain_mode_only_accepts_json() {
    let (server, endpoint) = spawn_server().await;
    let mut config = mh_mcp_client::config::HttpTransportConfig {
        endpoint,
        streaming: false,
        headers: Default::default(),
        bearer_token: None,
    };
    config.headers.insert("X-Team".into(), "tools".into());
    let transport = HttpTransport::new("plain", &config, reqwest::Client::new()).unwrap();

    transport.request("initialize", Some(json!({}))).await.unwrap();
    assert_eq!(transport.session_id().as_deref(), Some(SESSION));
    assert_eq!(server.seen.lock()[0].accept.as_deref(), Some("application/json"));

    transport.shutdown().await;
    transport.shutdown().await;
    assert_eq!(server.deletes.load(Ordering::SeqCst), 1);
    assert!(!transport.is_alive());
    assert!(matches!(
        transport.request("tools/list", None).await,
        Err(TransportError::NotRunning)
    ));
}
