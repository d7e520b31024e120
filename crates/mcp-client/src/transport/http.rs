//! Streamable-HTTP transport.
//!
//! Every outgoing message is a POST of one JSON-RPC object. The response
//! is either a JSON body or an event stream whose `data:` payloads are
//! scanned until the response with the request's id shows up. A session
//! id handed out by the server is replayed on every later request.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;

use mh_domain::config::HttpTransportConfig;

use super::McpTransport;
use crate::diagnostics::{Diagnostics, HttpInfo, TransportKind};
use crate::error::TransportError;
use crate::protocol::{IncomingMessage, JsonRpcNotification, JsonRpcRequest};

pub const SESSION_HEADER: &str = "mcp-session-id";

const ACCEPT_STREAMING: &str = "application/json, text/event-stream";
const ACCEPT_PLAIN: &str = "application/json";

/// Characters of an error body kept in [`TransportError::HttpStatus`].
const ERROR_BODY_EXCERPT: usize = 512;

const DELETE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct HttpTransport {
    server_id: String,
    client: reqwest::Client,
    endpoint: String,
    streaming: bool,
    headers: HeaderMap,
    header_names: Vec<String>,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl HttpTransport {
    pub fn new(
        server_id: &str,
        config: &HttpTransportConfig,
        client: reqwest::Client,
    ) -> Result<Self, TransportError> {
        let resolved = resolve_headers(&config.headers, config.bearer_token.as_deref());
        let mut headers = HeaderMap::new();
        for (name, value) in &resolved {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| TransportError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            let header_value = HeaderValue::from_str(value).map_err(|e| TransportError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            headers.insert(header_name, header_value);
        }

        Ok(Self {
            server_id: server_id.to_string(),
            client,
            endpoint: config.endpoint.clone(),
            streaming: config.streaming,
            headers,
            header_names: resolved.into_iter().map(|(name, _)| name).collect(),
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> Option<String> {
        self.session_id.lock().clone()
    }

    async fn post<T: Serialize>(&self, message: &T) -> Result<reqwest::Response, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::NotRunning);
        }
        let accept = if self.streaming { ACCEPT_STREAMING } else { ACCEPT_PLAIN };
        let mut request = self
            .client
            .post(&self.endpoint)
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, accept)
            .json(message);
        if let Some(session) = self.session_id() {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request.send().await?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            let mut current = self.session_id.lock();
            if current.as_deref() != Some(session) {
                tracing::debug!(server_id = %self.server_id, "MCP HTTP session established");
                *current = Some(session.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::HttpStatus {
                status: status.as_u16(),
                body: excerpt(&body, ERROR_BODY_EXCERPT),
            });
        }
        Ok(response)
    }

    async fn read_event_stream(&self, mut response: reqwest::Response, id: u64) -> Result<Value, TransportError> {
        let mut buffer = String::new();
        loop {
            match response.chunk().await? {
                Some(bytes) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes).replace("\r\n", "\n"));
                    for data in drain_events(&mut buffer) {
                        if let Some(result) = self.match_response(&data, id) {
                            return result;
                        }
                    }
                }
                None => {
                    buffer.push_str("\n\n");
                    for data in drain_events(&mut buffer) {
                        if let Some(result) = self.match_response(&data, id) {
                            return result;
                        }
                    }
                    return Err(TransportError::Protocol(format!(
                        "event stream ended without a response to request {id}"
                    )));
                }
            }
        }
    }

    /// `Some` once `data` is the response to `id`.
    fn match_response(&self, data: &str, id: u64) -> Option<Result<Value, TransportError>> {
        match IncomingMessage::parse(data.as_bytes()) {
            Ok(IncomingMessage::Response(resp)) if resp.id == id => {
                Some(resp.into_result().map_err(TransportError::Rpc))
            }
            Ok(IncomingMessage::Response(resp)) => {
                tracing::debug!(server_id = %self.server_id, expected = id, got = resp.id, "skipping unrelated response");
                None
            }
            Ok(IncomingMessage::Request { method, .. }) | Ok(IncomingMessage::Notification { method }) => {
                tracing::debug!(server_id = %self.server_id, method = %method, "ignoring server message on event stream");
                None
            }
            Err(e) => {
                tracing::debug!(server_id = %self.server_id, error = %e, "ignoring unparseable event");
                None
            }
        }
    }
}

#[async_trait]
impl McpTransport for HttpTransport {
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(server_id = %self.server_id, id, method, "sending MCP request");
        let response = self.post(&JsonRpcRequest::new(id, method, params)).await?;

        let is_event_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        if is_event_stream {
            return self.read_event_stream(response, id).await;
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Err(TransportError::Protocol(format!("empty response to {method}")));
        }
        match IncomingMessage::parse(&body)? {
            IncomingMessage::Response(resp) if resp.id == id => resp.into_result().map_err(TransportError::Rpc),
            IncomingMessage::Response(resp) => Err(TransportError::Protocol(format!(
                "response id {} does not match request id {id}",
                resp.id
            ))),
            _ => Err(TransportError::Protocol(format!("{method} was not answered with a response"))),
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), TransportError> {
        tracing::debug!(server_id = %self.server_id, method, "sending MCP notification");
        // 202 Accepted with no body is the expected answer; any 2xx will do.
        self.post(&JsonRpcNotification::new(method, params)).await.map(drop)
    }

    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics {
            http: Some(HttpInfo {
                endpoint: self.endpoint.clone(),
                streaming: self.streaming,
                header_names: self.header_names.clone(),
            }),
            ..Diagnostics::new(&self.server_id, TransportKind::Http)
        }
    }

    async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(session) = self.session_id.lock().take() else {
            return;
        };
        let result = self
            .client
            .delete(&self.endpoint)
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session)
            .timeout(DELETE_TIMEOUT)
            .send()
            .await;
        if let Err(e) = result {
            tracing::debug!(server_id = %self.server_id, error = %e, "failed to end MCP HTTP session");
        }
    }
}

/// Configured headers with the bearer token applied.
///
/// A bearer token replaces any `Authorization` header regardless of case.
pub fn resolve_headers(headers: &BTreeMap<String, String>, bearer_token: Option<&str>) -> Vec<(String, String)> {
    let mut resolved: Vec<(String, String)> = headers
        .iter()
        .filter(|(name, _)| bearer_token.is_none() || !name.eq_ignore_ascii_case(AUTHORIZATION.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();
    if let Some(token) = bearer_token {
        resolved.push(("Authorization".into(), format!("Bearer {token}")));
    }
    resolved
}

/// Pull complete events out of an SSE buffer and return their data.
///
/// Events are delimited by a blank line; multiple `data:` lines in one
/// event are joined with `\n`. A trailing partial event stays buffered.
fn drain_events(buffer: &mut String) -> Vec<String> {
    let mut events = Vec::new();
    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        let data: Vec<&str> = block
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| data.strip_prefix(' ').unwrap_or(data))
            .collect();
        let joined = data.join("\n");
        if !joined.trim().is_empty() {
            events.push(joined);
        }
    }
    events
}

fn excerpt(body: &str, max_chars: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}…", &trimmed[..cut]),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_overrides_authorization_any_case() {
        let headers = BTreeMap::from([
            ("authorization".to_string(), "Basic abc".to_string()),
            ("X-Team".to_string(), "tools".to_string()),
        ]);
        let resolved = resolve_headers(&headers, Some("t0k"));
        assert_eq!(
            resolved,
            vec![
                ("X-Team".to_string(), "tools".to_string()),
                ("Authorization".to_string(), "Bearer t0k".to_string()),
            ]
        );
    }

    #[test]
    fn headers_pass_through_without_token() {
        let headers = BTreeMap::from([("Authorization".to_string(), "Basic abc".to_string())]);
        assert_eq!(resolve_headers(&headers, None), vec![("Authorization".into(), "Basic abc".into())]);
    }

    #[test]
    fn drains_complete_events_only() {
        let mut buf = String::from("event: message\ndata: {\"a\":1}\n\n: comment\n\ndata: {\"b\"");
        assert_eq!(drain_events(&mut buf), vec!["{\"a\":1}"]);
        assert_eq!(buf, "data: {\"b\"");
        buf.push_str(":2}\n\n");
        assert_eq!(drain_events(&mut buf), vec!["{\"b\":2}"]);
        assert!(buf.is_empty());
    }

    #[test]
    fn multi_line_data_is_joined() {
        let mut buf = String::from("data: {\"jsonrpc\":\"2.0\",\ndata: \"id\":1}\n\n");
        assert_eq!(drain_events(&mut buf), vec!["{\"jsonrpc\":\"2.0\",\n\"id\":1}"]);
    }

    #[test]
    fn excerpt_truncates_long_bodies() {
        let long = "e".repeat(600);
        let cut = excerpt(&long, ERROR_BODY_EXCERPT);
        assert_eq!(cut.chars().count(), ERROR_BODY_EXCERPT + 1);
        assert_eq!(excerpt("  short  ", ERROR_BODY_EXCERPT), "short");
    }

    #[test]
    fn invalid_header_is_rejected() {
        let config = HttpTransportConfig {
            endpoint: "https://example.com/mcp".into(),
            streaming: true,
            headers: BTreeMap::from([("bad header".to_string(), "x".to_string())]),
            bearer_token: None,
        };
        let err = HttpTransport::new("remote", &config, reqwest::Client::new()).err().unwrap();
        assert!(matches!(err, TransportError::InvalidHeader { .. }));
    }

    #[test]
    fn diagnostics_list_header_names() {
        let config = HttpTransportConfig {
            endpoint: "https://example.com/mcp".into(),
            streaming: false,
            headers: BTreeMap::new(),
            bearer_token: Some("secret".into()),
        };
        let transport = HttpTransport::new("remote", &config, reqwest::Client::new()).unwrap();
        let diag = transport.diagnostics();
        let http = diag.http.unwrap();
        assert_eq!(http.header_names, vec!["Authorization"]);
        assert!(!http.streaming);
    }
}
