//! LLM-facing function names and the snapshot that routes them back.
//!
//! Model APIs cap function names at 64 characters from a restricted
//! alphabet, and names must be unique within one request. Each tool is
//! named `<server>__<tool>`; when that is too long the server id is cut
//! to 8 characters, then the whole name is truncated. Collisions get
//! `_2` … `_99`, and after that a random suffix.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use mh_domain::config::ServerConfig;

pub const MAX_FUNCTION_NAME_LEN: usize = 64;
pub const SERVER_TOOL_SEPARATOR: &str = "__";

const SHORT_SERVER_ID_LEN: usize = 8;
const MAX_NUMERIC_SUFFIX: u32 = 99;
const RANDOM_SUFFIX_LEN: usize = 6;

/// Replace characters outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_name_part(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// The preferred name for `tool_name` on `server_id`, at most
/// [`MAX_FUNCTION_NAME_LEN`] characters. Not yet deduplicated.
pub fn base_function_name(server_id: &str, tool_name: &str) -> String {
    let server = non_empty(sanitize_name_part(server_id), "server");
    let tool = non_empty(sanitize_name_part(tool_name), "tool");

    let full = format!("{server}{SERVER_TOOL_SEPARATOR}{tool}");
    if full.len() <= MAX_FUNCTION_NAME_LEN {
        return full;
    }
    let short = truncate(&server, SHORT_SERVER_ID_LEN);
    let shortened = format!("{short}{SERVER_TOOL_SEPARATOR}{tool}");
    truncate(&shortened, MAX_FUNCTION_NAME_LEN).to_string()
}

fn non_empty(s: String, fallback: &str) -> String {
    if s.is_empty() {
        fallback.to_string()
    } else {
        s
    }
}

/// Names are ASCII after sanitizing, so byte slicing is safe.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        &s[..max]
    }
}

/// Hands out unique names within one listing pass.
#[derive(Debug, Default)]
pub struct NameAllocator {
    taken: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self, base: &str) -> String {
        let base = truncate(base, MAX_FUNCTION_NAME_LEN);
        if self.taken.insert(base.to_string()) {
            return base.to_string();
        }
        for n in 2..=MAX_NUMERIC_SUFFIX {
            let candidate = with_suffix(base, &format!("_{n}"));
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
        loop {
            let random = uuid::Uuid::new_v4().simple().to_string();
            let candidate = with_suffix(base, &format!("_{}", &random[..RANDOM_SUFFIX_LEN]));
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.taken.len()
    }

    pub fn is_empty(&self) -> bool {
        self.taken.is_empty()
    }
}

fn with_suffix(base: &str, suffix: &str) -> String {
    format!("{}{suffix}", truncate(base, MAX_FUNCTION_NAME_LEN - suffix.len()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Routing snapshot
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a function name leads.
#[derive(Debug, Clone)]
pub struct ToolRoute {
    /// The config as it was when the listing was produced.
    pub server: Arc<ServerConfig>,
    /// The server's own name for the tool.
    pub tool_name: String,
}

/// Function name → route, frozen at listing time.
///
/// Cheap to clone; hand it back to [`crate::McpHub::execute_tool`] to run
/// a tool the model picked from that listing.
#[derive(Debug, Clone, Default)]
pub struct RoutingSnapshot {
    routes: Arc<HashMap<String, ToolRoute>>,
}

impl RoutingSnapshot {
    pub fn resolve(&self, function_name: &str) -> Option<&ToolRoute> {
        self.routes.get(function_name)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn function_names(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }
}

/// Builds a snapshot while allocating names.
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    names: NameAllocator,
    routes: HashMap<String, ToolRoute>,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool and return its function name.
    pub fn add(&mut self, server: &Arc<ServerConfig>, tool_name: &str) -> String {
        let name = self.names.allocate(&base_function_name(&server.id, tool_name));
        self.routes.insert(
            name.clone(),
            ToolRoute {
                server: server.clone(),
                tool_name: tool_name.to_string(),
            },
        );
        name
    }

    pub fn finish(self) -> RoutingSnapshot {
        RoutingSnapshot {
            routes: Arc::new(self.routes),
        }
    }
}
