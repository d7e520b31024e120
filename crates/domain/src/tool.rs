use serde::{Deserialize, Serialize};

/// Tool definition exposed to the LLM.
///
/// One is produced per non-disabled tool per enabled server on every
/// listing pass. `name` is the only identifier the model sees and the key
/// the caller hands back when it wants the tool executed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// `"{server_id}:{tool_name}"`, stable across listing passes.
    pub id: String,
    /// Disambiguated, length-capped function name.
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: serde_json::Value,
    pub source: ToolSource,
}

/// Which server a tool definition came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSource {
    pub server_id: String,
    pub server_name: String,
    /// The server's own name for the tool.
    pub tool_name: String,
    /// Copied from the server config; the caller decides what it means.
    pub run_automatically: bool,
}

impl ToolDefinition {
    pub fn tool_id(server_id: &str, tool_name: &str) -> String {
        format!("{server_id}:{tool_name}")
    }
}

/// Outcome of a tool call that reached the server.
///
/// `is_error` is the server's own verdict: the tool ran and reported a
/// failure. Transport and protocol failures never arrive here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ToolOutput {
    pub text: String,
    #[serde(default)]
    pub is_error: bool,
}
