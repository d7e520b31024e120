use anyhow::{bail, Context};
use serde_json::Value;

use mh_domain::config::Config;
use mh_domain::tool::ToolOutput;
use mh_mcp_client::McpHub;

use super::tools::report_failures;

/// List every enabled server, then execute `function` from that listing.
pub async fn run(hub: &McpHub, config: &Config, function: &str, args: Option<&str>) -> anyhow::Result<ToolOutput> {
    let arguments = parse_args(args)?;

    let listing = hub.tool_definitions(&config.servers).await;
    if listing.snapshot.resolve(function).is_none() {
        report_failures(&listing);
        let mut known: Vec<&str> = listing.snapshot.function_names().collect();
        known.sort_unstable();
        bail!(
            "no tool named '{function}' (available: {})",
            if known.is_empty() { "none".to_string() } else { known.join(", ") }
        );
    }

    let output = hub
        .execute_tool(function, arguments, &listing.snapshot)
        .await
        .with_context(|| format!("calling {function}"))?;
    Ok(output)
}

fn parse_args(args: Option<&str>) -> anyhow::Result<Value> {
    let Some(raw) = args else {
        return Ok(Value::Object(Default::default()));
    };
    let value: Value = serde_json::from_str(raw).context("parsing --args as JSON")?;
    match value {
        Value::Object(_) | Value::Null => Ok(value),
        other => bail!("--args must be a JSON object, got {other}"),
    }
}
