use std::fmt::Write as _;

use mh_domain::config::Config;
use mh_mcp_client::{McpHub, ToolListing};

/// List the tools of every enabled server.
pub async fn run(hub: &McpHub, config: &Config, json: bool) -> anyhow::Result<()> {
    let listing = hub.tool_definitions(&config.servers).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&listing.definitions)?);
    } else {
        print!("{}", render(&listing));
    }
    report_failures(&listing);
    Ok(())
}

/// Listing failures go to stderr so `--json` output stays parseable.
pub fn report_failures(listing: &ToolListing) {
    for failure in &listing.failures {
        eprintln!("warning: server '{}' skipped:\n{}", failure.server_id, failure.error);
    }
}

fn render(listing: &ToolListing) -> String {
    let mut out = String::new();
    if listing.definitions.is_empty() {
        out.push_str("No tools available.\n");
        return out;
    }

    let width = listing
        .definitions
        .iter()
        .map(|d| d.name.len())
        .max()
        .unwrap_or(0);
    for def in &listing.definitions {
        let summary = def.description.lines().next().unwrap_or_default();
        let _ = writeln!(out, "{:width$}  [{}] {summary}", def.name, def.source.server_name);
    }
    let _ = writeln!(out, "\n{} tool(s)", listing.definitions.len());
    out
}
