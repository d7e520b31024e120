use std::path::Path;

use mh_domain::config::{Config, ConfigSeverity, ServerConfig, TransportConfig};
use mh_mcp_client::diagnostics::{Diagnostics, TransportKind};
use mh_mcp_client::launch::{LaunchPlan, LaunchSettings};
use mh_mcp_client::McpHub;

/// Run all diagnostic checks and print a summary.
///
/// `settings` should be the ones `hub` launches with, so the reported
/// plan matches what a real connection would do.
///
/// Returns `true` when every check passes.
pub async fn run(
    hub: &McpHub,
    settings: &LaunchSettings,
    config: &Config,
    config_path: &Path,
    connect: bool,
) -> bool {
    println!("mcphub doctor");
    println!("=============\n");

    let mut all_passed = true;

    check_config_file(config_path);
    check_config_validation(config, &mut all_passed);

    print_check("Support directory", true, settings.support_dir.display().to_string());

    for server in &config.servers {
        println!();
        println!(
            "{} ({}, {:?})",
            server.display_name(),
            server.transport.kind(),
            server.lifecycle
        );
        if !server.is_enabled {
            println!("  [SKIP] disabled");
            continue;
        }
        check_reachability(server, settings, &mut all_passed);
        if connect {
            check_listing(hub, server, &mut all_passed).await;
        }
    }

    println!();
    if all_passed {
        println!("All checks passed.");
    } else {
        println!("Some checks failed. Review the output above.");
    }
    all_passed
}

// ── Individual checks ─────────────────────────────────────────────────

fn check_config_file(config_path: &Path) {
    let exists = config_path.exists();
    print_check(
        "Config file exists",
        exists,
        if exists {
            config_path.display().to_string()
        } else {
            format!("{} not found (using defaults)", config_path.display())
        },
    );
}

fn check_config_validation(config: &Config, all_passed: &mut bool) {
    let issues = config.validate();
    let error_count = issues
        .iter()
        .filter(|e| e.severity == ConfigSeverity::Error)
        .count();

    if issues.is_empty() {
        print_check("Config validation", true, "no issues".into());
        return;
    }
    print_check(
        "Config validation",
        error_count == 0,
        format!("{} issue(s) ({error_count} error(s))", issues.len()),
    );
    for issue in &issues {
        println!("      {issue}");
    }
    if error_count > 0 {
        *all_passed = false;
    }
}

/// Resolve the launch (stdio) or print the endpoint (http) without
/// connecting.
fn check_reachability(server: &ServerConfig, settings: &LaunchSettings, all_passed: &mut bool) {
    match &server.transport {
        TransportConfig::Stdio(stdio) => match LaunchPlan::prepare(&server.id, stdio, settings) {
            Ok(plan) => {
                print_check("Executable", true, plan.executable.display().to_string());
                let diagnostics = Diagnostics {
                    launch: Some(plan.launch_info(None)),
                    ..Diagnostics::new(&server.id, TransportKind::Stdio)
                };
                print_details(&diagnostics.to_string());
            }
            Err(e) => {
                print_check("Executable", false, String::new());
                print_details(&e.to_string());
                *all_passed = false;
            }
        },
        TransportConfig::Http(_) => {
            print_check("Endpoint", true, String::new());
            print_details(&Diagnostics::for_config(server).to_string());
        }
    }
}

async fn check_listing(hub: &McpHub, server: &ServerConfig, all_passed: &mut bool) {
    match hub.list_tools(server).await {
        Ok(tools) => {
            let disabled = tools.iter().filter(|t| server.is_tool_disabled(&t.name)).count();
            print_check(
                "tools/list",
                true,
                format!("{} tool(s), {disabled} disabled", tools.len()),
            );
        }
        Err(e) => {
            print_check("tools/list", false, String::new());
            print_details(&e.to_string());
            *all_passed = false;
        }
    }
}

// ── Formatting helpers ────────────────────────────────────────────────

fn print_check(name: &str, passed: bool, detail: String) {
    let status = if passed { "PASS" } else { "FAIL" };
    if detail.is_empty() {
        println!("  [{status}] {name}");
    } else {
        println!("  [{status}] {name}: {detail}");
    }
}

fn print_details(text: &str) {
    for line in text.lines() {
        println!("      {}", line.trim_start());
    }
}
