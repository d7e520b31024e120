use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mh_cli::cli::{self, Cli, Command, ConfigCommand};
use mh_mcp_client::{ClientSettings, DefaultConnector, McpHub};

/// Exit code when the tool ran but reported an application error.
const EXIT_TOOL_ERROR: i32 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_cli_tracing(cli.verbose);

    match cli.command {
        Command::Tools { json } => {
            let (config, _) = cli::load_config(cli.config.as_deref())?;
            let hub = McpHub::new(&config);
            let result = cli::tools::run(&hub, &config, json).await;
            hub.stop_all().await;
            result
        }
        Command::Call { function, args } => {
            let (config, _) = cli::load_config(cli.config.as_deref())?;
            let hub = McpHub::new(&config);
            let result = cli::call::run(&hub, &config, &function, args.as_deref()).await;
            hub.stop_all().await;

            let output = result?;
            println!("{}", output.text);
            if output.is_error {
                std::process::exit(EXIT_TOOL_ERROR);
            }
            Ok(())
        }
        Command::Doctor { connect } => {
            let (config, config_path) = cli::load_config(cli.config.as_deref())?;
            let connector = Arc::new(DefaultConnector::from_config(&config.launch));
            let hub = McpHub::with_connector(connector.clone(), ClientSettings::from(&config));
            let passed =
                cli::doctor::run(&hub, connector.launch_settings(), &config, &config_path, connect).await;
            hub.stop_all().await;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Validate) => {
            let (config, config_path) = cli::load_config(cli.config.as_deref())?;
            if !cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Config(ConfigCommand::Show) => {
            let (config, _) = cli::load_config(cli.config.as_deref())?;
            let rendered = cli::config::show(&config).context("serializing config")?;
            print!("{rendered}");
            Ok(())
        }
        Command::Version => {
            println!("mcphub {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Compact stderr-only tracing so diagnostic output never pollutes stdout.
///
/// Defaults to `warn`; `--verbose` turns on debug for the hub crates.
/// `RUST_LOG` overrides both.
fn init_cli_tracing(verbose: bool) {
    let default = if verbose {
        "warn,mh_mcp_client=debug,mh_cli=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
