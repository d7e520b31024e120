pub mod call;
pub mod config;
pub mod doctor;
pub mod tools;

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};

use mh_domain::config::Config;

pub const CONFIG_ENV: &str = "MCPHUB_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "mcphub.toml";

/// mcphub: drive MCP tool servers from the command line.
#[derive(Debug, Parser)]
#[command(name = "mcphub", version, about)]
pub struct Cli {
    /// Config file (defaults to $MCPHUB_CONFIG, then ./mcphub.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log MCP traffic at debug level on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List the tools of every enabled server.
    Tools {
        /// Print the definitions as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Execute one tool by its function name (e.g. `fs__read_file`).
    Call {
        function: String,
        /// Arguments as a JSON object.
        #[arg(long)]
        args: Option<String>,
    },
    /// Check how every configured server would be launched or reached.
    Doctor {
        /// Also connect and list tools.
        #[arg(long)]
        connect: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// `--config`, else `$MCPHUB_CONFIG`, else `mcphub.toml`.
pub fn config_path(explicit: Option<&Path>, env: Option<String>) -> PathBuf {
    match (explicit, env) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(env)) if !env.is_empty() => PathBuf::from(env),
        _ => PathBuf::from(DEFAULT_CONFIG_PATH),
    }
}

/// Load the configuration; a missing file yields the defaults.
pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
    let path = config_path(explicit, std::env::var(CONFIG_ENV).ok());

    let config = if path.exists() {
        let raw = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
    } else {
        Config::default()
    };

    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_wins() {
        let path = config_path(Some(Path::new("/etc/hub.toml")), Some("/tmp/env.toml".into()));
        assert_eq!(path, PathBuf::from("/etc/hub.toml"));
    }

    #[test]
    fn env_then_default() {
        assert_eq!(config_path(None, Some("/tmp/env.toml".into())), PathBuf::from("/tmp/env.toml"));
        assert_eq!(config_path(None, Some(String::new())), PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(config_path(None, None), PathBuf::from(DEFAULT_CONFIG_PATH));
    }

    #[test]
    fn parses_call_with_args() {
        let cli = Cli::parse_from(["mcphub", "call", "fs__read_file", "--args", r#"{"path":"/tmp"}"#, "-v"]);
        assert!(cli.verbose);
        match cli.command {
            Command::Call { function, args } => {
                assert_eq!(function, "fs__read_file");
                assert_eq!(args.as_deref(), Some(r#"{"path":"/tmp"}"#));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
