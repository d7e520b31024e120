//! Turning a stdio server config into a concrete process launch.
//!
//! Resolution happens up front so that "command not found" and "could not
//! set up npm isolation" surface as typed errors with the search path
//! attached, instead of as an opaque spawn failure.

pub mod command;
pub mod isolation;
pub mod search_path;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use mh_domain::config::{LaunchConfig, StdioTransportConfig};

use crate::diagnostics::LaunchInfo;
use crate::error::McpError;
use command::CommandLine;
use isolation::Isolation;
use search_path::{resolve_executable, SearchPath};

const ENV_PATH: &str = "PATH";

/// Directory under the platform data dir used when no support dir is configured.
const SUPPORT_DIR_NAME: &str = "mcphub";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Settings
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything about the host needed to plan a launch.
///
/// Captured once so that planning is deterministic and testable without
/// touching the real process environment.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    pub support_dir: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub extra_path_dirs: Vec<PathBuf>,
    pub home: Option<PathBuf>,
    /// The caller's environment, inherited by every child.
    pub base_env: BTreeMap<OsString, OsString>,
    pub stderr_capacity: usize,
}

impl LaunchSettings {
    /// Settings for the current process.
    pub fn from_config(config: &LaunchConfig) -> Self {
        let home = dirs::home_dir();
        let support_dir = config.support_dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .or_else(|| home.clone())
                .unwrap_or_else(std::env::temp_dir)
                .join(SUPPORT_DIR_NAME)
        });
        Self {
            support_dir,
            working_dir: config.working_dir.clone(),
            extra_path_dirs: config.extra_path_dirs.clone(),
            home,
            base_env: std::env::vars_os().collect(),
            stderr_capacity: config.stderr_capacity_bytes,
        }
    }

    /// Settings that inherit nothing but `PATH`.
    pub fn with_path(support_dir: &Path, home: Option<&Path>, path: impl Into<OsString>) -> Self {
        Self {
            support_dir: support_dir.to_path_buf(),
            working_dir: None,
            extra_path_dirs: Vec::new(),
            home: home.map(Path::to_path_buf),
            base_env: BTreeMap::from([(OsString::from(ENV_PATH), path.into())]),
            stderr_capacity: 32 * 1024,
        }
    }

    fn base_var(&self, name: &str) -> Option<&OsString> {
        self.base_env
            .iter()
            .find(|(k, _)| k.to_str().is_some_and(|k| k.eq_ignore_ascii_case(name)))
            .map(|(_, v)| v)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plan
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A fully resolved launch.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub executable: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    /// Complete child environment.
    pub env: BTreeMap<OsString, OsString>,
    /// Names of variables that differ from the caller's environment.
    pub overrides: Vec<String>,
    pub isolation: Option<Isolation>,
    pub search_path: SearchPath,
}

impl LaunchPlan {
    pub fn prepare(
        server_id: &str,
        stdio: &StdioTransportConfig,
        settings: &LaunchSettings,
    ) -> Result<Self, McpError> {
        let line = CommandLine::parse(&stdio.command, &stdio.args).map_err(|reason| {
            McpError::InvalidCommand {
                server: server_id.to_string(),
                command: stdio.command.clone(),
                reason,
            }
        })?;

        let configured_path = stdio
            .env
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(ENV_PATH))
            .map(|(_, v)| OsString::from(v));
        let base_path = configured_path.as_ref().or_else(|| settings.base_var(ENV_PATH));
        let search = SearchPath::build(
            base_path.map(OsString::as_os_str),
            &settings.extra_path_dirs,
            settings.home.as_deref(),
        );

        let mut working_dir = default_working_dir(settings);
        let executable = resolve_executable(&line.program, &working_dir, &search).ok_or_else(|| {
            McpError::ExecutableNotFound {
                server: server_id.to_string(),
                program: line.program.clone(),
                working_dir: working_dir.clone(),
                searched: search.to_env_value().to_string_lossy().into_owned(),
            }
        })?;

        let mut env = settings.base_env.clone();
        let mut overrides = Vec::new();

        let isolation = if isolation::is_package_launcher(&executable) {
            let npmrc = isolation::user_npmrc_path(&npmrc_lookup_env(settings, stdio), settings.home.as_deref());
            let iso = Isolation::prepare(&settings.support_dir, server_id, npmrc.as_deref()).map_err(
                |source| McpError::EnvironmentSetupFailed {
                    server: server_id.to_string(),
                    source,
                },
            )?;
            for (name, value) in iso.env_overrides(&stdio.env) {
                env.insert(OsString::from(&name), value);
                overrides.push(name);
            }
            working_dir = iso.work_dir.clone();
            Some(iso)
        } else {
            None
        };

        for (name, value) in &stdio.env {
            if name.eq_ignore_ascii_case(ENV_PATH) {
                continue;
            }
            env.insert(OsString::from(name), OsString::from(value));
            overrides.push(name.clone());
        }

        // Replace whatever spelling of PATH was inherited.
        env.retain(|k, _| !k.to_str().is_some_and(|k| k.eq_ignore_ascii_case(ENV_PATH)));
        env.insert(OsString::from(ENV_PATH), search.to_env_value());
        overrides.push(ENV_PATH.to_string());

        tracing::debug!(
            server_id,
            executable = %executable.display(),
            working_dir = %working_dir.display(),
            isolated = isolation.is_some(),
            "planned MCP server launch"
        );

        Ok(Self {
            executable,
            args: line.args,
            working_dir,
            env,
            overrides,
            isolation,
            search_path: search,
        })
    }

    /// A command with piped stdio, killed when dropped.
    pub fn command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.executable);
        cmd.args(&self.args)
            .current_dir(&self.working_dir)
            .env_clear()
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub fn launch_info(&self, pid: Option<u32>) -> LaunchInfo {
        LaunchInfo {
            executable: self.executable.clone(),
            args: self.args.clone(),
            working_dir: self.working_dir.clone(),
            env_overrides: self.overrides.clone(),
            isolation_root: self.isolation.as_ref().map(|iso| iso.root.clone()),
            search_path: self.search_path.to_env_value().to_string_lossy().into_owned(),
            pid,
        }
    }
}

fn default_working_dir(settings: &LaunchSettings) -> PathBuf {
    settings
        .working_dir
        .clone()
        .or_else(|| settings.home.clone())
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")))
}

/// Caller env overlaid with the server's, as strings, for locating the
/// user's npmrc.
fn npmrc_lookup_env(settings: &LaunchSettings, stdio: &StdioTransportConfig) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = settings
        .base_env
        .iter()
        .filter_map(|(k, v)| Some((k.to_str()?.to_string(), v.to_str()?.to_string())))
        .collect();
    env.extend(stdio.env.iter().map(|(k, v)| (k.clone(), v.clone())));
    env
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn make_executable(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn stdio(command: &str) -> StdioTransportConfig {
        StdioTransportConfig {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            framing: Default::default(),
        }
    }

    #[test]
    fn plain_server_runs_in_home_with_augmented_path() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        make_executable(&bin.join("weather-server"));
        let home = root.path().join("home");
        std::fs::create_dir_all(&home).unwrap();

        let settings = LaunchSettings::with_path(&root.path().join("support"), Some(&home), bin.as_os_str());
        let mut cfg = stdio("weather-server --units metric");
        cfg.env.insert("API_KEY".into(), "k".into());
        let plan = LaunchPlan::prepare("weather", &cfg, &settings).unwrap();

        assert_eq!(plan.executable, bin.join("weather-server"));
        assert_eq!(plan.args, vec!["--units", "metric"]);
        assert_eq!(plan.working_dir, home);
        assert!(plan.isolation.is_none());
        assert_eq!(plan.env.get(&OsString::from("API_KEY")), Some(&OsString::from("k")));
        let path = plan.env.get(&OsString::from("PATH")).unwrap();
        assert_eq!(std::env::split_paths(path).next(), Some(bin.clone()));
        assert_eq!(plan.overrides, vec!["API_KEY", "PATH"]);
    }

    #[test]
    fn package_launcher_gets_isolated_home_and_cwd() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        make_executable(&bin.join("npx"));
        let support = root.path().join("support");

        let settings = LaunchSettings::with_path(&support, None, bin.as_os_str());
        let plan = LaunchPlan::prepare("files/main", &stdio("npx -y @scope/server"), &settings).unwrap();

        let iso = plan.isolation.as_ref().unwrap();
        assert_eq!(iso.root, support.join("isolation").join("files_main"));
        assert_eq!(plan.working_dir, iso.work_dir);
        assert!(iso.work_dir.is_dir());
        assert_eq!(plan.env.get(&OsString::from("HOME")), Some(&iso.home.clone().into_os_string()));
        assert!(plan.overrides.contains(&"npm_config_cache".to_string()));
    }

    #[test]
    fn server_env_wins_over_isolation() {
        let root = tempfile::tempdir().unwrap();
        let bin = root.path().join("bin");
        make_executable(&bin.join("npx"));
        let settings = LaunchSettings::with_path(&root.path().join("support"), None, bin.as_os_str());
        let mut cfg = stdio("npx pkg");
        cfg.env.insert("HOME".into(), "/custom/home".into());

        let plan = LaunchPlan::prepare("pkg", &cfg, &settings).unwrap();
        assert_eq!(plan.env.get(&OsString::from("HOME")), Some(&OsString::from("/custom/home")));
    }

    #[test]
    fn server_path_replaces_caller_path() {
        let root = tempfile::tempdir().unwrap();
        let mine = root.path().join("mine");
        make_executable(&mine.join("tool"));
        let settings = LaunchSettings::with_path(&root.path().join("support"), None, "/nonexistent-caller-bin");
        let mut cfg = stdio("tool");
        cfg.env.insert("Path".into(), mine.to_str().unwrap().into());

        let plan = LaunchPlan::prepare("t", &cfg, &settings).unwrap();
        assert_eq!(plan.executable, mine.join("tool"));
        let path = plan.env.get(&OsString::from("PATH")).unwrap().to_str().unwrap().to_string();
        assert!(!path.contains("nonexistent-caller-bin"));
        assert!(!plan.env.contains_key(&OsString::from("Path")));
    }

    #[test]
    fn missing_executable_reports_search_path() {
        let root = tempfile::tempdir().unwrap();
        let settings = LaunchSettings::with_path(&root.path().join("support"), None, "/only/here");
        let err = LaunchPlan::prepare("x", &stdio("mh-definitely-missing-binary"), &settings).unwrap_err();
        match err {
            McpError::ExecutableNotFound { program, searched, .. } => {
                assert_eq!(program, "mh-definitely-missing-binary");
                assert!(searched.starts_with("/only/here"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_quoting_is_invalid_command() {
        let root = tempfile::tempdir().unwrap();
        let settings = LaunchSettings::with_path(&root.path().join("support"), None, "/usr/bin");
        let err = LaunchPlan::prepare("x", &stdio("node 'unterminated"), &settings).unwrap_err();
        assert!(matches!(err, McpError::InvalidCommand { .. }));
    }
}
