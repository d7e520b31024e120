//! Executable lookup over an augmented `PATH`.
//!
//! GUI-launched hosts inherit a minimal `PATH` that rarely contains
//! Homebrew, user-local bins or the node/python versions installed by a
//! version manager. The search path is therefore the caller's `PATH`
//! followed by configured extras, a fixed list of common install
//! locations, and shim/`bin` directories discovered under known
//! version-manager roots (newest version first).

use std::cmp::Ordering;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};

#[cfg(unix)]
const SYSTEM_DIRS: &[&str] = &[
    "/opt/homebrew/bin",
    "/opt/homebrew/sbin",
    "/usr/local/bin",
    "/usr/local/sbin",
    "/opt/local/bin",
    "/usr/bin",
    "/bin",
    "/usr/sbin",
    "/sbin",
    "/snap/bin",
];

#[cfg(not(unix))]
const SYSTEM_DIRS: &[&str] = &[];

/// Home-relative bin directories.
const HOME_BIN_DIRS: &[&str] = &[
    ".local/bin",
    ".cargo/bin",
    ".bun/bin",
    ".deno/bin",
    ".volta/bin",
    ".npm-global/bin",
    ".yarn/bin",
];

/// Home-relative shim directories of version managers.
const SHIM_DIRS: &[&str] = &[
    ".asdf/shims",
    ".local/share/mise/shims",
    ".pyenv/shims",
    ".nodenv/shims",
    ".rbenv/shims",
];

/// Version-manager roots whose children are installed versions, with the
/// path from a version directory to its `bin`.
const VERSION_ROOTS: &[(&str, &str)] = &[
    (".nvm/versions/node", "bin"),
    (".local/share/fnm/node-versions", "installation/bin"),
    ("Library/Application Support/fnm/node-versions", "installation/bin"),
    (".local/share/mise/installs/node", "bin"),
    (".local/share/mise/installs/python", "bin"),
    (".local/share/uv/python", "bin"),
];

const ABSOLUTE_VERSION_ROOTS: &[(&str, &str)] = &[("/usr/local/n/versions/node", "bin")];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    /// Assemble the augmented search path.
    ///
    /// `base` is the `PATH` value to start from (the server's own override
    /// or the caller's environment). Entries from `base` are kept even if
    /// they do not exist; everything appended is checked.
    pub fn build(base: Option<&OsStr>, extra: &[PathBuf], home: Option<&Path>) -> Self {
        let mut path = Self::default();
        if let Some(base) = base {
            for dir in std::env::split_paths(base) {
                if !dir.as_os_str().is_empty() {
                    path.push(dir);
                }
            }
        }
        for dir in extra {
            path.push_existing(dir.clone());
        }
        for dir in SYSTEM_DIRS {
            path.push_existing(PathBuf::from(dir));
        }
        if let Some(home) = home {
            for dir in HOME_BIN_DIRS.iter().chain(SHIM_DIRS) {
                path.push_existing(home.join(dir));
            }
            for (root, bin) in VERSION_ROOTS {
                for dir in versioned_bins(&home.join(root), bin) {
                    path.push(dir);
                }
            }
        }
        for (root, bin) in ABSOLUTE_VERSION_ROOTS {
            for dir in versioned_bins(Path::new(root), bin) {
                path.push(dir);
            }
        }
        path
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// The value to inject as `PATH`.
    pub fn to_env_value(&self) -> OsString {
        std::env::join_paths(&self.dirs).unwrap_or_else(|_| {
            // A directory containing the separator cannot be joined; drop such entries.
            let usable: Vec<&PathBuf> = self
                .dirs
                .iter()
                .filter(|d| std::env::join_paths([d]).is_ok())
                .collect();
            std::env::join_paths(usable).unwrap_or_default()
        })
    }

    fn push(&mut self, dir: PathBuf) {
        if !self.dirs.contains(&dir) {
            self.dirs.push(dir);
        }
    }

    fn push_existing(&mut self, dir: PathBuf) {
        if dir.is_dir() {
            self.push(dir);
        }
    }
}

/// Resolve `program` to an executable path.
///
/// Programs containing a path separator are taken relative to `cwd`;
/// bare names are searched on `search`.
pub fn resolve_executable(program: &str, cwd: &Path, search: &SearchPath) -> Option<PathBuf> {
    match which::which_in(program, Some(search.to_env_value()), cwd) {
        Ok(path) => Some(path),
        Err(err) => {
            tracing::debug!(program, error = %err, "executable lookup failed");
            None
        }
    }
}

/// Installed versions under `root`, newest first, mapped to their bin dir.
fn versioned_bins(root: &Path, bin: &str) -> Vec<PathBuf> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut versions: Vec<(Vec<u64>, PathBuf)> = entries
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .map(|path| {
            let key = version_key(path.file_name().and_then(OsStr::to_str).unwrap_or(""));
            (key, path)
        })
        .collect();
    versions.sort_by(|a, b| match b.0.cmp(&a.0) {
        Ordering::Equal => a.1.cmp(&b.1),
        other => other,
    });
    versions
        .into_iter()
        .map(|(_, path)| path.join(bin))
        .filter(|dir| dir.is_dir())
        .collect()
}

/// `"v20.11.0"` → `[20, 11, 0]`; non-numeric parts are ignored.
fn version_key(name: &str) -> Vec<u64> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse().ok())
        .collect()
}
