//! Sync configuration: which remote directory maps to which local directory
//! for each host alias.
//!
//! The file is JSON shaped like
//!
//! ```json
//! { "hosts": { "nas": { "remote": "/srv/media", "local": "~/media" } } }
//! ```
//!
//! `local` is optional and defaults to the `remote` string.

use crate::error::{Result, SyncError};
use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Directory holding the default sync file and history store (`~/.grab-once`).
pub fn default_app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".grab-once")
}

pub fn default_sync_file() -> PathBuf {
    default_app_dir().join("sync.json")
}

pub fn default_history_path() -> PathBuf {
    default_app_dir().join("history")
}

/// Expand tilde (~) in paths to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            home.join(rest)
        } else {
            path.to_path_buf()
        }
    } else {
        path.to_path_buf()
    }
}

/// One host's directory mapping, normalized and ready for path arithmetic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTarget {
    /// Host alias as given on the command line (also the history key)
    pub host: String,
    /// Remote sync root. Absolute, or relative to the remote login directory
    /// when configured with a leading `~`.
    pub remote_root: PathBuf,
    /// Absolute local directory receiving the files
    pub local_root: PathBuf,
}

impl SyncTarget {
    /// Build a target from raw configured strings, normalizing both roots.
    pub fn new(host: &str, remote: &str, local: Option<&str>) -> Result<Self> {
        let remote_root = normalize_remote_root(remote)?;
        let local_root = normalize_local_root(local.unwrap_or(remote))?;

        Ok(Self {
            host: host.to_string(),
            remote_root,
            local_root,
        })
    }
}

/// Read the sync file and extract the entry for `host`.
///
/// Every failure here is a configuration error so it surfaces before any
/// network activity.
pub fn load_target(sync_file: &Path, host: &str) -> Result<SyncTarget> {
    let contents = fs::read_to_string(sync_file).map_err(|e| {
        SyncError::Config(format!(
            "Can't read synchronization file {}: {}",
            sync_file.display(),
            e
        ))
    })?;

    parse_target(&contents, host).map_err(|e| match e {
        SyncError::Config(msg) => {
            SyncError::Config(format!("{} ({})", msg, sync_file.display()))
        }
        other => other,
    })
}

/// Top level of the sync file. `hosts` stays untyped until one entry is
/// picked, so a malformed entry for another host doesn't block this one.
#[derive(Debug, Deserialize)]
struct SyncFile {
    hosts: Option<Value>,
}

/// One host's directory pair.
#[derive(Debug, Deserialize)]
struct HostEntry {
    remote: Option<String>,
    #[serde(default)]
    local: Option<String>,
}

/// Parse sync configuration text and extract the entry for `host`.
pub fn parse_target(contents: &str, host: &str) -> Result<SyncTarget> {
    let file: SyncFile = serde_json::from_str(contents)
        .map_err(|e| SyncError::Config(format!("Can't parse synchronization file: {}", e)))?;

    let hosts = file
        .hosts
        .ok_or_else(|| SyncError::Config("Synchronization file missing hosts entry".into()))?;

    let Value::Object(mut hosts) = hosts else {
        return Err(SyncError::Config(
            "Synchronization file hosts entry should be an object".into(),
        ));
    };

    let entry = hosts.remove(host).ok_or_else(|| {
        SyncError::Config(format!(
            "Synchronization file does not have a host entry for: {}",
            host
        ))
    })?;

    let entry: HostEntry = serde_json::from_value(entry)
        .map_err(|e| SyncError::Config(format!("Invalid host entry for {}: {}", host, e)))?;

    let remote = entry.remote.ok_or_else(|| {
        SyncError::Config(format!(
            "Synchronization file does not specify remote directory for: {}",
            host
        ))
    })?;

    SyncTarget::new(host, &remote, entry.local.as_deref())
}

/// Normalize a remote root. A leading `~` means "relative to the login
/// directory", which is where remote commands start.
pub fn normalize_remote_root(raw: &str) -> Result<PathBuf> {
    let home_relative = if raw == "~" {
        Some("")
    } else {
        raw.strip_prefix("~/")
    };

    match home_relative {
        Some(rest) if rest.trim_matches('/').is_empty() => Ok(PathBuf::from(".")),
        Some(rest) => normalize_lexically(Path::new(rest)),
        None => normalize_lexically(Path::new(raw)),
    }
    .map_err(|e| SyncError::Config(format!("Invalid remote directory {:?}: {}", raw, e)))
}

/// Normalize a local root to an absolute path.
pub fn normalize_local_root(raw: &str) -> Result<PathBuf> {
    let expanded = expand_tilde(Path::new(raw));
    let anchored = if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    };

    normalize_lexically(&anchored)
        .map_err(|e| SyncError::Config(format!("Invalid local directory {:?}: {}", raw, e)))
}

/// Remove `.` components, resolve `..` and drop trailing separators without
/// touching the filesystem.
fn normalize_lexically(path: &Path) -> std::result::Result<PathBuf, String> {
    let mut normalized = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err("'..' escapes the directory root".to_string());
                }
                normalized.pop();
                depth -= 1;
            }
            Component::Normal(part) => {
                normalized.push(part);
                depth += 1;
            }
            Component::RootDir | Component::Prefix(_) => normalized.push(component.as_os_str()),
        }
    }

    if normalized.as_os_str().is_empty() {
        return Err("path is empty".to_string());
    }

    Ok(normalized)
}
