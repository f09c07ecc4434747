//! Remote file inventory.
//!
//! The whole tree is listed with one remote `find` invocation; per-directory
//! round trips are far too slow on high-latency links.

use super::{os_from_bytes, shell_quote, RemoteShell};
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

/// A regular file found under the sync root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedFile {
    /// Path relative to the sync root
    pub relative_path: PathBuf,
    /// Size in bytes, when the listing reported it
    pub size: Option<u64>,
}

impl ListedFile {
    pub fn new(relative_path: impl Into<PathBuf>, size: Option<u64>) -> Self {
        Self {
            relative_path: relative_path.into(),
            size,
        }
    }
}

/// Produces the current inventory of regular files under a root.
///
/// Failing to enumerate must be an error, never an empty list: an empty list
/// is indistinguishable from "everything already synced".
#[async_trait]
pub trait RemoteLister: Send + Sync {
    async fn list(&self, root: &Path) -> Result<Vec<ListedFile>>;
}

/// Lists files by running `find` over a [`RemoteShell`].
pub struct FindLister {
    shell: RemoteShell,
}

impl FindLister {
    pub fn new(shell: RemoteShell) -> Self {
        Self { shell }
    }

    /// `find` prints `<size>\t<path>\0` for regular files only. `-H` follows
    /// the root itself when it is a symlink; symlinks below it are neither
    /// listed nor traversed.
    fn listing_command(root: &Path) -> OsString {
        let mut cmd = OsString::from("find -H ");
        cmd.push(shell_quote(root));
        cmd.push(" -type f -printf '%s\\t%p\\0'");
        cmd
    }
}

#[async_trait]
impl RemoteLister for FindLister {
    async fn list(&self, root: &Path) -> Result<Vec<ListedFile>> {
        let remote_cmd = Self::listing_command(root);
        tracing::debug!("Listing remote files: {}", remote_cmd.to_string_lossy());

        let output = self
            .shell
            .command(&remote_cmd)
            .output()
            .await
            .map_err(|e| SyncError::ToolSpawn {
                program: self.shell.program().to_string(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SyncError::listing(
                root,
                format!("{} ({})", output.status, stderr.trim()),
            ));
        }

        let files = parse_listing(root, &output.stdout)?;
        tracing::debug!("Remote listing returned {} files", files.len());
        Ok(files)
    }
}

/// Parse listing output into root-relative files.
///
/// Records are NUL separated, or newline separated when the output holds no
/// NUL at all. A record is either `<size>\t<path>` or a bare path.
pub fn parse_listing(root: &Path, output: &[u8]) -> Result<Vec<ListedFile>> {
    let separator = if output.contains(&0) { 0 } else { b'\n' };
    let mut files = Vec::new();

    for record in output.split(|b| *b == separator) {
        if record.is_empty() {
            continue;
        }

        let (size, raw_path) = split_size(record);
        let path = PathBuf::from(os_from_bytes(raw_path.to_vec()));

        let relative = path.strip_prefix(root).map_err(|_| {
            SyncError::listing(
                root,
                format!("listed path {} is outside the root", path.display()),
            )
        })?;

        if relative.as_os_str().is_empty() {
            continue;
        }

        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(SyncError::listing(
                root,
                format!("listed path {} is not a plain relative path", path.display()),
            ));
        }

        files.push(ListedFile::new(relative, size));
    }

    Ok(files)
}

fn split_size(record: &[u8]) -> (Option<u64>, &[u8]) {
    if let Some(tab) = record.iter().position(|b| *b == b'\t') {
        let (digits, rest) = record.split_at(tab);
        if !digits.is_empty() && digits.iter().all(u8::is_ascii_digit) {
            let size = std::str::from_utf8(digits)
                .ok()
                .and_then(|s| s.parse().ok());
            if size.is_some() {
                return (size, &rest[1..]);
            }
        }
    }
    (None, record)
}
