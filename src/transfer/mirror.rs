//! External mirroring tool (rsync) for large files.

use super::{Strategy, TransferOutcome};
use crate::error::{Result, SyncError};
use crate::remote::RemoteShell;
use crate::sync::RemoteEntry;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Arguments for one rsync invocation: options, source spec, destination.
pub fn mirror_args(shell: &RemoteShell, entry: &RemoteEntry) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["--archive", "--verbose", "--progress", "--protect-args"]
        .into_iter()
        .map(OsString::from)
        .collect();

    if let Some(remote_shell) = shell.rsync_remote_shell() {
        args.push("-e".into());
        args.push(remote_shell);
    }

    args.push(shell.rsync_source(&entry.remote_path));
    args.push(entry.local_path.as_os_str().to_os_string());
    args
}

/// Run the external tool for one file and wait for it.
///
/// A non-zero exit is a per-file failure. Failing to start the tool at all is
/// fatal since every later file would fail the same way.
pub async fn run_mirror(
    program: &Path,
    shell: &RemoteShell,
    entry: &RemoteEntry,
) -> Result<TransferOutcome> {
    let args = mirror_args(shell, entry);

    let printable: Vec<String> = args
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    tracing::info!("Executing {} {}", program.display(), printable.join(" "));

    let status = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .status()
        .await
        .map_err(|e| SyncError::ToolSpawn {
            program: program.display().to_string(),
            source: e,
        })?;

    if status.success() {
        Ok(TransferOutcome::Completed {
            strategy: Strategy::External,
            bytes: None,
        })
    } else {
        Ok(TransferOutcome::Failed {
            strategy: Strategy::External,
            reason: format!("{} exited with {}", program.display(), status),
        })
    }
}
