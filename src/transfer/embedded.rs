//! In-process streaming copy.
//!
//! The remote file is read with `cat` over the remote channel and written in
//! fixed-size chunks into a freshly created local file. A failed copy never
//! leaves the partial file behind: its existence at the destination would
//! later be taken as "already synced".

use super::{Strategy, TransferConfig, TransferOutcome};
use crate::error::{Result, SyncError};
use crate::remote::{shell_quote, RemoteShell};
use crate::sync::RemoteEntry;
use indicatif::{HumanBytes, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

/// Throughput of a single copy.
#[derive(Debug, Clone)]
pub struct BandwidthMeter {
    started: Instant,
    bytes: u64,
}

impl BandwidthMeter {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            bytes: 0,
        }
    }

    pub fn add_bytes(&mut self, n: u64) {
        self.bytes += n;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Bytes per second since the meter was created.
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

impl Default for BandwidthMeter {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a partially written file on drop unless defused.
pub struct PartialFileGuard {
    path: PathBuf,
    armed: bool,
}

impl PartialFileGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            armed: true,
        }
    }

    /// The file is complete; keep it.
    pub fn defuse(mut self) {
        self.armed = false;
    }
}

impl Drop for PartialFileGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!("Removed partial file {}", self.path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::error!(
                "Failed to remove partial file {}: {}",
                self.path.display(),
                e
            ),
        }
    }
}

/// Copy `reader` into a new file at `dest`.
///
/// `dest` must not exist. On error the partially written file is removed.
/// On success the returned guard is still armed: defuse it once the source
/// has confirmed the data is complete.
pub async fn copy_to_new_file<R>(
    reader: &mut R,
    dest: &Path,
    buffer_size: usize,
    progress: &ProgressBar,
) -> io::Result<(BandwidthMeter, PartialFileGuard)>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dest)
        .await?;
    let guard = PartialFileGuard::new(dest);
    // Rebound after the guard so the handle closes before the guard runs
    let mut file = file;

    let mut buf = vec![0u8; buffer_size.max(1)];
    let mut meter = BandwidthMeter::new();

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
        meter.add_bytes(n as u64);
        progress.set_position(meter.bytes());
    }

    file.flush().await?;
    file.sync_all().await?;

    Ok((meter, guard))
}

fn progress_bar(size: Option<u64>, enabled: bool) -> ProgressBar {
    if !enabled {
        return ProgressBar::hidden();
    }

    let pb = match size {
        Some(size) => ProgressBar::new(size),
        None => ProgressBar::new_spinner(),
    };
    pb.set_draw_target(ProgressDrawTarget::stderr());
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
    )
    .map(|s| s.progress_chars("=> "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

fn failed(reason: String) -> TransferOutcome {
    TransferOutcome::Failed {
        strategy: Strategy::Embedded,
        reason,
    }
}

/// Stream one remote file to its local path.
pub async fn copy_remote(
    shell: &RemoteShell,
    entry: &RemoteEntry,
    config: &TransferConfig,
) -> Result<TransferOutcome> {
    let mut remote_cmd = OsString::from("cat -- ");
    remote_cmd.push(shell_quote(&entry.remote_path));

    let mut cmd = shell.command(&remote_cmd);
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::inherit());

    let mut child = cmd.spawn().map_err(|e| SyncError::ToolSpawn {
        program: shell.program().to_string(),
        source: e,
    })?;

    let Some(mut stdout) = child.stdout.take() else {
        return Ok(failed("remote channel has no output stream".to_string()));
    };

    let progress = progress_bar(entry.size, config.progress);
    let copied =
        copy_to_new_file(&mut stdout, &entry.local_path, config.buffer_size, &progress).await;
    progress.finish_and_clear();

    // Closing the pipe lets the remote side exit if we stopped reading early
    drop(stdout);
    let status = child.wait().await;

    let (meter, guard) = match copied {
        Ok(copied) => copied,
        Err(e) => return Ok(failed(format!("copy failed: {}", e))),
    };

    match status {
        Ok(status) if status.success() => {}
        Ok(status) => {
            return Ok(failed(format!("remote read exited with {}", status)));
        }
        Err(e) => {
            return Ok(failed(format!("waiting for remote read: {}", e)));
        }
    }

    guard.defuse();

    tracing::info!(
        "Downloaded {} ({}, {}/s)",
        entry.remote_path.display(),
        HumanBytes(meter.bytes()),
        HumanBytes(meter.rate() as u64)
    );

    Ok(TransferOutcome::Completed {
        strategy: Strategy::Embedded,
        bytes: Some(meter.bytes()),
    })
}
