//! The sync decision engine.
//!
//! For every remote file, in listing order:
//!
//! 1. skip it if the history already has it
//! 2. ask the policy: download, defer, or skip forever
//! 3. make sure the local parent exists and the destination does not
//! 4. transfer
//! 5. record it, which is the point after which it is never considered again
//!
//! Files are processed one at a time. A failed transfer leaves the file
//! unrecorded so the next run retries it; fatal errors (listing, history
//! store) abort the run.

pub mod policy;

pub use policy::{AcceptAll, Decision, InteractivePrompter, Prompter};

use crate::config::SyncTarget;
use crate::error::Result;
use crate::history::HostHistory;
use crate::remote::{ListedFile, RemoteLister};
use crate::transfer::{Strategy, TransferExecutor, TransferOutcome};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// One candidate file with its remote and local locations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    /// Path relative to both roots
    pub relative_path: PathBuf,
    /// Remote path; also the key recorded in the history
    pub remote_path: PathBuf,
    pub local_path: PathBuf,
    pub size: Option<u64>,
}

impl RemoteEntry {
    pub fn new(target: &SyncTarget, file: ListedFile) -> Self {
        Self {
            remote_path: target.remote_root.join(&file.relative_path),
            local_path: target.local_root.join(&file.relative_path),
            relative_path: file.relative_path,
            size: file.size,
        }
    }
}

/// Where a file ended up after one pass through the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileState {
    /// Already in the history; nothing done
    AlreadySynced,
    /// Transferred and recorded
    Recorded {
        strategy: Strategy,
        bytes: Option<u64>,
    },
    /// A local file was already at the destination; recorded without transfer
    Conflict,
    /// Recorded without downloading
    PermanentlySkipped,
    /// Left for the next run
    Deferred,
    /// Transfer failed; left unrecorded for the next run
    Failed { reason: String },
    /// Dry run: would have been offered for download
    WouldDownload,
}

#[derive(Debug, Clone, Default)]
pub struct SyncSummary {
    pub files_listed: usize,
    pub already_synced: usize,
    pub downloaded: usize,
    pub conflicts: usize,
    pub permanently_skipped: usize,
    pub deferred: usize,
    pub failed: usize,
    pub would_download: usize,
    /// Bytes written by the embedded strategy
    pub bytes_copied: u64,
    pub failures: Vec<(PathBuf, String)>,
    pub duration: Duration,
}

impl SyncSummary {
    /// New history records written this run.
    pub fn recorded(&self) -> usize {
        self.downloaded + self.conflicts + self.permanently_skipped
    }

    fn tally(&mut self, entry: &RemoteEntry, state: FileState) {
        match state {
            FileState::AlreadySynced => self.already_synced += 1,
            FileState::Recorded { bytes, .. } => {
                self.downloaded += 1;
                self.bytes_copied += bytes.unwrap_or(0);
            }
            FileState::Conflict => self.conflicts += 1,
            FileState::PermanentlySkipped => self.permanently_skipped += 1,
            FileState::Deferred => self.deferred += 1,
            FileState::Failed { reason } => {
                self.failed += 1;
                self.failures.push((entry.remote_path.clone(), reason));
            }
            FileState::WouldDownload => self.would_download += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Report candidates without transferring or recording anything
    pub dry_run: bool,
}

/// Drives one run for one host.
///
/// The engine is the only writer to the history for the duration of the run.
pub struct SyncEngine<'a> {
    target: &'a SyncTarget,
    history: &'a HostHistory,
    lister: &'a dyn RemoteLister,
    executor: &'a dyn TransferExecutor,
    options: SyncOptions,
}

impl<'a> SyncEngine<'a> {
    pub fn new(
        target: &'a SyncTarget,
        history: &'a HostHistory,
        lister: &'a dyn RemoteLister,
        executor: &'a dyn TransferExecutor,
        options: SyncOptions,
    ) -> Self {
        Self {
            target,
            history,
            lister,
            executor,
            options,
        }
    }

    pub async fn run(&self, prompter: &mut dyn Prompter) -> Result<SyncSummary> {
        let start = Instant::now();
        let mut summary = SyncSummary::default();

        let files = self.lister.list(&self.target.remote_root).await?;
        summary.files_listed = files.len();
        tracing::info!(
            "Found {} remote files under {}:{}",
            files.len(),
            self.target.host,
            self.target.remote_root.display()
        );

        for file in files {
            let entry = RemoteEntry::new(self.target, file);
            let state = self.process(&entry, prompter).await?;
            summary.tally(&entry, state);
        }

        summary.duration = start.elapsed();
        Ok(summary)
    }

    /// Take one file from pending to a terminal state.
    pub async fn process(
        &self,
        entry: &RemoteEntry,
        prompter: &mut dyn Prompter,
    ) -> Result<FileState> {
        if self.history.exists(&entry.remote_path)? {
            tracing::debug!("Already synced: {}", entry.remote_path.display());
            return Ok(FileState::AlreadySynced);
        }

        if self.options.dry_run || !prompter.shows_entry() {
            tracing::info!(
                "{} -> {}",
                entry.remote_path.display(),
                entry.local_path.display()
            );
        } else {
            tracing::debug!(
                "{} -> {}",
                entry.remote_path.display(),
                entry.local_path.display()
            );
        }

        if self.options.dry_run {
            return Ok(FileState::WouldDownload);
        }

        let decision = prompter.decide(entry).await?;

        if !decision.download() {
            if decision.record() {
                self.history.record(&entry.remote_path)?;
                tracing::info!("Skipping forever: {}", entry.remote_path.display());
                return Ok(FileState::PermanentlySkipped);
            }
            tracing::info!("Deferred: {}", entry.remote_path.display());
            return Ok(FileState::Deferred);
        }

        if let Some(parent) = entry.local_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                let reason = format!("can't create {}: {}", parent.display(), e);
                tracing::warn!("Skipping {}: {}", entry.remote_path.display(), reason);
                return Ok(FileState::Failed { reason });
            }
        }

        if tokio::fs::symlink_metadata(&entry.local_path).await.is_ok() {
            tracing::warn!(
                "Local file already exists, not overwriting: {}",
                entry.local_path.display()
            );
            self.history.record(&entry.remote_path)?;
            return Ok(FileState::Conflict);
        }

        match self.executor.transfer(entry).await? {
            TransferOutcome::Completed { strategy, bytes } => {
                self.history.record(&entry.remote_path)?;
                tracing::info!(
                    "Recorded {} ({} transfer)",
                    entry.remote_path.display(),
                    strategy
                );
                Ok(FileState::Recorded { strategy, bytes })
            }
            TransferOutcome::Failed { strategy, reason } => {
                tracing::warn!(
                    "{} transfer failed for {}: {}; will retry next run",
                    strategy,
                    entry.remote_path.display(),
                    reason
                );
                Ok(FileState::Failed { reason })
            }
        }
    }
}
