//! Copying one remote file to one local path.
//!
//! Two strategies:
//! - **Embedded**: stream `cat` output from the remote channel into the local
//!   file. Used for small files where spawning rsync costs more than the copy.
//! - **External**: hand the file to rsync.
//!
//! Per-file failures come back as [`TransferOutcome::Failed`] so the run can
//! move on; `Err` is reserved for problems that would fail every file.

pub mod embedded;
pub mod mirror;

pub use embedded::{BandwidthMeter, PartialFileGuard};

use crate::error::Result;
use crate::remote::RemoteShell;
use crate::sync::RemoteEntry;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;

/// Default read size for the embedded copy
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Files at or above this size go to the external tool in `auto` mode
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 4096;

pub const DEFAULT_RSYNC_PATH: &str = "/usr/bin/rsync";

/// How the strategy for each file is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TransferMode {
    /// By size: embedded below the threshold, external otherwise
    #[default]
    Auto,
    /// Always stream in-process
    Embedded,
    /// Always use the external tool
    External,
}

impl TransferMode {
    /// Files of unknown size are treated as large.
    pub fn strategy_for(self, size: Option<u64>, threshold: u64) -> Strategy {
        match self {
            TransferMode::Embedded => Strategy::Embedded,
            TransferMode::External => Strategy::External,
            TransferMode::Auto => match size {
                Some(size) if size < threshold => Strategy::Embedded,
                _ => Strategy::External,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Embedded,
    External,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Embedded => write!(f, "embedded"),
            Strategy::External => write!(f, "external"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Bytes read per chunk in the embedded copy
    pub buffer_size: usize,
    pub large_file_threshold: u64,
    pub mode: TransferMode,
    /// External mirroring program
    pub rsync_path: PathBuf,
    /// Show a progress bar during embedded copies
    pub progress: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            large_file_threshold: DEFAULT_LARGE_FILE_THRESHOLD,
            mode: TransferMode::Auto,
            rsync_path: PathBuf::from(DEFAULT_RSYNC_PATH),
            progress: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Completed {
        strategy: Strategy,
        /// Bytes written, when the strategy can tell
        bytes: Option<u64>,
    },
    Failed {
        strategy: Strategy,
        reason: String,
    },
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed { .. })
    }
}

/// Copies a single remote file to its local destination.
///
/// The destination's parent exists and the destination itself does not when
/// this is called.
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    async fn transfer(&self, entry: &RemoteEntry) -> Result<TransferOutcome>;
}

/// Default executor: picks a strategy per file and runs it over a
/// [`RemoteShell`].
pub struct ShellTransfer {
    shell: RemoteShell,
    config: TransferConfig,
}

impl ShellTransfer {
    pub fn new(shell: RemoteShell, config: TransferConfig) -> Self {
        Self { shell, config }
    }

    pub fn strategy_for(&self, entry: &RemoteEntry) -> Strategy {
        self.config
            .mode
            .strategy_for(entry.size, self.config.large_file_threshold)
    }
}

#[async_trait]
impl TransferExecutor for ShellTransfer {
    async fn transfer(&self, entry: &RemoteEntry) -> Result<TransferOutcome> {
        match self.strategy_for(entry) {
            Strategy::Embedded => embedded::copy_remote(&self.shell, entry, &self.config).await,
            Strategy::External => {
                mirror::run_mirror(&self.config.rsync_path, &self.shell, entry).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_mode_threshold() {
        let mode = TransferMode::Auto;
        assert_eq!(mode.strategy_for(Some(0), 4096), Strategy::Embedded);
        assert_eq!(mode.strategy_for(Some(4095), 4096), Strategy::Embedded);
        assert_eq!(mode.strategy_for(Some(4096), 4096), Strategy::External);
        assert_eq!(mode.strategy_for(None, 4096), Strategy::External);
    }

    #[test]
    fn test_forced_modes_ignore_size() {
        assert_eq!(
            TransferMode::Embedded.strategy_for(Some(u64::MAX), 4096),
            Strategy::Embedded
        );
        assert_eq!(
            TransferMode::External.strategy_for(Some(1), 4096),
            Strategy::External
        );
    }

    #[tokio::test]
    async fn test_shell_transfer_embedded_local() {
        let dir = tempfile::tempdir().unwrap();
        let remote = dir.path().join("remote.txt");
        std::fs::write(&remote, b"payload").unwrap();

        let entry = RemoteEntry {
            relative_path: PathBuf::from("remote.txt"),
            remote_path: remote,
            local_path: dir.path().join("local.txt"),
            size: Some(7),
        };
        let config = TransferConfig {
            progress: false,
            ..TransferConfig::default()
        };
        let executor = ShellTransfer::new(RemoteShell::Local, config);

        let outcome = executor.transfer(&entry).await.unwrap();
        assert_eq!(
            outcome,
            TransferOutcome::Completed {
                strategy: Strategy::Embedded,
                bytes: Some(7)
            }
        );
        assert_eq!(std::fs::read(&entry.local_path).unwrap(), b"payload");
    }
}
