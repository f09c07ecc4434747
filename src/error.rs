use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transfer history store {}: {message}", .path.display())]
    History { path: PathBuf, message: String },

    #[error(
        "Transfer history store {} is in use by another grab-once process\n\
         Only one run may use a history store at a time",
        .path.display()
    )]
    HistoryLocked { path: PathBuf },

    #[error("Failed to list remote files under {}: {message}", .root.display())]
    Listing { root: PathBuf, message: String },

    #[error("Failed to start {program}: {source}")]
    ToolSpawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Interactive prompt failed: {0}")]
    Prompt(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl SyncError {
    pub(crate) fn history(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        SyncError::History {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub(crate) fn listing(root: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        SyncError::Listing {
            root: root.into(),
            message: message.into(),
        }
    }

    /// Process exit status for a fatal error.
    ///
    /// Problems detectable before any remote interaction (configuration, an
    /// unusable history store) exit with 1; everything else exits with 2.
    pub fn exit_code(&self) -> i32 {
        match self {
            SyncError::Config(_) | SyncError::History { .. } | SyncError::HistoryLocked { .. } => 1,
            _ => 2,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
