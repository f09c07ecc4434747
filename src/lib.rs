//! Fetch files from a remote host exactly once.
//!
//! A run lists every regular file under the host's remote root, drops the
//! ones the persistent [`history`] already knows, and downloads the rest one
//! by one, recording each after it lands. Running again against an unchanged
//! remote downloads nothing.

pub mod cli;
pub mod config;
pub mod error;
pub mod history;
pub mod remote;
pub mod sync;
pub mod transfer;

pub use config::SyncTarget;
pub use error::{Result, SyncError};
pub use history::{HistoryEntry, HostHistory, TransferHistory};
pub use sync::{SyncEngine, SyncOptions, SyncSummary};
