use crate::config::{default_history_path, default_sync_file, expand_tilde};
use crate::transfer::{
    TransferMode, DEFAULT_BUFFER_SIZE, DEFAULT_LARGE_FILE_THRESHOLD, DEFAULT_RSYNC_PATH,
};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "grab-once")]
#[command(about = "Retrieve files from a remote host, but only once", long_about = None)]
#[command(version)]
#[command(after_help = "EXAMPLES:
    # Fetch everything new from the host alias 'nas'
    grab-once nas

    # Decide file by file (y = download, n = not now, s = skip forever)
    grab-once nas --interactive

    # See what has already been fetched
    grab-once nas --list-history

NOTES:
    Only one grab-once process may use a history store at a time.")]
pub struct Cli {
    /// Remote host to synchronize with (alias in the sync file and for ssh)
    pub host: String,

    /// Synchronization configuration file [default: ~/.grab-once/sync.json]
    #[arg(long, value_name = "FILE")]
    pub sync_file: Option<PathBuf>,

    /// Transfer history store [default: ~/.grab-once/history]
    #[arg(long, value_name = "PATH")]
    pub history: Option<PathBuf>,

    /// OpenSSH style config file passed to ssh
    #[arg(long, value_name = "FILE", default_value = "~/.ssh/config")]
    pub ssh_config: PathBuf,

    /// User to authenticate as (default: whatever ssh would use)
    #[arg(long, value_name = "USER")]
    pub remote_user: Option<String>,

    /// SSH port (default: whatever ssh would use)
    #[arg(long)]
    pub port: Option<u16>,

    /// Prompt for each file before downloading
    #[arg(short, long)]
    pub interactive: bool,

    /// Show what would be downloaded without transferring or recording anything
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Path to the rsync executable used for large files
    #[arg(long = "with-rsync", value_name = "PATH", default_value = DEFAULT_RSYNC_PATH)]
    pub rsync: PathBuf,

    /// Number of bytes to read at a time from the remote host
    #[arg(long, default_value_t = DEFAULT_BUFFER_SIZE, value_parser = parse_buffer_size)]
    pub buffer_size: usize,

    /// Files this size or larger are handed to rsync (auto mode)
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_LARGE_FILE_THRESHOLD)]
    pub large_file_threshold: u64,

    /// How to choose between in-process copy and rsync
    #[arg(long, value_enum, default_value_t = TransferMode::Auto)]
    pub transfer_mode: TransferMode,

    /// List the recorded transfer history for the host and exit
    #[arg(long)]
    pub list_history: bool,

    /// Disable the progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Run remote commands with the local shell instead of ssh
    #[arg(long, hide = true)]
    pub local_shell: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (only show warnings and errors)
    #[arg(short, long)]
    pub quiet: bool,
}

fn parse_buffer_size(s: &str) -> Result<usize, String> {
    let size: usize = s.parse().map_err(|e| format!("invalid size: {}", e))?;
    if size == 0 {
        return Err("buffer size must be greater than zero".to_string());
    }
    Ok(size)
}

impl Cli {
    pub fn sync_file_path(&self) -> PathBuf {
        self.sync_file
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(default_sync_file)
    }

    pub fn history_path(&self) -> PathBuf {
        self.history
            .as_deref()
            .map(expand_tilde)
            .unwrap_or_else(default_history_path)
    }

    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            return tracing::Level::WARN;
        }

        match self.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["grab-once", "nas"]).unwrap();
        assert_eq!(cli.host, "nas");
        assert!(!cli.interactive);
        assert_eq!(cli.buffer_size, 65536);
        assert_eq!(cli.large_file_threshold, 4096);
        assert_eq!(cli.transfer_mode, TransferMode::Auto);
        assert_eq!(cli.rsync, PathBuf::from("/usr/bin/rsync"));
        assert_eq!(cli.log_level(), tracing::Level::INFO);
        assert!(cli.history_path().ends_with(".grab-once/history"));
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "grab-once",
            "nas",
            "-i",
            "--with-rsync",
            "/opt/bin/rsync",
            "--buffer-size",
            "1024",
            "--transfer-mode",
            "external",
            "--history",
            "/tmp/h",
            "-vv",
        ])
        .unwrap();
        assert!(cli.interactive);
        assert_eq!(cli.rsync, PathBuf::from("/opt/bin/rsync"));
        assert_eq!(cli.buffer_size, 1024);
        assert_eq!(cli.transfer_mode, TransferMode::External);
        assert_eq!(cli.history_path(), PathBuf::from("/tmp/h"));
        assert_eq!(cli.log_level(), tracing::Level::TRACE);
    }

    #[test]
    fn test_zero_buffer_rejected() {
        assert!(Cli::try_parse_from(["grab-once", "nas", "--buffer-size", "0"]).is_err());
    }

    #[test]
    fn test_host_required() {
        assert!(Cli::try_parse_from(["grab-once"]).is_err());
    }

    #[test]
    fn test_quiet_wins() {
        let cli = Cli::try_parse_from(["grab-once", "nas", "-q", "-v"]).unwrap();
        assert_eq!(cli.log_level(), tracing::Level::WARN);
    }
}
