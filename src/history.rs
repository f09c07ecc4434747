//! Persistent transfer history.
//!
//! Records every (host, remote path) pair that has been fetched, or that the
//! user asked to skip forever. Records are never removed by normal operation.
//!
//! Backed by a fjall keyspace: one partition, key `host \0 path`, value the
//! RFC 3339 time the record was written. Each insert is persisted with
//! `SyncAll` before returning.
//!
//! # Concurrency
//!
//! A store is meant to be used by one process at a time. `open` takes an
//! exclusive advisory lock on `<store>.lock` and fails with
//! [`SyncError::HistoryLocked`] if another run holds it.

use crate::error::{Result, SyncError};
use crate::remote::{os_bytes, os_from_bytes};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const PARTITION_NAME: &str = "transfers";
const KEY_SEPARATOR: u8 = 0;

/// Handle to the on-disk history store.
pub struct TransferHistory {
    path: PathBuf,
    keyspace: Keyspace,
    records: PartitionHandle,
    // Held for the lifetime of the handle; dropping releases the lock
    _lock: File,
}

impl TransferHistory {
    /// Open (or create) the store at `path`.
    ///
    /// The parent directory must already exist. Any failure names the store
    /// location; callers must treat it as fatal rather than continuing
    /// without history.
    pub fn open(path: &Path) -> Result<Self> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.is_dir() {
            return Err(SyncError::history(
                path,
                format!("parent directory {} does not exist", parent.display()),
            ));
        }

        let lock_file = lock_path(path);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_file)
            .map_err(|e| SyncError::history(path, format!("can't open lock file: {}", e)))?;
        if lock.try_lock_exclusive().is_err() {
            return Err(SyncError::HistoryLocked {
                path: path.to_path_buf(),
            });
        }

        fs::create_dir_all(path).map_err(|e| SyncError::history(path, e))?;

        let keyspace = Config::new(path)
            .open()
            .map_err(|e| SyncError::history(path, e))?;
        let records = keyspace
            .open_partition(PARTITION_NAME, PartitionCreateOptions::default())
            .map_err(|e| SyncError::history(path, e))?;

        tracing::debug!("Opened transfer history at {}", path.display());

        Ok(Self {
            path: path.to_path_buf(),
            keyspace,
            records,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        lock_path(&self.path)
    }

    /// Bind the store to one host for the rest of the run.
    pub fn bind(self, host: &str) -> HostHistory {
        HostHistory {
            history: self,
            host: host.to_string(),
        }
    }
}

/// `<store>.lock`, next to the store directory.
fn lock_path(store: &Path) -> PathBuf {
    let mut name = store.as_os_str().to_os_string();
    name.push(".lock");
    PathBuf::from(name)
}

/// A recorded path with the time it was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub path: PathBuf,
    pub recorded_at: String,
}

/// History access pre-bound to a single host.
pub struct HostHistory {
    history: TransferHistory,
    host: String,
}

impl HostHistory {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn store_path(&self) -> &Path {
        self.history.path()
    }

    /// Host bytes, separator, then the raw path bytes.
    fn key(&self, path: &Path) -> Vec<u8> {
        let mut key = self.prefix();
        key.extend_from_slice(&os_bytes(path.as_os_str()));
        key
    }

    fn prefix(&self) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(self.host.len() + 1);
        prefix.extend_from_slice(self.host.as_bytes());
        prefix.push(KEY_SEPARATOR);
        prefix
    }

    /// True iff `path` has been recorded for this host.
    pub fn exists(&self, path: &Path) -> Result<bool> {
        let key = self.key(path);
        self.history
            .records
            .contains_key(key)
            .map_err(|e| SyncError::history(&self.history.path, e))
    }

    /// Record `path` for this host and persist it before returning.
    ///
    /// Recording an existing pair is a no-op. Returns whether a new record
    /// was written.
    pub fn record(&self, path: &Path) -> Result<bool> {
        if self.exists(path)? {
            return Ok(false);
        }

        let key = self.key(path);
        let recorded_at = chrono::Utc::now().to_rfc3339();
        let store = &self.history.path;

        self.history
            .records
            .insert(key, recorded_at.as_bytes())
            .map_err(|e| SyncError::history(store, e))?;
        self.history
            .keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|e| SyncError::history(store, e))?;

        Ok(true)
    }

    /// Every recorded path for this host, in key order.
    ///
    /// The iterator is consumed once; to enumerate again, reopen the store.
    pub fn list_all(&self) -> impl Iterator<Item = Result<HistoryEntry>> + '_ {
        let prefix_len = self.host.len() + 1;
        let store = &self.history.path;

        self.history.records.prefix(self.prefix()).map(move |item| {
            let (key, value) = item.map_err(|e| SyncError::history(store, e))?;
            let key: &[u8] = &key;
            Ok(HistoryEntry {
                path: PathBuf::from(os_from_bytes(key[prefix_len..].to_vec())),
                recorded_at: String::from_utf8_lossy(&value).into_owned(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_in(dir: &TempDir, host: &str) -> HostHistory {
        TransferHistory::open(&dir.path().join("history"))
            .unwrap()
            .bind(host)
    }

    #[test]
    fn test_record_and_exists() {
        let dir = TempDir::new().unwrap();
        let history = open_in(&dir, "host1");

        let path = Path::new("/srv/a/b.txt");
        assert!(!history.exists(path).unwrap());
        assert!(history.record(path).unwrap());
        assert!(history.exists(path).unwrap());
    }

    #[test]
    fn test_record_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let history = open_in(&dir, "host1");

        let path = Path::new("/srv/a/b.txt");
        assert!(history.record(path).unwrap());
        assert!(!history.record(path).unwrap());
        assert_eq!(history.list_all().count(), 1);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let history = open_in(&dir, "host1");
            history.record(Path::new("/srv/a/b.txt")).unwrap();
        }

        let history = open_in(&dir, "host1");
        assert!(history.exists(Path::new("/srv/a/b.txt")).unwrap());
    }

    #[test]
    fn test_hosts_are_isolated() {
        let dir = TempDir::new().unwrap();
        {
            let history = open_in(&dir, "host1");
            history.record(Path::new("/srv/shared.txt")).unwrap();
        }

        let other = open_in(&dir, "host10");
        assert!(!other.exists(Path::new("/srv/shared.txt")).unwrap());
        assert_eq!(other.list_all().count(), 0);
    }

    #[test]
    fn test_list_all_for_host() {
        let dir = TempDir::new().unwrap();
        let history = open_in(&dir, "host1");

        history.record(Path::new("/srv/b")).unwrap();
        history.record(Path::new("/srv/a")).unwrap();

        let mut paths: Vec<PathBuf> = history
            .list_all()
            .map(|entry| entry.unwrap().path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec![PathBuf::from("/srv/a"), PathBuf::from("/srv/b")]);

        let entry = history.list_all().next().unwrap().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&entry.recorded_at).is_ok());
    }

    #[test]
    fn test_missing_parent_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("missing").join("history");

        match TransferHistory::open(&path) {
            Err(SyncError::History { path: p, .. }) => assert_eq!(p, path),
            other => panic!("expected history error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_second_open_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history");

        let _first = TransferHistory::open(&path).unwrap();
        assert!(matches!(
            TransferHistory::open(&path),
            Err(SyncError::HistoryLocked { .. })
        ));
    }

    #[test]
    fn test_lock_file_is_per_store() {
        let dir = TempDir::new().unwrap();

        let first = TransferHistory::open(&dir.path().join("h.a")).unwrap();
        let second = TransferHistory::open(&dir.path().join("h.b")).unwrap();
        assert_ne!(first.lock_path(), second.lock_path());
        assert_eq!(first.lock_path(), dir.path().join("h.a.lock"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_paths_are_distinct() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        let history = open_in(&dir, "host1");

        let latin1 = Path::new(OsStr::from_bytes(b"/srv/caf\xe9.txt"));
        let other = Path::new(OsStr::from_bytes(b"/srv/caf\xff.txt"));

        assert!(history.record(latin1).unwrap());
        assert!(history.exists(latin1).unwrap());
        assert!(!history.exists(other).unwrap());
        assert!(history.record(other).unwrap());

        let mut paths: Vec<PathBuf> = history
            .list_all()
            .map(|entry| entry.unwrap().path)
            .collect();
        paths.sort();
        assert_eq!(paths, vec![latin1.to_path_buf(), other.to_path_buf()]);
    }
}
