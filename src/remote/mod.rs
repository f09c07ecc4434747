//! Remote command channel.
//!
//! Everything that touches the remote host goes through a single command
//! string run either over `ssh` or, for locally mounted trees and tests,
//! through the local `sh`. Authentication is left entirely to ssh.

pub mod lister;

pub use lister::{FindLister, ListedFile, RemoteLister};

use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Connection settings handed to the `ssh` client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshOptions {
    /// Host alias or hostname; resolved by ssh against its own config
    pub host: String,
    pub user: Option<String>,
    pub port: Option<u16>,
    /// OpenSSH config file, passed as `-F` when it exists
    pub config_file: Option<PathBuf>,
    /// ssh client program
    pub program: String,
}

impl SshOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            config_file: None,
            program: "ssh".to_string(),
        }
    }

    /// Client options, excluding the destination.
    fn client_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(user) = &self.user {
            args.push("-l".to_string());
            args.push(user.clone());
        }

        args.extend(self.connection_args());
        args
    }

    /// Config file and port options; the user is left out.
    fn connection_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(config) = self.config_file.as_ref().filter(|p| p.exists()) {
            args.push("-F".to_string());
            args.push(config.to_string_lossy().into_owned());
        }

        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }

        args
    }

    /// `[user@]host`
    fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

/// Where remote commands run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteShell {
    Ssh(SshOptions),
    /// Run "remote" commands with the local `sh`
    Local,
}

impl RemoteShell {
    /// Build a command that runs `remote_cmd` on the remote side.
    ///
    /// `remote_cmd` is interpreted by a shell, so every path in it must be
    /// passed through [`shell_quote`].
    pub fn command(&self, remote_cmd: impl AsRef<OsStr>) -> Command {
        let remote_cmd = remote_cmd.as_ref();
        let mut cmd = match self {
            RemoteShell::Ssh(opts) => {
                let mut cmd = Command::new(&opts.program);
                cmd.args(opts.client_args());
                cmd.arg(&opts.host);
                cmd.arg(remote_cmd);
                cmd
            }
            RemoteShell::Local => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(remote_cmd);
                cmd
            }
        };

        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);
        cmd
    }

    /// Program name used in diagnostics.
    pub fn program(&self) -> &str {
        match self {
            RemoteShell::Ssh(opts) => &opts.program,
            RemoteShell::Local => "sh",
        }
    }

    /// Source argument for rsync: `[user@]host:path`, or the bare path
    /// when running locally.
    pub fn rsync_source(&self, remote_path: &Path) -> OsString {
        match self {
            RemoteShell::Ssh(opts) => {
                let mut spec = OsString::from(format!("{}:", opts.destination()));
                spec.push(remote_path.as_os_str());
                spec
            }
            RemoteShell::Local => remote_path.as_os_str().to_os_string(),
        }
    }

    /// Value for rsync's `-e`, needed only when ssh runs with non-default
    /// options. The user travels in the source spec instead.
    pub fn rsync_remote_shell(&self) -> Option<OsString> {
        let RemoteShell::Ssh(opts) = self else {
            return None;
        };

        let args = opts.connection_args();

        if args.is_empty() && opts.program == "ssh" {
            return None;
        }

        let mut shell = shell_quote(&opts.program);
        for arg in args {
            shell.push(" ");
            shell.push(shell_quote(&arg));
        }
        Some(shell)
    }
}

/// Quote `s` as a single POSIX shell word.
///
/// Works on raw bytes, so names that are not valid UTF-8 reach the remote
/// shell unchanged.
pub fn shell_quote(s: impl AsRef<OsStr>) -> OsString {
    let raw = os_bytes(s.as_ref());
    let mut quoted = Vec::with_capacity(raw.len() + 2);
    quoted.push(b'\'');
    for &b in raw.iter() {
        if b == b'\'' {
            quoted.extend_from_slice(b"'\\''");
        } else {
            quoted.push(b);
        }
    }
    quoted.push(b'\'');
    os_from_bytes(quoted)
}

#[cfg(unix)]
pub(crate) fn os_bytes(s: &OsStr) -> Cow<'_, [u8]> {
    use std::os::unix::ffi::OsStrExt;
    Cow::Borrowed(s.as_bytes())
}

#[cfg(not(unix))]
pub(crate) fn os_bytes(s: &OsStr) -> Cow<'_, [u8]> {
    match s.to_string_lossy() {
        Cow::Borrowed(s) => Cow::Borrowed(s.as_bytes()),
        Cow::Owned(s) => Cow::Owned(s.into_bytes()),
    }
}

#[cfg(unix)]
pub(crate) fn os_from_bytes(bytes: Vec<u8>) -> OsString {
    use std::os::unix::ffi::OsStringExt;
    OsString::from_vec(bytes)
}

#[cfg(not(unix))]
pub(crate) fn os_from_bytes(bytes: Vec<u8>) -> OsString {
    OsString::from(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ssh_command_args() {
        let opts = SshOptions {
            user: Some("alice".into()),
            port: Some(2222),
            ..SshOptions::new("nas")
        };
        let cmd = RemoteShell::Ssh(opts).command("true");
        let args: Vec<_> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, vec!["-l", "alice", "-p", "2222", "nas", "true"]);
    }

    #[test]
    fn test_missing_config_file_not_passed() {
        let opts = SshOptions {
            config_file: Some(PathBuf::from("/nonexistent/ssh_config")),
            ..SshOptions::new("nas")
        };
        assert!(!opts.client_args().contains(&"-F".to_string()));
    }

    #[test]
    fn test_rsync_source() {
        let opts = SshOptions {
            user: Some("alice".into()),
            ..SshOptions::new("nas")
        };
        let shell = RemoteShell::Ssh(opts);
        assert_eq!(
            shell.rsync_source(Path::new("/srv/a b.bin")),
            OsString::from("alice@nas:/srv/a b.bin")
        );
        assert_eq!(
            RemoteShell::Local.rsync_source(Path::new("/srv/a.bin")),
            OsString::from("/srv/a.bin")
        );
    }

    #[test]
    fn test_rsync_remote_shell() {
        let plain = RemoteShell::Ssh(SshOptions {
            user: Some("alice".into()),
            ..SshOptions::new("nas")
        });
        assert_eq!(plain.rsync_remote_shell(), None);

        let with_port = RemoteShell::Ssh(SshOptions {
            user: Some("alice".into()),
            port: Some(2222),
            ..SshOptions::new("nas")
        });
        assert_eq!(
            with_port.rsync_remote_shell(),
            Some(OsString::from("'ssh' '-p' '2222'"))
        );
        assert_eq!(RemoteShell::Local.rsync_remote_shell(), None);
    }

    #[tokio::test]
    async fn test_shell_quote_survives_sh() {
        for raw in ["plain", "with space", "it's", "$HOME `x`", "new\nline", "\\back"] {
            let mut remote_cmd = OsString::from("printf %s ");
            remote_cmd.push(shell_quote(raw));
            let out = RemoteShell::Local.command(remote_cmd).output().await.unwrap();
            assert!(out.status.success());
            assert_eq!(String::from_utf8(out.stdout).unwrap(), raw);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_quote_keeps_non_utf8_bytes() {
        use std::os::unix::ffi::OsStrExt;

        for raw in [&b"caf\xe9.txt"[..], &b"caf\xff's.txt"[..]] {
            let mut remote_cmd = OsString::from("printf %s ");
            remote_cmd.push(shell_quote(OsStr::from_bytes(raw)));
            let out = RemoteShell::Local.command(remote_cmd).output().await.unwrap();
            assert!(out.status.success());
            assert_eq!(out.stdout, raw);
        }
    }

    proptest! {
        #[test]
        fn prop_shell_quote_is_single_word(s in "\\PC*") {
            let quoted = shell_quote(&s).into_string().unwrap();
            prop_assert!(quoted.starts_with('\''));
            prop_assert!(quoted.ends_with('\''));
            // Every embedded quote is closed, escaped and reopened
            let inner = &quoted[1..quoted.len() - 1];
            prop_assert_eq!(inner.replace("'\\''", "").contains('\''), false);
        }
    }
}
