//! Per-file download policy.

use super::RemoteEntry;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout,
};

/// What to do with a file that is not in the history yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Download and record
    Download,
    /// Neither download nor record; asked again next run
    Defer,
    /// Record without downloading; never asked again
    SkipForever,
}

impl Decision {
    pub fn download(self) -> bool {
        matches!(self, Decision::Download)
    }

    pub fn record(self) -> bool {
        matches!(self, Decision::Download | Decision::SkipForever)
    }
}

#[async_trait]
pub trait Prompter: Send {
    async fn decide(&mut self, entry: &RemoteEntry) -> Result<Decision>;

    /// Whether `decide` itself shows the user which file is being asked about.
    fn shows_entry(&self) -> bool {
        false
    }
}

/// Non-interactive policy: download everything.
pub struct AcceptAll;

#[async_trait]
impl Prompter for AcceptAll {
    async fn decide(&mut self, _entry: &RemoteEntry) -> Result<Decision> {
        Ok(Decision::Download)
    }
}

const PROMPT: &str = "Download? [Y,n,s]:";

/// Interpret one line of user input.
///
/// Empty input takes the default (download). Only single characters are
/// accepted so a typo can't turn into a permanent skip.
pub fn parse_response(input: &str) -> Option<Decision> {
    let mut chars = input.chars();
    match (chars.next(), chars.next()) {
        (None, _) => Some(Decision::Download),
        (Some(c), None) => match c.to_ascii_lowercase() {
            'y' => Some(Decision::Download),
            'n' => Some(Decision::Defer),
            's' => Some(Decision::SkipForever),
            _ => None,
        },
        _ => None,
    }
}

/// Asks the user about every candidate file.
pub struct InteractivePrompter<R, W> {
    input: R,
    output: W,
}

impl<R, W> InteractivePrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }
}

impl InteractivePrompter<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

#[async_trait]
impl<R, W> Prompter for InteractivePrompter<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn decide(&mut self, entry: &RemoteEntry) -> Result<Decision> {
        let header = format!(
            "{} -> {}\n",
            entry.remote_path.display(),
            entry.local_path.display()
        );
        self.output.write_all(header.as_bytes()).await?;

        loop {
            self.output.write_all(PROMPT.as_bytes()).await?;
            self.output.flush().await?;

            let mut line = String::new();
            if self.input.read_line(&mut line).await? == 0 {
                return Err(SyncError::Prompt(
                    "input closed before a response was given".to_string(),
                ));
            }

            match parse_response(line.trim_end_matches(&['\r', '\n'][..])) {
                Some(decision) => return Ok(decision),
                None => tracing::debug!("Unrecognized response {:?}, asking again", line),
            }
        }
    }

    fn shows_entry(&self) -> bool {
        true
    }
}
