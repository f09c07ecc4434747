use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use grab_once::cli::Cli;
use grab_once::config::{expand_tilde, load_target};
use grab_once::remote::{FindLister, RemoteShell, SshOptions};
use grab_once::sync::{AcceptAll, InteractivePrompter, Prompter};
use grab_once::transfer::{ShellTransfer, TransferConfig};
use grab_once::{SyncEngine, SyncError, SyncOptions, SyncSummary, TransferHistory};
use std::io::IsTerminal;
use std::path::Path;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Usage errors exit 1; --help and --version exit 0
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    init_tracing(cli.log_level());

    if let Err(err) = run(cli).await {
        eprintln!("{} {:#}", "error:".red().bold(), err);
        let code = err
            .downcast_ref::<SyncError>()
            .map(SyncError::exit_code)
            .unwrap_or(2);
        std::process::exit(code);
    }
}

fn init_tracing(level: tracing::Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let history_path = cli.history_path();

    if cli.list_history {
        return list_history(&history_path, &cli.host, cli.verbose > 0);
    }

    // Configuration and the history store are checked before any remote
    // command runs
    let target = load_target(&cli.sync_file_path(), &cli.host)?;
    let history = TransferHistory::open(&history_path)?.bind(&cli.host);

    let shell = if cli.local_shell {
        RemoteShell::Local
    } else {
        RemoteShell::Ssh(SshOptions {
            user: cli.remote_user.clone(),
            port: cli.port,
            config_file: Some(expand_tilde(&cli.ssh_config)),
            ..SshOptions::new(cli.host.clone())
        })
    };

    let transfer_config = TransferConfig {
        buffer_size: cli.buffer_size,
        large_file_threshold: cli.large_file_threshold,
        mode: cli.transfer_mode,
        rsync_path: cli.rsync.clone(),
        progress: !cli.no_progress && !cli.quiet && std::io::stderr().is_terminal(),
    };

    let lister = FindLister::new(shell.clone());
    let executor = ShellTransfer::new(shell, transfer_config);
    let options = SyncOptions {
        dry_run: cli.dry_run,
    };
    let engine = SyncEngine::new(&target, &history, &lister, &executor, options);

    let mut prompter: Box<dyn Prompter> = if cli.interactive && !cli.dry_run {
        Box::new(InteractivePrompter::stdio())
    } else {
        Box::new(AcceptAll)
    };

    let summary = engine
        .run(prompter.as_mut())
        .await
        .with_context(|| format!("Sync with {} aborted", cli.host))?;

    if !cli.quiet {
        print_summary(&summary, cli.dry_run);
    }

    Ok(())
}

fn list_history(path: &Path, host: &str, with_times: bool) -> Result<()> {
    let history = TransferHistory::open(path)?.bind(host);

    for entry in history.list_all() {
        let entry = entry?;
        if with_times {
            println!("{}\t{}", entry.recorded_at, entry.path.display());
        } else {
            println!("{}", entry.path.display());
        }
    }

    Ok(())
}

fn print_summary(summary: &SyncSummary, dry_run: bool) {
    println!();
    if dry_run {
        println!("{}", "Dry run complete (nothing transferred)".bold());
        println!(
            "  Would download:      {}",
            summary.would_download.to_string().green()
        );
    } else {
        println!("{}", "Sync complete".bold());
        println!(
            "  Downloaded:          {}",
            summary.downloaded.to_string().green()
        );
        if summary.bytes_copied > 0 {
            println!(
                "  Copied in-process:   {}",
                indicatif::HumanBytes(summary.bytes_copied)
            );
        }
        if summary.conflicts > 0 {
            println!(
                "  Already present:     {}",
                summary.conflicts.to_string().yellow()
            );
        }
        if summary.permanently_skipped > 0 {
            println!("  Skipped forever:     {}", summary.permanently_skipped);
        }
        if summary.deferred > 0 {
            println!("  Deferred:            {}", summary.deferred);
        }
    }
    println!("  Already synced:      {}", summary.already_synced);
    println!("  Remote files:        {}", summary.files_listed);
    println!(
        "  Duration:            {:.2}s",
        summary.duration.as_secs_f64()
    );

    if summary.failed > 0 {
        println!(
            "  Failed:              {} (will retry next run)",
            summary.failed.to_string().red()
        );
        for (path, reason) in &summary.failures {
            println!("    {} {}: {}", "✗".red(), path.display(), reason);
        }
    }
}
