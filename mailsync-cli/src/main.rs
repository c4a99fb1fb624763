//! # mailsync
//!
//! CLI to reconcile an IMAP folder with local message directories.
//!
//! ```bash
//! # show what differs, without transferring anything
//! mailsync --host imap.example.org --login alice --dir ~/mail
//!
//! # download and upload missing messages
//! MAILSYNC_PASSWORD=secret mailsync --config mailsync.toml --mode sync
//! ```

mod config;

use std::{error::Error, path::PathBuf, process::ExitCode};

use clap::Parser;
use mailsync::{
    config::{SyncDirection, SyncMode},
    imap::ImapSessionBuilder,
    sync::{SyncBuilder, SyncReport},
    transfer::TransferReport,
    CancellationToken,
};
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{FileConfig, Overrides};

/// Reconcile an IMAP folder with local message directories, using
/// the Message-ID header as key.
#[derive(Parser, Debug)]
#[command(name = "mailsync", version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(long, short, env = "MAILSYNC_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// The sync mode: dry, dry-sync or sync.
    #[arg(long, short, value_name = "MODE")]
    mode: Option<SyncMode>,

    /// The sync direction: download, upload or both.
    #[arg(long, value_name = "DIRECTION")]
    direction: Option<SyncDirection>,

    /// The IMAP server host name.
    #[arg(long, env = "MAILSYNC_HOST")]
    host: Option<String>,

    /// The IMAP server port.
    #[arg(long, env = "MAILSYNC_PORT")]
    port: Option<u16>,

    /// The IMAP login.
    #[arg(long, short, env = "MAILSYNC_LOGIN")]
    login: Option<String>,

    /// The IMAP password.
    #[arg(long, env = "MAILSYNC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// The remote folder to reconcile.
    #[arg(long, short, value_name = "NAME")]
    folder: Option<String>,

    /// A local directory to reconcile. Can be repeated.
    #[arg(long = "dir", short, value_name = "PATH")]
    dirs: Vec<PathBuf>,

    /// The directory receiving downloaded messages.
    #[arg(long, value_name = "PATH")]
    download_dir: Option<PathBuf>,

    /// The maximum number of remote messages to consider.
    #[arg(long)]
    limit: Option<usize>,

    /// The number of IMAP sessions used in parallel.
    #[arg(long, value_name = "N")]
    remote_threads: Option<usize>,

    /// The number of threads used to read local files.
    #[arg(long, value_name = "N")]
    local_threads: Option<usize>,

    /// Path to the identifier cache file.
    #[arg(long, value_name = "PATH")]
    cache: Option<PathBuf>,

    /// Enable debug logs.
    #[arg(long, global = true, conflicts_with = "trace")]
    debug: bool,

    /// Enable trace logs.
    #[arg(long, global = true)]
    trace: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            login: self.login.clone(),
            password: self.password.clone(),
            folder: self.folder.clone(),
            dirs: self.dirs.clone(),
            download_dir: self.download_dir.clone(),
            limit: self.limit,
            remote_pool_size: self.remote_threads,
            local_pool_size: self.local_threads,
            mode: self.mode,
            direction: self.direction,
            cache_path: self.cache.clone(),
        }
    }
}

fn init_logger(cli: &Cli) {
    let filter = if cli.trace {
        EnvFilter::new("mailsync=trace")
    } else if cli.debug {
        EnvFilter::new("mailsync=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(&cli);

    match run(cli).await {
        Ok(report) if report.failures() == 0 => ExitCode::SUCCESS,
        Ok(report) => {
            warn!(failures = report.failures(), "some messages could not be transferred");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("{}", error_chain(err.as_ref()));
            debug!("{err:?}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<SyncReport, Box<dyn Error>> {
    let file_config = match cli.config.clone() {
        Some(path) => FileConfig::from_path(path)?,
        None => FileConfig::default(),
    };

    let (imap_config, sync_config) = file_config.merge(cli.overrides())?;

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, stopping sync");
                cancel.cancel();
            }
        }
    });

    let report = SyncBuilder::new(ImapSessionBuilder::new(imap_config), sync_config)
        .with_cancellation_token(cancel)
        .sync()
        .await?;

    print_report(&report);
    Ok(report)
}

fn print_report(report: &SyncReport) {
    let local = &report.local;
    let remote = &report.remote;

    println!(
        "Local: {} files, {} read, {} invalid, {} corrupted, {} duplicated",
        local.files, local.files_read, local.invalid, local.corrupted, local.repeated,
    );
    println!(
        "Remote: {} messages, {} invalid, {} duplicated",
        remote.refs, remote.invalid, remote.repeated,
    );

    let plan = &report.plan;
    println!(
        "Plan: {} to download, {} to upload, {} in common",
        plan.only_remote.len(),
        plan.only_local.len(),
        plan.common.len(),
    );

    if let Some(download) = &report.download {
        print_transfer_report("Downloaded", download);
    }

    if let Some(upload) = &report.upload {
        print_transfer_report("Uploaded", upload);
    }
}

fn print_transfer_report(title: &str, report: &TransferReport) {
    println!(
        "{title}: {} messages, {} failed",
        report.transferred.len(),
        report.failed.len(),
    );

    for (id, err) in &report.failed {
        println!("  {id}: {}", error_chain(err));
    }
}

/// Join the error with all its sources.
fn error_chain(err: &dyn Error) -> String {
    let mut chain = err.to_string();
    let mut source = err.source();

    while let Some(err) = source {
        chain.push_str(": ");
        chain.push_str(&err.to_string());
        source = err.source();
    }

    chain
}
