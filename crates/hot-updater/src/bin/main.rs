//! Command-line front end for the asset updater.
//!
//! Runs the full update sequence against a JSON configuration, or dumps the
//! contents of a manifest file.

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use hot_updater::{
    FsStorage, HttpFetcher, Manifest, Notice, NoticeChoice, StorageTier, Storage, UpdateHost,
    UpdateOrchestrator, UpdateOutcome, UpdaterConfig, UpdaterError,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

/// Command-line arguments for the updater
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the updater configuration (JSON)
    #[arg(short, long, default_value = "updater.json")]
    config: PathBuf,

    /// Override the configured platform tag
    #[arg(short, long)]
    platform: Option<String>,

    /// Accept every prompt without asking
    #[arg(short, long, default_value_t = false)]
    yes: bool,

    /// Treat the current network as a trusted local network
    #[arg(long, default_value_t = false)]
    lan: bool,

    /// HTTP request timeout in seconds
    #[arg(long, default_value_t = 60)]
    timeout: u64,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the version and entries of a manifest file
    Inspect {
        /// Manifest file to read
        #[arg(required = true)]
        manifest: PathBuf,
    },
}

/// Host that reports on the terminal and reads decisions from stdin.
struct ConsoleHost {
    assume_yes: bool,
    local_network: bool,
}

#[async_trait]
impl UpdateHost for ConsoleHost {
    fn progress(&self, fraction: f32, label: &str) {
        println!("[{:>5.1}%] {}", fraction * 100.0, label);
    }

    async fn notice(&self, notice: Notice) -> NoticeChoice {
        println!("{}", notice.message);
        let Some((action, label)) = notice.action else {
            return NoticeChoice::Exit;
        };
        if self.assume_yes {
            tracing::info!(?action, "accepting prompt");
            return NoticeChoice::Action;
        }

        print!("{label} [y] / {} [n]: ", notice.exit_label);
        let _ = io::stdout().flush();
        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line).map(|_| line)
        })
        .await;

        match answer {
            Ok(Ok(line)) if line.trim().eq_ignore_ascii_case("y") => NoticeChoice::Action,
            _ => NoticeChoice::Exit,
        }
    }

    fn is_local_network(&self) -> bool {
        self.local_network
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if args.debug {
            EnvFilter::new("debug,hot_updater=debug")
        } else {
            EnvFilter::new("info,hot_updater=info")
        }
    });
    fmt().with_env_filter(filter).init();

    if let Some(Commands::Inspect { manifest }) = &args.command {
        inspect(manifest)?;
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = UpdaterConfig::from_json_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(platform) = args.platform.clone() {
        config.platform = platform;
    }

    let fetcher = HttpFetcher::builder()
        .timeout(Duration::from_secs(args.timeout))
        .build()?;
    let host = ConsoleHost {
        assume_yes: args.yes,
        local_network: args.lan,
    };

    tracing::info!(platform = %config.platform, "starting update");
    let mut orchestrator = UpdateOrchestrator::new(fetcher, FsStorage, host, config);
    match orchestrator.drive().await {
        Ok(UpdateOutcome::Complete) => {
            tracing::info!(version = %orchestrator.local_version_string(), "content up to date");
            Ok(ExitCode::SUCCESS)
        }
        Ok(outcome) => {
            tracing::warn!(?outcome, "update did not complete");
            Ok(ExitCode::from(2))
        }
        Err(err @ UpdaterError::ConfigUnavailable(_)) => {
            tracing::error!(error = %err, "cannot continue without update configuration");
            Ok(ExitCode::from(3))
        }
        Err(err) => Err(err.into()),
    }
}

fn inspect(path: &Path) -> anyhow::Result<()> {
    let raw = FsStorage
        .read_file(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let manifest = Manifest::from_bytes(&raw, StorageTier::Persistent)?;

    let mut entries: Vec<_> = manifest.entries().collect();
    entries.sort_by_key(|entry| entry.hash);

    println!("version {} ({} entries)", manifest.version(), entries.len());
    for entry in entries {
        println!(
            "{:016x} {:?} crc={:08x} size={} {}",
            entry.hash,
            entry.mode,
            entry.checksum,
            entry.size,
            entry.filename()
        );
    }
    Ok(())
}
