use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use sdkvm::config::{EngineConfig, config_path};
use sdkvm::engine::{
    CandidateEngine, CandidateFilter, InstallOptions, InstallOutcome, VersionFilter,
};
use sdkvm::notify::EventKind;
use sdkvm::version::resolver::VersionToken;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "sdkvm")]
#[command(version, about = "Install, remove and switch SDK versions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List known candidates
    Candidates {
        #[arg(long)]
        installed: bool,
        #[arg(long)]
        filter: Option<String>,
    },
    /// List versions of a candidate
    Versions {
        candidate: String,
        #[arg(long)]
        installed: bool,
        #[arg(long)]
        downloaded: bool,
        #[arg(long)]
        default_only: bool,
        #[arg(long)]
        filter: Option<String>,
    },
    /// Install a version ("latest" when omitted)
    Install {
        candidate: String,
        version: Option<String>,
    },
    Uninstall {
        candidate: String,
        version: String,
    },
    /// Show, set or clear the default version
    Default {
        candidate: String,
        version: Option<String>,
        #[arg(long, conflicts_with = "version")]
        clear: bool,
    },
    /// Refresh the remote catalog
    Refresh { candidate: Option<String> },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_file = config_path();
    let config = EngineConfig::load(&config_file)
        .with_context(|| format!("loading {}", config_file.display()))?;
    let _guard = sdkvm::logging::init(&config.log_path()).context("initializing logging")?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli.command, config))
}

async fn run(command: Command, config: EngineConfig) -> anyhow::Result<()> {
    let engine = CandidateEngine::open(&config)?;
    let report = engine.startup_report();
    if !report.is_empty() {
        info!("Startup reconcile: {:?}", report);
    }

    match command {
        Command::Candidates { installed, filter } => {
            let filter = CandidateFilter {
                text: filter,
                installed_only: installed,
            };
            for summary in engine.list_candidates(&filter)? {
                println!(
                    "{:<10} {:<20} {:>3} installed  default: {}",
                    summary.id,
                    summary.name,
                    summary.installed,
                    summary.default.as_deref().unwrap_or("-")
                );
            }
        }
        Command::Versions {
            candidate,
            installed,
            downloaded,
            default_only,
            filter,
        } => {
            let filter = VersionFilter {
                text: filter,
                installed_only: installed,
                downloaded_only: downloaded,
                default_only,
            };
            for listing in engine.list_versions_filtered(&candidate, &filter)? {
                let marker = if listing.is_default { "*" } else { " " };
                println!(
                    "{} {:<24} {:<8} {:<12} {}",
                    marker,
                    listing.version,
                    listing.vendor.as_deref().unwrap_or(""),
                    listing.status,
                    if listing.downloaded { "downloaded" } else { "" }
                );
            }
        }
        Command::Install { candidate, version } => {
            let token: VersionToken = version.as_deref().unwrap_or("latest").parse()?;
            install(&engine, &candidate, &token).await?;
        }
        Command::Uninstall { candidate, version } => {
            engine.uninstall(&candidate, &version).await?;
            println!("Removed {} {}", candidate, version);
        }
        Command::Default {
            candidate,
            version,
            clear,
        } => match (version, clear) {
            (_, true) => match engine.clear_default(&candidate).await? {
                Some(previous) => println!("Cleared default {} {}", candidate, previous),
                None => println!("{} had no default", candidate),
            },
            (Some(version), false) => {
                engine.set_default(&candidate, &version).await?;
                println!("Default {} is now {}", candidate, version);
            }
            (None, false) => {
                let entry = engine.get_default(&candidate)?;
                println!("{} {}", candidate, entry.version);
            }
        },
        Command::Refresh { candidate } => {
            let snapshot = engine.refresh(candidate.as_deref()).await?;
            for (id, catalog) in &snapshot.candidates {
                println!("{:<10} {} versions", id, catalog.versions.len());
            }
        }
    }

    Ok(())
}

/// Install with progress output; Ctrl-C cancels the transfer
async fn install(
    engine: &CandidateEngine,
    candidate: &str,
    token: &VersionToken,
) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let subscription = engine.subscribe();
    let stop_progress = subscription.cancel_token();
    let progress = tokio::spawn(async move {
        let mut events = subscription.into_stream().boxed();
        while let Some(event) = events.next().await {
            if let EventKind::Progress { version, phase } = event.kind {
                eprintln!("{} {}: {}", event.candidate, version, phase);
            }
        }
    });

    let options = InstallOptions {
        deadline: None,
        cancel,
    };
    let result = engine.install_with(candidate, token, options).await;

    stop_progress.cancel();
    ctrl_c.abort();
    let _ = progress.await;

    match result? {
        InstallOutcome::Installed(entry) => println!("Installed {} {}", candidate, entry.version),
        InstallOutcome::AlreadyInstalled(entry) => {
            println!("{} {} is already installed", candidate, entry.version)
        }
    }
    Ok(())
}
