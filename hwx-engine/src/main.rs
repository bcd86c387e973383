//! hwx - hardware component lookup
//!
//! Command-line host for the resolution and retrieval engine. Results are
//! printed as JSON on stdout; logs go to stderr.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

use hwx_common::config::{load_config, resolve_config_path, resolve_root_folder, ChainMode};
use hwx_engine::catalog::CatalogStore;
use hwx_engine::types::ComponentCategory;
use hwx_engine::{LookupOutcome, Pipeline};

/// Command-line arguments for hwx
#[derive(Parser, Debug)]
#[command(name = "hwx")]
#[command(about = "Resolve hardware identifiers and retrieve validated specifications")]
#[command(version)]
struct Args {
    /// Config file (TOML)
    #[arg(short, long, env = "HWX_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the catalog database
    #[arg(short, long, env = "HWX_ROOT_FOLDER")]
    root_folder: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve an identifier and retrieve its specs
    Lookup {
        identifier: String,

        #[arg(short = 't', long)]
        category: ComponentCategory,

        /// first-success or exhaustive (default from config)
        #[arg(short, long)]
        mode: Option<ChainMode>,

        /// Pick the Nth candidate (1-based) when the identifier is ambiguous
        #[arg(short, long)]
        select: Option<usize>,

        /// Print chain events to stderr as they happen
        #[arg(long)]
        events: bool,
    },

    /// Resolve an identifier without fetching anything
    Resolve {
        identifier: String,

        #[arg(short = 't', long)]
        category: ComponentCategory,
    },

    /// Load curated catalog entries from a JSON file
    Seed { file: PathBuf },

    /// Catalog statistics
    Stats,

    /// Remove expired cache entries
    PurgeCache,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let config = load_config(config_path.as_deref());
    hwx_common::logging::init(&config.logging);

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &config);
    info!("Root folder: {}", root_folder.display());

    let opened = Pipeline::open(&config, &root_folder)
        .await
        .context("Failed to open catalog")?;
    let pipeline = opened.pipeline;

    let result = match args.command {
        Command::Lookup {
            identifier,
            category,
            mode,
            select,
            events,
        } => {
            if events {
                let mut rx = opened.events.subscribe();
                tokio::spawn(async move {
                    while let Ok(event) = rx.recv().await {
                        if let Ok(line) = serde_json::to_string(&event) {
                            eprintln!("{}", line);
                        }
                    }
                });
            }

            let cancel = CancellationToken::new();
            let watcher = {
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    shutdown_signal().await;
                    cancel.cancel();
                })
            };

            let outcome = run_lookup(&pipeline, &identifier, category, mode, select, &cancel).await;
            watcher.abort();
            outcome.and_then(|o| print_json(&o))
        }
        Command::Resolve {
            identifier,
            category,
        } => {
            let resolution = pipeline
                .resolver()
                .resolve(&identifier, category)
                .await
                .context("Resolution failed")?;
            print_json(&resolution)
        }
        Command::Seed { file } => {
            let count = pipeline
                .catalog()
                .seed_from_json(&file)
                .await
                .with_context(|| format!("Failed to seed from {}", file.display()))?;
            print_json(&serde_json::json!({ "seeded": count }))
        }
        Command::Stats => {
            let stats = pipeline.catalog().stats().await.context("Failed to read stats")?;
            print_json(&stats)
        }
        Command::PurgeCache => {
            let purged = pipeline
                .cache()
                .purge_expired()
                .await
                .context("Failed to purge cache")?;
            print_json(&serde_json::json!({ "purged": purged }))
        }
    };

    opened.browser_pool.shutdown().await;
    result
}

async fn run_lookup(
    pipeline: &Pipeline,
    identifier: &str,
    category: ComponentCategory,
    mode: Option<ChainMode>,
    select: Option<usize>,
    cancel: &CancellationToken,
) -> Result<LookupOutcome> {
    let outcome = pipeline
        .lookup(identifier, Some(category), mode, cancel)
        .await
        .context("Lookup failed")?;

    let (candidates, choice) = match (outcome, select) {
        (LookupOutcome::NeedsSelection { candidates }, Some(choice)) => (candidates, choice),
        (outcome, _) => return Ok(outcome),
    };

    let Some(candidate) = choice.checked_sub(1).and_then(|i| candidates.get(i)) else {
        bail!("--select {} is out of range (1..={})", choice, candidates.len());
    };
    info!("Selected candidate {}: {}", choice, candidate.entry.display_name());

    pipeline
        .lookup_candidate(candidate, mode, cancel)
        .await
        .context("Lookup failed")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Ctrl-C (or SIGTERM) cancels the running chain walk
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, cancelling");
        },
        _ = terminate => {
            info!("Received terminate signal, cancelling");
        },
    }
}
