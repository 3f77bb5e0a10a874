//! # shotsync CLI
//!
//! The `shotsync` binary drives the screenshot reconciliation engine. It
//! provides commands for database initialization, taxonomy seeding,
//! filesystem reconciliation, integrity validation, duplicate merging,
//! matrix import, and remote synchronization.
//!
//! ## Usage
//!
//! ```bash
//! shotsync --config ./config/shotsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `shotsync init` | Create the SQLite database and run schema migrations |
//! | `shotsync seed` | Seed the closed feature taxonomy (and optional competitors) |
//! | `shotsync reconcile` | Scan the screenshot tree, classify, and upsert |
//! | `shotsync reclassify` | Re-run the classifier over unassigned screenshots |
//! | `shotsync validate` | Cross-check stores for referential integrity |
//! | `shotsync merge` | Merge duplicate competitor rows into a survivor |
//! | `shotsync import` | Import pre-parsed matrix rows |
//! | `shotsync push` | Mirror local screenshots to the remote deployment |
//! | `shotsync coverage` | Print per-competitor matrix coverage |
//! | `shotsync status` | Show database / scan root / remote health |
//!
//! Per-item failures are reported, not fatal: `reconcile` and `push` exit
//! 0 even when individual files fail. A non-zero exit means a fatal
//! configuration error (missing scan root, unreadable config, unreachable
//! remote at startup) or an unexpected top-level error.

mod checkpoint;
mod classify;
mod config;
mod db;
mod import;
mod matrix;
mod migrate;
mod models;
mod progress;
mod push;
mod reclassify;
mod reconcile;
mod remote;
mod resolve;
mod scan;
mod screenshots;
mod seed;
mod stats;
mod status;
mod validate;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Screenshot reconciliation and classification engine for the competitor
/// feature matrix.
#[derive(Parser)]
#[command(
    name = "shotsync",
    about = "Screenshot reconciliation and classification engine for the competitor feature matrix",
    version,
    long_about = "shotsync keeps three stores of competitor screenshots consistent: a local \
    filesystem tree, the relational feature matrix with its two screenshot tables, and a remote \
    deployment behind an HTTP API. It classifies screenshots from path text, reconciles \
    idempotently, repairs referential drift, and pushes with retries and a resumable checkpoint."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/shotsync.toml")]
    config: PathBuf,

    /// Progress output on stderr: auto, off, human, or json.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. This
    /// command is idempotent — running it multiple times is safe.
    Init,

    /// Seed the feature taxonomy and optional competitors.
    ///
    /// Features form a closed, externally governed list; seeding is the
    /// only operation that creates them. Upserts by name, safe to re-run.
    Seed {
        /// Seed from a TOML file instead of the config taxonomy.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Reconcile the screenshot tree with the stores.
    ///
    /// Scans the configured root, classifies every image from its path,
    /// resolves competitors, and upserts screenshot + matrix records.
    /// Per-file failures are collected and reported, never fatal.
    Reconcile {
        /// Dry run — report everything without writing to any store.
        #[arg(long, short = 'd')]
        dry_run: bool,

        /// Override the scan root from config.
        #[arg(long)]
        root: Option<PathBuf>,

        /// Maximum number of files to process.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Re-run the classifier over stored screenshots with no feature.
    Reclassify {
        /// Dry run — show would-be assignments without writing.
        #[arg(long, short = 'd')]
        dry_run: bool,

        /// Also update classifications on the remote deployment.
        #[arg(long)]
        remote: bool,
    },

    /// Cross-check all stores for referential integrity.
    Validate {
        /// Delete screenshots whose competitor reference is broken.
        /// Classification gaps are reported but never deleted.
        #[arg(long)]
        fix: bool,
    },

    /// Merge duplicate competitor rows into a designated survivor.
    ///
    /// Re-points all matrix cells and screenshots, then deletes the
    /// losers. Never loses a screenshot; safe to re-run.
    Merge {
        /// Canonical competitor that survives the merge.
        survivor: String,

        /// Duplicate competitor names to fold into the survivor.
        #[arg(required = true)]
        losers: Vec<String>,
    },

    /// Import pre-parsed matrix rows (JSON).
    Import {
        /// JSON file: array of {competitor, region, cells} rows.
        file: PathBuf,

        /// Dry run — show would-be upserts without writing.
        #[arg(long, short = 'd')]
        dry_run: bool,

        /// Clear each imported competitor's matrix row first (the
        /// explicit bulk reset).
        #[arg(long)]
        reset: bool,
    },

    /// Push local screenshots to the remote deployment.
    ///
    /// Sequential and rate-limited on purpose. Progress is checkpointed
    /// per file; an interrupted run resumes without re-uploading.
    Push {
        /// Maximum number of files to push in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Only retry files recorded as failed in the checkpoint.
        #[arg(long)]
        retry_failed: bool,
    },

    /// Print per-competitor matrix coverage.
    Coverage,

    /// Show database, scan root, and remote health.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    let mode = progress::ProgressMode::from_flag(&cli.progress)?;
    let reporter = mode.reporter();

    // Cooperative cancellation: Ctrl-C sets the flag, the pipelines check
    // it between items and flush state before exiting.
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.store(true, Ordering::SeqCst);
            }
        });
    }

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Seed { file } => {
            seed::run_seed(&cfg, file.as_deref()).await?;
        }
        Commands::Reconcile {
            dry_run,
            root,
            limit,
        } => {
            let options = reconcile::ReconcileOptions {
                dry_run,
                root,
                limit,
            };
            reconcile::run(&cfg, options, reporter.as_ref(), &cancel).await?;
        }
        Commands::Reclassify { dry_run, remote } => {
            reclassify::run_reclassify(&cfg, dry_run, remote).await?;
        }
        Commands::Validate { fix } => {
            validate::run_validate(&cfg, fix).await?;
        }
        Commands::Merge { survivor, losers } => {
            resolve::run_merge(&cfg, &survivor, &losers).await?;
        }
        Commands::Import {
            file,
            dry_run,
            reset,
        } => {
            import::run_import(&cfg, &file, dry_run, reset).await?;
        }
        Commands::Push {
            limit,
            retry_failed,
        } => {
            push::run_push(&cfg, limit, retry_failed, reporter.as_ref(), &cancel).await?;
        }
        Commands::Coverage => {
            stats::run_coverage(&cfg).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
    }

    Ok(())
}
