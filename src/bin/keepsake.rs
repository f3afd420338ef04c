//! # Keepsake CLI - continuous incremental backup
//!
//! One mode per invocation:
//!
//! ```bash
//! # Watch a tree and back it up continuously
//! keepsake watch ./project --backup ./backup --refresh 300
//!
//! # Restore everything into a target tree
//! keepsake restore --backup ./backup --target ./restored
//!
//! # List tracked files
//! keepsake list --backup ./backup
//!
//! # Verify backup integrity
//! keepsake verify --backup ./backup
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use keepsake::{
    BackupEngine, CatalogStore, ChangeCoordinator, KeepsakeError, RestoreEngine, WatchConfig,
    DEFAULT_CHUNK_SIZE,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Keepsake - watch a directory tree and keep an incremental, chunked backup
#[derive(Parser)]
#[command(name = "keepsake")]
#[command(version)]
#[command(about = "Continuous incremental directory backup with chunked, compressed storage")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a directory and back up changes continuously
    Watch {
        /// Directory tree to watch
        path: PathBuf,

        /// Directory to store the catalog and chunk files
        #[arg(short, long)]
        backup: PathBuf,

        /// Full backup refresh interval in seconds
        #[arg(short, long, default_value = "300")]
        refresh: u64,
    },

    /// Restore all tracked files from a backup
    Restore {
        /// Backup directory to restore from
        #[arg(short, long)]
        backup: PathBuf,

        /// Target directory to restore into
        #[arg(short, long)]
        target: PathBuf,
    },

    /// List files tracked in a backup
    #[command(alias = "ls")]
    List {
        /// Backup directory to inspect
        #[arg(short, long)]
        backup: PathBuf,
    },

    /// Verify backup integrity
    Verify {
        /// Backup directory to verify
        #[arg(short, long)]
        backup: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Watch {
            path,
            backup,
            refresh,
        } => run_watch(path, backup, refresh).await,
        Commands::Restore { backup, target } => run_restore(backup, target),
        Commands::List { backup } => run_list(backup),
        Commands::Verify { backup } => run_verify(backup),
    }
}

async fn run_watch(path: PathBuf, backup: PathBuf, refresh: u64) -> anyhow::Result<()> {
    if !path.is_dir() {
        return Err(KeepsakeError::config(format!(
            "watch path does not exist: {}",
            path.display()
        ))
        .into());
    }
    let refresh = Duration::from_secs(refresh);

    info!("watch path: {}", path.display());
    info!("backup path: {}", backup.display());
    info!("refresh interval: {}", humantime::format_duration(refresh));

    let catalog = Arc::new(CatalogStore::open(&backup).context("failed to open catalog")?);
    let engine = BackupEngine::start(&path, Arc::clone(&catalog), DEFAULT_CHUNK_SIZE);

    info!("performing initial full backup");
    match engine.perform_full_backup() {
        Ok(summary) => info!(
            files = summary.files_backed_up,
            chunks = summary.chunks_written,
            "initial backup complete"
        ),
        Err(e) => warn!(error = %e, "initial backup failed"),
    }

    let (coordinator, mut events, mut errors) =
        ChangeCoordinator::spawn(&path, WatchConfig::default())
            .context("failed to start change coordinator")?;

    let mut refresh_tick = tokio::time::interval(refresh);
    refresh_tick.tick().await; // first tick fires immediately; skip it

    println!("{}", "Backup running. Press Ctrl+C to stop.".green());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            Some(event) = events.recv() => {
                if let Err(e) = engine.submit(vec![event]).await {
                    error!(error = %e, "failed to queue change");
                }
            }
            Some(e) = errors.recv() => {
                warn!(error = %e, "watcher error");
            }
            _ = refresh_tick.tick() => {
                info!("performing periodic full backup");
                if let Err(e) = engine.perform_full_backup() {
                    error!(error = %e, "periodic backup failed");
                }
            }
        }
    }

    coordinator.shutdown().await;
    engine.shutdown().await;
    println!("{}", "Backup stopped.".green());
    Ok(())
}

fn run_restore(backup: PathBuf, target: PathBuf) -> anyhow::Result<()> {
    info!("backup path: {}", backup.display());
    info!("target path: {}", target.display());

    let engine = RestoreEngine::open(&backup).context("failed to open backup")?;
    let summary = engine.restore_all(&target).context("restore failed")?;

    let restored = summary.files_restored.to_string();
    let failed = summary.files_failed.to_string();
    println!(
        "Restored {} file(s) ({}), {} failed",
        restored.as_str().green(),
        keepsake::utils::format_bytes(summary.bytes_written),
        if summary.files_failed == 0 {
            failed.as_str().normal()
        } else {
            failed.as_str().red()
        },
    );
    for warning in &summary.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
    if summary.files_failed > 0 {
        anyhow::bail!("{} file(s) failed to restore", summary.files_failed);
    }
    Ok(())
}

fn run_list(backup: PathBuf) -> anyhow::Result<()> {
    let engine = RestoreEngine::open(&backup).context("failed to open backup")?;
    let catalog = engine.catalog();

    println!("Backup created: {}", catalog.created_at.to_rfc3339());
    println!("Last updated:   {}", catalog.updated_at.to_rfc3339());
    println!("Total chunks:   {}\n", catalog.chunks.len());

    let mut active = 0usize;
    let mut deleted = 0usize;
    for record in engine.files() {
        let status = if record.deleted {
            deleted += 1;
            "DELETED".red()
        } else {
            active += 1;
            "ACTIVE".green()
        };
        println!(
            "{:<8} {:>12}  {}  {}",
            status,
            keepsake::utils::format_bytes(record.size),
            record.modified.format("%Y-%m-%d %H:%M:%S"),
            record.path.display(),
        );
    }

    println!("\nSummary: {} active file(s), {} deleted file(s)", active, deleted);
    Ok(())
}

fn run_verify(backup: PathBuf) -> anyhow::Result<()> {
    let engine = RestoreEngine::open(&backup).context("failed to open backup")?;
    let report = engine.verify();

    println!("Chunks:        {}", report.chunk_count);
    println!("Active files:  {}", report.active_files);
    println!("Deleted files: {}", report.deleted_files);
    println!(
        "Raw size:      {}",
        keepsake::utils::format_bytes(report.total_raw_bytes)
    );
    println!(
        "Stored size:   {}",
        keepsake::utils::format_bytes(report.total_compressed_bytes)
    );

    if report.is_valid() {
        println!("{}", "Backup verification completed successfully.".green());
        Ok(())
    } else {
        for filename in &report.missing_chunks {
            println!("{} {}", "missing chunk:".red(), filename);
        }
        anyhow::bail!("{} chunk file(s) missing", report.missing_chunks.len());
    }
}
