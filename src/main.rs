//! # Vault Sync CLI (`vsync`)
//!
//! Mirrors a vault of markdown notes into an OpenAI vector store and keeps a
//! file-search assistant pointed at it.
//!
//! ## Usage
//!
//! ```bash
//! vsync --config ./config/vsync.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vsync sync` | Upload notes missing remotely and attach them to the vector store |
//! | `vsync files` | List remote files |
//! | `vsync status` | Show the vector store, assistant and indexed file counts |
//! | `vsync delete <path>` | Delete every remote file with that name |
//! | `vsync delete --all` | Delete every remote file |
//! | `vsync teardown` | Delete all files, the vector store and the assistant |
//!
//! Logs go to stderr and are controlled by `RUST_LOG` (default `warn`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use futures_util::TryStreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::TryRecvError;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use vault_sync::config::{self, Config};
use vault_sync::openai::OpenAiClient;
use vault_sync::progress::{ProgressMode, SyncProgressEvent};
use vault_sync::traits::RemoteClients;
use vault_sync::vault::FilesystemVault;
use vault_sync::{EngineSettings, FlushOutcome, SyncEngine, SyncEngineOptions};

/// Vault Sync CLI: keeps an OpenAI assistant's vector store in sync with a
/// local vault of markdown notes.
#[derive(Parser)]
#[command(
    name = "vsync",
    about = "Vault Sync: keep an OpenAI assistant's vector store in sync with your notes",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vsync.toml")]
    config: PathBuf,

    /// Progress output on stderr: `auto`, `human`, `json` or `off`.
    #[arg(long, global = true, default_value = "auto", value_parser = ProgressMode::parse)]
    progress: ProgressMode,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload notes that have no remote counterpart.
    ///
    /// Notes are matched by vault path. After uploading, pending files are
    /// attached to the vector store before the command exits.
    Sync,

    /// List remote files.
    Files,

    /// Show the vector store, assistant, and indexed file counts.
    Status,

    /// Delete remote files.
    Delete {
        /// Vault path of the note to delete remotely.
        #[arg(required_unless_present = "all")]
        path: Option<String>,

        /// Delete every remote file.
        #[arg(long, conflicts_with = "path")]
        all: bool,
    },

    /// Delete all remote files, the vector store, and the assistant.
    Teardown,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_engine(cfg: &Config) -> Result<SyncEngine> {
    let client = Arc::new(OpenAiClient::from_config(&cfg.openai)?);
    let vault = Arc::new(FilesystemVault::new(&cfg.vault)?);

    SyncEngine::new(SyncEngineOptions {
        remote: RemoteClients::shared(client),
        source: vault,
        settings: EngineSettings::from_config(cfg),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let cfg = config::load_config(&cli.config)?;
    let engine = build_engine(&cfg)?;

    let result = match cli.command {
        Commands::Sync => run_sync(&engine, cli.progress).await,
        Commands::Files => run_files(&engine).await,
        Commands::Status => run_status(&engine).await,
        Commands::Delete { path, all } => run_delete(&engine, path, all).await,
        Commands::Teardown => run_teardown(&engine).await,
    };

    engine.shutdown();
    result
}

/// Wait for background setup so the process never exits between creating
/// the vector store and creating the assistant. Commands that only touch
/// files carry on when setup failed.
async fn finish_setup(engine: &SyncEngine) {
    if let Err(e) = engine.ready().await {
        warn!(error = %format!("{:#}", e), "vector store setup failed");
    }
}

async fn run_sync(engine: &SyncEngine, progress: ProgressMode) -> Result<()> {
    let reporter = progress.reporter();
    let vector_store = engine.ready().await?;
    // The scheduler may attach some uploads before `drain` runs.
    let mut flushes = engine.subscribe_flushes();

    reporter.report(SyncProgressEvent::Discovering);

    let mut uploads = engine.sync();
    let mut uploaded = 0u64;
    while let Some(doc) = uploads.try_next().await? {
        uploaded += 1;
        reporter.report(SyncProgressEvent::Uploaded {
            path: doc.path,
            n: uploaded,
        });
    }

    reporter.report(SyncProgressEvent::Flushing {
        pending: engine.pending_len() as u64,
    });
    engine.drain().await;

    let mut attached = 0usize;
    let mut failed = 0usize;
    loop {
        match flushes.try_recv() {
            Ok(FlushOutcome::Attached { file_ids, .. }) => attached += file_ids.len(),
            Ok(FlushOutcome::Failed { file_ids, error, .. }) => {
                failed += file_ids.len();
                eprintln!("Warning: attaching {} file(s) failed: {}", file_ids.len(), error);
            }
            Ok(_) => {}
            Err(TryRecvError::Lagged(missed)) => {
                warn!(missed, "flush outcomes dropped from the summary");
            }
            Err(_) => break,
        }
    }

    reporter.report(SyncProgressEvent::Done { uploaded });

    println!("sync");
    println!("  vector store: {}", vector_store.id);
    println!("  uploaded: {}", uploaded);
    println!("  attached: {}", attached);
    if failed > 0 {
        println!("  failed to attach: {}", failed);
    }
    println!("ok");
    Ok(())
}

async fn run_files(engine: &SyncEngine) -> Result<()> {
    finish_setup(engine).await;
    let files = engine.list_remote_files().await?;

    for file in &files {
        let created = chrono::DateTime::from_timestamp(file.created_at, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{}  {:>8}  {}  {}", file.id, file.bytes, created, file.filename);
    }
    println!("{} file(s)", files.len());
    Ok(())
}

async fn run_status(engine: &SyncEngine) -> Result<()> {
    let vector_store = engine.ready().await?;
    let indexed = engine.list_vector_store_files().await?;
    let remote = engine.list_remote_files().await?;

    println!(
        "vector store: {} ({})",
        vector_store.id,
        vector_store.name.as_deref().unwrap_or("unnamed")
    );
    match engine.assistant() {
        Some(assistant) => println!("assistant: {} ({})", assistant.id, assistant.model),
        None => println!("assistant: none"),
    }
    println!("remote files: {}", remote.len());
    println!("indexed files: {}", indexed.len());
    println!("pending: {}", engine.pending_len());
    Ok(())
}

async fn run_delete(engine: &SyncEngine, path: Option<String>, all: bool) -> Result<()> {
    finish_setup(engine).await;
    let deleted = match path {
        Some(path) if !all => engine.delete_remote_file(&path).await?,
        _ => engine.delete_remote_files().await?,
    };
    println!("deleted {} file(s)", deleted);
    Ok(())
}

async fn run_teardown(engine: &SyncEngine) -> Result<()> {
    finish_setup(engine).await;

    let files = engine.delete_remote_files().await?;
    println!("deleted {} file(s)", files);

    if let Some(vs) = engine.delete_vector_store().await? {
        println!("deleted vector store {}", vs.id);
    }
    if let Some(assistant) = engine.delete_assistant().await? {
        println!("deleted assistant {}", assistant.id);
    }
    println!("ok");
    Ok(())
}
