//! file-syncer binary.
//!
//! Establishes the authenticated connection and builds the content index
//! concurrently, then runs one sync pass in the selected role. Every error
//! aborts the run with a kind-specific exit code.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use file_syncer::config::{Config, ConfigError};
use file_syncer::connection::{establish, ConnectError};
use file_syncer::index::{FileIndex, IndexError};
use file_syncer::sync::{SyncError, Syncer};

#[derive(Parser, Debug)]
#[command(name = "file-syncer")]
#[command(version)]
#[command(about = "Mirror a directory of files to a replica over authenticated TCP", long_about = None)]
struct Cli {
    /// Run as the replica (listen and mirror) instead of main (dial and send)
    #[arg(long)]
    replica: bool,

    /// Address to dial (main) or listen on (replica)
    #[arg(long, short)]
    addr: Option<String>,

    /// Directory holding the files to sync
    #[arg(long, short)]
    directory: Option<PathBuf>,

    /// Path to config file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "sync aborted");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), RunError> {
    let mut config = Config::load(cli.config)?;
    if let Some(addr) = cli.addr {
        config.addr = addr;
    }
    if let Some(directory) = cli.directory {
        config.directory = directory;
    }
    let api_key = Config::api_key()?;

    let replica = cli.replica;
    let role = if replica { "replica" } else { "main" };
    tracing::info!(role, addr = %config.addr, directory = %config.directory.display(), "starting");

    // The dial/accept handshake and the directory scan both block on I/O,
    // so they run concurrently; the first error aborts the run.
    let addr = config.addr.clone();
    let directory = config.directory.clone();
    let extension = config.extension.clone();
    let (conn, mut index) = tokio::try_join!(
        async {
            establish(&addr, api_key.as_bytes(), replica)
                .await
                .map_err(RunError::Connect)
        },
        async {
            tokio::task::spawn_blocking(move || FileIndex::build(directory, &extension))
                .await
                .map_err(|e| RunError::IndexTask(e.to_string()))?
                .map_err(RunError::Index)
        }
    )?;

    let syncer = Syncer::new(conn, &mut index);
    let report = if replica {
        syncer.run_as_replica().await
    } else {
        syncer.run_as_main().await
    }
    .map_err(RunError::Sync)?;

    tracing::info!(?report, "sync complete");
    Ok(())
}

/// Top-level error, mapping each failure kind to an exit code.
#[derive(Debug)]
enum RunError {
    Config(ConfigError),
    Connect(ConnectError),
    Index(IndexError),
    IndexTask(String),
    Sync(SyncError),
}

impl RunError {
    fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) => 2,
            RunError::Connect(ConnectError::ConnectionFailed(_))
            | RunError::Connect(ConnectError::AcceptFailed(_)) => 3,
            RunError::Connect(ConnectError::AuthenticationFailed(_)) => 4,
            RunError::Sync(SyncError::Wire(_)) | RunError::Sync(SyncError::Protocol(_)) => 5,
            RunError::Sync(_) | RunError::Index(_) => 6,
            RunError::IndexTask(_) => 1,
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Config(e) => write!(f, "{}", e),
            RunError::Connect(e) => write!(f, "{}", e),
            RunError::Index(e) => write!(f, "{}", e),
            RunError::IndexTask(e) => write!(f, "Index task failed: {}", e),
            RunError::Sync(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Config(e) => Some(e),
            RunError::Connect(e) => Some(e),
            RunError::Index(e) => Some(e),
            RunError::IndexTask(_) => None,
            RunError::Sync(e) => Some(e),
        }
    }
}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        RunError::Config(e)
    }
}
