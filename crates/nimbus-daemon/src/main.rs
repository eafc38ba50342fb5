//! Nimbus Daemon - Background synchronization service
//!
//! This binary runs as a user service and handles:
//! - Loading and validating the configuration
//! - Opening the persisted-state repository and the drive
//! - Running one sync loop per configured pair
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon hands every pair to a [`SyncScheduler`] and then waits on a
//! `CancellationToken` that is triggered on receipt of SIGTERM or SIGINT.
//! With `--once` it runs a single cycle per pair and exits instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use nimbus_cache::FileStateRepository;
use nimbus_core::config::{Config, LoggingConfig};
use nimbus_drive::DirectoryDrive;
use nimbus_sync::scheduler::SyncScheduler;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Command line
// ============================================================================

#[derive(Debug, Parser)]
#[command(name = "nimbusd", version, about = "Nimbus directory synchronization daemon")]
struct Args {
    /// Use alternate config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Run a single cycle per pair, then exit
    #[arg(long)]
    once: bool,
}

/// Loads the configuration at `path`, falling back to defaults when absent
fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        Config::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?
    } else {
        Config::default()
    };

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        bail!("Invalid configuration:\n  {}", details.join("\n  "));
    }
    Ok(config)
}

/// Installs the global subscriber; `RUST_LOG` overrides `logging.level`
fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}

// ============================================================================
// DaemonService
// ============================================================================

/// Owns the shared collaborators of every pair
struct DaemonService {
    config: Config,
    drive: Arc<DirectoryDrive>,
    repository: Arc<FileStateRepository>,
    shutdown: CancellationToken,
}

impl DaemonService {
    /// Opens the drive and the state repository
    ///
    /// The remote folder of every pair is created in the drive when it does
    /// not exist yet.
    async fn new(config: Config, shutdown: CancellationToken) -> Result<Self> {
        let drive = DirectoryDrive::open(&config.drive.root)
            .await
            .with_context(|| format!("Failed to open drive at {}", config.drive.root.display()))?;

        for pair in &config.pairs {
            let name = pair.remote_parent_uuid.to_string();
            match drive.ensure_root(pair.remote_parent_uuid, &name).await {
                Ok(true) => info!(pair = %pair.uuid, remote = %pair.remote_parent_uuid, "Created remote folder"),
                Ok(false) => {}
                Err(e) => warn!(pair = %pair.uuid, error = %e, "Remote folder unavailable"),
            }
        }

        let repository = FileStateRepository::new(&config.sync.state_root);
        info!(state_root = %config.sync.state_root.display(), "State repository ready");

        Ok(Self {
            config,
            drive: Arc::new(drive),
            repository: Arc::new(repository),
            shutdown,
        })
    }

    fn scheduler(&self) -> SyncScheduler {
        SyncScheduler::new(
            self.config.clone(),
            self.drive.clone(),
            self.repository.clone(),
            self.shutdown.clone(),
        )
    }

    /// Runs every pair until shutdown
    async fn run(&self) -> Result<()> {
        if self.config.pairs.is_empty() {
            warn!("No sync pairs configured; waiting for shutdown");
        }

        let mut scheduler = self.scheduler();
        let started = scheduler.start().await;
        if started < self.config.pairs.len() {
            warn!(
                started,
                configured = self.config.pairs.len(),
                "Some sync pairs failed to start"
            );
        }

        self.shutdown.cancelled().await;
        info!("Shutdown signal received");
        scheduler.shutdown().await;
        Ok(())
    }

    /// Runs one cycle per pair
    async fn run_once(&self) -> Result<()> {
        let reports = self.scheduler().run_once().await;
        if reports.len() < self.config.pairs.len() {
            bail!(
                "{} of {} sync pairs failed",
                self.config.pairs.len() - reports.len(),
                self.config.pairs.len()
            );
        }
        Ok(())
    }
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(Config::default_path);
    let config = load_config(&config_path)?;

    init_tracing(&config.logging);
    info!(
        config_path = %config_path.display(),
        pairs = config.pairs.len(),
        "Nimbus daemon starting (nimbusd)"
    );

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let service = DaemonService::new(config, shutdown_token).await?;
    let result = if args.once {
        service.run_once().await
    } else {
        service.run().await
    };

    match &result {
        Ok(()) => info!("Nimbus daemon shut down gracefully"),
        Err(e) => error!(error = %format!("{e:#}"), "Nimbus daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
