//! Sync scheduler - runs one orchestrator per configured pair
//!
//! The [`SyncScheduler`] turns the configuration into running pairs. Each
//! pair gets its own watcher, adapters and committed state, wrapped in a
//! [`SyncEngine`] spawned onto a shared `JoinSet`. All pairs observe the
//! same `CancellationToken`.
//!
//! ## Flow
//!
//! ```text
//! Config.pairs ──→ open_pair() ──→ SyncEngine::run() ──┐
//!                     │                                ├──→ JoinSet
//!               (failure: logged, pair skipped)        │
//! CancellationToken ───────────────────────────────────┘
//! ```

use std::sync::Arc;

use anyhow::{Context, Result};
use nimbus_core::config::Config;
use nimbus_core::domain::SyncPair;
use nimbus_core::ports::{IDriveApi, IStateRepository};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::engine::{CycleReport, EngineSettings, PairContext, SyncEngine};
use crate::filesystem::LocalFileSystemAdapter;
use crate::remote::RemoteTreeAdapter;
use crate::watcher::FileWatcher;

/// Owns the orchestrator tasks of every configured pair
pub struct SyncScheduler {
    config: Config,
    drive: Arc<dyn IDriveApi>,
    repository: Arc<dyn IStateRepository>,
    shutdown: CancellationToken,
    tasks: JoinSet<()>,
}

impl SyncScheduler {
    pub fn new(
        config: Config,
        drive: Arc<dyn IDriveApi>,
        repository: Arc<dyn IStateRepository>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            drive,
            repository,
            shutdown,
            tasks: JoinSet::new(),
        }
    }

    /// Token observed by every pair
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of pair tasks still running
    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Opens every pair and spawns its sync loop
    ///
    /// Returns the number of pairs started. A pair that cannot be opened is
    /// logged and skipped.
    pub async fn start(&mut self) -> usize {
        let settings = EngineSettings::from(&self.config.sync);
        let mut started = 0;

        for pair in self.config.pairs.clone() {
            match self.open_pair(&pair, true).await {
                Ok(ctx) => {
                    let mut engine = SyncEngine::new(ctx, settings);
                    let shutdown = self.shutdown.clone();
                    self.tasks.spawn(async move { engine.run(shutdown).await });
                    started += 1;
                }
                Err(e) => {
                    error!(pair = %pair, error = %format!("{e:#}"), "Failed to start sync pair, skipping");
                }
            }
        }

        info!(started, configured = self.config.pairs.len(), "Sync pairs started");
        started
    }

    /// Runs a single cycle for every pair, one pair after the other
    ///
    /// Pairs are opened without a watcher. A pair that fails to open or to
    /// complete its cycle is logged and left out of the result.
    pub async fn run_once(&self) -> Vec<(SyncPair, CycleReport)> {
        let settings = EngineSettings::from(&self.config.sync);
        let mut reports = Vec::new();

        for pair in &self.config.pairs {
            let ctx = match self.open_pair(pair, false).await {
                Ok(ctx) => ctx,
                Err(e) => {
                    error!(pair = %pair, error = %format!("{e:#}"), "Failed to open sync pair");
                    continue;
                }
            };
            let mut engine = SyncEngine::new(ctx, settings);
            match engine.run_cycle().await {
                Ok(report) => {
                    info!(
                        pair = %pair.uuid,
                        planned = report.planned,
                        completed = report.completed,
                        failed = report.failed.len(),
                        "Single cycle completed"
                    );
                    reports.push((pair.clone(), report));
                }
                Err(e) => error!(pair = %pair.uuid, error = %format!("{e:#}"), "Single cycle failed"),
            }
        }
        reports
    }

    /// Cancels every pair and waits for all of them to leave their cycle
    pub async fn shutdown(&mut self) {
        info!(running = self.tasks.len(), "Stopping sync pairs");
        self.shutdown.cancel();
        self.wait().await;
    }

    /// Waits until every pair task has finished
    pub async fn wait(&mut self) {
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Sync pair task ended abnormally");
            }
        }
    }

    /// Builds the context of one pair
    async fn open_pair(&self, pair: &SyncPair, watch: bool) -> Result<PairContext> {
        let sync = &self.config.sync;

        tokio::fs::create_dir_all(&pair.local_path)
            .await
            .with_context(|| format!("Failed to create sync root {}", pair.local_path.display()))?;

        let mut local = LocalFileSystemAdapter::new(
            &pair.local_path,
            sync.local_trash_dir.as_str(),
            sync.stat_batch_size,
        );
        let watcher = if watch {
            let (watcher, clock) = FileWatcher::start(&pair.local_path, &sync.local_trash_dir)?;
            local = local.with_clock(clock.clone());
            Some((watcher, clock))
        } else {
            None
        };

        let remote = RemoteTreeAdapter::new(Arc::clone(&self.drive), pair.remote_parent_uuid);
        let ctx = PairContext::open(
            pair.clone(),
            Arc::new(local),
            Arc::new(remote),
            Arc::clone(&self.repository),
        )
        .await?;

        Ok(match watcher {
            Some((watcher, clock)) => ctx.with_watcher(watcher, clock),
            None => ctx,
        })
    }
}

// ============================================================================
// Unit tests
// ============================================================================
