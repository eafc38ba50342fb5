//! Per-pair sync cycle orchestrator
//!
//! The [`SyncEngine`] drives one sync pair through its cycle:
//!
//! ```text
//! Idle → WaitingForLocalQuiet → Snapshotting → Diffing → Executing
//!      → Reconciling → Persisting → Sleeping → (loop)
//! ```
//!
//! ## Failure handling
//!
//! Any error between Snapshotting and Persisting abandons the cycle: it is
//! logged, nothing is committed, and the next cycle diffs against the same
//! committed state again. Failed deltas inside a successful cycle are not
//! errors; [`restore_failed`] keeps them pending so the next diff plans
//! them again.
//!
//! ## Shutdown
//!
//! Cancellation is observed while waiting and while sleeping, never in the
//! middle of an execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use nimbus_core::config::SyncConfig;
use nimbus_core::domain::{HashAlgorithm, SyncPair};
use nimbus_core::ports::{ILocalStore, IRemoteStore, IStateRepository, PersistedState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::delta::{DeltaComputer, DiffInput};
use crate::executor::{FailedTask, TaskExecutor};
use crate::reconciler::{reconcile, restore_failed};
use crate::watcher::{ChangeClock, FileWatcher};

// ============================================================================
// Settings and reports
// ============================================================================

/// Tunables of the cycle loop, taken from the `sync` config section
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Quiet period before snapshotting, and pause between cycles
    pub interval: Duration,
    /// Executor fan-out per chunk
    pub max_concurrent_tasks: usize,
    /// Digest used for content comparison
    pub hash_algorithm: HashAlgorithm,
}

impl From<&SyncConfig> for EngineSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            max_concurrent_tasks: config.max_concurrent_tasks,
            hash_algorithm: config.hash_algorithm,
        }
    }
}

/// Where a pair currently is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    WaitingForLocalQuiet,
    Snapshotting,
    Diffing,
    Executing,
    Reconciling,
    Persisting,
    Sleeping,
}

/// Summary of one committed cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Deltas produced by the diff
    pub planned: usize,
    /// Deltas whose primitive succeeded
    pub completed: usize,
    /// Deltas left pending for the next cycle
    pub failed: Vec<FailedTask>,
    pub duration: Duration,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

// ============================================================================
// PairContext
// ============================================================================

/// Everything one sync pair owns: its adapters, watcher and committed state
pub struct PairContext {
    pub pair: SyncPair,
    pub local: Arc<dyn ILocalStore>,
    pub remote: Arc<dyn IRemoteStore>,
    pub repository: Arc<dyn IStateRepository>,
    /// Committed state the next cycle diffs against
    committed: PersistedState,
    clock: Option<ChangeClock>,
    /// Kept alive for the lifetime of the pair
    watcher: Option<FileWatcher>,
}

impl PairContext {
    /// Builds the context of `pair`, loading its committed state
    ///
    /// # Errors
    /// Returns an error if the persisted state cannot be read
    pub async fn open(
        pair: SyncPair,
        local: Arc<dyn ILocalStore>,
        remote: Arc<dyn IRemoteStore>,
        repository: Arc<dyn IStateRepository>,
    ) -> Result<Self> {
        let committed = repository
            .load(&pair)
            .await
            .with_context(|| format!("Failed to load state of pair {}", pair.uuid))?;

        info!(
            pair = %pair.uuid,
            local_items = committed.local.len(),
            remote_items = committed.remote.len(),
            hashes = committed.hashes.len(),
            "Loaded committed state"
        );

        Ok(Self {
            pair,
            local,
            remote,
            repository,
            committed,
            clock: None,
            watcher: None,
        })
    }

    /// Attaches the local watcher; cycles then wait for local quiescence
    pub fn with_watcher(mut self, watcher: FileWatcher, clock: ChangeClock) -> Self {
        self.watcher = Some(watcher);
        self.clock = Some(clock);
        self
    }

    /// Committed state of the pair
    pub fn committed(&self) -> &PersistedState {
        &self.committed
    }

    pub fn is_watched(&self) -> bool {
        self.watcher.is_some()
    }
}

// ============================================================================
// SyncEngine
// ============================================================================

/// Runs the sync cycle of one pair
pub struct SyncEngine {
    ctx: PairContext,
    settings: EngineSettings,
    phase: CyclePhase,
}

impl SyncEngine {
    pub fn new(ctx: PairContext, settings: EngineSettings) -> Self {
        Self {
            ctx,
            settings,
            phase: CyclePhase::Idle,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    pub fn context(&self) -> &PairContext {
        &self.ctx
    }

    /// Runs one full cycle and commits its result
    ///
    /// # Errors
    /// Returns an error if snapshotting, reconciling or persisting fails;
    /// the committed state is then left untouched.
    #[instrument(skip(self), fields(pair = %self.ctx.pair.uuid))]
    pub async fn run_cycle(&mut self) -> Result<CycleReport> {
        let started = Instant::now();

        self.phase = CyclePhase::Snapshotting;
        let (local, remote) = tokio::try_join!(
            self.ctx.local.get_directory_tree(),
            self.ctx.remote.get_directory_tree()
        )
        .context("Failed to take snapshots")?;
        debug!(
            local_items = local.len(),
            remote_items = remote.len(),
            "Snapshots taken"
        );

        self.phase = CyclePhase::Diffing;
        let plan = DeltaComputer::new(self.ctx.local.as_ref(), self.settings.hash_algorithm)
            .compute(DiffInput {
                current_local: &local,
                current_remote: &remote,
                previous_local: &self.ctx.committed.local,
                previous_remote: &self.ctx.committed.remote,
                hashes: &self.ctx.committed.hashes,
            })
            .await;
        let planned = plan.deltas.len();

        self.phase = CyclePhase::Executing;
        let execution = TaskExecutor::new(
            self.ctx.local.as_ref(),
            self.ctx.remote.as_ref(),
            self.settings.max_concurrent_tasks,
            self.settings.hash_algorithm,
        )
        .execute(plan.deltas)
        .await;

        self.phase = CyclePhase::Reconciling;
        let mut next = PersistedState {
            local,
            remote,
            hashes: self.ctx.committed.hashes.clone(),
        };
        for (path, digest) in plan.computed_hashes {
            next.hashes.insert(path, digest);
        }
        reconcile(&mut next, &execution.done).context("Failed to reconcile completed tasks")?;
        restore_failed(&mut next, &self.ctx.committed, &execution.failed);
        let PersistedState { local, hashes, .. } = &mut next;
        hashes.retain(|path| local.get(path).is_some_and(|item| item.item_type.is_file()));

        self.phase = CyclePhase::Persisting;
        self.ctx
            .repository
            .save(&self.ctx.pair, &next)
            .await
            .context("Failed to persist sync state")?;
        self.ctx.committed = next;

        Ok(CycleReport {
            planned,
            completed: execution.done.len(),
            failed: execution.failed,
            duration: started.elapsed(),
        })
    }

    /// Runs cycles until `shutdown` is cancelled
    pub async fn run(&mut self, shutdown: CancellationToken) {
        let pair = self.ctx.pair.uuid;
        info!(
            %pair,
            interval_secs = self.settings.interval.as_secs(),
            watched = self.ctx.is_watched(),
            "Starting sync loop"
        );

        loop {
            self.phase = CyclePhase::WaitingForLocalQuiet;
            if let Some(clock) = self.ctx.clock.as_mut() {
                tokio::select! {
                    _ = clock.wait_for_quiet(self.settings.interval) => {}
                    _ = shutdown.cancelled() => break,
                }
            } else if shutdown.is_cancelled() {
                break;
            }

            match self.run_cycle().await {
                Ok(report) => info!(
                    %pair,
                    planned = report.planned,
                    completed = report.completed,
                    failed = report.failed.len(),
                    duration_ms = report.duration.as_millis() as u64,
                    "Sync cycle completed"
                ),
                Err(e) => error!(%pair, error = %format!("{e:#}"), "Sync cycle failed"),
            }

            self.phase = CyclePhase::Sleeping;
            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        self.phase = CyclePhase::Idle;
        info!(%pair, "Sync loop stopped");
    }
}

// ============================================================================
// Tests
// ============================================================================
