//! Task executor
//!
//! Runs a delta list against the local and remote stores:
//!
//! - deltas are grouped by [`Delta::depth`] and levels run shallow to deep;
//!   a level finishes before the next one starts
//! - within a level, tasks run concurrently in chunks of
//!   `max_concurrent_tasks`
//! - every task settles on its own; one failure never aborts its siblings
//! - a rename and a move of the same `from -> to` on the same side share one
//!   primitive call and both become [`DoneTask`]s
//! - a delete whose sub-tree is the source of a relocation on the same side
//!   runs in a final level, after everything else; it is skipped (and
//!   reported failed) when one of those relocations failed
//!
//! Deltas carry paths from the pre-execution snapshots. Once a directory
//! has been relocated on a side, later paths on that side that still point
//! below its old location are rebased onto the new one before the primitive
//! is called. Completed tasks keep their original coordinates; the
//! reconciler relies on that.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use futures_util::future::join_all;
use nimbus_core::domain::{
    Delta, DoneTask, HashAlgorithm, ItemPath, ItemType, Side, StoreError, TaskOutcome,
};
use nimbus_core::ports::{ILocalStore, IRemoteStore};
use tracing::{debug, error, info, warn};

// ============================================================================
// Results
// ============================================================================

/// A delta whose primitive failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTask {
    pub delta: Delta,
    pub error: String,
}

/// Settled outcome of one execution
#[derive(Debug, Clone, Default)]
pub struct ExecutionReport {
    pub done: Vec<DoneTask>,
    pub failed: Vec<FailedTask>,
}

// ============================================================================
// Jobs and relocation tracking
// ============================================================================

/// One primitive invocation; `companion` is a coalesced rename/move twin
#[derive(Debug)]
struct Job {
    primary: Delta,
    companion: Option<Delta>,
}

impl Job {
    fn deltas(&self) -> impl Iterator<Item = &Delta> {
        std::iter::once(&self.primary).chain(self.companion.iter())
    }
}

fn coalesce(deltas: Vec<Delta>) -> Vec<Job> {
    let mut jobs: Vec<Job> = Vec::with_capacity(deltas.len());
    let mut relocations: HashMap<(Side, ItemPath, ItemPath), usize> = HashMap::new();

    for delta in deltas {
        let key = delta
            .relocation()
            .map(|(from, to)| (delta.target(), from.clone(), to.clone()));
        if let Some(key) = key {
            if let Some(job) = relocations
                .get(&key)
                .and_then(|&i| jobs.get_mut(i))
                .filter(|job| job.companion.is_none())
            {
                job.companion = Some(delta);
                continue;
            }
            relocations.insert(key, jobs.len());
        }
        jobs.push(Job {
            primary: delta,
            companion: None,
        });
    }
    jobs
}

/// Directory relocations already applied, per side, in execution order
#[derive(Debug, Default)]
struct Relocated {
    local: Vec<(ItemPath, ItemPath)>,
    remote: Vec<(ItemPath, ItemPath)>,
}

impl Relocated {
    fn side(&self, side: Side) -> &[(ItemPath, ItemPath)] {
        match side {
            Side::Local => &self.local,
            Side::Remote => &self.remote,
        }
    }

    fn record(&mut self, side: Side, from: ItemPath, to: ItemPath) {
        match side {
            Side::Local => self.local.push((from, to)),
            Side::Remote => self.remote.push((from, to)),
        }
    }

    /// Current location on `side` of a pre-execution path
    fn rebase(&self, side: Side, path: &ItemPath) -> ItemPath {
        let mut current = path.clone();
        for (from, to) in self.side(side) {
            if let Some(next) = current.rebase(from, to) {
                current = next;
            }
        }
        current
    }
}

/// True for a delete with a relocation on the same side starting strictly below it
fn empties_before_delete(delta: &Delta, sources: &[(Side, ItemPath)]) -> bool {
    if !delta.is_delete() {
        return false;
    }
    let path = delta.path();
    sources
        .iter()
        .any(|(side, from)| *side == delta.target() && from != path && from.is_within(path))
}

// ============================================================================
// TaskExecutor
// ============================================================================

/// Maps deltas to store primitives
pub struct TaskExecutor<'a> {
    local: &'a dyn ILocalStore,
    remote: &'a dyn IRemoteStore,
    max_concurrent_tasks: usize,
    hash_algorithm: HashAlgorithm,
}

impl<'a> TaskExecutor<'a> {
    pub fn new(
        local: &'a dyn ILocalStore,
        remote: &'a dyn IRemoteStore,
        max_concurrent_tasks: usize,
        hash_algorithm: HashAlgorithm,
    ) -> Self {
        Self {
            local,
            remote,
            max_concurrent_tasks: max_concurrent_tasks.max(1),
            hash_algorithm,
        }
    }

    /// Executes `deltas`, settling every one of them
    pub async fn execute(&self, deltas: Vec<Delta>) -> ExecutionReport {
        let started = Instant::now();
        let sources: Vec<(Side, ItemPath)> = deltas
            .iter()
            .filter_map(|d| d.relocation().map(|(from, _)| (d.target(), from.clone())))
            .collect();

        // Keyed (deferred, depth) so deferred deletes sort after every depth
        let mut levels: BTreeMap<(bool, usize), Vec<Job>> = BTreeMap::new();
        for job in coalesce(deltas) {
            let deferred = empties_before_delete(&job.primary, &sources);
            levels
                .entry((deferred, job.primary.depth()))
                .or_default()
                .push(job);
        }

        let mut report = ExecutionReport::default();
        let mut relocated = Relocated::default();

        for ((deferred, depth), jobs) in levels {
            let jobs = if deferred {
                self.skip_blocked(jobs, &mut report)
            } else {
                jobs
            };
            debug!(depth, deferred, tasks = jobs.len(), "Executing depth level");
            let mut applied = Vec::new();

            for chunk in jobs.chunks(self.max_concurrent_tasks) {
                let results = join_all(chunk.iter().map(|job| self.run(&job.primary, &relocated))).await;

                for (job, result) in chunk.iter().zip(results) {
                    match result {
                        Ok(outcome) => {
                            if let Some((from, to)) = job.primary.relocation() {
                                if job.primary.relocates_directory() {
                                    let side = job.primary.target();
                                    applied.push((side, relocated.rebase(side, from), to.clone()));
                                }
                            }
                            for delta in job.deltas() {
                                debug!(%delta, "Task done");
                                report.done.push(DoneTask {
                                    delta: delta.clone(),
                                    outcome: outcome.clone(),
                                });
                            }
                        }
                        Err(err) => {
                            for delta in job.deltas() {
                                error!(%delta, error = %err, "Task failed");
                                report.failed.push(FailedTask {
                                    delta: delta.clone(),
                                    error: err.to_string(),
                                });
                            }
                        }
                    }
                }
            }

            for (side, from, to) in applied {
                relocated.record(side, from, to);
            }
        }

        info!(
            done = report.done.len(),
            failed = report.failed.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Execution finished"
        );
        report
    }

    /// Drops deferred deletes whose pending relocations failed
    ///
    /// Deleting the directory would take the entry that could not be moved
    /// out with it.
    fn skip_blocked(&self, jobs: Vec<Job>, report: &mut ExecutionReport) -> Vec<Job> {
        let mut runnable = Vec::with_capacity(jobs.len());
        for job in jobs {
            let blocker = report.failed.iter().find_map(|failed| {
                let (from, _) = failed.delta.relocation()?;
                let blocks = failed.delta.target() == job.primary.target()
                    && from != job.primary.path()
                    && from.is_within(job.primary.path());
                blocks.then(|| failed.delta.to_string())
            });
            match blocker {
                Some(blocker) => {
                    warn!(delta = %job.primary, %blocker, "Delete skipped, relocation out of it failed");
                    report.failed.push(FailedTask {
                        delta: job.primary,
                        error: format!("skipped: {blocker} failed"),
                    });
                }
                None => runnable.push(job),
            }
        }
        runnable
    }

    /// Runs the primitive of one delta
    async fn run(&self, delta: &Delta, relocated: &Relocated) -> Result<TaskOutcome, StoreError> {
        match delta {
            Delta::CreateLocalDirectory { path } => Ok(TaskOutcome::LocalStat {
                item: self.local.mkdir(path).await?,
            }),
            Delta::CreateRemoteDirectory { path } => Ok(TaskOutcome::RemoteDirectory {
                uuid: self.remote.mkdir(path).await?,
            }),
            Delta::DeleteLocalDirectory { path } | Delta::DeleteLocalFile { path } => {
                let path = relocated.rebase(Side::Local, path);
                self.local.unlink(&path, false).await?;
                Ok(TaskOutcome::Deleted)
            }
            Delta::DeleteRemoteDirectory { path } => {
                let path = relocated.rebase(Side::Remote, path);
                self.remote
                    .unlink(&path, Some(ItemType::Directory), false)
                    .await?;
                Ok(TaskOutcome::Deleted)
            }
            Delta::DeleteRemoteFile { path } => {
                let path = relocated.rebase(Side::Remote, path);
                self.remote.unlink(&path, Some(ItemType::File), false).await?;
                Ok(TaskOutcome::Deleted)
            }
            Delta::RenameLocalDirectory { from, to }
            | Delta::RenameLocalFile { from, to }
            | Delta::MoveLocalDirectory { from, to }
            | Delta::MoveLocalFile { from, to } => {
                let from = relocated.rebase(Side::Local, from);
                Ok(TaskOutcome::LocalStat {
                    item: self.local.rename(&from, to).await?,
                })
            }
            Delta::RenameRemoteDirectory { from, to }
            | Delta::RenameRemoteFile { from, to }
            | Delta::MoveRemoteDirectory { from, to }
            | Delta::MoveRemoteFile { from, to } => {
                let from = relocated.rebase(Side::Remote, from);
                self.remote.rename(&from, to).await?;
                Ok(TaskOutcome::Relocated)
            }
            Delta::UploadFile { path } => {
                let local_hash = self.local.hash(path, self.hash_algorithm).await?;
                let item = self.remote.upload(path, &self.local.absolute(path)).await?;
                Ok(TaskOutcome::Uploaded { item, local_hash })
            }
            Delta::DownloadFile { path } => {
                self.remote.download(path, &self.local.absolute(path)).await?;
                let item = self
                    .local
                    .stat(path)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
                let local_hash = self.local.hash(path, self.hash_algorithm).await?;
                Ok(TaskOutcome::Downloaded { item, local_hash })
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
