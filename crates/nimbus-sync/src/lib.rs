//! Nimbus Sync - Snapshot-diff synchronization engine
//!
//! Provides:
//! - Local and remote snapshot providers with mutation primitives
//! - Five-pass delta computation between current and previous snapshots
//! - Depth-ordered, bounded-concurrency task execution
//! - In-memory reconciliation of completed tasks and state persistence
//! - Per-pair cycle orchestration and a multi-pair scheduler
//!
//! ## Modules
//!
//! - [`filesystem`] - Local filesystem adapter (walk, stat, trash, hashing)
//! - [`watcher`] - Local change watcher publishing the last-change instant
//! - [`remote`] - Path-addressed remote adapter over the drive API
//! - [`delta`] - Delta computer
//! - [`executor`] - Task executor
//! - [`reconciler`] - State reconciler
//! - [`engine`] - Per-pair sync cycle orchestrator
//! - [`scheduler`] - Runs one orchestrator per configured pair

pub mod delta;
pub mod engine;
pub mod executor;
pub mod filesystem;
pub mod reconciler;
pub mod remote;
pub mod scheduler;
pub mod watcher;

use nimbus_core::domain::{DomainError, Side, StoreError};
use thiserror::Error;

/// Errors that can occur during synchronization operations
#[derive(Debug, Error)]
pub enum SyncError {
    /// A store adapter failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A domain-level error propagated from nimbus-core
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// A completed task carried an outcome that does not match its delta
    #[error("Unexpected outcome for {delta}")]
    UnexpectedOutcome { delta: String },

    /// The path and identity indices of a tree no longer agree
    #[error("{side:?} tree indices diverged while reconciling")]
    InconsistentTree { side: Side },
}
