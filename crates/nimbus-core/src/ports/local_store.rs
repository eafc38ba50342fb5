//! Local store port (driven/secondary port)
//!
//! This module defines the interface for observing and mutating the local
//! side of a sync pair. All paths are [`ItemPath`]s relative to the pair's
//! local root; the adapter owns the mapping to absolute paths.
//!
//! ## Design Notes
//!
//! - Errors are typed [`StoreError`]s so the executor can tell stale paths
//!   (`NotFound`) from occupied destinations (`Conflict`) and I/O failures.
//! - `rename` is idempotent: when `from` is already gone and `to` exists,
//!   the current stat of `to` is returned. A retried cycle may replay a
//!   rename that already happened.

use std::path::PathBuf;

use crate::domain::{HashAlgorithm, ItemPath, LocalItem, LocalTree, StoreError};

/// Port trait for local filesystem operations
#[async_trait::async_trait]
pub trait ILocalStore: Send + Sync {
    /// Walks the sync root (excluding the local trash) into a snapshot
    async fn get_directory_tree(&self) -> Result<LocalTree, StoreError>;

    /// Creates a directory (and missing parents), returning its stat
    async fn mkdir(&self, path: &ItemPath) -> Result<LocalItem, StoreError>;

    /// Removes an entry; moves it to the local trash unless `permanent`
    async fn unlink(&self, path: &ItemPath, permanent: bool) -> Result<(), StoreError>;

    /// Renames and/or moves an entry, returning the stat at `to`
    async fn rename(&self, from: &ItemPath, to: &ItemPath) -> Result<LocalItem, StoreError>;

    /// Computes the content digest of a file
    async fn hash(&self, path: &ItemPath, algorithm: HashAlgorithm) -> Result<String, StoreError>;

    /// Stats a single entry, `None` when it does not exist
    async fn stat(&self, path: &ItemPath) -> Result<Option<LocalItem>, StoreError>;

    /// Absolute local path of an entry
    fn absolute(&self, path: &ItemPath) -> PathBuf;
}
