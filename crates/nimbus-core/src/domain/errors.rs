//! Domain error types
//!
//! This module defines error types specific to domain operations
//! ([`DomainError`]) and the typed failures surfaced by the local/remote
//! store adapters ([`StoreError`]).

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid file or directory name (empty, `.`/`..`, or containing `/`)
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Path is not within the configured sync root
    #[error("Path not within sync root: {0}")]
    PathNotInSyncRoot(String),
}

/// Errors surfaced by store adapters (local filesystem, remote drive)
///
/// The variants follow the failure taxonomy the sync engine reasons about:
/// stale paths from a snapshot/execution race, occupied destinations,
/// transport or disk failures, and broken preconditions.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The path or uuid no longer exists (stale snapshot)
    #[error("Not found: {0}")]
    NotFound(String),

    /// The destination already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Local disk I/O failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The remote store could not be reached or rejected the request
    #[error("Transport error: {0}")]
    Transport(String),

    /// A precondition did not hold (e.g. missing parent on upload)
    #[error("Invariant violation: {0}")]
    Invariant(String),

    /// Persisted data could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A domain value could not be constructed
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

impl StoreError {
    /// Returns true for errors caused by a path that vanished since the snapshot
    pub fn is_not_found(&self) -> bool {
        match self {
            StoreError::NotFound(_) => true,
            StoreError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}
