//! Nimbus Cache - Persisted sync state
//!
//! Stores, per sync pair, what the next cycle diffs against:
//! - the local tree committed by the last successful cycle
//! - the remote tree committed by the last successful cycle
//! - the local content-hash cache
//!
//! ## Architecture
//!
//! This crate implements the `IStateRepository` port from `nimbus-core`
//! with one JSON document per record under a schema-versioned directory.
//! It is a driven (secondary) adapter in the hexagonal architecture.
//!
//! ## Layout
//!
//! ```text
//! <state_root>/v<SCHEMA_VERSION>/<pair uuid>/previousLocalTree.json
//!                                           /previousRemoteTree.json
//!                                           /localFileHashes.json
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use nimbus_cache::FileStateRepository;
//!
//! let repo = FileStateRepository::new("/home/user/.local/share/nimbus/state");
//! // Use repo as IStateRepository...
//! ```

pub mod repository;

pub use repository::FileStateRepository;

/// Version of the on-disk layout; bumping it starts every pair cold
pub const SCHEMA_VERSION: u32 = 1;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Reading, writing or renaming a record failed
    #[error("I/O error on {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded or decoded
    #[error("Serialization error in {path}: {source}")]
    Serialization {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
