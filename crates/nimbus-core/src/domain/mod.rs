//! Domain entities and business logic
//!
//! This module contains the core domain types for Nimbus:
//! - Newtypes for validated root-relative paths
//! - Local and remote snapshot items
//! - Dual-index snapshots of each side
//! - Deltas and completed tasks
//! - Sync pairs and the content-hash cache
//! - Domain-specific error types

pub mod delta;
pub mod errors;
pub mod hash_cache;
pub mod item;
pub mod newtypes;
pub mod sync_pair;
pub mod tree;

// Re-export commonly used types
pub use delta::{Delta, DoneTask, Side, TaskOutcome};
pub use errors::{DomainError, StoreError};
pub use hash_cache::{HashAlgorithm, HashCache};
pub use item::{ItemType, LocalItem, RemoteFileMeta, RemoteItem, RemoteKind};
pub use newtypes::ItemPath;
pub use sync_pair::SyncPair;
pub use tree::{LocalTree, RemoteTree, Snapshot, TreeItem};
