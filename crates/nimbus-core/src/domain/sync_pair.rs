//! Sync pair definition
//!
//! A [`SyncPair`] is one managed relationship between a local directory and
//! a remote folder. Pairs are independent: each one gets its own watcher,
//! adapters, persisted state and cycle loop.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One managed (local directory, remote folder) relationship
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SyncPair {
    /// Identifier of the pair; also names its persisted-state directory
    pub uuid: Uuid,
    /// Absolute path of the local sync root
    pub local_path: PathBuf,
    /// Uuid of the remote folder mirrored by this pair
    pub remote_parent_uuid: Uuid,
}

impl SyncPair {
    pub fn new(local_path: impl Into<PathBuf>, remote_parent_uuid: Uuid) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            local_path: local_path.into(),
            remote_parent_uuid,
        }
    }
}

impl std::fmt::Display for SyncPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({} <-> {})",
            self.uuid,
            self.local_path.display(),
            self.remote_parent_uuid
        )
    }
}
