//! State repository port (driven/secondary port)
//!
//! Persists, per sync pair, what the next cycle needs as its "previous"
//! state: the local tree, the remote tree and the local content-hash cache.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific and
//!   the engine only needs to know that persisting failed.
//! - A pair with nothing persisted loads as [`PersistedState::default`]
//!   (cold start: empty trees, empty cache).

use serde::{Deserialize, Serialize};

use crate::domain::{HashCache, LocalTree, RemoteTree, SyncPair};

/// Committed state of one sync pair
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub local: LocalTree,
    pub remote: RemoteTree,
    pub hashes: HashCache,
}

/// Port trait for persisting sync state between cycles
#[async_trait::async_trait]
pub trait IStateRepository: Send + Sync {
    /// Loads the committed state of `pair`; missing parts load empty
    async fn load(&self, pair: &SyncPair) -> anyhow::Result<PersistedState>;

    /// Replaces the committed state of `pair`
    async fn save(&self, pair: &SyncPair, state: &PersistedState) -> anyhow::Result<()>;

    /// Forgets everything persisted for `pair`
    async fn clear(&self, pair: &SyncPair) -> anyhow::Result<()>;
}
