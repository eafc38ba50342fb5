//! JSON file implementation of IStateRepository
//!
//! Each pair owns a directory holding three records. A record that does not
//! exist loads as its empty default, so a pair that never committed (or
//! whose state was cleared) starts cold.
//!
//! ## Record Mapping
//!
//! | Record                     | Domain Type  | Encoding                  |
//! |----------------------------|--------------|---------------------------|
//! | `previousLocalTree.json`   | `LocalTree`  | JSON array of local items |
//! | `previousRemoteTree.json`  | `RemoteTree` | JSON array of remote items |
//! | `localFileHashes.json`     | `HashCache`  | JSON object path → digest |
//!
//! A save writes all three records into `<pair>.staging/` and then swaps
//! that directory in: the committed directory is renamed to `<pair>.old/`,
//! the staging directory takes its place and the old one is removed. A
//! failed save leaves the committed directory untouched, and a crash
//! between the two renames is recovered by loading `<pair>.old/`. Every
//! record is rewritten before a swap, so staging leftovers are harmless.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use nimbus_core::domain::SyncPair;
use nimbus_core::ports::{IStateRepository, PersistedState};

use crate::{CacheError, SCHEMA_VERSION};

const LOCAL_TREE: &str = "previousLocalTree.json";
const REMOTE_TREE: &str = "previousRemoteTree.json";
const HASHES: &str = "localFileHashes.json";

/// File-based implementation of the state repository port
#[derive(Debug, Clone)]
pub struct FileStateRepository {
    root: PathBuf,
}

impl FileStateRepository {
    /// Creates a repository rooted at `root`; nothing is touched until a save
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the records of `pair`
    pub fn pair_dir(&self, pair: &SyncPair) -> PathBuf {
        self.sibling(pair, "")
    }

    /// Directory a save is assembled in before it is swapped in
    pub fn staging_dir(&self, pair: &SyncPair) -> PathBuf {
        self.sibling(pair, ".staging")
    }

    fn retired_dir(&self, pair: &SyncPair) -> PathBuf {
        self.sibling(pair, ".old")
    }

    fn sibling(&self, pair: &SyncPair, suffix: &str) -> PathBuf {
        self.root
            .join(format!("v{SCHEMA_VERSION}"))
            .join(format!("{}{suffix}", pair.uuid))
    }

    /// Directory to load from; falls back to a retired one left by a crash
    async fn committed_dir(&self, pair: &SyncPair) -> Result<PathBuf, CacheError> {
        let dir = self.pair_dir(pair);
        if exists(&dir).await? {
            return Ok(dir);
        }
        let retired = self.retired_dir(pair);
        if exists(&retired).await? {
            warn!(pair = %pair.uuid, "Interrupted save detected, loading previous state");
            return Ok(retired);
        }
        Ok(dir)
    }
}

// ============================================================================
// Record I/O
// ============================================================================

async fn read_record<T: DeserializeOwned + Default>(path: &Path) -> Result<T, CacheError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| CacheError::Serialization {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "Record missing, starting empty");
            Ok(T::default())
        }
        Err(source) => Err(CacheError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn write_record<T: Serialize>(path: &Path, value: &T) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(value).map_err(|source| CacheError::Serialization {
        path: path.to_path_buf(),
        source,
    })?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn exists(path: &Path) -> Result<bool, CacheError> {
    tokio::fs::try_exists(path)
        .await
        .map_err(|source| CacheError::Io {
            path: path.to_path_buf(),
            source,
        })
}

async fn rename_dir(from: &Path, to: &Path) -> Result<(), CacheError> {
    tokio::fs::rename(from, to)
        .await
        .map_err(|source| CacheError::Io {
            path: to.to_path_buf(),
            source,
        })
}

async fn remove_dir(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

// ============================================================================
// IStateRepository implementation
// ============================================================================

#[async_trait::async_trait]
impl IStateRepository for FileStateRepository {
    async fn load(&self, pair: &SyncPair) -> anyhow::Result<PersistedState> {
        let dir = self.committed_dir(pair).await?;
        let state = PersistedState {
            local: read_record(&dir.join(LOCAL_TREE)).await?,
            remote: read_record(&dir.join(REMOTE_TREE)).await?,
            hashes: read_record(&dir.join(HASHES)).await?,
        };
        debug!(
            pair = %pair.uuid,
            local_items = state.local.len(),
            remote_items = state.remote.len(),
            "State loaded"
        );
        Ok(state)
    }

    async fn save(&self, pair: &SyncPair, state: &PersistedState) -> anyhow::Result<()> {
        let staging = self.staging_dir(pair);
        tokio::fs::create_dir_all(&staging)
            .await
            .with_context(|| format!("Failed to create state directory {}", staging.display()))?;

        write_record(&staging.join(LOCAL_TREE), &state.local).await?;
        write_record(&staging.join(REMOTE_TREE), &state.remote).await?;
        write_record(&staging.join(HASHES), &state.hashes).await?;

        let dir = self.pair_dir(pair);
        let retired = self.retired_dir(pair);
        if exists(&dir).await? {
            remove_dir(&retired)
                .await
                .with_context(|| format!("Failed to remove {}", retired.display()))?;
            rename_dir(&dir, &retired).await?;
        }
        rename_dir(&staging, &dir).await?;
        if let Err(e) = remove_dir(&retired).await {
            warn!(path = %retired.display(), error = %e, "Failed to remove retired state");
        }

        debug!(pair = %pair.uuid, "State saved");
        Ok(())
    }

    async fn clear(&self, pair: &SyncPair) -> anyhow::Result<()> {
        for dir in [
            self.pair_dir(pair),
            self.staging_dir(pair),
            self.retired_dir(pair),
        ] {
            remove_dir(&dir)
                .await
                .with_context(|| format!("Failed to remove {}", dir.display()))?;
        }
        info!(pair = %pair.uuid, "Persisted state cleared");
        Ok(())
    }
}
