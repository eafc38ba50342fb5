//! Content-hash cache for local files
//!
//! The cache remembers the digest of each local file's content as of the
//! last time it was uploaded or downloaded. The delta computer compares a
//! freshly computed digest against it to tell a real edit apart from a
//! modification time that merely advanced.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::newtypes::ItemPath;

/// Digest algorithm used for local content hashes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    #[default]
    Sha512,
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HashAlgorithm::Sha256 => f.write_str("sha256"),
            HashAlgorithm::Sha512 => f.write_str("sha512"),
        }
    }
}

/// `path -> digest` map persisted across cycles
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashCache(BTreeMap<ItemPath, String>);

impl HashCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &ItemPath) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    pub fn insert(&mut self, path: ItemPath, digest: impl Into<String>) {
        self.0.insert(path, digest.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Drops the digests of `path` and everything nested below it
    pub fn purge_subtree(&mut self, path: &ItemPath) -> usize {
        let before = self.0.len();
        self.0.retain(|key, _| !key.is_within(path));
        before - self.0.len()
    }

    /// Keeps only the digests whose path satisfies `keep`
    pub fn retain(&mut self, mut keep: impl FnMut(&ItemPath) -> bool) {
        self.0.retain(|path, _| keep(path));
    }

    /// Moves digests recorded under `from` to the equivalent paths under `to`
    pub fn rekey_subtree(&mut self, from: &ItemPath, to: &ItemPath) {
        if from == to {
            return;
        }
        let moved: Vec<(ItemPath, String)> = self
            .0
            .iter()
            .filter(|(key, _)| key.is_within(from))
            .map(|(key, digest)| (key.clone(), digest.clone()))
            .collect();
        for (key, digest) in moved {
            self.0.remove(&key);
            if let Some(new_key) = key.rebase(from, to) {
                self.0.insert(new_key, digest);
            }
        }
    }
}
