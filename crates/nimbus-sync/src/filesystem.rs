//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalStore`] over one sync root using `tokio::fs`.
//!
//! ## Design Decisions
//!
//! - **Breadth-first walk**: directories are listed level by level and every
//!   entry of a level is `lstat`'ed concurrently in batches of
//!   `stat_batch_size`. Symlinks and the local trash directory are skipped.
//! - **Snapshot reuse**: when a [`ChangeClock`] is attached and no change was
//!   observed since the last walk *started*, the cached tree is returned
//!   instead of walking again.
//! - **Local trash**: non-permanent unlink moves the entry to
//!   `<root>/<trash_dir>/<epoch-ms>_<name>`.
//! - **Idempotent rename**: a replayed rename whose source is gone and whose
//!   destination exists reports the destination.

use std::collections::VecDeque;
use std::io::ErrorKind;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use nimbus_core::domain::{
    HashAlgorithm, ItemPath, ItemType, LocalItem, LocalTree, StoreError,
};
use nimbus_core::ports::ILocalStore;
use sha2::{Digest, Sha256, Sha512};
use tokio::io::AsyncReadExt;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::watcher::ChangeClock;

/// Read buffer size used while hashing
const HASH_CHUNK_SIZE: usize = 64 * 1024;

// ============================================================================
// LocalFileSystemAdapter struct
// ============================================================================

/// A walked tree together with the instant the walk started
#[derive(Debug)]
struct CachedSnapshot {
    started: Instant,
    tree: LocalTree,
}

/// Adapter that bridges the [`ILocalStore`] port to one local sync root.
#[derive(Debug)]
pub struct LocalFileSystemAdapter {
    root: PathBuf,
    trash_dir: String,
    stat_batch_size: usize,
    clock: Option<ChangeClock>,
    cached: Mutex<Option<CachedSnapshot>>,
}

impl LocalFileSystemAdapter {
    /// Create a new adapter for `root`.
    ///
    /// Without a clock every [`get_directory_tree`](ILocalStore::get_directory_tree)
    /// call walks the tree.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, trash_dir: impl Into<String>, stat_batch_size: usize) -> Self {
        Self {
            root: root.into(),
            trash_dir: trash_dir.into(),
            stat_batch_size: stat_batch_size.max(1),
            clock: None,
            cached: Mutex::new(None),
        }
    }

    /// Attaches the change clock of a watcher on the same root
    #[must_use]
    pub fn with_clock(mut self, clock: ChangeClock) -> Self {
        self.clock = Some(clock);
        self
    }

    /// The local sync root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the local trash directory
    pub fn trash_path(&self) -> PathBuf {
        self.root.join(&self.trash_dir)
    }

    /// A cached snapshot is fresh when it started after the last observed change
    fn is_fresh(&self, snapshot: &CachedSnapshot) -> bool {
        match &self.clock {
            Some(clock) => match clock.last_change() {
                Some(last) => snapshot.started > last,
                None => true,
            },
            None => false,
        }
    }

    /// Breadth-first walk of the sync root
    async fn walk(&self) -> Result<LocalTree, StoreError> {
        let trash = self.trash_path();
        let mut tree = LocalTree::new();
        let mut frontier: VecDeque<(PathBuf, ItemPath)> = VecDeque::new();
        frontier.push_back((self.root.clone(), ItemPath::root()));

        while !frontier.is_empty() {
            // List every directory of the current level
            let mut children: Vec<(PathBuf, ItemPath)> = Vec::new();
            for (dir, dir_path) in frontier.drain(..) {
                let mut entries = match tokio::fs::read_dir(&dir).await {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == ErrorKind::NotFound && !dir_path.is_root() => {
                        debug!(path = %dir_path, "Directory vanished during walk");
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };
                while let Some(entry) = entries.next_entry().await? {
                    let abs = entry.path();
                    if abs == trash {
                        continue;
                    }
                    let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
                        warn!(path = %abs.display(), "Skipping entry with non UTF-8 name");
                        continue;
                    };
                    match dir_path.join(&name) {
                        Ok(path) => children.push((abs, path)),
                        Err(err) => warn!(path = %abs.display(), %err, "Skipping invalid path"),
                    }
                }
            }

            // Stat the whole level in bounded batches
            for batch in children.chunks(self.stat_batch_size) {
                let stats = join_all(
                    batch
                        .iter()
                        .map(|(abs, _)| tokio::fs::symlink_metadata(abs.clone())),
                )
                .await;

                for ((abs, path), stat) in batch.iter().zip(stats) {
                    let meta = match stat {
                        Ok(meta) => meta,
                        Err(e) if e.kind() == ErrorKind::NotFound => {
                            debug!(%path, "Entry vanished during walk");
                            continue;
                        }
                        Err(e) => return Err(e.into()),
                    };
                    let Some(item) = local_item(path.clone(), &meta) else {
                        continue;
                    };
                    if item.item_type.is_directory() {
                        frontier.push_back((abs.clone(), path.clone()));
                    }
                    tree.insert(item);
                }
            }
        }

        Ok(tree)
    }

    /// Destination inside the trash for `name`, unique within the trash
    async fn trash_destination(&self, name: &str) -> Result<PathBuf, StoreError> {
        let trash = self.trash_path();
        tokio::fs::create_dir_all(&trash).await?;

        let stamp = Utc::now().timestamp_millis();
        let mut candidate = trash.join(format!("{stamp}_{name}"));
        let mut n = 1;
        while tokio::fs::try_exists(&candidate).await? {
            candidate = trash.join(format!("{stamp}-{n}_{name}"));
            n += 1;
        }
        Ok(candidate)
    }

    async fn stat_required(&self, path: &ItemPath) -> Result<LocalItem, StoreError> {
        self.stat(path)
            .await?
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }
}

// ============================================================================
// Metadata conversion
// ============================================================================

fn epoch_millis(time: std::io::Result<SystemTime>) -> Option<i64> {
    time.ok()
        .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
}

/// Builds a [`LocalItem`]; `None` for symlinks and special files
fn local_item(path: ItemPath, meta: &std::fs::Metadata) -> Option<LocalItem> {
    let file_type = meta.file_type();
    let item_type = if file_type.is_dir() {
        ItemType::Directory
    } else if file_type.is_file() {
        ItemType::File
    } else {
        return None;
    };

    let last_modified = epoch_millis(meta.modified()).unwrap_or(0);
    Some(LocalItem {
        path,
        item_type,
        size: if item_type.is_file() { meta.len() } else { 0 },
        last_modified,
        creation: epoch_millis(meta.created()).unwrap_or(last_modified),
        inode: meta.ino(),
    })
}

/// Streams a file through digest `D`, returning lowercase hex
async fn digest_file<D: Digest + Send>(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; HASH_CHUNK_SIZE];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect())
}

// ============================================================================
// ILocalStore implementation
// ============================================================================

#[async_trait::async_trait]
impl ILocalStore for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn get_directory_tree(&self) -> Result<LocalTree, StoreError> {
        let mut cached = self.cached.lock().await;
        if let Some(snapshot) = cached.as_ref() {
            if self.is_fresh(snapshot) {
                debug!(items = snapshot.tree.len(), "Reusing cached local snapshot");
                return Ok(snapshot.tree.clone());
            }
        }

        let started = Instant::now();
        let tree = self.walk().await?;
        info!(
            items = tree.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Local snapshot taken"
        );
        *cached = Some(CachedSnapshot {
            started,
            tree: tree.clone(),
        });
        Ok(tree)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn mkdir(&self, path: &ItemPath) -> Result<LocalItem, StoreError> {
        tokio::fs::create_dir_all(self.absolute(path)).await?;
        let item = self.stat_required(path).await?;
        if !item.item_type.is_directory() {
            return Err(StoreError::Conflict(format!("{path} exists and is not a directory")));
        }
        debug!(inode = item.inode, "Directory created");
        Ok(item)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn unlink(&self, path: &ItemPath, permanent: bool) -> Result<(), StoreError> {
        if path.is_root() {
            return Err(StoreError::Invariant("refusing to unlink the sync root".into()));
        }
        let abs = self.absolute(path);
        let meta = match tokio::fs::symlink_metadata(&abs).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotFound(path.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if permanent {
            if meta.is_dir() {
                tokio::fs::remove_dir_all(&abs).await?;
            } else {
                tokio::fs::remove_file(&abs).await?;
            }
            debug!("Entry removed permanently");
        } else {
            let destination = self.trash_destination(path.name()).await?;
            tokio::fs::rename(&abs, &destination).await?;
            debug!(trash = %destination.display(), "Entry moved to local trash");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn rename(&self, from: &ItemPath, to: &ItemPath) -> Result<LocalItem, StoreError> {
        let abs_from = self.absolute(from);
        let abs_to = self.absolute(to);

        let source_exists = tokio::fs::try_exists(&abs_from).await?;
        let target = self.stat(to).await?;
        match (source_exists, target) {
            (false, Some(existing)) => {
                debug!("Rename already applied");
                return Ok(existing);
            }
            (false, None) => return Err(StoreError::NotFound(from.to_string())),
            (true, Some(_)) => return Err(StoreError::Conflict(to.to_string())),
            (true, None) => {}
        }

        if let Some(parent) = abs_to.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&abs_from, &abs_to).await?;
        self.stat_required(to).await
    }

    #[instrument(skip(self), fields(path = %path, %algorithm))]
    async fn hash(&self, path: &ItemPath, algorithm: HashAlgorithm) -> Result<String, StoreError> {
        let abs = self.absolute(path);
        let digest = match algorithm {
            HashAlgorithm::Sha256 => digest_file::<Sha256>(&abs).await,
            HashAlgorithm::Sha512 => digest_file::<Sha512>(&abs).await,
        };
        digest.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                StoreError::NotFound(path.to_string())
            } else {
                StoreError::Io(e)
            }
        })
    }

    async fn stat(&self, path: &ItemPath) -> Result<Option<LocalItem>, StoreError> {
        match tokio::fs::symlink_metadata(self.absolute(path)).await {
            Ok(meta) => Ok(local_item(path.clone(), &meta)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn absolute(&self, path: &ItemPath) -> PathBuf {
        path.to_local(&self.root)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn p(s: &str) -> ItemPath {
        ItemPath::parse(s).unwrap()
    }

    fn adapter(root: &Path) -> LocalFileSystemAdapter {
        LocalFileSystemAdapter::new(root, ".nimbus-trash", 2)
    }

    #[tokio::test]
    async fn test_walk_builds_tree_and_skips_trash_and_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("docs/deep")).unwrap();
        fs::write(root.join("docs/a.txt"), b"aaa").unwrap();
        fs::write(root.join("docs/deep/b.txt"), b"b").unwrap();
        fs::write(root.join("top.txt"), b"").unwrap();
        fs::create_dir_all(root.join(".nimbus-trash/old")).unwrap();
        std::os::unix::fs::symlink(root.join("top.txt"), root.join("link")).unwrap();

        let tree = adapter(root).get_directory_tree().await.unwrap();

        let paths: Vec<&str> = tree.iter().map(|i| i.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["/docs", "/docs/a.txt", "/docs/deep", "/docs/deep/b.txt", "/top.txt"]
        );
        let a = tree.get(&p("/docs/a.txt")).unwrap();
        assert_eq!(a.item_type, ItemType::File);
        assert_eq!(a.size, 3);
        assert!(a.last_modified > 0);
        assert_eq!(tree.get(&p("/docs")).unwrap().size, 0);
        assert!(tree.is_consistent());
    }

    #[tokio::test]
    async fn test_snapshot_reused_until_change_observed() {
        let dir = tempfile::tempdir().unwrap();
        let (notifier, clock) = ChangeClock::channel();
        let store = adapter(dir.path()).with_clock(clock);

        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        assert_eq!(store.get_directory_tree().await.unwrap().len(), 1);

        // Not observed yet: the cached tree is served
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        assert_eq!(store.get_directory_tree().await.unwrap().len(), 1);

        notifier.touch();
        assert_eq!(store.get_directory_tree().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_without_clock_always_walks() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(dir.path());
        assert!(store.get_directory_tree().await.unwrap().is_empty());
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        assert_eq!(store.get_directory_tree().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mkdir_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(dir.path());
        let item = store.mkdir(&p("/a/b/c")).await.unwrap();
        assert_eq!(item.path, p("/a/b/c"));
        assert_eq!(item.item_type, ItemType::Directory);
        assert!(dir.path().join("a/b/c").is_dir());
    }

    #[tokio::test]
    async fn test_unlink_moves_to_trash() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("d")).unwrap();
        fs::write(dir.path().join("d/f.txt"), b"x").unwrap();
        let store = adapter(dir.path());

        store.unlink(&p("/d"), false).await.unwrap();

        assert!(!dir.path().join("d").exists());
        let trashed: Vec<String> = fs::read_dir(store.trash_path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(trashed.len(), 1);
        assert!(trashed[0].ends_with("_d"));
        assert!(store.get_directory_tree().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unlink_permanent_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("f.txt"), b"x").unwrap();
        let store = adapter(dir.path());

        store.unlink(&p("/f.txt"), true).await.unwrap();
        assert!(!dir.path().join("f.txt").exists());
        assert!(!store.trash_path().exists());

        let err = store.unlink(&p("/f.txt"), true).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_rename_preserves_inode_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        let store = adapter(dir.path());
        let before = store.stat(&p("/a.txt")).await.unwrap().unwrap();

        let moved = store.rename(&p("/a.txt"), &p("/sub/b.txt")).await.unwrap();
        assert_eq!(moved.inode, before.inode);
        assert_eq!(moved.path, p("/sub/b.txt"));

        let replay = store.rename(&p("/a.txt"), &p("/sub/b.txt")).await.unwrap();
        assert_eq!(replay, moved);
    }

    #[tokio::test]
    async fn test_rename_conflict_and_not_found() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"x").unwrap();
        fs::write(dir.path().join("b.txt"), b"y").unwrap();
        let store = adapter(dir.path());

        let err = store.rename(&p("/a.txt"), &p("/b.txt")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = store.rename(&p("/nope"), &p("/c.txt")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_hash_algorithms() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("abc.txt"), b"abc").unwrap();
        let store = adapter(dir.path());

        let sha256 = store.hash(&p("/abc.txt"), HashAlgorithm::Sha256).await.unwrap();
        assert_eq!(
            sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        let sha512 = store.hash(&p("/abc.txt"), HashAlgorithm::Sha512).await.unwrap();
        assert_eq!(sha512.len(), 128);
        assert!(sha512.starts_with("ddaf35a193617aba"));

        let err = store.hash(&p("/missing"), HashAlgorithm::Sha512).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_stat_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = adapter(dir.path());
        assert!(store.stat(&p("/missing")).await.unwrap().is_none());
        assert_eq!(store.absolute(&p("/a/b")), dir.path().join("a/b"));
    }
}
