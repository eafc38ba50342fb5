//! Remote tree adapter (secondary/driven adapter)
//!
//! Implements [`IRemoteStore`] for one sync pair on top of the uuid-addressed
//! [`IDriveApi`]. The adapter turns paths into uuids through a cache of the
//! last remote snapshot and keeps that cache current as it mutates the
//! remote, so the executor never needs another listing mid-cycle.
//!
//! ## Locking
//!
//! - The tree cache mutex is held across unlink, rename and download, so those
//!   primitives never observe a half-updated cache.
//! - A separate mutex serializes recursive mkdir, so two directories sharing
//!   a missing ancestor do not both create it.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use filetime::FileTime;
use nimbus_core::domain::{ItemPath, ItemType, RemoteItem, RemoteTree, StoreError};
use nimbus_core::ports::{DriveEntry, IDriveApi, IRemoteStore};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

// ============================================================================
// RemoteTreeAdapter struct
// ============================================================================

/// Path-addressed view of one remote sync root
pub struct RemoteTreeAdapter {
    drive: Arc<dyn IDriveApi>,
    root_uuid: Uuid,
    tree: Mutex<RemoteTree>,
    mkdir_lock: Mutex<()>,
}

impl RemoteTreeAdapter {
    /// Create an adapter for the remote folder `root_uuid` with an empty cache.
    pub fn new(drive: Arc<dyn IDriveApi>, root_uuid: Uuid) -> Self {
        Self {
            drive,
            root_uuid,
            tree: Mutex::new(RemoteTree::new()),
            mkdir_lock: Mutex::new(()),
        }
    }

    /// Uuid of the remote folder mirrored by this adapter
    pub fn root_uuid(&self) -> Uuid {
        self.root_uuid
    }

    /// Copy of the current tree cache
    pub async fn cached_tree(&self) -> RemoteTree {
        self.tree.lock().await.clone()
    }

    /// Uuid of the directory at `path` within `tree` (root included)
    fn directory_uuid(&self, tree: &RemoteTree, path: &ItemPath) -> Option<Uuid> {
        if path.is_root() {
            return Some(self.root_uuid);
        }
        tree.get(path)
            .filter(|item| item.item_type().is_directory())
            .map(|item| item.uuid)
    }

    fn parent_uuid(&self, tree: &RemoteTree, path: &ItemPath) -> Result<Uuid, StoreError> {
        let parent = path
            .parent()
            .ok_or_else(|| StoreError::Invariant("the sync root has no parent".into()))?;
        self.directory_uuid(tree, &parent)
            .ok_or_else(|| StoreError::Invariant(format!("parent directory of {path} is missing")))
    }
}

// ============================================================================
// Listing -> tree
// ============================================================================

/// Resolves every entry's path from its parent chain
///
/// Entries whose chain does not reach `root` (orphans, trashed ancestors,
/// cycles) are left out.
fn resolve_paths(root: Uuid, entries: &[DriveEntry]) -> HashMap<Uuid, ItemPath> {
    let by_id: HashMap<Uuid, &DriveEntry> = entries
        .iter()
        .filter(|e| !e.trashed)
        .map(|e| (e.uuid, e))
        .collect();

    let mut resolved: HashMap<Uuid, Option<ItemPath>> = HashMap::new();
    resolved.insert(root, Some(ItemPath::root()));

    for entry in by_id.values() {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut cursor = entry.uuid;
        let base = loop {
            if let Some(known) = resolved.get(&cursor) {
                break known.clone();
            }
            if !visited.insert(cursor) {
                break None;
            }
            match by_id.get(&cursor) {
                Some(e) => {
                    chain.push(*e);
                    cursor = e.parent;
                }
                None => break None,
            }
        };

        let mut current = base;
        for link in chain.into_iter().rev() {
            current = match current {
                Some(parent) => match parent.join(&link.name) {
                    Ok(path) => Some(path),
                    Err(err) => {
                        warn!(uuid = %link.uuid, %err, "Skipping remote entry with invalid name");
                        None
                    }
                },
                None => None,
            };
            resolved.insert(link.uuid, current.clone());
        }
    }

    resolved
        .into_iter()
        .filter(|(id, _)| *id != root)
        .filter_map(|(id, path)| path.map(|p| (id, p)))
        .collect()
}

fn remote_item(path: ItemPath, entry: DriveEntry) -> RemoteItem {
    RemoteItem {
        path,
        uuid: entry.uuid,
        name: entry.name,
        kind: entry.kind,
    }
}

/// Builds a snapshot from a recursive listing of `root`
pub(crate) fn build_tree(root: Uuid, entries: Vec<DriveEntry>) -> RemoteTree {
    let mut paths = resolve_paths(root, &entries);
    let mut tree = RemoteTree::new();
    let mut excluded = 0usize;

    for entry in entries {
        let Some(path) = paths.remove(&entry.uuid) else {
            excluded += 1;
            continue;
        };
        if let Some(existing) = tree.get(&path) {
            warn!(
                %path,
                kept = %existing.uuid,
                dropped = %entry.uuid,
                "Duplicate remote path, keeping the first entry"
            );
            continue;
        }
        tree.insert(remote_item(path, entry));
    }

    if excluded > 0 {
        debug!(excluded, "Remote entries outside the sync root");
    }
    tree
}

// ============================================================================
// IRemoteStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IRemoteStore for RemoteTreeAdapter {
    #[instrument(skip(self), fields(root = %self.root_uuid))]
    async fn get_directory_tree(&self) -> Result<RemoteTree, StoreError> {
        let entries = self.drive.list_folder_recursive(self.root_uuid).await?;
        let listed = entries.len();
        let tree = build_tree(self.root_uuid, entries);
        info!(listed, items = tree.len(), "Remote snapshot taken");

        *self.tree.lock().await = tree.clone();
        Ok(tree)
    }

    async fn path_to_item_uuid(
        &self,
        path: &ItemPath,
        item_type: Option<ItemType>,
    ) -> Option<Uuid> {
        if path.is_root() {
            return match item_type {
                None | Some(ItemType::Directory) => Some(self.root_uuid),
                Some(ItemType::File) => None,
            };
        }
        let tree = self.tree.lock().await;
        tree.get(path)
            .filter(|item| item_type.map_or(true, |t| item.item_type() == t))
            .map(|item| item.uuid)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn mkdir(&self, path: &ItemPath) -> Result<Uuid, StoreError> {
        let _guard = self.mkdir_lock.lock().await;

        let mut current = ItemPath::root();
        let mut current_uuid = self.root_uuid;
        for name in path.components() {
            let next = current.join(name)?;
            let cached = self.tree.lock().await.get(&next).cloned();
            current_uuid = match cached {
                Some(item) if item.item_type().is_directory() => item.uuid,
                Some(_) => {
                    return Err(StoreError::Conflict(format!("{next} exists and is not a directory")))
                }
                None => {
                    let uuid = self.drive.create_folder(current_uuid, name).await?;
                    debug!(path = %next, %uuid, "Remote directory created");
                    self.tree
                        .lock()
                        .await
                        .insert(RemoteItem::directory(next.clone(), uuid));
                    uuid
                }
            };
            current = next;
        }
        Ok(current_uuid)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn unlink(
        &self,
        path: &ItemPath,
        item_type: Option<ItemType>,
        permanent: bool,
    ) -> Result<(), StoreError> {
        let mut tree = self.tree.lock().await;
        let uuid = tree
            .get(path)
            .filter(|item| item_type.map_or(true, |t| item.item_type() == t))
            .map(|item| item.uuid)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

        if permanent {
            self.drive.delete_permanently(uuid).await?;
        } else {
            self.drive.trash(uuid).await?;
        }
        let removed = tree.remove_subtree(path);
        debug!(%uuid, removed = removed.len(), permanent, "Remote entry removed");
        Ok(())
    }

    #[instrument(skip(self), fields(from = %from, to = %to))]
    async fn rename(&self, from: &ItemPath, to: &ItemPath) -> Result<(), StoreError> {
        let mut tree = self.tree.lock().await;

        let Some(item) = tree.get(from).cloned() else {
            if tree.contains(to) {
                debug!("Rename already applied");
                return Ok(());
            }
            return Err(StoreError::NotFound(from.to_string()));
        };
        if tree.contains(to) {
            return Err(StoreError::Conflict(to.to_string()));
        }
        if to.is_within(from) {
            return Err(StoreError::Invariant(format!("cannot move {from} into itself")));
        }

        let renames = from.name() != to.name();
        let moves = from.parent() != to.parent();
        let new_parent = if moves {
            Some(self.parent_uuid(&tree, to)?)
        } else {
            None
        };

        match new_parent {
            None if renames => self.drive.rename(item.uuid, to.name()).await?,
            None => {}
            Some(parent) if !renames => self.drive.move_to(item.uuid, parent).await?,
            Some(parent) => {
                // Two steps; the intermediate location must be free
                let renamed_in_place = from
                    .parent()
                    .map(|p| p.join(to.name()))
                    .transpose()?;
                let free = renamed_in_place.map_or(true, |p| !tree.contains(&p));
                if free {
                    self.drive.rename(item.uuid, to.name()).await?;
                    self.drive.move_to(item.uuid, parent).await?;
                } else {
                    self.drive.move_to(item.uuid, parent).await?;
                    self.drive.rename(item.uuid, to.name()).await?;
                }
            }
        }

        let rekeyed = tree.rekey_subtree(from, to);
        debug!(uuid = %item.uuid, rekeyed, "Remote entry relocated");
        Ok(())
    }

    #[instrument(skip(self, source), fields(path = %path))]
    async fn upload(&self, path: &ItemPath, source: &Path) -> Result<RemoteItem, StoreError> {
        let parent = self.parent_uuid(&*self.tree.lock().await, path)?;
        let entry = self.drive.upload(parent, path.name(), source).await?;
        let item = remote_item(path.clone(), entry);
        debug!(uuid = %item.uuid, size = item.size(), "File uploaded");

        self.tree.lock().await.insert(item.clone());
        Ok(item)
    }

    #[instrument(skip(self, destination), fields(path = %path))]
    async fn download(&self, path: &ItemPath, destination: &Path) -> Result<(), StoreError> {
        let tree = self.tree.lock().await;
        let item = tree
            .get(path)
            .filter(|item| item.item_type().is_file())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;

        self.drive.download(item.uuid, destination).await?;

        if let Some(ms) = item.last_modified() {
            let mtime = FileTime::from_unix_time(ms.div_euclid(1000), (ms.rem_euclid(1000) * 1_000_000) as u32);
            filetime::set_file_mtime(destination, mtime)?;
        }
        debug!(uuid = %item.uuid, size = item.size(), "File downloaded");
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::domain::RemoteKind;
    use nimbus_drive::DirectoryDrive;

    fn p(s: &str) -> ItemPath {
        ItemPath::parse(s).unwrap()
    }

    fn dir_entry(uuid: Uuid, parent: Uuid, name: &str) -> DriveEntry {
        DriveEntry {
            uuid,
            parent,
            name: name.to_string(),
            trashed: false,
            kind: RemoteKind::Directory,
        }
    }

    async fn setup() -> (tempfile::TempDir, Arc<DirectoryDrive>, RemoteTreeAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let drive = Arc::new(DirectoryDrive::open(dir.path().join("drive")).await.unwrap());
        let root = drive.create_root("sync").await.unwrap();
        let adapter = RemoteTreeAdapter::new(drive.clone(), root);
        (dir, drive, adapter)
    }

    // ------------------------------------------------------------------
    // Listing
    // ------------------------------------------------------------------

    #[test]
    fn test_build_tree_excludes_orphans_and_trashed_chains() {
        let root = Uuid::new_v4();
        let (a, b, orphan, trashed, under_trashed) = (
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        let mut gone = dir_entry(trashed, root, "gone");
        gone.trashed = true;
        let entries = vec![
            dir_entry(b, a, "b"),
            dir_entry(a, root, "a"),
            dir_entry(orphan, Uuid::new_v4(), "orphan"),
            gone,
            dir_entry(under_trashed, trashed, "child"),
        ];

        let tree = build_tree(root, entries);

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.path_of(&a), Some(&p("/a")));
        assert_eq!(tree.path_of(&b), Some(&p("/a/b")));
        assert!(tree.is_consistent());
    }

    #[test]
    fn test_build_tree_survives_parent_cycles() {
        let root = Uuid::new_v4();
        let (x, y) = (Uuid::new_v4(), Uuid::new_v4());
        let tree = build_tree(root, vec![dir_entry(x, y, "x"), dir_entry(y, x, "y")]);
        assert!(tree.is_empty());
    }

    #[test]
    fn test_build_tree_keeps_first_duplicate() {
        let root = Uuid::new_v4();
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let tree = build_tree(
            root,
            vec![dir_entry(first, root, "same"), dir_entry(second, root, "same")],
        );
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.get(&p("/same")).unwrap().uuid, first);
    }

    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn test_path_to_item_uuid() {
        let (_dir, _drive, adapter) = setup().await;
        assert_eq!(
            adapter.path_to_item_uuid(&ItemPath::root(), None).await,
            Some(adapter.root_uuid())
        );
        assert_eq!(
            adapter
                .path_to_item_uuid(&ItemPath::root(), Some(ItemType::File))
                .await,
            None
        );

        let uuid = adapter.mkdir(&p("/docs")).await.unwrap();
        assert_eq!(adapter.path_to_item_uuid(&p("/docs"), None).await, Some(uuid));
        assert_eq!(
            adapter
                .path_to_item_uuid(&p("/docs"), Some(ItemType::File))
                .await,
            None
        );
        assert_eq!(adapter.path_to_item_uuid(&p("/missing"), None).await, None);
    }

    #[tokio::test]
    async fn test_mkdir_caches_every_intermediate_directory() {
        let (_dir, _drive, adapter) = setup().await;
        let leaf = adapter.mkdir(&p("/a/b/c")).await.unwrap();

        let cached = adapter.cached_tree().await;
        assert_eq!(cached.len(), 3);
        assert_eq!(cached.get(&p("/a/b/c")).unwrap().uuid, leaf);
        assert!(cached.contains(&p("/a")));
        assert!(cached.contains(&p("/a/b")));

        // The listing agrees with the cache
        let listed = adapter.get_directory_tree().await.unwrap();
        assert_eq!(listed, cached);

        // Existing directories are reused
        assert_eq!(adapter.mkdir(&p("/a/b/c")).await.unwrap(), leaf);
    }

    #[tokio::test]
    async fn test_upload_and_download_round_trip() {
        let (dir, _drive, adapter) = setup().await;
        let source = dir.path().join("source.txt");
        std::fs::write(&source, b"payload").unwrap();

        adapter.mkdir(&p("/docs")).await.unwrap();
        let item = adapter.upload(&p("/docs/f.txt"), &source).await.unwrap();
        assert_eq!(item.path, p("/docs/f.txt"));
        assert_eq!(item.size(), 7);

        let destination = dir.path().join("copy.txt");
        adapter.download(&p("/docs/f.txt"), &destination).await.unwrap();
        assert_eq!(std::fs::read(&destination).unwrap(), b"payload");

        let mtime = FileTime::from_last_modification_time(&std::fs::metadata(&destination).unwrap());
        let remote_ms = item.last_modified().unwrap();
        assert_eq!(mtime.unix_seconds() * 1000 + i64::from(mtime.nanoseconds() / 1_000_000), remote_ms);
    }

    #[tokio::test]
    async fn test_upload_requires_parent() {
        let (dir, _drive, adapter) = setup().await;
        let source = dir.path().join("source.txt");
        std::fs::write(&source, b"x").unwrap();

        let err = adapter.upload(&p("/missing/f.txt"), &source).await.unwrap_err();
        assert!(matches!(err, StoreError::Invariant(_)));
    }

    #[tokio::test]
    async fn test_rename_and_move_rekeys_cache_and_remote() {
        let (_dir, _drive, adapter) = setup().await;
        let a = adapter.mkdir(&p("/a/inner")).await.unwrap();
        adapter.mkdir(&p("/target")).await.unwrap();

        adapter.rename(&p("/a"), &p("/target/b")).await.unwrap();

        let cached = adapter.cached_tree().await;
        assert_eq!(cached.get(&p("/target/b/inner")).unwrap().uuid, a);
        assert!(!cached.contains(&p("/a")));

        let listed = adapter.get_directory_tree().await.unwrap();
        assert_eq!(listed, cached);

        // Replayed rename is a no-op
        adapter.rename(&p("/a"), &p("/target/b")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rename_conflict_and_not_found() {
        let (_dir, _drive, adapter) = setup().await;
        adapter.mkdir(&p("/a")).await.unwrap();
        adapter.mkdir(&p("/b")).await.unwrap();

        let err = adapter.rename(&p("/a"), &p("/b")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let err = adapter.rename(&p("/x"), &p("/y")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unlink_trashes_and_drops_subtree() {
        let (_dir, _drive, adapter) = setup().await;
        adapter.mkdir(&p("/a/b")).await.unwrap();

        let err = adapter
            .unlink(&p("/a"), Some(ItemType::File), false)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        adapter
            .unlink(&p("/a"), Some(ItemType::Directory), false)
            .await
            .unwrap();
        assert!(adapter.cached_tree().await.is_empty());
        assert!(adapter.get_directory_tree().await.unwrap().is_empty());
    }
}
