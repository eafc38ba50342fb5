//! DirectoryDrive - IDriveApi implementation on a local directory
//!
//! ## Layout
//!
//! ```text
//! <root>/catalog.json      every entry, keyed by uuid
//! <root>/objects/<uuid>    content of each file entry
//! ```
//!
//! ## Design Notes
//!
//! - Folders with a nil parent are roots; sync pairs point at one of them.
//! - Rename and move only edit the catalog, so identities survive them.
//! - Trashing flags an entry; listings skip it together with everything
//!   below it, but it stays addressable by uuid.
//! - Every catalog change is staged on a copy, written to a temporary file
//!   and renamed into place before the in-memory catalog is swapped, all
//!   under one `tokio::sync::Mutex`.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use nimbus_core::domain::{RemoteFileMeta, RemoteKind, StoreError};
use nimbus_core::ports::{DriveEntry, IDriveApi};

use crate::{BUCKET, CHUNK_SIZE, REGION};

const CATALOG: &str = "catalog.json";
const OBJECTS: &str = "objects";
const MIME: &str = "application/octet-stream";

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogEntry {
    parent: Uuid,
    name: String,
    #[serde(default)]
    trashed: bool,
    kind: RemoteKind,
}

impl CatalogEntry {
    fn to_drive_entry(&self, uuid: Uuid) -> DriveEntry {
        DriveEntry {
            uuid,
            parent: self.parent,
            name: self.name.clone(),
            trashed: self.trashed,
            kind: self.kind.clone(),
        }
    }

    fn is_directory(&self) -> bool {
        matches!(self.kind, RemoteKind::Directory)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Catalog {
    entries: BTreeMap<Uuid, CatalogEntry>,
}

impl Catalog {
    fn get(&self, uuid: Uuid) -> Result<&CatalogEntry, StoreError> {
        self.entries
            .get(&uuid)
            .ok_or_else(|| StoreError::NotFound(format!("drive entry {uuid}")))
    }

    /// A live entry: present and not trashed
    fn live(&self, uuid: Uuid) -> Result<&CatalogEntry, StoreError> {
        self.get(uuid)
            .ok()
            .filter(|entry| !entry.trashed)
            .ok_or_else(|| StoreError::NotFound(format!("drive entry {uuid}")))
    }

    /// A live folder that can receive children
    fn folder(&self, uuid: Uuid) -> Result<&CatalogEntry, StoreError> {
        let entry = self.live(uuid)?;
        if !entry.is_directory() {
            return Err(StoreError::Invariant(format!("{uuid} is not a folder")));
        }
        Ok(entry)
    }

    fn child_named(&self, parent: Uuid, name: &str) -> Option<(Uuid, &CatalogEntry)> {
        self.entries
            .iter()
            .find(|(_, e)| !e.trashed && e.parent == parent && e.name == name)
            .map(|(uuid, e)| (*uuid, e))
    }

    /// Fails when a live sibling other than `except` already uses `name`
    fn ensure_free(&self, parent: Uuid, name: &str, except: Option<Uuid>) -> Result<(), StoreError> {
        match self.child_named(parent, name) {
            Some((uuid, _)) if Some(uuid) != except => Err(StoreError::Conflict(format!(
                "{name} already exists in {parent}"
            ))),
            _ => Ok(()),
        }
    }

    /// Child uuids per parent, optionally skipping trashed entries
    fn children(&self, include_trashed: bool) -> HashMap<Uuid, Vec<Uuid>> {
        let mut children: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for (uuid, entry) in &self.entries {
            if include_trashed || !entry.trashed {
                children.entry(entry.parent).or_default().push(*uuid);
            }
        }
        children
    }

    /// `uuid` and everything below it, breadth first
    fn subtree(&self, uuid: Uuid, include_trashed: bool) -> Vec<Uuid> {
        let children = self.children(include_trashed);
        let mut seen = HashSet::from([uuid]);
        let mut out = Vec::new();
        let mut queue = VecDeque::from([uuid]);
        while let Some(current) = queue.pop_front() {
            out.push(current);
            for kid in children.get(&current).into_iter().flatten() {
                if seen.insert(*kid) {
                    queue.push_back(*kid);
                }
            }
        }
        out
    }

    /// Whether `uuid` sits somewhere below `ancestor`
    fn is_below(&self, uuid: Uuid, ancestor: Uuid) -> bool {
        let mut current = uuid;
        for _ in 0..self.entries.len() {
            match self.entries.get(&current) {
                Some(entry) if entry.parent == ancestor => return true,
                Some(entry) => current = entry.parent,
                None => return false,
            }
        }
        false
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(StoreError::Invariant(format!("invalid entry name {name:?}")));
    }
    Ok(())
}

// ============================================================================
// DirectoryDrive
// ============================================================================

/// Drive stored in a local directory
pub struct DirectoryDrive {
    root: PathBuf,
    catalog: Mutex<Catalog>,
}

impl DirectoryDrive {
    /// Opens (or initializes) the drive stored at `root`
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or the catalog
    /// cannot be read
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join(OBJECTS)).await?;

        let catalog: Catalog = match tokio::fs::read(root.join(CATALOG)).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => Catalog::default(),
            Err(e) => return Err(e.into()),
        };
        info!(root = %root.display(), entries = catalog.entries.len(), "Drive opened");

        Ok(Self {
            root,
            catalog: Mutex::new(catalog),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Creates a new top-level folder
    pub async fn create_root(&self, name: &str) -> Result<Uuid, StoreError> {
        validate_name(name)?;
        let mut catalog = self.catalog.lock().await;
        catalog.ensure_free(Uuid::nil(), name, None)?;

        let uuid = Uuid::new_v4();
        let mut next = catalog.clone();
        next.entries.insert(uuid, folder_entry(Uuid::nil(), name));
        self.persist(&next).await?;
        *catalog = next;

        info!(%uuid, name, "Root folder created");
        Ok(uuid)
    }

    /// Makes sure a top-level folder with the given uuid exists
    ///
    /// Returns `true` when it had to be created.
    pub async fn ensure_root(&self, uuid: Uuid, name: &str) -> Result<bool, StoreError> {
        validate_name(name)?;
        let mut catalog = self.catalog.lock().await;
        if let Some(entry) = catalog.entries.get(&uuid) {
            if entry.trashed || !entry.is_directory() {
                return Err(StoreError::Invariant(format!(
                    "{uuid} exists but is not a live folder"
                )));
            }
            return Ok(false);
        }
        catalog.ensure_free(Uuid::nil(), name, None)?;

        let mut next = catalog.clone();
        next.entries.insert(uuid, folder_entry(Uuid::nil(), name));
        self.persist(&next).await?;
        *catalog = next;

        info!(%uuid, name, "Root folder created");
        Ok(true)
    }

    /// Looks up any entry, trashed or not
    pub async fn entry(&self, uuid: Uuid) -> Option<DriveEntry> {
        let catalog = self.catalog.lock().await;
        catalog
            .entries
            .get(&uuid)
            .map(|entry| entry.to_drive_entry(uuid))
    }

    fn blob_path(&self, uuid: Uuid) -> PathBuf {
        self.root.join(OBJECTS).join(uuid.to_string())
    }

    async fn persist(&self, catalog: &Catalog) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(catalog)?;
        let target = self.root.join(CATALOG);
        let tmp = self.root.join(format!("{CATALOG}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    /// Records a staged blob as the content of `name` in `parent`
    async fn register_upload(
        &self,
        parent: Uuid,
        name: &str,
        staged: &Path,
        size: u64,
        digest: String,
        last_modified: i64,
    ) -> Result<DriveEntry, StoreError> {
        let mut catalog = self.catalog.lock().await;
        catalog.folder(parent)?;

        let now = Utc::now().timestamp_millis();
        let (uuid, version, creation) = match catalog.child_named(parent, name) {
            Some((uuid, entry)) => match &entry.kind {
                RemoteKind::File(meta) => (uuid, meta.version + 1, meta.creation),
                RemoteKind::Directory => {
                    return Err(StoreError::Conflict(format!(
                        "{name} is a folder in {parent}"
                    )))
                }
            },
            None => (Uuid::new_v4(), 1, now),
        };

        let meta = RemoteFileMeta {
            size,
            bucket: BUCKET.to_string(),
            region: REGION.to_string(),
            key: Uuid::new_v4().simple().to_string(),
            chunks: size.div_ceil(CHUNK_SIZE),
            version,
            mime: MIME.to_string(),
            last_modified,
            creation,
            hash: Some(digest),
        };
        let entry = CatalogEntry {
            parent,
            name: name.to_string(),
            trashed: false,
            kind: RemoteKind::File(meta),
        };

        tokio::fs::rename(staged, self.blob_path(uuid)).await?;
        let mut next = catalog.clone();
        next.entries.insert(uuid, entry.clone());
        self.persist(&next).await?;
        *catalog = next;

        Ok(entry.to_drive_entry(uuid))
    }
}

fn folder_entry(parent: Uuid, name: &str) -> CatalogEntry {
    CatalogEntry {
        parent,
        name: name.to_string(),
        trashed: false,
        kind: RemoteKind::Directory,
    }
}

/// Copies `source` to `destination`, returning size and sha512 hex digest
async fn copy_and_digest(source: &Path, destination: &Path) -> Result<(u64, String), StoreError> {
    let mut input = tokio::fs::File::open(source).await?;
    let mut output = tokio::fs::File::create(destination).await?;
    let mut hasher = Sha512::new();
    let mut buf = vec![0u8; 64 * 1024];
    let mut size = 0u64;

    loop {
        let n = input.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        output.write_all(&buf[..n]).await?;
        size += n as u64;
    }
    output.flush().await?;

    let digest = hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>();
    Ok((size, digest))
}

// ============================================================================
// IDriveApi implementation
// ============================================================================

#[async_trait::async_trait]
impl IDriveApi for DirectoryDrive {
    async fn list_folder_recursive(&self, root: Uuid) -> Result<Vec<DriveEntry>, StoreError> {
        let catalog = self.catalog.lock().await;
        catalog.folder(root)?;

        let entries: Vec<DriveEntry> = catalog
            .subtree(root, false)
            .into_iter()
            .filter(|uuid| *uuid != root)
            .filter_map(|uuid| catalog.entries.get(&uuid).map(|e| e.to_drive_entry(uuid)))
            .collect();
        debug!(%root, entries = entries.len(), "Folder listed");
        Ok(entries)
    }

    #[instrument(skip(self))]
    async fn create_folder(&self, parent: Uuid, name: &str) -> Result<Uuid, StoreError> {
        validate_name(name)?;
        let mut catalog = self.catalog.lock().await;
        catalog.folder(parent)?;
        catalog.ensure_free(parent, name, None)?;

        let uuid = Uuid::new_v4();
        let mut next = catalog.clone();
        next.entries.insert(uuid, folder_entry(parent, name));
        self.persist(&next).await?;
        *catalog = next;

        debug!(%uuid, "Folder created");
        Ok(uuid)
    }

    #[instrument(skip(self))]
    async fn trash(&self, uuid: Uuid) -> Result<(), StoreError> {
        let mut catalog = self.catalog.lock().await;
        if catalog.get(uuid)?.trashed {
            return Ok(());
        }

        let mut next = catalog.clone();
        if let Some(entry) = next.entries.get_mut(&uuid) {
            entry.trashed = true;
        }
        self.persist(&next).await?;
        *catalog = next;

        debug!("Entry trashed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_permanently(&self, uuid: Uuid) -> Result<(), StoreError> {
        let mut catalog = self.catalog.lock().await;
        catalog.get(uuid)?;

        let doomed = catalog.subtree(uuid, true);
        let mut next = catalog.clone();
        let mut blobs = Vec::new();
        for id in &doomed {
            if let Some(entry) = next.entries.remove(id) {
                if !entry.is_directory() {
                    blobs.push(*id);
                }
            }
        }
        self.persist(&next).await?;
        *catalog = next;

        for id in blobs {
            match tokio::fs::remove_file(self.blob_path(id)).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(removed = doomed.len(), "Entry deleted permanently");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rename(&self, uuid: Uuid, name: &str) -> Result<(), StoreError> {
        validate_name(name)?;
        let mut catalog = self.catalog.lock().await;
        let parent = catalog.live(uuid)?.parent;
        catalog.ensure_free(parent, name, Some(uuid))?;

        let mut next = catalog.clone();
        if let Some(entry) = next.entries.get_mut(&uuid) {
            entry.name = name.to_string();
        }
        self.persist(&next).await?;
        *catalog = next;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn move_to(&self, uuid: Uuid, parent: Uuid) -> Result<(), StoreError> {
        let mut catalog = self.catalog.lock().await;
        let name = catalog.live(uuid)?.name.clone();
        catalog.folder(parent)?;
        if parent == uuid || catalog.is_below(parent, uuid) {
            return Err(StoreError::Invariant(format!(
                "cannot move {uuid} below itself"
            )));
        }
        catalog.ensure_free(parent, &name, Some(uuid))?;

        let mut next = catalog.clone();
        if let Some(entry) = next.entries.get_mut(&uuid) {
            entry.parent = parent;
        }
        self.persist(&next).await?;
        *catalog = next;
        Ok(())
    }

    #[instrument(skip(self, source))]
    async fn upload(
        &self,
        parent: Uuid,
        name: &str,
        source: &Path,
    ) -> Result<DriveEntry, StoreError> {
        validate_name(name)?;
        let metadata = tokio::fs::metadata(source).await?;
        if !metadata.is_file() {
            return Err(StoreError::Invariant(format!(
                "{} is not a regular file",
                source.display()
            )));
        }
        let last_modified = metadata
            .modified()
            .map(|t| DateTime::<Utc>::from(t).timestamp_millis())
            .unwrap_or_else(|_| Utc::now().timestamp_millis());

        let staged = self.root.join(OBJECTS).join(format!(".{}.part", Uuid::new_v4()));
        let registered = match copy_and_digest(source, &staged).await {
            Ok((size, digest)) => {
                self.register_upload(parent, name, &staged, size, digest, last_modified)
                    .await
            }
            Err(e) => Err(e),
        };

        match registered {
            Ok(entry) => {
                debug!(uuid = %entry.uuid, "File stored");
                Ok(entry)
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&staged).await {
                    debug!(error = %cleanup, "Staged blob already gone");
                }
                Err(e)
            }
        }
    }

    #[instrument(skip(self, destination))]
    async fn download(&self, uuid: Uuid, destination: &Path) -> Result<(), StoreError> {
        {
            let catalog = self.catalog.lock().await;
            if catalog.live(uuid)?.is_directory() {
                return Err(StoreError::Invariant(format!("{uuid} is a folder")));
            }
        }

        let dir = destination.parent().ok_or_else(|| {
            StoreError::Invariant(format!("{} has no parent", destination.display()))
        })?;
        let part = dir.join(format!(".{uuid}.part"));
        if let Err(e) = tokio::fs::copy(self.blob_path(uuid), &part).await {
            if let Err(cleanup) = tokio::fs::remove_file(&part).await {
                debug!(error = %cleanup, "No partial download to remove");
            }
            return Err(e.into());
        }
        tokio::fs::rename(&part, destination).await?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
