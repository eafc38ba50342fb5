//! Drive API port (driven/secondary port)
//!
//! The narrow, uuid-addressed interface to the remote storage service. It is
//! the seam behind which chunked encryption and transport live; the remote
//! store adapter builds path semantics, caching and locking on top of it.
//!
//! ## Design Notes
//!
//! - Every entry names its parent by uuid; paths are reconstructed by the
//!   caller from the parent chain.
//! - Trashed entries stay addressable by uuid but are not part of a folder
//!   listing.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{ItemType, RemoteKind, StoreError};

/// One entry of a remote folder listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveEntry {
    pub uuid: Uuid,
    pub parent: Uuid,
    pub name: String,
    #[serde(default)]
    pub trashed: bool,
    pub kind: RemoteKind,
}

impl DriveEntry {
    pub fn item_type(&self) -> ItemType {
        match self.kind {
            RemoteKind::Directory => ItemType::Directory,
            RemoteKind::File(_) => ItemType::File,
        }
    }
}

/// Port trait for the remote storage service
#[async_trait::async_trait]
pub trait IDriveApi: Send + Sync {
    /// Lists every non-trashed descendant of the folder `root`
    async fn list_folder_recursive(&self, root: Uuid) -> Result<Vec<DriveEntry>, StoreError>;

    /// Creates a folder named `name` inside `parent`
    async fn create_folder(&self, parent: Uuid, name: &str) -> Result<Uuid, StoreError>;

    /// Moves an entry to the trash
    async fn trash(&self, uuid: Uuid) -> Result<(), StoreError>;

    /// Deletes an entry and its descendants for good
    async fn delete_permanently(&self, uuid: Uuid) -> Result<(), StoreError>;

    /// Changes the name of an entry in place
    async fn rename(&self, uuid: Uuid, name: &str) -> Result<(), StoreError>;

    /// Moves an entry into another folder, keeping its name
    async fn move_to(&self, uuid: Uuid, parent: Uuid) -> Result<(), StoreError>;

    /// Uploads `source` as `name` inside `parent`
    ///
    /// An existing file of the same name is replaced by a new version that
    /// keeps its uuid.
    async fn upload(&self, parent: Uuid, name: &str, source: &Path)
        -> Result<DriveEntry, StoreError>;

    /// Writes the content of file `uuid` to `destination`
    async fn download(&self, uuid: Uuid, destination: &Path) -> Result<(), StoreError>;
}
