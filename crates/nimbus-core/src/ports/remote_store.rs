//! Remote store port (driven/secondary port)
//!
//! The remote counterpart of [`ILocalStore`](super::ILocalStore). An
//! implementation keeps a cache of the last remote snapshot so paths can be
//! resolved to uuids without another listing, and updates that cache in
//! place as it mutates the remote.

use std::path::Path;

use uuid::Uuid;

use crate::domain::{ItemPath, ItemType, RemoteItem, RemoteTree, StoreError};

/// Port trait for remote drive operations addressed by path
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Lists the whole remote sync root into a snapshot (and refreshes the cache)
    async fn get_directory_tree(&self) -> Result<RemoteTree, StoreError>;

    /// Resolves a path to its uuid
    ///
    /// The root path resolves to the pair's remote folder. `None` means the
    /// path is absent (or has a different type than requested); it is not
    /// an error.
    async fn path_to_item_uuid(&self, path: &ItemPath, item_type: Option<ItemType>)
        -> Option<Uuid>;

    /// Creates a directory and any missing ancestors, returning its uuid
    async fn mkdir(&self, path: &ItemPath) -> Result<Uuid, StoreError>;

    /// Removes an entry; moves it to the remote trash unless `permanent`
    async fn unlink(
        &self,
        path: &ItemPath,
        item_type: Option<ItemType>,
        permanent: bool,
    ) -> Result<(), StoreError>;

    /// Renames and/or moves an entry, rekeying the cache in place
    async fn rename(&self, from: &ItemPath, to: &ItemPath) -> Result<(), StoreError>;

    /// Uploads the local file at `source` to `path`; the parent must exist
    async fn upload(&self, path: &ItemPath, source: &Path) -> Result<RemoteItem, StoreError>;

    /// Downloads the file at `path` into `destination`
    ///
    /// The written file's modification time is set to the remote one.
    async fn download(&self, path: &ItemPath, destination: &Path) -> Result<(), StoreError>;
}
