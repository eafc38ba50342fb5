//! Snapshot items for both sides of a sync pair
//!
//! - [`LocalItem`] - one entry of the local directory walk, identified by inode
//! - [`RemoteItem`] - one entry of the remote listing, identified by uuid; its
//!   [`RemoteKind`] is a closed union so only files carry transport metadata

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::newtypes::ItemPath;

/// Whether an entry is a regular file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    File,
    Directory,
}

impl ItemType {
    pub fn is_file(self) -> bool {
        self == ItemType::File
    }

    pub fn is_directory(self) -> bool {
        self == ItemType::Directory
    }
}

// ============================================================================
// LocalItem
// ============================================================================

/// A file or directory observed on the local filesystem
///
/// Timestamps are epoch milliseconds. The inode survives renames on the same
/// volume and is what rename/move detection keys on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalItem {
    pub path: ItemPath,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    pub size: u64,
    pub last_modified: i64,
    pub creation: i64,
    pub inode: u64,
}

// ============================================================================
// RemoteItem
// ============================================================================

/// Storage and encryption metadata of a remote file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileMeta {
    pub size: u64,
    pub bucket: String,
    pub region: String,
    pub key: String,
    pub chunks: u64,
    pub version: u32,
    pub mime: String,
    pub last_modified: i64,
    pub creation: i64,
    /// Content digest as reported by the remote store
    pub hash: Option<String>,
}

/// Directory or file-with-metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RemoteKind {
    Directory,
    File(RemoteFileMeta),
}

/// A file or directory in the remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    pub path: ItemPath,
    pub uuid: Uuid,
    pub name: String,
    pub kind: RemoteKind,
}

impl RemoteItem {
    /// Creates a directory item; the name is taken from the path
    pub fn directory(path: ItemPath, uuid: Uuid) -> Self {
        let name = path.name().to_string();
        Self {
            path,
            uuid,
            name,
            kind: RemoteKind::Directory,
        }
    }

    /// Creates a file item; the name is taken from the path
    pub fn file(path: ItemPath, uuid: Uuid, meta: RemoteFileMeta) -> Self {
        let name = path.name().to_string();
        Self {
            path,
            uuid,
            name,
            kind: RemoteKind::File(meta),
        }
    }

    pub fn item_type(&self) -> ItemType {
        match self.kind {
            RemoteKind::Directory => ItemType::Directory,
            RemoteKind::File(_) => ItemType::File,
        }
    }

    /// File metadata, `None` for directories
    pub fn file_meta(&self) -> Option<&RemoteFileMeta> {
        match &self.kind {
            RemoteKind::File(meta) => Some(meta),
            RemoteKind::Directory => None,
        }
    }

    /// Size in bytes (0 for directories)
    pub fn size(&self) -> u64 {
        self.file_meta().map_or(0, |m| m.size)
    }

    /// Last modification time of a file, `None` for directories
    pub fn last_modified(&self) -> Option<i64> {
        self.file_meta().map(|m| m.last_modified)
    }
}
