//! Deltas and completed tasks
//!
//! A [`Delta`] is one detected discrepancy between the local and remote
//! state, tagged by the operation that resolves it. A [`DoneTask`] is a delta
//! that executed successfully, annotated with whatever the mutation returned
//! so the in-memory trees can be updated without re-scanning.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::item::{ItemType, LocalItem, RemoteItem};
use super::newtypes::ItemPath;

/// The side of a sync pair an operation mutates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Local,
    Remote,
}

/// One operation needed to reconcile local and remote state
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Delta {
    CreateLocalDirectory { path: ItemPath },
    CreateRemoteDirectory { path: ItemPath },
    DeleteLocalDirectory { path: ItemPath },
    DeleteLocalFile { path: ItemPath },
    DeleteRemoteDirectory { path: ItemPath },
    DeleteRemoteFile { path: ItemPath },
    MoveLocalDirectory { from: ItemPath, to: ItemPath },
    MoveLocalFile { from: ItemPath, to: ItemPath },
    MoveRemoteDirectory { from: ItemPath, to: ItemPath },
    MoveRemoteFile { from: ItemPath, to: ItemPath },
    RenameLocalDirectory { from: ItemPath, to: ItemPath },
    RenameLocalFile { from: ItemPath, to: ItemPath },
    RenameRemoteDirectory { from: ItemPath, to: ItemPath },
    RenameRemoteFile { from: ItemPath, to: ItemPath },
    UploadFile { path: ItemPath },
    DownloadFile { path: ItemPath },
}

impl Delta {
    /// Rename of an entry on `target`, variant chosen by `item_type`
    pub fn rename(target: Side, item_type: ItemType, from: ItemPath, to: ItemPath) -> Delta {
        match (target, item_type) {
            (Side::Local, ItemType::File) => Delta::RenameLocalFile { from, to },
            (Side::Local, ItemType::Directory) => Delta::RenameLocalDirectory { from, to },
            (Side::Remote, ItemType::File) => Delta::RenameRemoteFile { from, to },
            (Side::Remote, ItemType::Directory) => Delta::RenameRemoteDirectory { from, to },
        }
    }

    /// Move of an entry on `target` into another directory
    pub fn move_item(target: Side, item_type: ItemType, from: ItemPath, to: ItemPath) -> Delta {
        match (target, item_type) {
            (Side::Local, ItemType::File) => Delta::MoveLocalFile { from, to },
            (Side::Local, ItemType::Directory) => Delta::MoveLocalDirectory { from, to },
            (Side::Remote, ItemType::File) => Delta::MoveRemoteFile { from, to },
            (Side::Remote, ItemType::Directory) => Delta::MoveRemoteDirectory { from, to },
        }
    }

    /// Deletion of an entry on `target`
    pub fn delete(target: Side, item_type: ItemType, path: ItemPath) -> Delta {
        match (target, item_type) {
            (Side::Local, ItemType::File) => Delta::DeleteLocalFile { path },
            (Side::Local, ItemType::Directory) => Delta::DeleteLocalDirectory { path },
            (Side::Remote, ItemType::File) => Delta::DeleteRemoteFile { path },
            (Side::Remote, ItemType::Directory) => Delta::DeleteRemoteDirectory { path },
        }
    }

    /// camelCase kind name, as serialized in the `type` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Delta::CreateLocalDirectory { .. } => "createLocalDirectory",
            Delta::CreateRemoteDirectory { .. } => "createRemoteDirectory",
            Delta::DeleteLocalDirectory { .. } => "deleteLocalDirectory",
            Delta::DeleteLocalFile { .. } => "deleteLocalFile",
            Delta::DeleteRemoteDirectory { .. } => "deleteRemoteDirectory",
            Delta::DeleteRemoteFile { .. } => "deleteRemoteFile",
            Delta::MoveLocalDirectory { .. } => "moveLocalDirectory",
            Delta::MoveLocalFile { .. } => "moveLocalFile",
            Delta::MoveRemoteDirectory { .. } => "moveRemoteDirectory",
            Delta::MoveRemoteFile { .. } => "moveRemoteFile",
            Delta::RenameLocalDirectory { .. } => "renameLocalDirectory",
            Delta::RenameLocalFile { .. } => "renameLocalFile",
            Delta::RenameRemoteDirectory { .. } => "renameRemoteDirectory",
            Delta::RenameRemoteFile { .. } => "renameRemoteFile",
            Delta::UploadFile { .. } => "uploadFile",
            Delta::DownloadFile { .. } => "downloadFile",
        }
    }

    /// Side whose state this delta mutates
    pub fn target(&self) -> Side {
        match self {
            Delta::CreateLocalDirectory { .. }
            | Delta::DeleteLocalDirectory { .. }
            | Delta::DeleteLocalFile { .. }
            | Delta::MoveLocalDirectory { .. }
            | Delta::MoveLocalFile { .. }
            | Delta::RenameLocalDirectory { .. }
            | Delta::RenameLocalFile { .. }
            | Delta::DownloadFile { .. } => Side::Local,
            Delta::CreateRemoteDirectory { .. }
            | Delta::DeleteRemoteDirectory { .. }
            | Delta::DeleteRemoteFile { .. }
            | Delta::MoveRemoteDirectory { .. }
            | Delta::MoveRemoteFile { .. }
            | Delta::RenameRemoteDirectory { .. }
            | Delta::RenameRemoteFile { .. }
            | Delta::UploadFile { .. } => Side::Remote,
        }
    }

    /// `(from, to)` for renames and moves
    pub fn relocation(&self) -> Option<(&ItemPath, &ItemPath)> {
        match self {
            Delta::MoveLocalDirectory { from, to }
            | Delta::MoveLocalFile { from, to }
            | Delta::MoveRemoteDirectory { from, to }
            | Delta::MoveRemoteFile { from, to }
            | Delta::RenameLocalDirectory { from, to }
            | Delta::RenameLocalFile { from, to }
            | Delta::RenameRemoteDirectory { from, to }
            | Delta::RenameRemoteFile { from, to } => Some((from, to)),
            _ => None,
        }
    }

    /// Path the delta is reported under (`to` for renames and moves)
    pub fn path(&self) -> &ItemPath {
        match self {
            Delta::CreateLocalDirectory { path }
            | Delta::CreateRemoteDirectory { path }
            | Delta::DeleteLocalDirectory { path }
            | Delta::DeleteLocalFile { path }
            | Delta::DeleteRemoteDirectory { path }
            | Delta::DeleteRemoteFile { path }
            | Delta::UploadFile { path }
            | Delta::DownloadFile { path } => path,
            Delta::MoveLocalDirectory { to, .. }
            | Delta::MoveLocalFile { to, .. }
            | Delta::MoveRemoteDirectory { to, .. }
            | Delta::MoveRemoteFile { to, .. }
            | Delta::RenameLocalDirectory { to, .. }
            | Delta::RenameLocalFile { to, .. }
            | Delta::RenameRemoteDirectory { to, .. }
            | Delta::RenameRemoteFile { to, .. } => to,
        }
    }

    /// Ordering depth: deepest path the delta touches
    ///
    /// Executing ascending by this depth guarantees parents are created or
    /// relocated before anything placed beneath them.
    pub fn depth(&self) -> usize {
        match self.relocation() {
            Some((from, to)) => from.depth().max(to.depth()),
            None => self.path().depth(),
        }
    }

    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            Delta::DeleteLocalDirectory { .. }
                | Delta::DeleteLocalFile { .. }
                | Delta::DeleteRemoteDirectory { .. }
                | Delta::DeleteRemoteFile { .. }
        )
    }

    /// True for renames/moves of directories, whose descendants move along
    pub fn relocates_directory(&self) -> bool {
        matches!(
            self,
            Delta::MoveLocalDirectory { .. }
                | Delta::MoveRemoteDirectory { .. }
                | Delta::RenameLocalDirectory { .. }
                | Delta::RenameRemoteDirectory { .. }
        )
    }
}

impl std::fmt::Display for Delta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.relocation() {
            Some((from, to)) => write!(f, "{} {} -> {}", self.kind(), from, to),
            None => write!(f, "{} {}", self.kind(), self.path()),
        }
    }
}

/// What a successfully executed delta produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum TaskOutcome {
    /// Local mkdir or local rename/move: fresh stat of the resulting entry
    LocalStat { item: LocalItem },
    /// Remote mkdir: uuid of the created (or existing) directory
    RemoteDirectory { uuid: Uuid },
    /// Remote rename/move applied
    Relocated,
    /// Delete applied (moved to trash unless permanent)
    Deleted,
    /// Upload finished; `local_hash` is the digest of the uploaded content
    Uploaded { item: RemoteItem, local_hash: String },
    /// Download finished; `local_hash` is the digest of the written file
    Downloaded { item: LocalItem, local_hash: String },
}

/// A delta together with the outcome of executing it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoneTask {
    pub delta: Delta,
    pub outcome: TaskOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ItemPath {
        ItemPath::parse(s).unwrap()
    }

    #[test]
    fn test_depth_uses_deepest_relocation_end() {
        let mv = Delta::MoveRemoteFile {
            from: p("/f"),
            to: p("/new/dir/f"),
        };
        assert_eq!(mv.depth(), 3);

        let out = Delta::RenameRemoteFile {
            from: p("/a/x"),
            to: p("/x"),
        };
        assert_eq!(out.depth(), 2);
        assert_eq!(Delta::UploadFile { path: p("/a/b") }.depth(), 2);
    }

    #[test]
    fn test_constructors_pick_variant() {
        assert_eq!(
            Delta::rename(Side::Remote, ItemType::Directory, p("/a"), p("/b")),
            Delta::RenameRemoteDirectory {
                from: p("/a"),
                to: p("/b")
            }
        );
        assert_eq!(
            Delta::move_item(Side::Local, ItemType::File, p("/a"), p("/d/a")).kind(),
            "moveLocalFile"
        );
        let delete = Delta::delete(Side::Local, ItemType::Directory, p("/gone"));
        assert!(delete.is_delete());
        assert_eq!(delete.path(), &p("/gone"));
        assert!(!delete.relocates_directory());
    }

    #[test]
    fn test_target_side() {
        assert_eq!(Delta::UploadFile { path: p("/a") }.target(), Side::Remote);
        assert_eq!(Delta::DownloadFile { path: p("/a") }.target(), Side::Local);
        assert_eq!(
            Delta::RenameLocalFile {
                from: p("/a"),
                to: p("/b")
            }
            .target(),
            Side::Local
        );
    }

    #[test]
    fn test_serde_tag_is_camel_case_kind() {
        let delta = Delta::RenameRemoteDirectory {
            from: p("/a"),
            to: p("/b"),
        };
        let json = serde_json::to_value(&delta).unwrap();
        assert_eq!(json["type"], delta.kind());
        assert_eq!(json["from"], "/a");
        assert_eq!(json["to"], "/b");
    }

    #[test]
    fn test_display() {
        let delta = Delta::MoveLocalFile {
            from: p("/a/x"),
            to: p("/b/x"),
        };
        assert_eq!(delta.to_string(), "moveLocalFile /a/x -> /b/x");
        assert_eq!(
            Delta::DeleteRemoteFile { path: p("/gone") }.to_string(),
            "deleteRemoteFile /gone"
        );
    }
}
