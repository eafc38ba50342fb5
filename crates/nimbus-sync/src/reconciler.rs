//! State reconciler
//!
//! Folds the outcome of an execution into the snapshots taken at the start
//! of the cycle, producing the state the next cycle diffs against. Nothing
//! is re-walked or re-listed: every completed task is applied to the tree of
//! the side it mutated.
//!
//! Tasks are applied deepest first. Deltas carry pre-execution paths, so a
//! child relocated out of a directory must be rekeyed before the directory
//! itself is, or the child would be carried along to the wrong place.
//!
//! Failed deltas are handled by [`restore_failed`]: the committed state is
//! nudged back so the next diff rediscovers the same discrepancy instead of
//! reading it as the opposite change.

use std::cmp::Reverse;

use nimbus_core::domain::{Delta, DoneTask, ItemPath, RemoteItem, Side, TaskOutcome};
use nimbus_core::ports::PersistedState;
use tracing::{debug, trace};

use crate::executor::FailedTask;
use crate::SyncError;

/// Applies completed tasks to `state`
///
/// `state` holds the current trees of the cycle and the hash cache to carry
/// forward. On error `state` may be partially updated and must be discarded.
pub fn reconcile(state: &mut PersistedState, done: &[DoneTask]) -> Result<(), SyncError> {
    let mut ordered: Vec<&DoneTask> = done.iter().collect();
    ordered.sort_by_key(|task| Reverse(task.delta.depth()));

    for task in ordered {
        apply(state, task)?;
    }

    if !state.local.is_consistent() {
        return Err(SyncError::InconsistentTree { side: Side::Local });
    }
    if !state.remote.is_consistent() {
        return Err(SyncError::InconsistentTree { side: Side::Remote });
    }

    debug!(
        tasks = done.len(),
        local_items = state.local.len(),
        remote_items = state.remote.len(),
        hashes = state.hashes.len(),
        "Reconciled completed tasks"
    );
    Ok(())
}

fn apply(state: &mut PersistedState, task: &DoneTask) -> Result<(), SyncError> {
    let delta = &task.delta;
    trace!(%delta, "Reconciling");

    match (delta, &task.outcome) {
        (Delta::CreateLocalDirectory { .. }, TaskOutcome::LocalStat { item }) => {
            state.local.insert(item.clone());
        }
        (Delta::CreateRemoteDirectory { path }, TaskOutcome::RemoteDirectory { uuid }) => {
            state
                .remote
                .insert(RemoteItem::directory(path.clone(), *uuid));
        }

        (
            Delta::DeleteLocalDirectory { path } | Delta::DeleteLocalFile { path },
            TaskOutcome::Deleted,
        ) => {
            state.local.remove_subtree(path);
            state.hashes.purge_subtree(path);
        }
        (
            Delta::DeleteRemoteDirectory { path } | Delta::DeleteRemoteFile { path },
            TaskOutcome::Deleted,
        ) => {
            state.remote.remove_subtree(path);
            state.hashes.purge_subtree(path);
        }

        (
            Delta::RenameLocalDirectory { from, to }
            | Delta::RenameLocalFile { from, to }
            | Delta::MoveLocalDirectory { from, to }
            | Delta::MoveLocalFile { from, to },
            TaskOutcome::LocalStat { item },
        ) => {
            state.local.rekey_subtree(from, to);
            state.local.insert(item.clone());
            state.hashes.rekey_subtree(from, to);
        }
        (
            Delta::RenameRemoteDirectory { from, to }
            | Delta::RenameRemoteFile { from, to }
            | Delta::MoveRemoteDirectory { from, to }
            | Delta::MoveRemoteFile { from, to },
            TaskOutcome::Relocated,
        ) => {
            state.remote.rekey_subtree(from, to);
            state.hashes.rekey_subtree(from, to);
        }

        (Delta::UploadFile { path }, TaskOutcome::Uploaded { item, local_hash }) => {
            state.remote.insert(item.clone());
            state.hashes.insert(path.clone(), local_hash.clone());
        }
        (Delta::DownloadFile { path }, TaskOutcome::Downloaded { item, local_hash }) => {
            state.local.insert(item.clone());
            state.hashes.insert(path.clone(), local_hash.clone());
        }

        _ => {
            return Err(SyncError::UnexpectedOutcome {
                delta: delta.to_string(),
            })
        }
    }
    Ok(())
}

/// Rewinds `state` so the next diff plans every failed delta again
///
/// - a failed delete puts the deleted side's previous entries back, so the
///   disappearance is still visible next cycle
/// - a failed relocation moves the already-relocated side back to `from`,
///   so the identity is found at its old path again
/// - a failed upload drops the cached digest, so a content change is not
///   mistaken for a timestamp-only change, and puts the committed local
///   entry back, so a replaced file is still seen as replaced
///
/// Creates and downloads need nothing: the next diff sees the same presence
/// mismatch.
pub fn restore_failed(state: &mut PersistedState, previous: &PersistedState, failed: &[FailedTask]) {
    let mut ordered: Vec<&FailedTask> = failed.iter().collect();
    ordered.sort_by_key(|task| Reverse(task.delta.depth()));

    for task in ordered {
        match &task.delta {
            Delta::DeleteRemoteDirectory { path } | Delta::DeleteRemoteFile { path } => {
                for path in previous.local.subtree_paths(path) {
                    if let Some(item) = previous.local.get(&path) {
                        state.local.insert(item.clone());
                    }
                }
            }
            Delta::DeleteLocalDirectory { path } | Delta::DeleteLocalFile { path } => {
                for path in previous.remote.subtree_paths(path) {
                    if let Some(item) = previous.remote.get(&path) {
                        state.remote.insert(item.clone());
                    }
                }
            }
            Delta::RenameRemoteDirectory { from, to }
            | Delta::RenameRemoteFile { from, to }
            | Delta::MoveRemoteDirectory { from, to }
            | Delta::MoveRemoteFile { from, to } => {
                state.local.rekey_subtree(to, from);
            }
            Delta::RenameLocalDirectory { from, to }
            | Delta::RenameLocalFile { from, to }
            | Delta::MoveLocalDirectory { from, to }
            | Delta::MoveLocalFile { from, to } => {
                state.remote.rekey_subtree(to, from);
            }
            Delta::UploadFile { path } => {
                state.hashes.purge_subtree(path);
                restore_local_entry(state, previous, path);
            }
            Delta::CreateLocalDirectory { .. }
            | Delta::CreateRemoteDirectory { .. }
            | Delta::DownloadFile { .. } => {}
        }
        debug!(delta = %task.delta, "Kept failed delta pending");
    }
}

/// Puts the committed local entry of `path` back
///
/// A file that replaced another one may carry an older mtime than the
/// remote copy; only the changed identity at `path` tells the next diff to
/// compare content. Skipped when the committed identity now lives elsewhere.
fn restore_local_entry(state: &mut PersistedState, previous: &PersistedState, path: &ItemPath) {
    let Some(item) = previous.local.get(path) else {
        return;
    };
    let moved_away = state
        .local
        .path_of(&item.inode)
        .is_some_and(|current| current != path);
    if !moved_away {
        state.local.insert(item.clone());
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::domain::{
        HashCache, ItemType, LocalItem, LocalTree, RemoteFileMeta, RemoteTree,
    };
    use uuid::Uuid;

    fn p(s: &str) -> ItemPath {
        ItemPath::parse(s).unwrap()
    }

    fn local(path: &str, inode: u64, item_type: ItemType) -> LocalItem {
        LocalItem {
            path: p(path),
            item_type,
            size: 1,
            last_modified: 1_000,
            creation: 1_000,
            inode,
        }
    }

    fn meta() -> RemoteFileMeta {
        RemoteFileMeta {
            size: 1,
            bucket: "nimbus-local".into(),
            region: "local".into(),
            key: "k".into(),
            chunks: 1,
            version: 1,
            mime: "application/octet-stream".into(),
            last_modified: 1_000,
            creation: 1_000,
            hash: None,
        }
    }

    fn done(delta: Delta, outcome: TaskOutcome) -> DoneTask {
        DoneTask { delta, outcome }
    }

    fn failed(delta: Delta) -> FailedTask {
        FailedTask {
            delta,
            error: "boom".into(),
        }
    }

    /// Remote tree `/a`, `/a/x`, `/a/sub`, `/a/sub/y`, `/f`
    fn remote_tree() -> (RemoteTree, Vec<Uuid>) {
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let tree = RemoteTree::from_items([
            RemoteItem::directory(p("/a"), ids[0]),
            RemoteItem::file(p("/a/x"), ids[1], meta()),
            RemoteItem::directory(p("/a/sub"), ids[2]),
            RemoteItem::file(p("/a/sub/y"), ids[3], meta()),
            RemoteItem::file(p("/f"), ids[4], meta()),
        ]);
        (tree, ids)
    }

    fn state_with_remote(remote: RemoteTree) -> PersistedState {
        PersistedState {
            local: LocalTree::new(),
            remote,
            hashes: HashCache::new(),
        }
    }

    #[test]
    fn test_directory_rename_rewrites_prefix_in_both_indices() {
        let (remote, ids) = remote_tree();
        let mut state = state_with_remote(remote);

        reconcile(
            &mut state,
            &[done(
                Delta::RenameRemoteDirectory {
                    from: p("/a"),
                    to: p("/b"),
                },
                TaskOutcome::Relocated,
            )],
        )
        .unwrap();

        assert_eq!(state.remote.len(), 5);
        for (old, new, id) in [
            ("/a", "/b", ids[0]),
            ("/a/x", "/b/x", ids[1]),
            ("/a/sub", "/b/sub", ids[2]),
            ("/a/sub/y", "/b/sub/y", ids[3]),
        ] {
            assert!(!state.remote.contains(&p(old)), "{old} still present");
            assert_eq!(state.remote.get(&p(new)).unwrap().uuid, id);
            assert_eq!(state.remote.path_of(&id), Some(&p(new)));
        }
        assert_eq!(state.remote.get(&p("/b/sub")).unwrap().name, "sub");
        assert_eq!(state.remote.get(&p("/b")).unwrap().name, "b");
        assert!(state.remote.contains(&p("/f")));
    }

    #[test]
    fn test_child_relocated_before_its_parent() {
        let (remote, ids) = remote_tree();
        let mut state = state_with_remote(remote);

        // Listed shallow first; the reconciler must still apply the child first
        reconcile(
            &mut state,
            &[
                done(
                    Delta::RenameRemoteDirectory {
                        from: p("/a"),
                        to: p("/c"),
                    },
                    TaskOutcome::Relocated,
                ),
                done(
                    Delta::MoveRemoteFile {
                        from: p("/a/x"),
                        to: p("/x"),
                    },
                    TaskOutcome::Relocated,
                ),
            ],
        )
        .unwrap();

        assert_eq!(state.remote.path_of(&ids[1]), Some(&p("/x")));
        assert_eq!(state.remote.path_of(&ids[3]), Some(&p("/c/sub/y")));
        assert!(!state.remote.contains(&p("/c/x")));
    }

    #[test]
    fn test_delete_removes_subtree_and_hashes() {
        let (remote, _) = remote_tree();
        let mut state = state_with_remote(remote);
        state.hashes.insert(p("/a/x"), "hx");
        state.hashes.insert(p("/a/sub/y"), "hy");
        state.hashes.insert(p("/f"), "hf");

        reconcile(
            &mut state,
            &[done(Delta::DeleteRemoteDirectory { path: p("/a") }, TaskOutcome::Deleted)],
        )
        .unwrap();

        assert_eq!(state.remote.len(), 1);
        assert_eq!(state.hashes.len(), 1);
        assert_eq!(state.hashes.get(&p("/f")), Some("hf"));
    }

    #[test]
    fn test_local_relocation_uses_fresh_stat() {
        let mut state = PersistedState {
            local: LocalTree::from_items([
                local("/d", 1, ItemType::Directory),
                local("/d/f", 2, ItemType::File),
            ]),
            remote: RemoteTree::new(),
            hashes: HashCache::new(),
        };
        state.hashes.insert(p("/d/f"), "h");
        let stat = LocalItem {
            last_modified: 5_000,
            ..local("/e", 1, ItemType::Directory)
        };

        reconcile(
            &mut state,
            &[done(
                Delta::RenameLocalDirectory {
                    from: p("/d"),
                    to: p("/e"),
                },
                TaskOutcome::LocalStat { item: stat.clone() },
            )],
        )
        .unwrap();

        assert_eq!(state.local.get(&p("/e")), Some(&stat));
        assert_eq!(state.local.path_of(&2), Some(&p("/e/f")));
        assert_eq!(state.hashes.get(&p("/e/f")), Some("h"));
    }

    #[test]
    fn test_transfers_insert_items_and_digests() {
        let mut state = PersistedState::default();
        let uploaded = RemoteItem::file(p("/up"), Uuid::new_v4(), meta());
        let downloaded = local("/down", 9, ItemType::File);
        let dir = Uuid::new_v4();

        reconcile(
            &mut state,
            &[
                done(
                    Delta::CreateRemoteDirectory { path: p("/dir") },
                    TaskOutcome::RemoteDirectory { uuid: dir },
                ),
                done(
                    Delta::UploadFile { path: p("/up") },
                    TaskOutcome::Uploaded {
                        item: uploaded.clone(),
                        local_hash: "hu".into(),
                    },
                ),
                done(
                    Delta::DownloadFile { path: p("/down") },
                    TaskOutcome::Downloaded {
                        item: downloaded.clone(),
                        local_hash: "hd".into(),
                    },
                ),
            ],
        )
        .unwrap();

        assert_eq!(state.remote.get(&p("/up")), Some(&uploaded));
        assert_eq!(state.remote.get_by_id(&dir).unwrap().path, p("/dir"));
        assert_eq!(state.local.get(&p("/down")), Some(&downloaded));
        assert_eq!(state.hashes.get(&p("/up")), Some("hu"));
        assert_eq!(state.hashes.get(&p("/down")), Some("hd"));
    }

    #[test]
    fn test_mismatched_outcome_is_rejected() {
        let mut state = PersistedState::default();
        let err = reconcile(
            &mut state,
            &[done(Delta::UploadFile { path: p("/f") }, TaskOutcome::Deleted)],
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::UnexpectedOutcome { .. }));
    }

    // ------------------------------------------------------------------
    // restore_failed
    // ------------------------------------------------------------------

    #[test]
    fn test_failed_remote_delete_restores_local_entries() {
        let previous = PersistedState {
            local: LocalTree::from_items([
                local("/d", 1, ItemType::Directory),
                local("/d/f", 2, ItemType::File),
            ]),
            remote: RemoteTree::new(),
            hashes: HashCache::new(),
        };
        let mut state = PersistedState::default();

        restore_failed(
            &mut state,
            &previous,
            &[failed(Delta::DeleteRemoteDirectory { path: p("/d") })],
        );

        assert_eq!(state.local, previous.local);
    }

    #[test]
    fn test_failed_local_delete_restores_remote_entries() {
        let (remote, _) = remote_tree();
        let previous = state_with_remote(remote);
        let mut state = PersistedState::default();

        restore_failed(
            &mut state,
            &previous,
            &[failed(Delta::DeleteLocalFile { path: p("/f") })],
        );

        assert_eq!(state.remote.len(), 1);
        assert!(state.remote.contains(&p("/f")));
    }

    #[test]
    fn test_failed_remote_rename_moves_local_identity_back() {
        let mut state = PersistedState {
            local: LocalTree::from_items([
                local("/new", 1, ItemType::Directory),
                local("/new/f", 2, ItemType::File),
            ]),
            remote: RemoteTree::new(),
            hashes: HashCache::new(),
        };

        restore_failed(
            &mut state,
            &PersistedState::default(),
            &[failed(Delta::RenameRemoteDirectory {
                from: p("/old"),
                to: p("/new"),
            })],
        );

        assert_eq!(state.local.path_of(&1), Some(&p("/old")));
        assert_eq!(state.local.path_of(&2), Some(&p("/old/f")));
    }

    #[test]
    fn test_failed_upload_forgets_digest() {
        let mut state = PersistedState::default();
        state.hashes.insert(p("/f"), "new");

        restore_failed(
            &mut state,
            &PersistedState::default(),
            &[failed(Delta::UploadFile { path: p("/f") })],
        );

        assert!(state.hashes.get(&p("/f")).is_none());
    }

    #[test]
    fn test_failed_upload_restores_replaced_entry() {
        let previous = PersistedState {
            local: LocalTree::from_items([local("/g", 1, ItemType::File)]),
            remote: RemoteTree::new(),
            hashes: HashCache::new(),
        };
        // /f (inode 2) was renamed over /g
        let mut state = PersistedState {
            local: LocalTree::from_items([local("/g", 2, ItemType::File)]),
            remote: RemoteTree::new(),
            hashes: HashCache::new(),
        };

        restore_failed(
            &mut state,
            &previous,
            &[failed(Delta::UploadFile { path: p("/g") })],
        );

        assert_eq!(state.local.get(&p("/g")).map(|item| item.inode), Some(1));
        assert!(state.local.is_consistent());
    }

    #[test]
    fn test_failed_upload_keeps_entry_whose_identity_moved() {
        let previous = PersistedState {
            local: LocalTree::from_items([local("/g", 1, ItemType::File)]),
            remote: RemoteTree::new(),
            hashes: HashCache::new(),
        };
        let mut state = PersistedState {
            local: LocalTree::from_items([
                local("/g", 2, ItemType::File),
                local("/h", 1, ItemType::File),
            ]),
            remote: RemoteTree::new(),
            hashes: HashCache::new(),
        };

        restore_failed(
            &mut state,
            &previous,
            &[failed(Delta::UploadFile { path: p("/g") })],
        );

        assert_eq!(state.local.path_of(&1), Some(&p("/h")));
        assert_eq!(state.local.path_of(&2), Some(&p("/g")));
    }
}
