//! Delta computer
//!
//! Compares the current local and remote snapshots with the snapshots
//! committed by the previous cycle and produces the list of [`Delta`]s that
//! reconciles them. Five passes run in order, sharing one claim set so that
//! a path yields at most one delta per cycle:
//!
//! 1. local rename/move (inode moved between previous and current local)
//! 2. remote rename/move (uuid moved between previous and current remote)
//! 3. deletions on either side, parents before children
//! 4. local creations and content changes
//! 5. remote creations and content changes
//!
//! Relocations claim their exact `from`/`to` paths; deleted directories
//! claim their whole sub-tree. Entries carried along by a relocated
//! ancestor produce no delta of their own.

use std::collections::{HashMap, HashSet};

use nimbus_core::domain::{
    Delta, HashAlgorithm, HashCache, ItemPath, ItemType, LocalTree, RemoteTree, Side, Snapshot,
    TreeItem,
};
use nimbus_core::ports::ILocalStore;
use tracing::{debug, info, warn};

// ============================================================================
// Inputs and outputs
// ============================================================================

/// The four snapshots and the hash cache a diff runs against
#[derive(Debug, Clone, Copy)]
pub struct DiffInput<'a> {
    pub current_local: &'a LocalTree,
    pub current_remote: &'a RemoteTree,
    pub previous_local: &'a LocalTree,
    pub previous_remote: &'a RemoteTree,
    pub hashes: &'a HashCache,
}

/// Result of a diff
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeltaPlan {
    pub deltas: Vec<Delta>,
    /// Digests computed while checking modified files
    pub computed_hashes: HashMap<ItemPath, String>,
}

// ============================================================================
// Claims
// ============================================================================

#[derive(Debug, Default)]
struct Claims {
    exact: HashSet<ItemPath>,
    subtrees: Vec<ItemPath>,
}

impl Claims {
    fn claim(&mut self, path: &ItemPath) {
        self.exact.insert(path.clone());
    }

    fn claim_subtree(&mut self, path: &ItemPath) {
        self.subtrees.push(path.clone());
    }

    fn is_claimed(&self, path: &ItemPath) -> bool {
        self.exact.contains(path) || self.subtrees.iter().any(|s| path.is_within(s))
    }
}

// ============================================================================
// Identity helpers
// ============================================================================

#[derive(Debug, PartialEq)]
enum ParentIdentity<Id> {
    Root,
    Item(Id),
    Unknown,
}

fn parent_identity<T: TreeItem>(tree: &Snapshot<T>, path: &ItemPath) -> ParentIdentity<T::Id> {
    match path.parent() {
        None => ParentIdentity::Unknown,
        Some(parent) if parent.is_root() => ParentIdentity::Root,
        Some(parent) => tree
            .get(&parent)
            .map_or(ParentIdentity::Unknown, |item| ParentIdentity::Item(item.id())),
    }
}

/// An identity whose path changed between two snapshots of the same side
#[derive(Debug, Clone)]
struct Relocation {
    from: ItemPath,
    to: ItemPath,
    item_type: ItemType,
    renamed: bool,
    moved: bool,
}

/// Finds renames and moves of `current` relative to `previous`
///
/// Only relocations the other side can mirror are returned: `from` must
/// exist there and `to` must not.
fn detect_relocations<T: TreeItem, U: TreeItem>(
    previous: &Snapshot<T>,
    current: &Snapshot<T>,
    other: &Snapshot<U>,
    claims: &Claims,
) -> Vec<Relocation> {
    let mut out = Vec::new();
    for item in current.iter() {
        let Some(before) = previous.get_by_id(&item.id()) else {
            continue;
        };
        if before.path() == item.path() || before.item_type() != item.item_type() {
            continue;
        }

        let (from, to) = (before.path(), item.path());
        let renamed = from.name() != to.name();
        let moved = parent_identity(previous, from) != parent_identity(current, to);
        if !renamed && !moved {
            // Carried along by a relocated ancestor
            continue;
        }
        if claims.is_claimed(from) || claims.is_claimed(to) {
            debug!(%from, %to, "Relocation already claimed");
            continue;
        }
        if !other.contains(from) || other.contains(to) {
            debug!(%from, %to, "Relocation cannot be mirrored, diffing as create/delete");
            continue;
        }

        out.push(Relocation {
            from: from.clone(),
            to: to.clone(),
            item_type: item.item_type(),
            renamed,
            moved,
        });
    }
    out
}

/// Finds entries of `previous` that vanished from `current` and still exist on `other`
///
/// An entry whose identity survives below an emitted relocation was
/// relocated, not deleted. One that survives at a path the other side
/// could not take (a rename over an existing entry) is gone from its old
/// path all the same. Returns the path with the item type found on `other`.
fn detect_deletions<T: TreeItem, U: TreeItem>(
    previous: &Snapshot<T>,
    current: &Snapshot<T>,
    other: &Snapshot<U>,
    relocations: &[Relocation],
    claims: &mut Claims,
) -> Vec<(ItemPath, ItemType)> {
    let mut out = Vec::new();
    for item in previous.iter() {
        let path = item.path();
        if current.contains(path) {
            continue;
        }
        if current.get_by_id(&item.id()).is_some() && within_source(path, relocations) {
            continue;
        }
        if claims.is_claimed(path) {
            continue;
        }
        let Some(target) = other.get(path) else {
            continue;
        };
        claims.claim_subtree(path);
        out.push((path.clone(), target.item_type()));
    }
    out
}

/// True when `item` sits below an emitted relocation and only moved because of it
fn carried_by<T: TreeItem>(previous: &Snapshot<T>, item: &T, relocations: &[Relocation]) -> bool {
    let path = item.path();
    relocations.iter().any(|r| {
        path != &r.to
            && path.is_within(&r.to)
            && previous.path_of(&item.id()) == path.rebase(&r.to, &r.from).as_ref()
    })
}

/// True when `previous` held a different identity at the path of `item`
fn replaced<T: TreeItem>(previous: &Snapshot<T>, item: &T) -> bool {
    previous
        .get(item.path())
        .is_some_and(|before| before.id() != item.id())
}

fn within_source(path: &ItemPath, relocations: &[Relocation]) -> bool {
    relocations.iter().any(|r| path.is_within(&r.from))
}

fn relocation_deltas(target: Side, relocation: &Relocation) -> Vec<Delta> {
    let mut out = Vec::with_capacity(2);
    let Relocation {
        from,
        to,
        item_type,
        renamed,
        moved,
    } = relocation;
    if *renamed {
        out.push(Delta::rename(target, *item_type, from.clone(), to.clone()));
    }
    if *moved {
        out.push(Delta::move_item(target, *item_type, from.clone(), to.clone()));
    }
    out
}

// ============================================================================
// DeltaComputer
// ============================================================================

/// Computes deltas, hashing local files through the local store
pub struct DeltaComputer<'a> {
    hasher: &'a dyn ILocalStore,
    algorithm: HashAlgorithm,
}

impl<'a> DeltaComputer<'a> {
    pub fn new(hasher: &'a dyn ILocalStore, algorithm: HashAlgorithm) -> Self {
        Self { hasher, algorithm }
    }

    /// Runs the five passes over `input`
    ///
    /// Hashing failures are logged and the affected file is skipped; it is
    /// diffed again next cycle.
    pub async fn compute(&self, input: DiffInput<'_>) -> DeltaPlan {
        let mut claims = Claims::default();
        let mut plan = DeltaPlan::default();

        // --- pass 1: local rename/move ---
        let local_relocations = detect_relocations(
            input.previous_local,
            input.current_local,
            input.current_remote,
            &claims,
        );
        for relocation in &local_relocations {
            claims.claim(&relocation.from);
            claims.claim(&relocation.to);
            plan.deltas.extend(relocation_deltas(Side::Remote, relocation));
        }

        // --- pass 2: remote rename/move ---
        let remote_relocations = detect_relocations(
            input.previous_remote,
            input.current_remote,
            input.current_local,
            &claims,
        );
        for relocation in &remote_relocations {
            claims.claim(&relocation.from);
            claims.claim(&relocation.to);
            plan.deltas.extend(relocation_deltas(Side::Local, relocation));
        }

        // --- pass 3: deletions ---
        for (path, item_type) in detect_deletions(
            input.previous_local,
            input.current_local,
            input.current_remote,
            &local_relocations,
            &mut claims,
        ) {
            plan.deltas.push(Delta::delete(Side::Remote, item_type, path));
        }
        for (path, item_type) in detect_deletions(
            input.previous_remote,
            input.current_remote,
            input.current_local,
            &remote_relocations,
            &mut claims,
        ) {
            plan.deltas.push(Delta::delete(Side::Local, item_type, path));
        }

        // --- pass 4: local creations/changes ---
        for item in input.current_local.iter() {
            let path = &item.path;
            if claims.is_claimed(path)
                || within_source(path, &remote_relocations)
                || carried_by(input.previous_local, item, &local_relocations)
            {
                continue;
            }

            let delta = match input.current_remote.get(path) {
                None if item.item_type.is_directory() => {
                    Some(Delta::CreateRemoteDirectory { path: path.clone() })
                }
                None => Some(Delta::UploadFile { path: path.clone() }),
                Some(remote) if remote.item_type() != item.item_type => {
                    warn!(%path, local = ?item.item_type, remote = ?remote.item_type(), "Type mismatch, skipping");
                    None
                }
                // A different inode at a committed path replaced the old
                // entry; its mtime says nothing about the content
                Some(_) if item.item_type.is_file() && replaced(input.previous_local, item) => {
                    self.check_content(path, input.hashes, &mut plan).await
                }
                Some(remote) => match remote.last_modified() {
                    Some(remote_modified) if item.last_modified > remote_modified => {
                        self.check_content(path, input.hashes, &mut plan).await
                    }
                    _ => None,
                },
            };
            if let Some(delta) = delta {
                claims.claim(path);
                plan.deltas.push(delta);
            }
        }

        // --- pass 5: remote creations/changes ---
        for item in input.current_remote.iter() {
            let path = &item.path;
            if claims.is_claimed(path)
                || within_source(path, &local_relocations)
                || carried_by(input.previous_remote, item, &remote_relocations)
            {
                continue;
            }

            let delta = match input.current_local.get(path) {
                None if item.item_type().is_directory() => {
                    Some(Delta::CreateLocalDirectory { path: path.clone() })
                }
                None => Some(Delta::DownloadFile { path: path.clone() }),
                Some(local) if local.item_type != item.item_type() => {
                    warn!(%path, local = ?local.item_type, remote = ?item.item_type(), "Type mismatch, skipping");
                    None
                }
                Some(_) if item.item_type().is_file() && replaced(input.previous_remote, item) => {
                    Some(Delta::DownloadFile { path: path.clone() })
                }
                Some(local) => match item.last_modified() {
                    Some(remote_modified) if remote_modified > local.last_modified => {
                        Some(Delta::DownloadFile { path: path.clone() })
                    }
                    _ => None,
                },
            };
            if let Some(delta) = delta {
                claims.claim(path);
                plan.deltas.push(delta);
            }
        }

        info!(
            deltas = plan.deltas.len(),
            local_relocations = local_relocations.len(),
            remote_relocations = remote_relocations.len(),
            hashed = plan.computed_hashes.len(),
            "Deltas computed"
        );
        for delta in &plan.deltas {
            debug!(%delta, "Planned");
        }
        plan
    }

    /// Upload when the local digest differs from the cached one
    async fn check_content(
        &self,
        path: &ItemPath,
        hashes: &HashCache,
        plan: &mut DeltaPlan,
    ) -> Option<Delta> {
        let digest = match self.hasher.hash(path, self.algorithm).await {
            Ok(digest) => digest,
            Err(err) => {
                warn!(%path, %err, "Could not hash local file, skipping");
                return None;
            }
        };
        let changed = hashes.get(path) != Some(digest.as_str());
        plan.computed_hashes.insert(path.clone(), digest);
        if changed {
            Some(Delta::UploadFile { path: path.clone() })
        } else {
            debug!(%path, "Modification time advanced without content change");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
