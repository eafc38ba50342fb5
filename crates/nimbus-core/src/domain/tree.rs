//! Point-in-time snapshots of one side of a sync pair
//!
//! A [`Snapshot`] holds two indices over the same items:
//!
//! - the path index (`ItemPath -> item`), ordered so parents precede children
//! - the identity index (`inode -> path` locally, `uuid -> path` remotely)
//!
//! Every mutating operation updates both indices together, so an item is
//! reachable from one index exactly when it is reachable from the other.
//! Snapshots serialize as a flat item list and rebuild the indices on load.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::item::{ItemType, LocalItem, RemoteItem};
use super::newtypes::ItemPath;

/// An item that can live in a [`Snapshot`]
pub trait TreeItem: Clone {
    /// Stable identity that survives renames
    type Id: Clone + Eq + Hash + Debug;

    fn path(&self) -> &ItemPath;
    fn id(&self) -> Self::Id;
    fn item_type(&self) -> ItemType;

    /// Moves the item to `path`, keeping its identity
    fn relocate(&mut self, path: ItemPath);
}

impl TreeItem for LocalItem {
    type Id = u64;

    fn path(&self) -> &ItemPath {
        &self.path
    }

    fn id(&self) -> u64 {
        self.inode
    }

    fn item_type(&self) -> ItemType {
        self.item_type
    }

    fn relocate(&mut self, path: ItemPath) {
        self.path = path;
    }
}

impl TreeItem for RemoteItem {
    type Id = Uuid;

    fn path(&self) -> &ItemPath {
        &self.path
    }

    fn id(&self) -> Uuid {
        self.uuid
    }

    fn item_type(&self) -> ItemType {
        RemoteItem::item_type(self)
    }

    fn relocate(&mut self, path: ItemPath) {
        self.name = path.name().to_string();
        self.path = path;
    }
}

/// Path index plus identity index over one side's hierarchy
#[derive(Debug, Clone)]
pub struct Snapshot<T: TreeItem> {
    tree: BTreeMap<ItemPath, T>,
    ids: HashMap<T::Id, ItemPath>,
}

/// Snapshot of the local sync root
pub type LocalTree = Snapshot<LocalItem>;

/// Snapshot of the remote sync root
pub type RemoteTree = Snapshot<RemoteItem>;

impl<T: TreeItem> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            tree: BTreeMap::new(),
            ids: HashMap::new(),
        }
    }
}

impl<T: TreeItem> Snapshot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a snapshot from items; later items win on path or id collisions
    pub fn from_items(items: impl IntoIterator<Item = T>) -> Self {
        let mut snapshot = Self::new();
        for item in items {
            snapshot.insert(item);
        }
        snapshot
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn get(&self, path: &ItemPath) -> Option<&T> {
        self.tree.get(path)
    }

    pub fn contains(&self, path: &ItemPath) -> bool {
        self.tree.contains_key(path)
    }

    /// Looks an item up by identity
    pub fn get_by_id(&self, id: &T::Id) -> Option<&T> {
        self.ids.get(id).and_then(|path| self.tree.get(path))
    }

    /// Path currently holding the given identity
    pub fn path_of(&self, id: &T::Id) -> Option<&ItemPath> {
        self.ids.get(id)
    }

    /// Items in path order (parents before their children)
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.tree.values()
    }

    /// Inserts an item, evicting whatever held its path or its identity
    ///
    /// Returns the item previously stored at the same path.
    pub fn insert(&mut self, item: T) -> Option<T> {
        let path = item.path().clone();
        let id = item.id();

        if let Some(old_path) = self.ids.get(&id).cloned() {
            if old_path != path {
                self.tree.remove(&old_path);
            }
        }

        let displaced = self.tree.insert(path.clone(), item);
        if let Some(displaced) = &displaced {
            let displaced_id = displaced.id();
            if displaced_id != id {
                self.ids.remove(&displaced_id);
            }
        }
        self.ids.insert(id, path);
        displaced
    }

    /// Removes a single entry (not its descendants)
    pub fn remove(&mut self, path: &ItemPath) -> Option<T> {
        let item = self.tree.remove(path)?;
        self.ids.remove(&item.id());
        Some(item)
    }

    /// Paths equal to or nested below `path`, in path order
    pub fn subtree_paths(&self, path: &ItemPath) -> Vec<ItemPath> {
        if path.is_root() {
            return self.tree.keys().cloned().collect();
        }
        self.tree
            .range(path.clone()..)
            .take_while(|(key, _)| key.as_str().starts_with(path.as_str()))
            .filter(|(key, _)| key.is_within(path))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Removes `path` and every entry nested below it
    pub fn remove_subtree(&mut self, path: &ItemPath) -> Vec<T> {
        self.subtree_paths(path)
            .iter()
            .filter_map(|p| self.remove(p))
            .collect()
    }

    /// Rekeys `from` and everything below it to the equivalent path under `to`
    ///
    /// Identities are preserved; entries already occupying a destination path
    /// are replaced. Returns the number of rekeyed entries.
    pub fn rekey_subtree(&mut self, from: &ItemPath, to: &ItemPath) -> usize {
        if from == to {
            return 0;
        }
        let moved = self.remove_subtree(from);
        let count = moved.len();
        for mut item in moved {
            if let Some(new_path) = item.path().rebase(from, to) {
                item.relocate(new_path);
            }
            self.insert(item);
        }
        count
    }

    /// Checks that both indices describe the same set of items
    pub fn is_consistent(&self) -> bool {
        self.tree.len() == self.ids.len()
            && self
                .tree
                .iter()
                .all(|(path, item)| item.path() == path && self.ids.get(&item.id()) == Some(path))
    }
}

impl<T: TreeItem + PartialEq> PartialEq for Snapshot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.tree == other.tree
    }
}

impl<T: TreeItem + Serialize> Serialize for Snapshot<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.tree.values())
    }
}

impl<'de, T: TreeItem + DeserializeOwned> Deserialize<'de> for Snapshot<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let items = Vec::<T>::deserialize(deserializer)?;
        Ok(Self::from_items(items))
    }
}
