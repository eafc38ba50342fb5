//! Domain newtypes with validation
//!
//! [`ItemPath`] is the key of every snapshot index: a posix-style path
//! relative to the sync root, always starting with `/`. The sync root itself
//! is `/`. Construction normalizes redundant separators and rejects `..`
//! components, so two `ItemPath`s are equal exactly when they name the same
//! entry.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::errors::DomainError;

// ============================================================================
// ItemPath
// ============================================================================

/// A normalized path relative to the sync root (`/`, `/a`, `/a/b.txt`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemPath(String);

impl ItemPath {
    /// The sync root
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    /// Parses and normalizes a root-relative path
    ///
    /// Empty and `.` components are dropped; `..` is rejected.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, DomainError> {
        let raw = raw.as_ref();
        let mut parts = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => continue,
                ".." => return Err(DomainError::InvalidPath(raw.to_string())),
                p => parts.push(p),
            }
        }

        if parts.is_empty() {
            Ok(Self::root())
        } else {
            Ok(Self(format!("/{}", parts.join("/"))))
        }
    }

    /// Builds an `ItemPath` from an absolute local path under `root`
    pub fn from_local(root: &Path, path: &Path) -> Result<Self, DomainError> {
        let relative = path
            .strip_prefix(root)
            .map_err(|_| DomainError::PathNotInSyncRoot(path.display().to_string()))?;

        let mut out = Self::root();
        for component in relative.components() {
            match component {
                Component::Normal(name) => {
                    let name = name
                        .to_str()
                        .ok_or_else(|| DomainError::InvalidPath(path.display().to_string()))?;
                    out = out.join(name)?;
                }
                Component::CurDir => {}
                _ => return Err(DomainError::InvalidPath(path.display().to_string())),
            }
        }
        Ok(out)
    }

    /// Returns the string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true for the sync root
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Final component (basename); empty for the root
    pub fn name(&self) -> &str {
        if self.is_root() {
            return "";
        }
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// Parent path, `None` for the root
    pub fn parent(&self) -> Option<ItemPath> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind('/') {
            Some(0) | None => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
        }
    }

    /// Appends a single name component
    pub fn join(&self, name: &str) -> Result<ItemPath, DomainError> {
        if name.is_empty() || name == "." || name == ".." || name.contains('/') {
            return Err(DomainError::InvalidName(name.to_string()));
        }
        if self.is_root() {
            Ok(Self(format!("/{name}")))
        } else {
            Ok(Self(format!("{}/{name}", self.0)))
        }
    }

    /// Number of components below the root (root = 0, `/a/b` = 2)
    pub fn depth(&self) -> usize {
        self.components().count()
    }

    /// Iterates over the name components
    pub fn components(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|c| !c.is_empty())
    }

    /// Returns true if `self` equals `other` or is nested below it
    pub fn is_within(&self, other: &ItemPath) -> bool {
        if other.is_root() || self == other {
            return true;
        }
        self.0.len() > other.0.len()
            && self.0.starts_with(other.0.as_str())
            && self.0.as_bytes()[other.0.len()] == b'/'
    }

    /// Literal prefix substitution `from` -> `to`
    ///
    /// Returns `None` when `self` is not within `from`.
    pub fn rebase(&self, from: &ItemPath, to: &ItemPath) -> Option<ItemPath> {
        if !self.is_within(from) {
            return None;
        }
        let suffix = if from.is_root() {
            self.0.as_str()
        } else {
            &self.0[from.0.len()..]
        };
        if suffix.is_empty() || suffix == "/" {
            return Some(to.clone());
        }
        if to.is_root() {
            Some(Self(suffix.to_string()))
        } else {
            Some(Self(format!("{}{suffix}", to.0)))
        }
    }

    /// Absolute local path of this entry under `root`
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for component in self.components() {
            path.push(component);
        }
        path
    }
}

impl Display for ItemPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ItemPath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ItemPath {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ItemPath> for String {
    fn from(path: ItemPath) -> Self {
        path.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ItemPath {
        ItemPath::parse(s).unwrap()
    }

    #[test]
    fn test_parse_normalizes() {
        assert_eq!(p("a//b/./c").as_str(), "/a/b/c");
        assert_eq!(p("/a/b/").as_str(), "/a/b");
        assert!(p("").is_root());
        assert!(p("/").is_root());
    }

    #[test]
    fn test_parse_rejects_parent_components() {
        assert!(ItemPath::parse("/a/../b").is_err());
    }

    #[test]
    fn test_name_and_parent() {
        assert_eq!(p("/a/b.txt").name(), "b.txt");
        assert_eq!(p("/a/b.txt").parent(), Some(p("/a")));
        assert_eq!(p("/a").parent(), Some(ItemPath::root()));
        assert_eq!(ItemPath::root().parent(), None);
        assert_eq!(ItemPath::root().name(), "");
    }

    #[test]
    fn test_depth() {
        assert_eq!(ItemPath::root().depth(), 0);
        assert_eq!(p("/a").depth(), 1);
        assert_eq!(p("/a/b/c").depth(), 3);
    }

    #[test]
    fn test_is_within_respects_component_boundaries() {
        assert!(p("/a/b").is_within(&p("/a")));
        assert!(p("/a").is_within(&p("/a")));
        assert!(!p("/ab").is_within(&p("/a")));
        assert!(!p("/a b/c").is_within(&p("/a")));
        assert!(p("/anything").is_within(&ItemPath::root()));
    }

    #[test]
    fn test_rebase() {
        assert_eq!(p("/a/x/y").rebase(&p("/a"), &p("/b")), Some(p("/b/x/y")));
        assert_eq!(p("/a").rebase(&p("/a"), &p("/c/d")), Some(p("/c/d")));
        assert_eq!(p("/a/x").rebase(&p("/a"), &ItemPath::root()), Some(p("/x")));
        assert_eq!(p("/x").rebase(&ItemPath::root(), &p("/n")), Some(p("/n/x")));
        assert_eq!(p("/ab").rebase(&p("/a"), &p("/b")), None);
    }

    #[test]
    fn test_join_rejects_bad_names() {
        assert!(ItemPath::root().join("a/b").is_err());
        assert!(ItemPath::root().join("..").is_err());
        assert_eq!(p("/a").join("b").unwrap(), p("/a/b"));
    }

    #[test]
    fn test_local_round_trip() {
        let root = Path::new("/home/user/Sync");
        let local = p("/docs/report.pdf").to_local(root);
        assert_eq!(local, PathBuf::from("/home/user/Sync/docs/report.pdf"));
        assert_eq!(ItemPath::from_local(root, &local).unwrap(), p("/docs/report.pdf"));
        assert!(ItemPath::from_local(root, Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&p("/a/b")).unwrap();
        assert_eq!(json, "\"/a/b\"");
        let back: ItemPath = serde_json::from_str("\"a//b\"").unwrap();
        assert_eq!(back, p("/a/b"));
    }
}
