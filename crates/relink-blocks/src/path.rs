//! Paths for addressing inside a block tree
//!
//! [`BlockPath`] addresses a block by child indexes from the tree root.
//! [`JsonPath`] addresses a leaf inside a nested attribute value.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// Path from the tree root to a block
///
/// # Examples
/// - `[0]` → the first top-level block, displayed `0`
/// - `[2, 1]` → second child of the third top-level block, displayed `2.1`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BlockPath(Vec<usize>);

impl BlockPath {
    /// Create new path from indexes
    #[inline]
    #[must_use]
    pub fn new(indexes: Vec<usize>) -> Self {
        Self(indexes)
    }

    /// Empty path (the tree root)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Get path indexes
    #[inline]
    #[must_use]
    pub fn indexes(&self) -> &[usize] {
        &self.0
    }

    /// Nesting depth (1 for top-level blocks)
    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Check if path is the root
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Get parent path (if not root)
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Append an index, returning new path
    #[inline]
    #[must_use]
    pub fn child(&self, index: usize) -> Self {
        let mut new = self.clone();
        new.0.push(index);
        new
    }

    /// Check if this path is a prefix of another
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.0.len() <= other.0.len() && self.0 == other.0[..self.0.len()]
    }
}

impl Display for BlockPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl FromStr for BlockPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        s.split('.')
            .map(|seg| {
                seg.parse::<usize>()
                    .map_err(|_| PathError::InvalidSegment(seg.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

/// One step into a nested value
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PathSegment {
    /// Mapping key
    Key(String),
    /// List index
    Index(usize),
}

/// Path to a value nested inside an attribute
///
/// Displayed in accessor notation: `images[0].url`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct JsonPath(Vec<PathSegment>);

impl JsonPath {
    /// Empty path (the value itself)
    #[inline]
    #[must_use]
    pub fn root() -> Self {
        Self(Vec::new())
    }

    /// Get path segments
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    /// Check if path is empty
    #[inline]
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a mapping key
    #[inline]
    #[must_use]
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut new = self.clone();
        new.0.push(PathSegment::Key(key.into()));
        new
    }

    /// Append a list index
    #[inline]
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut new = self.clone();
        new.0.push(PathSegment::Index(index));
        new
    }

    /// Path of the enclosing container
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Last mapping key on the path, if the leaf sits in a mapping
    #[must_use]
    pub fn last_key(&self) -> Option<&str> {
        match self.0.last() {
            Some(PathSegment::Key(k)) => Some(k),
            _ => None,
        }
    }
}

impl Display for JsonPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.0.iter().enumerate() {
            match seg {
                PathSegment::Key(k) if i == 0 => write!(f, "{k}")?,
                PathSegment::Key(k) => write!(f, ".{k}")?,
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

/// Errors related to paths
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    /// Segment is not a child index
    #[error("invalid segment: {0} (must be a non-negative integer)")]
    InvalidSegment(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_path_child_and_parent() {
        let path = BlockPath::root().child(2).child(1);
        assert_eq!(path.indexes(), &[2, 1]);
        assert_eq!(path.depth(), 2);
        assert_eq!(path.parent().unwrap().indexes(), &[2]);
        assert!(BlockPath::root().parent().is_none());
    }

    #[test]
    fn block_path_display_and_parse() {
        let path = BlockPath::new(vec![0, 3, 1]);
        assert_eq!(path.to_string(), "0.3.1");
        let parsed: BlockPath = "0.3.1".parse().unwrap();
        assert_eq!(parsed, path);
        assert!("".parse::<BlockPath>().unwrap().is_root());
        assert!(matches!(
            "0.x".parse::<BlockPath>(),
            Err(PathError::InvalidSegment(_))
        ));
    }

    #[test]
    fn block_path_prefix() {
        let a = BlockPath::new(vec![1]);
        let b = BlockPath::new(vec![1, 4]);
        assert!(a.is_prefix_of(&b));
        assert!(!b.is_prefix_of(&a));
    }

    #[test]
    fn json_path_display() {
        let path = JsonPath::root().key("images").index(0).key("url");
        assert_eq!(path.to_string(), "images[0].url");
        assert_eq!(path.last_key(), Some("url"));
        assert_eq!(path.parent().unwrap().to_string(), "images[0]");
    }
}
