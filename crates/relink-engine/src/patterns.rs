//! Reusable fragment references
//!
//! Fragments (`core/block` with a `ref` attribute) point at stored patterns
//! by identifier. Importing patterns into a new environment assigns new
//! identifiers; the [`PatternReferenceMap`] records old → new and the
//! [`FragmentRewriter`] applies it to documents.

use crate::error::RepositoryError;
use indexmap::IndexMap;
use parking_lot::RwLock;
use relink_blocks::{AttrValue, BlockPath, BlockTree};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Attribute holding the fragment identifier
const REF_ATTRIBUTE: &str = "ref";

/// Old fragment id → new fragment id, in insertion order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PatternReferenceMap(IndexMap<u64, u64>);

impl PatternReferenceMap {
    /// Create empty map
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a mapping added
    #[must_use]
    pub fn with(mut self, old: u64, new: u64) -> Self {
        self.insert(old, new);
        self
    }

    /// Record a mapping; returns the previous target
    pub fn insert(&mut self, old: u64, new: u64) -> Option<u64> {
        self.0.insert(old, new)
    }

    /// Look up the new identifier
    #[inline]
    #[must_use]
    pub fn get(&self, old: u64) -> Option<u64> {
        self.0.get(&old).copied()
    }

    /// Merge another map in; entries of `other` win
    pub fn merge(&mut self, other: &Self) {
        for (old, new) in &other.0 {
            self.0.insert(*old, *new);
        }
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate mappings in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.0.iter().map(|(k, v)| (*k, *v))
    }
}

impl FromIterator<(u64, u64)> for PatternReferenceMap {
    fn from_iter<I: IntoIterator<Item = (u64, u64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Durable storage for the pattern reference map
///
/// Implementations must make `merge_save` a single write: concurrent imports
/// each merge their own entries without losing the other's.
pub trait PatternRepository: Send + Sync + std::fmt::Debug {
    /// Load the current map
    ///
    /// # Errors
    /// Storage failures or unreadable contents
    fn load(&self) -> Result<PatternReferenceMap, RepositoryError>;

    /// Merge `additions` into the stored map and persist it
    ///
    /// # Errors
    /// Storage failures or unreadable contents
    fn merge_save(&self, additions: &PatternReferenceMap) -> Result<PatternReferenceMap, RepositoryError>;

    /// Remove every mapping
    ///
    /// # Errors
    /// Storage failures
    fn clear(&self) -> Result<(), RepositoryError>;
}

/// Process-local repository
#[derive(Debug, Default)]
pub struct InMemoryPatternRepository {
    map: RwLock<PatternReferenceMap>,
}

impl InMemoryPatternRepository {
    /// Create empty repository
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create repository holding `map`
    #[must_use]
    pub fn with_map(map: PatternReferenceMap) -> Self {
        Self { map: RwLock::new(map) }
    }
}

impl PatternRepository for InMemoryPatternRepository {
    fn load(&self) -> Result<PatternReferenceMap, RepositoryError> {
        Ok(self.map.read().clone())
    }

    fn merge_save(&self, additions: &PatternReferenceMap) -> Result<PatternReferenceMap, RepositoryError> {
        let mut map = self.map.write();
        map.merge(additions);
        Ok(map.clone())
    }

    fn clear(&self) -> Result<(), RepositoryError> {
        *self.map.write() = PatternReferenceMap::new();
        Ok(())
    }
}

/// Result of remapping fragment references
#[derive(Debug, Clone)]
pub struct FragmentOutcome {
    pub tree: BlockTree,
    pub rewritten: usize,
    /// Referenced ids with no mapping, first occurrence order
    pub unresolved: Vec<u64>,
    pub blocks_updated: BTreeSet<BlockPath>,
}

/// Remaps `core/block` references through a [`PatternReferenceMap`]
#[derive(Debug, Clone, Copy)]
pub struct FragmentRewriter<'m> {
    map: &'m PatternReferenceMap,
}

impl<'m> FragmentRewriter<'m> {
    #[inline]
    #[must_use]
    pub fn new(map: &'m PatternReferenceMap) -> Self {
        Self { map }
    }

    /// Remap every fragment reference in a copy of `tree`
    ///
    /// A string-typed `ref` stays a string. References already pointing at a
    /// mapped target are left alone.
    #[must_use]
    pub fn rewrite(&self, tree: &BlockTree) -> FragmentOutcome {
        let mut tree = tree.clone();
        let mut rewritten = 0;
        let mut unresolved = Vec::new();
        let mut blocks_updated = BTreeSet::new();
        tree.for_each_mut(|path, block| {
            if !block.is_core("block") {
                return;
            }
            let Some(value) = block.attributes.get_mut(REF_ATTRIBUTE) else {
                return;
            };
            let Some(old) = fragment_id(value) else {
                return;
            };
            match self.map.get(old) {
                Some(new) if new != old => {
                    let replacement = match value {
                        AttrValue::String(_) => Some(AttrValue::String(new.to_string())),
                        _ => i64::try_from(new).ok().map(AttrValue::Integer),
                    };
                    let Some(replacement) = replacement else {
                        warn!(block = %path, old, new, "mapped fragment id does not fit an integer attribute");
                        if !unresolved.contains(&old) {
                            unresolved.push(old);
                        }
                        return;
                    };
                    *value = replacement;
                    rewritten += 1;
                    blocks_updated.insert(path.clone());
                    debug!(block = %path, old, new, "fragment reference remapped");
                }
                Some(_) => {}
                None if self.map.iter().any(|(_, target)| target == old) => {}
                None => {
                    if !unresolved.contains(&old) {
                        warn!(block = %path, id = old, "fragment reference has no mapping");
                        unresolved.push(old);
                    }
                }
            }
        });
        FragmentOutcome {
            tree,
            rewritten,
            unresolved,
            blocks_updated,
        }
    }
}

fn fragment_id(value: &AttrValue) -> Option<u64> {
    match value {
        AttrValue::Integer(i) => u64::try_from(*i).ok(),
        AttrValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use relink_blocks::{parse, serialize};
    use std::sync::Arc;

    #[test]
    fn merge_keeps_order_and_overrides() {
        let mut map = PatternReferenceMap::new().with(1, 10).with(2, 20);
        map.merge(&PatternReferenceMap::new().with(2, 22).with(3, 30));
        assert_eq!(map.iter().collect::<Vec<_>>(), vec![(1, 10), (2, 22), (3, 30)]);
    }

    #[test]
    fn map_serializes_as_object() {
        let map = PatternReferenceMap::new().with(5, 50);
        assert_eq!(serde_json::to_string(&map).unwrap(), r#"{"5":50}"#);
        let back: PatternReferenceMap = serde_json::from_str(r#"{"5":50,"6":60}"#).unwrap();
        assert_eq!(back.get(6), Some(60));
    }

    #[test]
    fn in_memory_repository_merges_concurrently() {
        let repo = Arc::new(InMemoryPatternRepository::new());
        let handles: Vec<_> = (0..8_u64)
            .map(|i| {
                let repo = Arc::clone(&repo);
                std::thread::spawn(move || repo.merge_save(&PatternReferenceMap::new().with(i, i + 100)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(repo.load().unwrap().len(), 8);
        repo.clear().unwrap();
        assert!(repo.load().unwrap().is_empty());
    }

    #[test]
    fn fragments_are_remapped() {
        let text = r#"<!-- wp:block {"ref":7} /--><!-- wp:block {"ref":"8"} /--><!-- wp:block {"ref":9} /-->"#;
        let map = PatternReferenceMap::new().with(7, 70).with(8, 80);
        let outcome = FragmentRewriter::new(&map).rewrite(&parse(text).unwrap());
        assert_eq!(outcome.rewritten, 2);
        assert_eq!(outcome.unresolved, vec![9]);
        assert_eq!(
            serialize(&outcome.tree),
            r#"<!-- wp:block {"ref":70} /--><!-- wp:block {"ref":"80"} /--><!-- wp:block {"ref":9} /-->"#
        );
    }

    #[test]
    fn already_remapped_fragments_are_not_unresolved() {
        let text = r#"<!-- wp:block {"ref":70} /-->"#;
        let map = PatternReferenceMap::new().with(7, 70);
        let outcome = FragmentRewriter::new(&map).rewrite(&parse(text).unwrap());
        assert_eq!(outcome.rewritten, 0);
        assert!(outcome.unresolved.is_empty());
        assert_eq!(serialize(&outcome.tree), text);
    }

    #[test]
    fn oversized_target_is_reported_not_clamped() {
        let text = r#"<!-- wp:block {"ref":7} /--><!-- wp:block {"ref":"7"} /-->"#;
        let map = PatternReferenceMap::new().with(7, u64::MAX);
        let outcome = FragmentRewriter::new(&map).rewrite(&parse(text).unwrap());
        assert_eq!(outcome.rewritten, 1);
        assert_eq!(outcome.unresolved, vec![7]);
        assert_eq!(
            serialize(&outcome.tree),
            format!(r#"<!-- wp:block {{"ref":7}} /--><!-- wp:block {{"ref":"{}"}} /-->"#, u64::MAX)
        );
    }

    #[test]
    fn other_blocks_with_ref_are_ignored() {
        let text = r#"<!-- wp:acme/x {"ref":7} /-->"#;
        let map = PatternReferenceMap::new().with(7, 70);
        let outcome = FragmentRewriter::new(&map).rewrite(&parse(text).unwrap());
        assert_eq!(outcome.rewritten, 0);
        assert!(outcome.blocks_updated.is_empty());
    }
}
