//! Metadata relinking
//!
//! Side-table metadata holds plain URLs, JSON and URL-encoded JSON payloads,
//! and bits of markup. References found there by the scanner are applied
//! here, one entry at a time, with the same verification as block payloads.

use crate::markup;
use crate::rewriter::{rewrite_embedded, ReferenceResult, ResolvedReference};
use crate::scanner::{ReferenceField, ReferenceOwner};
use indexmap::IndexMap;
use tracing::{debug, warn};

/// Changed metadata entries and per-reference results
#[derive(Debug, Clone, Default)]
pub struct MetadataOutcome {
    /// Entries whose value changed, with their new value
    pub changed: IndexMap<String, String>,
    /// One result per input reference, in input order
    pub results: Vec<ReferenceResult>,
}

/// Applies resolved metadata references
#[derive(Debug, Clone, Copy)]
pub struct MetadataRelinker<'a> {
    skip_keys: &'a [String],
}

impl<'a> MetadataRelinker<'a> {
    /// Create relinker ignoring `skip_keys`
    #[inline]
    #[must_use]
    pub fn new(skip_keys: &'a [String]) -> Self {
        Self { skip_keys }
    }

    /// Apply references owned by metadata entries
    ///
    /// References owned by blocks are reported as rolled back; the tree
    /// rewriter handles those.
    #[must_use]
    pub fn relink(&self, metadata: &IndexMap<String, String>, resolved: &[ResolvedReference]) -> MetadataOutcome {
        let mut changed: IndexMap<String, String> = IndexMap::new();
        let mut results = Vec::with_capacity(resolved.len());
        for r in resolved {
            let result = match &r.reference.locator.owner {
                ReferenceOwner::Metadata(key) if self.skip_keys.contains(key) => {
                    ReferenceResult::RolledBack(format!("metadata '{key}' is skipped"))
                }
                ReferenceOwner::Metadata(key) => match changed.get(key).or_else(|| metadata.get(key)) {
                    Some(current) => match apply(current, r) {
                        Ok(Some(updated)) => {
                            changed.insert(key.clone(), updated);
                            ReferenceResult::Applied
                        }
                        Ok(None) => ReferenceResult::Applied,
                        Err(reason) => ReferenceResult::RolledBack(reason),
                    },
                    None => ReferenceResult::RolledBack(format!("metadata '{key}' not found")),
                },
                ReferenceOwner::Block(path) => ReferenceResult::RolledBack(format!("reference is owned by block {path}")),
            };
            match &result {
                ReferenceResult::Applied => debug!(locator = %r.reference.locator, new_url = %r.entry.new_url, "metadata reference rewritten"),
                ReferenceResult::RolledBack(reason) => warn!(locator = %r.reference.locator, %reason, "metadata reference rolled back"),
            }
            results.push(result);
        }
        changed.retain(|key, value| metadata.get(key) != Some(value));
        MetadataOutcome { changed, results }
    }
}

/// New value for one entry; `None` when it already points at the new asset
fn apply(current: &str, resolved: &ResolvedReference) -> Result<Option<String>, String> {
    let reference = &resolved.reference;
    let entry = &resolved.entry;
    match &reference.locator.field {
        ReferenceField::Value(_) => {
            if current == entry.new_url {
                Ok(None)
            } else if current == reference.raw_value {
                Ok(Some(entry.new_url.clone()))
            } else {
                Err("value changed since scan".into())
            }
        }
        ReferenceField::Embedded { inner, .. } => rewrite_embedded(
            current,
            reference.encoding,
            inner,
            &reference.raw_value,
            &entry.new_url,
            entry.new_identifier,
        )
        .map(Some),
        ReferenceField::Markup { .. } => {
            let ids = reference.sibling_identifier.map(|old| (old, entry.new_identifier));
            markup::substitute_reference(current, &reference.raw_value, &markup::escape_attr(&entry.new_url), ids)
                .map(Some)
                .ok_or_else(|| "url not found in markup".to_string())
        }
    }
}
