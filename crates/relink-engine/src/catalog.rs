//! Asset catalog
//!
//! Maps old filenames to the identifiers and URLs assigned by the asset
//! ingestion step. Insertion order is kept and decides ties between fuzzy
//! matches.

use crate::filename;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Replacement asset for one old filename
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCatalogEntry {
    /// Identifier assigned by the target environment
    pub new_identifier: u64,
    /// URL of the asset in the target environment
    pub new_url: String,
}

impl AssetCatalogEntry {
    /// Create new entry
    #[inline]
    #[must_use]
    pub fn new(new_identifier: u64, new_url: impl Into<String>) -> Self {
        Self {
            new_identifier,
            new_url: new_url.into(),
        }
    }
}

/// Ordered catalog of replacement assets
///
/// Immutable for the duration of one relink.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "IndexMap<String, AssetCatalogEntry>", into = "IndexMap<String, AssetCatalogEntry>")]
pub struct AssetCatalog {
    entries: IndexMap<String, AssetCatalogEntry>,
    stems: Vec<String>,
}

impl AssetCatalog {
    /// Create empty catalog
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a catalog from a JSON object of `filename → entry`
    ///
    /// # Errors
    /// Returns the serde_json error for malformed input
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Insert or replace an entry
    pub fn insert(&mut self, old_filename: impl Into<String>, entry: AssetCatalogEntry) {
        let key = old_filename.into();
        let stem = filename::normalized_stem(&key);
        match self.entries.get_index_of(&key) {
            Some(idx) => {
                self.entries[idx] = entry;
                self.stems[idx] = stem;
            }
            None => {
                self.entries.insert(key, entry);
                self.stems.push(stem);
            }
        }
    }

    /// Builder: add an entry
    #[must_use]
    pub fn with_entry(mut self, old_filename: impl Into<String>, new_identifier: u64, new_url: impl Into<String>) -> Self {
        self.insert(old_filename, AssetCatalogEntry::new(new_identifier, new_url));
        self
    }

    /// Exact lookup by old filename
    #[inline]
    #[must_use]
    pub fn get(&self, old_filename: &str) -> Option<&AssetCatalogEntry> {
        self.entries.get(old_filename)
    }

    /// Number of entries
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if catalog is empty
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries with their normalised stems, in insertion order
    pub fn iter_with_stems(&self) -> impl Iterator<Item = (&str, &str, &AssetCatalogEntry)> {
        self.entries
            .iter()
            .zip(&self.stems)
            .map(|((key, entry), stem)| (key.as_str(), stem.as_str(), entry))
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &AssetCatalogEntry)> {
        self.entries.iter()
    }
}

impl From<IndexMap<String, AssetCatalogEntry>> for AssetCatalog {
    fn from(entries: IndexMap<String, AssetCatalogEntry>) -> Self {
        let mut catalog = Self::new();
        for (key, entry) in entries {
            catalog.insert(key, entry);
        }
        catalog
    }
}

impl From<AssetCatalog> for IndexMap<String, AssetCatalogEntry> {
    fn from(catalog: AssetCatalog) -> Self {
        catalog.entries
    }
}

impl FromIterator<(String, AssetCatalogEntry)> for AssetCatalog {
    fn from_iter<I: IntoIterator<Item = (String, AssetCatalogEntry)>>(iter: I) -> Self {
        let mut catalog = Self::new();
        for (key, entry) in iter {
            catalog.insert(key, entry);
        }
        catalog
    }
}
