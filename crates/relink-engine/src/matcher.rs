//! Asset matcher
//!
//! Resolution order, first hit wins:
//! 1. exact catalog key (raw basename, then extracted filename)
//! 2. normalised stem (suffixes, extension and case ignored)
//! 3. substring containment between stems, when enabled

use crate::catalog::{AssetCatalog, AssetCatalogEntry};
use crate::config::MatcherConfig;
use crate::filename;
use crate::heuristics;
use crate::scanner::AssetReference;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};

/// Characters typical of serialized structures, never of filenames
const STRUCTURAL_CHARS: &[char] = &['{', '}', '[', ']', '"', ';', '\n', '\r'];

/// Strategy that produced a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStrategy {
    Exact,
    Stem,
    Containment,
}

/// Why a candidate was never matched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ExclusionReason {
    /// Filename longer than the configured limit
    TooLong { len: usize, max: usize },
    /// Value contains JSON/array punctuation or line breaks
    StructuralCharacters,
    /// Value carries PHP serialisation markers
    SerializedData,
}

/// Why a reference stayed unmatched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum UnmatchedReason {
    /// No catalog entry matched
    NotInCatalog,
    /// Candidate excluded before matching
    Excluded(ExclusionReason),
    /// Rewrite verification failed; the original value was kept
    RolledBack { detail: String },
}

impl Display for UnmatchedReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInCatalog => f.write_str("no catalog entry matches"),
            Self::Excluded(ExclusionReason::TooLong { len, max }) => {
                write!(f, "filename length {len} exceeds {max}")
            }
            Self::Excluded(ExclusionReason::StructuralCharacters) => f.write_str("value looks like serialized data"),
            Self::Excluded(ExclusionReason::SerializedData) => f.write_str("value contains serialisation markers"),
            Self::RolledBack { detail } => write!(f, "rewrite rolled back: {detail}"),
        }
    }
}

/// Result of resolving one filename
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome<'c> {
    Matched {
        key: &'c str,
        entry: &'c AssetCatalogEntry,
        strategy: MatchStrategy,
    },
    NoMatch(UnmatchedReason),
}

impl MatchOutcome<'_> {
    /// Check for a match
    #[inline]
    #[must_use]
    pub fn is_match(&self) -> bool {
        matches!(self, Self::Matched { .. })
    }
}

/// Asset matcher
#[derive(Debug, Clone, Copy)]
pub struct Matcher<'a> {
    config: &'a MatcherConfig,
}

impl<'a> Matcher<'a> {
    /// Create matcher
    #[inline]
    #[must_use]
    pub fn new(config: &'a MatcherConfig) -> Self {
        Self { config }
    }

    /// Resolve a scanned reference
    #[must_use]
    pub fn resolve<'c>(&self, reference: &AssetReference, catalog: &'c AssetCatalog) -> MatchOutcome<'c> {
        if let Some(reason) = self.exclusion(&reference.raw_value, &reference.extracted_filename) {
            return MatchOutcome::NoMatch(UnmatchedReason::Excluded(reason));
        }
        let basename = filename::basename(&reference.raw_value);
        if let Some((key, entry)) = catalog.iter().find(|(k, _)| **k == basename) {
            return MatchOutcome::Matched {
                key,
                entry,
                strategy: MatchStrategy::Exact,
            };
        }
        self.resolve_extracted(&reference.extracted_filename, catalog)
    }

    /// Resolve a bare filename or URL
    #[must_use]
    pub fn resolve_filename<'c>(&self, raw: &str, catalog: &'c AssetCatalog) -> MatchOutcome<'c> {
        let extracted = filename::extracted_filename(raw);
        if let Some(reason) = self.exclusion(raw, &extracted) {
            return MatchOutcome::NoMatch(UnmatchedReason::Excluded(reason));
        }
        self.resolve_extracted(&extracted, catalog)
    }

    fn resolve_extracted<'c>(&self, extracted: &str, catalog: &'c AssetCatalog) -> MatchOutcome<'c> {
        if let Some((key, entry)) = catalog.iter().find(|(k, _)| k.as_str() == extracted) {
            return MatchOutcome::Matched {
                key,
                entry,
                strategy: MatchStrategy::Exact,
            };
        }

        let stem = filename::split_extension(extracted).0.to_lowercase();
        if stem.is_empty() {
            return MatchOutcome::NoMatch(UnmatchedReason::NotInCatalog);
        }
        if let Some((key, _, entry)) = catalog.iter_with_stems().find(|(_, s, _)| *s == stem) {
            return MatchOutcome::Matched {
                key,
                entry,
                strategy: MatchStrategy::Stem,
            };
        }

        if self.config.containment_matching {
            let hit = catalog
                .iter_with_stems()
                .find(|(_, s, _)| !s.is_empty() && (s.contains(stem.as_str()) || stem.contains(s)));
            if let Some((key, _, entry)) = hit {
                return MatchOutcome::Matched {
                    key,
                    entry,
                    strategy: MatchStrategy::Containment,
                };
            }
        }
        MatchOutcome::NoMatch(UnmatchedReason::NotInCatalog)
    }

    fn exclusion(&self, raw: &str, extracted: &str) -> Option<ExclusionReason> {
        let len = extracted.chars().count();
        if len > self.config.max_candidate_len {
            return Some(ExclusionReason::TooLong {
                len,
                max: self.config.max_candidate_len,
            });
        }
        if heuristics::is_serialized_data(raw) {
            return Some(ExclusionReason::SerializedData);
        }
        if raw.contains(STRUCTURAL_CHARS) {
            return Some(ExclusionReason::StructuralCharacters);
        }
        None
    }
}
