//! Relink report
//!
//! Everything a relink decided without aborting: matches, misses, rollbacks,
//! repairs. Built incrementally by [`ReportBuilder`] and handed out once.

use crate::matcher::{MatchStrategy, UnmatchedReason};
use crate::scanner::AssetReference;
use relink_blocks::{BlockPath, ContentHash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// A reference that was left pointing at the old asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmatchedReference {
    /// Normalised filename used for matching
    pub filename: String,
    /// Where the reference sits, e.g. `block 0.1 url`
    pub locator: String,
    /// Value as found in the document
    pub raw_value: String,
    #[serde(flatten)]
    pub reason: UnmatchedReason,
}

/// Match counts per strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyCounts {
    pub exact: usize,
    pub stem: usize,
    pub containment: usize,
}

/// Outcome of one relink
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelinkReport {
    pub references_found: usize,
    pub references_matched: usize,
    pub references_rewritten: usize,
    pub strategies: StrategyCounts,
    /// Paths of blocks whose attributes or markup changed
    pub blocks_updated: Vec<String>,
    pub unmatched: Vec<UnmatchedReference>,
    pub rollbacks: usize,
    pub domain_rewrites: usize,
    pub fragments_rewritten: usize,
    /// Fragment ids with no entry in the pattern map
    pub fragments_unresolved: Vec<u64>,
    /// Metadata keys whose value changed
    pub metadata_updated: Vec<String>,
    /// Names of corruption repairs that were applied
    pub repairs: Vec<String>,
    /// Image and legacy gallery blocks rebuilt because markup disagreed with attributes
    pub blocks_rebuilt: Vec<String>,
    pub nulls_stripped: usize,
    pub input_fingerprint: Option<ContentHash>,
    pub output_fingerprint: Option<ContentHash>,
    pub fatal_error: Option<String>,
}

impl RelinkReport {
    /// Check whether the relink completed
    #[inline]
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.fatal_error.is_none()
    }

    /// Check whether the output differs from the input
    #[must_use]
    pub fn changed(&self) -> bool {
        match (&self.input_fingerprint, &self.output_fingerprint) {
            (Some(input), Some(output)) => input != output,
            _ => false,
        }
    }

    /// Human readable summary
    #[must_use]
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "references: {} found, {} matched, {} rewritten",
            self.references_found, self.references_matched, self.references_rewritten
        );
        let _ = writeln!(
            out,
            "strategies: {} exact, {} stem, {} containment",
            self.strategies.exact, self.strategies.stem, self.strategies.containment
        );
        let _ = writeln!(out, "blocks updated: {}", self.blocks_updated.len());
        if self.domain_rewrites > 0 {
            let _ = writeln!(out, "domain rewrites: {}", self.domain_rewrites);
        }
        if self.fragments_rewritten > 0 || !self.fragments_unresolved.is_empty() {
            let _ = writeln!(
                out,
                "fragments: {} rewritten, {} unresolved",
                self.fragments_rewritten,
                self.fragments_unresolved.len()
            );
        }
        if !self.metadata_updated.is_empty() {
            let _ = writeln!(out, "metadata updated: {}", self.metadata_updated.join(", "));
        }
        if !self.repairs.is_empty() {
            let _ = writeln!(out, "repairs: {}", self.repairs.join(", "));
        }
        if !self.unmatched.is_empty() {
            let _ = writeln!(out, "unmatched ({}):", self.unmatched.len());
            for u in &self.unmatched {
                let _ = writeln!(out, "  {} at {}: {}", u.filename, u.locator, u.reason);
            }
        }
        if let Some(error) = &self.fatal_error {
            let _ = writeln!(out, "FATAL: {error}");
        }
        out
    }
}

/// Incremental report builder
#[derive(Debug, Default)]
pub struct ReportBuilder {
    report: RelinkReport,
    blocks_updated: BTreeSet<BlockPath>,
}

impl ReportBuilder {
    /// Create new builder
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fingerprint the input text
    pub fn input(&mut self, text: &str) -> &mut Self {
        self.report.input_fingerprint = Some(ContentHash::compute(text.as_bytes()));
        self
    }

    /// Fingerprint the output text
    pub fn output(&mut self, text: &str) -> &mut Self {
        self.report.output_fingerprint = Some(ContentHash::compute(text.as_bytes()));
        self
    }

    /// Count scanned references
    pub fn found(&mut self, count: usize) -> &mut Self {
        self.report.references_found += count;
        self
    }

    /// Record a match
    pub fn matched(&mut self, strategy: MatchStrategy) -> &mut Self {
        self.report.references_matched += 1;
        let counts = &mut self.report.strategies;
        match strategy {
            MatchStrategy::Exact => counts.exact += 1,
            MatchStrategy::Stem => counts.stem += 1,
            MatchStrategy::Containment => counts.containment += 1,
        }
        self
    }

    /// Record a written reference
    pub fn rewritten(&mut self) -> &mut Self {
        self.report.references_rewritten += 1;
        self
    }

    /// Record a reference with no catalog entry
    pub fn unmatched(&mut self, reference: &AssetReference, reason: UnmatchedReason) -> &mut Self {
        if matches!(reason, UnmatchedReason::RolledBack { .. }) {
            self.report.rollbacks += 1;
        }
        self.report.unmatched.push(UnmatchedReference {
            filename: reference.extracted_filename.clone(),
            locator: reference.locator.to_string(),
            raw_value: reference.raw_value.clone(),
            reason,
        });
        self
    }

    /// Record a rewrite that was undone
    pub fn rolled_back(&mut self, reference: &AssetReference, detail: impl Into<String>) -> &mut Self {
        self.unmatched(reference, UnmatchedReason::RolledBack { detail: detail.into() })
    }

    /// Record updated blocks
    pub fn blocks_updated<'a>(&mut self, paths: impl IntoIterator<Item = &'a BlockPath>) -> &mut Self {
        self.blocks_updated.extend(paths.into_iter().cloned());
        self
    }

    /// Count domain rewrites
    pub fn domain_rewrites(&mut self, count: usize) -> &mut Self {
        self.report.domain_rewrites += count;
        self
    }

    /// Count a remapped fragment reference
    pub fn fragment_rewritten(&mut self) -> &mut Self {
        self.report.fragments_rewritten += 1;
        self
    }

    /// Record a fragment reference with no mapping
    pub fn fragment_unresolved(&mut self, id: u64) -> &mut Self {
        if !self.report.fragments_unresolved.contains(&id) {
            self.report.fragments_unresolved.push(id);
        }
        self
    }

    /// Record an updated metadata entry
    pub fn metadata_updated(&mut self, key: &str) -> &mut Self {
        if !self.report.metadata_updated.iter().any(|k| k == key) {
            self.report.metadata_updated.push(key.to_string());
        }
        self
    }

    /// Record guard activity
    pub fn guard(&mut self, repairs: &[&str], rebuilt: &[BlockPath], nulls_stripped: usize) -> &mut Self {
        self.report.repairs.extend(repairs.iter().map(|r| (*r).to_string()));
        self.report.blocks_rebuilt.extend(rebuilt.iter().map(ToString::to_string));
        self.report.nulls_stripped += nulls_stripped;
        self
    }

    /// Record the fatal error
    pub fn fatal(&mut self, message: impl Into<String>) -> &mut Self {
        self.report.fatal_error = Some(message.into());
        self
    }

    /// Finish the report
    #[must_use]
    pub fn build(self) -> RelinkReport {
        let mut report = self.report;
        report.blocks_updated = self.blocks_updated.iter().map(ToString::to_string).collect();
        report
    }

    /// Snapshot the report without consuming the builder
    #[must_use]
    pub fn snapshot(&self) -> RelinkReport {
        let mut report = self.report.clone();
        report.blocks_updated = self.blocks_updated.iter().map(ToString::to_string).collect();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{Locator, ReferenceEncoding, ReferenceField, ReferenceOwner};
    use relink_blocks::JsonPath;

    fn reference() -> AssetReference {
        AssetReference {
            locator: Locator {
                owner: ReferenceOwner::Block(BlockPath::new(vec![0])),
                field: ReferenceField::Value(JsonPath::root().key("url")),
            },
            raw_value: "https://o/wp-content/uploads/cat.jpg".into(),
            extracted_filename: "cat.jpg".into(),
            encoding: ReferenceEncoding::DirectUrlField,
            sibling_identifier: None,
        }
    }

    #[test]
    fn builder_accumulates() {
        let mut builder = ReportBuilder::new();
        builder
            .input("a")
            .found(3)
            .matched(MatchStrategy::Exact)
            .matched(MatchStrategy::Containment)
            .rewritten()
            .unmatched(&reference(), UnmatchedReason::NotInCatalog)
            .rolled_back(&reference(), "title changed")
            .blocks_updated([&BlockPath::new(vec![1]), &BlockPath::new(vec![0, 2]), &BlockPath::new(vec![1])])
            .fragment_unresolved(9)
            .fragment_unresolved(9)
            .output("b");
        let report = builder.build();
        assert_eq!(report.references_matched, 2);
        assert_eq!(report.strategies, StrategyCounts { exact: 1, stem: 0, containment: 1 });
        assert_eq!(report.unmatched.len(), 2);
        assert_eq!(report.rollbacks, 1);
        assert_eq!(report.blocks_updated, vec!["0.2", "1"]);
        assert_eq!(report.fragments_unresolved, vec![9]);
        assert!(report.changed());
        assert!(report.succeeded());
    }

    #[test]
    fn report_serializes_flat_reasons() {
        let mut builder = ReportBuilder::new();
        builder.unmatched(&reference(), UnmatchedReason::NotInCatalog);
        let json = serde_json::to_value(builder.build()).unwrap();
        assert_eq!(json["unmatched"][0]["reason"], "not-in-catalog");
        assert_eq!(json["unmatched"][0]["locator"], "block 0 url");
    }

    #[test]
    fn summary_mentions_fatal_error() {
        let mut builder = ReportBuilder::new();
        builder.fatal("output does not parse");
        let text = builder.build().summary();
        assert!(text.contains("FATAL: output does not parse"));
    }
}
