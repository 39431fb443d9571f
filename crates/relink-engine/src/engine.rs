//! Relink engine
//!
//! Runs the whole pipeline for one document:
//! parse → scan → match → rewrite → rebase → fragments → serialize → guard.
//! The engine never persists anything; callers commit the returned text and
//! metadata themselves, and only when the relink succeeded.

use crate::catalog::AssetCatalog;
use crate::config::RelinkConfig;
use crate::domain::{BaseUrl, DomainRewriter};
use crate::error::{ConfigError, GuardError, RelinkError, RepositoryError};
use crate::guard::{CorruptionGuard, GuardOutcome};
use crate::matcher::{MatchOutcome, Matcher};
use crate::metadata::MetadataRelinker;
use crate::patterns::{FragmentRewriter, PatternReferenceMap, PatternRepository};
use crate::report::{RelinkReport, ReportBuilder};
use crate::rewriter::{ReferenceResult, ResolvedReference, Rewriter};
use crate::scanner::{AssetReference, Scanner};
use indexmap::IndexMap;
use rayon::prelude::*;
use relink_blocks::{parse, serialize, BlockTree};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Everything one relink needs
#[derive(Debug, Clone, Copy)]
pub struct RelinkInput<'a> {
    text: &'a str,
    catalog: &'a AssetCatalog,
    metadata: Option<&'a IndexMap<String, String>>,
    base_url: Option<&'a BaseUrl>,
    fragments: Option<&'a PatternReferenceMap>,
}

impl<'a> RelinkInput<'a> {
    /// Document text and the catalog to match against
    #[inline]
    #[must_use]
    pub fn new(text: &'a str, catalog: &'a AssetCatalog) -> Self {
        Self {
            text,
            catalog,
            metadata: None,
            base_url: None,
            fragments: None,
        }
    }

    /// With the document's metadata entries
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, metadata: &'a IndexMap<String, String>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// With a rebase target for managed-asset URLs
    #[inline]
    #[must_use]
    pub fn with_base_url(mut self, base_url: &'a BaseUrl) -> Self {
        self.base_url = Some(base_url);
        self
    }

    /// With an explicit fragment map instead of the repository's
    #[inline]
    #[must_use]
    pub fn with_fragments(mut self, fragments: &'a PatternReferenceMap) -> Self {
        self.fragments = Some(fragments);
        self
    }
}

/// Result of a successful relink
#[derive(Debug, Clone)]
pub struct RelinkOutput {
    /// Updated document text
    pub document: String,
    /// Metadata entries whose value changed
    pub metadata: IndexMap<String, String>,
    pub report: RelinkReport,
    /// Whether the document or any metadata entry changed
    pub changed: bool,
}

/// Structured content relinking engine
///
/// Cheap to share: `relink` takes `&self` and the engine is `Send + Sync`.
#[derive(Debug, Clone)]
pub struct RelinkEngine {
    config: RelinkConfig,
    domain: DomainRewriter,
    patterns: Option<Arc<dyn PatternRepository>>,
}

impl RelinkEngine {
    /// Create engine
    ///
    /// # Errors
    /// Returns [`ConfigError`] for an invalid configuration
    pub fn new(config: RelinkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let domain = DomainRewriter::new(config.segment())?;
        Ok(Self {
            config,
            domain,
            patterns: None,
        })
    }

    /// With a pattern repository for fragment remapping
    #[must_use]
    pub fn with_patterns(mut self, repository: Arc<dyn PatternRepository>) -> Self {
        self.patterns = Some(repository);
        self
    }

    /// Engine configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RelinkConfig {
        &self.config
    }

    /// Relink one document
    ///
    /// # Errors
    /// [`RelinkError::Parse`] when the input does not parse,
    /// [`RelinkError::Fatal`] when the output fails the corruption guard,
    /// [`RelinkError::Repository`] when the fragment map cannot be loaded.
    pub fn relink(&self, input: &RelinkInput<'_>) -> Result<RelinkOutput, RelinkError> {
        let mut report = ReportBuilder::new();
        report.input(input.text);

        // 1. Parse
        let original = parse(input.text).map_err(|e| {
            error!(error = %e, "input document does not parse");
            e
        })?;
        debug!(blocks = original.block_count(), "document parsed");

        // 2. Scan
        let scanner = Scanner::new(&self.config);
        let references = scanner.scan(&original);
        let metadata_references = input.metadata.map(|m| scanner.scan_metadata(m)).unwrap_or_default();
        report.found(references.len() + metadata_references.len());
        info!(
            references = references.len(),
            metadata_references = metadata_references.len(),
            catalog = input.catalog.len(),
            "scan complete"
        );

        // 3. Match
        let resolved = self.resolve_all(&references, input.catalog, &mut report);
        let resolved_metadata = self.resolve_all(&metadata_references, input.catalog, &mut report);

        // 4. Rewrite
        let outcome = Rewriter::new().rewrite(&original, &resolved);
        record_results(&resolved, &outcome.results, &mut report);
        report.blocks_updated(&outcome.blocks_updated);
        let mut tree = outcome.tree;

        let mut metadata = IndexMap::new();
        if let Some(current) = input.metadata {
            let relinked = MetadataRelinker::new(&self.config.metadata_skip_keys).relink(current, &resolved_metadata);
            record_results(&resolved_metadata, &relinked.results, &mut report);
            metadata = relinked.changed;
        }

        // 5. Rebase
        if let Some(base) = input.base_url {
            tree = self.rebase_stage(tree, input.metadata, &mut metadata, base, &mut report);
        }

        // 6. Fragments
        tree = self.fragment_stage(tree, input.fragments, &mut report)?;

        // 7. Serialize and guard
        let text = serialize(&tree);
        let guarded = CorruptionGuard::new(self.config.guard)
            .validate_and_repair(&text, &original)
            .map_err(|e| fatal(e, &mut report))?;
        report.guard(&guarded.repair_names(), &guarded.rebuilt, guarded.nulls_stripped);
        report.output(&guarded.text);
        for key in metadata.keys() {
            report.metadata_updated(key);
        }

        let report = report.build();
        let changed = report.changed() || !metadata.is_empty();
        info!(
            matched = report.references_matched,
            rewritten = report.references_rewritten,
            unmatched = report.unmatched.len(),
            changed,
            "relink complete"
        );
        Ok(RelinkOutput {
            document: guarded.text,
            metadata,
            report,
            changed,
        })
    }

    /// Relink independent documents in parallel
    ///
    /// Results are in input order; one failing document does not affect the
    /// others.
    #[must_use]
    pub fn relink_batch(&self, inputs: &[RelinkInput<'_>]) -> Vec<Result<RelinkOutput, RelinkError>> {
        info!(documents = inputs.len(), "batch relink");
        inputs.par_iter().map(|input| self.relink(input)).collect()
    }

    /// Scan a document without changing it
    ///
    /// # Errors
    /// [`RelinkError::Parse`] when the document does not parse
    pub fn scan(&self, text: &str) -> Result<Vec<AssetReference>, RelinkError> {
        let tree = parse(text)?;
        Ok(Scanner::new(&self.config).scan(&tree))
    }

    /// Scan a document and resolve every reference against `catalog`
    ///
    /// # Errors
    /// [`RelinkError::Parse`] when the document does not parse
    pub fn preview<'c>(
        &self,
        text: &str,
        catalog: &'c AssetCatalog,
    ) -> Result<Vec<(AssetReference, MatchOutcome<'c>)>, RelinkError> {
        let matcher = Matcher::new(&self.config.matcher);
        Ok(self
            .scan(text)?
            .into_iter()
            .map(|reference| {
                let outcome = matcher.resolve(&reference, catalog);
                (reference, outcome)
            })
            .collect())
    }

    /// Check that a document parses, repairing it if possible
    ///
    /// # Errors
    /// [`GuardError::Unparseable`] when no repair makes the text parse
    pub fn validate(&self, text: &str) -> Result<GuardOutcome, GuardError> {
        let (text, tree, repairs) = CorruptionGuard::new(self.config.guard).repair(text)?;
        Ok(GuardOutcome {
            text,
            tree,
            repairs,
            rebuilt: Vec::new(),
            nulls_stripped: 0,
        })
    }

    /// Merge newly imported fragment ids into the stored map
    ///
    /// # Errors
    /// [`RepositoryError::NotConfigured`] without a repository, or the
    /// repository's own failure
    pub fn record_fragment_import(&self, additions: &PatternReferenceMap) -> Result<PatternReferenceMap, RelinkError> {
        let repository = self.repository()?;
        let merged = repository.merge_save(additions)?;
        info!(added = additions.len(), total = merged.len(), "fragment import recorded");
        Ok(merged)
    }

    /// Current fragment map
    ///
    /// # Errors
    /// [`RepositoryError::NotConfigured`] without a repository, or the
    /// repository's own failure
    pub fn fragment_map(&self) -> Result<PatternReferenceMap, RelinkError> {
        Ok(self.repository()?.load()?)
    }

    /// Forget every fragment mapping
    ///
    /// # Errors
    /// [`RepositoryError::NotConfigured`] without a repository, or the
    /// repository's own failure
    pub fn clear_fragment_map(&self) -> Result<(), RelinkError> {
        self.repository()?.clear()?;
        warn!("fragment map cleared");
        Ok(())
    }

    fn repository(&self) -> Result<&Arc<dyn PatternRepository>, RepositoryError> {
        self.patterns.as_ref().ok_or(RepositoryError::NotConfigured)
    }

    fn resolve_all(&self, references: &[AssetReference], catalog: &AssetCatalog, report: &mut ReportBuilder) -> Vec<ResolvedReference> {
        let matcher = Matcher::new(&self.config.matcher);
        let mut resolved = Vec::new();
        for reference in references {
            match matcher.resolve(reference, catalog) {
                MatchOutcome::Matched { entry, strategy, .. } => {
                    report.matched(strategy);
                    resolved.push(ResolvedReference {
                        reference: reference.clone(),
                        entry: entry.clone(),
                        strategy,
                    });
                }
                MatchOutcome::NoMatch(reason) => {
                    warn!(locator = %reference.locator, filename = %reference.extracted_filename, %reason, "reference unmatched");
                    report.unmatched(reference, reason);
                }
            }
        }
        resolved
    }

    fn rebase_stage(
        &self,
        tree: BlockTree,
        current: Option<&IndexMap<String, String>>,
        changed: &mut IndexMap<String, String>,
        base: &BaseUrl,
        report: &mut ReportBuilder,
    ) -> BlockTree {
        let outcome = self.domain.rebase(&tree, base);
        report.domain_rewrites(outcome.rewrites);
        report.blocks_updated(&outcome.blocks_updated);

        let mut rewrites = outcome.rewrites;
        if let Some(current) = current {
            let mut effective: IndexMap<String, String> = current
                .iter()
                .filter(|(k, _)| !self.config.metadata_skip_keys.contains(*k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            for (key, value) in changed.iter() {
                effective.insert(key.clone(), value.clone());
            }
            let (rebased, count) = self.domain.rebase_metadata(&effective, base);
            report.domain_rewrites(count);
            rewrites += count;
            changed.extend(rebased);
        }
        info!(rewrites, base = %base, "rebase complete");
        outcome.tree
    }

    fn fragment_stage(
        &self,
        tree: BlockTree,
        explicit: Option<&PatternReferenceMap>,
        report: &mut ReportBuilder,
    ) -> Result<BlockTree, RelinkError> {
        let loaded;
        let map = match (explicit, &self.patterns) {
            (Some(map), _) => map,
            (None, Some(repository)) => {
                loaded = repository.load()?;
                &loaded
            }
            (None, None) => return Ok(tree),
        };
        if map.is_empty() {
            return Ok(tree);
        }
        let outcome = FragmentRewriter::new(map).rewrite(&tree);
        for _ in 0..outcome.rewritten {
            report.fragment_rewritten();
        }
        for id in &outcome.unresolved {
            report.fragment_unresolved(*id);
        }
        report.blocks_updated(&outcome.blocks_updated);
        debug!(rewritten = outcome.rewritten, unresolved = outcome.unresolved.len(), "fragments remapped");
        Ok(outcome.tree)
    }
}

fn record_results(resolved: &[ResolvedReference], results: &[ReferenceResult], report: &mut ReportBuilder) {
    for (r, result) in resolved.iter().zip(results) {
        match result {
            ReferenceResult::Applied => {
                report.rewritten();
            }
            ReferenceResult::RolledBack(detail) => {
                report.rolled_back(&r.reference, detail.clone());
            }
        }
    }
}

fn fatal(guard_error: GuardError, report: &mut ReportBuilder) -> RelinkError {
    let message = guard_error.to_string();
    error!(error = %message, "output rejected by corruption guard");
    report.fatal(message.clone());
    RelinkError::Fatal {
        message,
        report: Box::new(report.snapshot()),
    }
}
