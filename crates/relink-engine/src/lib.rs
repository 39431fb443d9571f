//! Structured content relinking engine
//!
//! Re-associates media references in block documents with newly imported
//! assets, rewrites every encoding of those references, and hands back text
//! that round-trips through the block codec.
//!
//! # Core Concepts
//!
//! - [`RelinkEngine`]: the pipeline, one document or a parallel batch
//! - [`Scanner`] / [`AssetReference`]: located references to media assets
//! - [`Matcher`] / [`AssetCatalog`]: exact, stem and containment matching
//! - [`Rewriter`]: applies matches, regenerating or patching markup
//! - [`DomainRewriter`]: rebases managed-asset URLs onto a new origin
//! - [`CorruptionGuard`]: validates and repairs serialized output
//! - [`RelinkReport`]: everything decided along the way
//!
//! # Example
//!
//! ```rust
//! use relink_engine::{AssetCatalog, RelinkConfig, RelinkEngine, RelinkInput};
//!
//! let engine = RelinkEngine::new(RelinkConfig::default())?;
//! let catalog = AssetCatalog::new().with_entry("cat.jpg", 42, "https://new.example/wp-content/uploads/cat.jpg");
//! let doc = "<!-- wp:image {\"id\":7,\"url\":\"https://old.example/wp-content/uploads/cat.jpg\"} /-->";
//! let output = engine.relink(&RelinkInput::new(doc, &catalog))?;
//! assert!(output.document.contains("\"id\":42"));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![allow(missing_docs)]

mod catalog;
mod config;
mod domain;
mod engine;
mod error;
pub mod filename;
mod guard;
mod heuristics;
pub mod markup;
mod matcher;
mod media;
mod metadata;
mod patterns;
mod report;
mod rewriter;
mod scanner;
mod urlcodec;

pub use catalog::{AssetCatalog, AssetCatalogEntry};
pub use config::{GuardConfig, MatcherConfig, RelinkConfig, ScannerConfig};
pub use domain::{BaseUrl, DomainRewriter, RebaseOutcome};
pub use engine::{RelinkEngine, RelinkInput, RelinkOutput};
pub use error::{ConfigError, GuardError, RelinkError, RepositoryError};
pub use guard::{CorruptionGuard, GuardOutcome, Repair};
pub use matcher::{ExclusionReason, MatchOutcome, MatchStrategy, Matcher, UnmatchedReason};
pub use media::{DirectField, MediaKind};
pub use metadata::{MetadataOutcome, MetadataRelinker};
pub use patterns::{
    FragmentOutcome, FragmentRewriter, InMemoryPatternRepository, PatternReferenceMap, PatternRepository,
};
pub use report::{RelinkReport, ReportBuilder, StrategyCounts, UnmatchedReference};
pub use rewriter::{ReferenceResult, ResolvedReference, RewriteOutcome, Rewriter};
pub use scanner::{AssetReference, Locator, ReferenceEncoding, ReferenceField, ReferenceOwner, Scanner};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
