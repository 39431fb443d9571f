//! Block tree codec
//!
//! Parses comment-delimited block documents into a typed tree and serializes
//! the tree back to text.
//!
//! # Core Concepts
//!
//! - [`BlockTree`] / [`Block`]: ordered tree of typed blocks with interleaved markup
//! - [`AttrValue`]: closed set of attribute value variants
//! - [`parse`] / [`serialize`]: strict parser and fidelity-preserving serializer
//! - [`JsonProfile`]: escaping profiles for attribute JSON
//! - [`ContentHash`]: Blake3 fingerprints
//!
//! # Example
//!
//! ```rust
//! use relink_blocks::{parse, serialize};
//!
//! let source = "<!-- wp:image {\"id\":7} -->\n<figure></figure>\n<!-- /wp:image -->";
//! let tree = parse(source)?;
//! assert!(tree.blocks[0].is_core("image"));
//! assert_eq!(serialize(&tree), source);
//! # Ok::<(), relink_blocks::ParseError>(())
//! ```

#![warn(unreachable_pub)]

mod block;
mod error;
mod hash;
pub mod json;
mod parser;
mod path;
mod serializer;
mod value;

pub use block::{Block, BlockKind, BlockName, BlockTree, InnerContent, Walk, CORE_NAMESPACE};
pub use error::ParseError;
pub use hash::{ContentHash, HashError};
pub use json::JsonProfile;
pub use parser::parse;
pub use path::{BlockPath, JsonPath, PathError, PathSegment};
pub use serializer::{closer, opener, serialize, serialize_block};
pub use value::{strip_null_entries, AttrValue, Attributes};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
