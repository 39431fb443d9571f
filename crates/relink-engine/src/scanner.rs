//! Reference scanner
//!
//! Walks a block tree depth-first, pre-order, and reports every place that
//! points at a media asset. One logical asset often shows up several times
//! (structured attribute, rendered markup, JSON payload); all of them are
//! reported so the rewriter can keep them consistent.

use crate::config::RelinkConfig;
use crate::filename;
use crate::heuristics;
use crate::markup;
use crate::media::MediaKind;
use indexmap::IndexMap;
use relink_blocks::{AttrValue, Attributes, Block, BlockPath, BlockTree, JsonPath};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt::{self, Display, Formatter};

/// How a reference is encoded at its location
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReferenceEncoding {
    /// Plain URL in a structured field
    DirectUrlField,
    /// `src`/`href` of a tag in markup
    MarkupAttribute,
    /// Leaf of a JSON payload (or of a nested structured attribute)
    JsonEmbedded,
    /// Leaf of a percent-encoded JSON payload
    JsonUrlEncoded,
}

/// What owns a reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceOwner {
    /// A block of the document tree
    Block(BlockPath),
    /// A metadata entry of the document
    Metadata(String),
}

/// Where inside the owner a reference sits
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceField {
    /// Structured value: attribute path, or the whole metadata value
    Value(JsonPath),
    /// Tag attribute inside markup
    Markup { attribute: String },
    /// Leaf inside a JSON payload stored as a string at `container`
    Embedded { container: JsonPath, inner: JsonPath },
}

/// Exact location of a reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    pub owner: ReferenceOwner,
    pub field: ReferenceField,
}

impl Locator {
    /// Owning block path, for block references
    #[must_use]
    pub fn block_path(&self) -> Option<&BlockPath> {
        match &self.owner {
            ReferenceOwner::Block(path) => Some(path),
            ReferenceOwner::Metadata(_) => None,
        }
    }
}

impl Display for Locator {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.owner {
            ReferenceOwner::Block(path) => write!(f, "block {path}")?,
            ReferenceOwner::Metadata(key) => write!(f, "metadata '{key}'")?,
        }
        match &self.field {
            ReferenceField::Value(path) if path.is_root() => Ok(()),
            ReferenceField::Value(path) => write!(f, " {path}"),
            ReferenceField::Markup { attribute } => write!(f, " markup @{attribute}"),
            ReferenceField::Embedded { container, inner } if container.is_root() => write!(f, " json {inner}"),
            ReferenceField::Embedded { container, inner } => write!(f, " {container} json {inner}"),
        }
    }
}

/// A discovered pointer to a media asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    pub locator: Locator,
    /// Value exactly as observed
    pub raw_value: String,
    /// Normalised filename used for matching
    pub extracted_filename: String,
    pub encoding: ReferenceEncoding,
    /// Asset identifier observed next to the URL
    pub sibling_identifier: Option<u64>,
}

impl AssetReference {
    fn new(
        locator: Locator,
        raw_value: &str,
        encoding: ReferenceEncoding,
        sibling_identifier: Option<u64>,
    ) -> Self {
        Self {
            locator,
            raw_value: raw_value.to_string(),
            extracted_filename: filename::extracted_filename(raw_value),
            encoding,
            sibling_identifier,
        }
    }
}

/// Deduplicating sink
#[derive(Default)]
struct Collector {
    refs: Vec<AssetReference>,
    seen: HashSet<(Locator, String)>,
}

impl Collector {
    fn push(&mut self, reference: AssetReference) {
        if reference.extracted_filename.is_empty() {
            return;
        }
        let key = (reference.locator.clone(), reference.extracted_filename.clone());
        if self.seen.insert(key) {
            self.refs.push(reference);
        }
    }
}

/// Reference scanner
#[derive(Debug, Clone, Copy)]
pub struct Scanner<'a> {
    config: &'a RelinkConfig,
}

impl<'a> Scanner<'a> {
    /// Create scanner
    #[inline]
    #[must_use]
    pub fn new(config: &'a RelinkConfig) -> Self {
        Self { config }
    }

    /// Scan a block tree
    #[must_use]
    pub fn scan(&self, tree: &BlockTree) -> Vec<AssetReference> {
        let mut out = Collector::default();
        for (path, block) in tree.walk() {
            self.scan_block(path, block, &mut out);
        }
        out.refs
    }

    /// Scan metadata values, skipping configured keys
    #[must_use]
    pub fn scan_metadata(&self, metadata: &IndexMap<String, String>) -> Vec<AssetReference> {
        let mut out = Collector::default();
        for (key, value) in metadata {
            if self.config.metadata_skip_keys.iter().any(|k| k == key) {
                continue;
            }
            let owner = ReferenceOwner::Metadata(key.clone());
            if !self.scan_string(&owner, &JsonPath::root(), value, None, false, &mut out)
                && self.config.scanner.scan_markup
                && value.contains('<')
            {
                self.scan_markup(&owner, value, None, None, &mut out);
            }
        }
        out.refs
    }

    fn scan_block(&self, path: BlockPath, block: &Block, out: &mut Collector) {
        let owner = ReferenceOwner::Block(path);
        let media = MediaKind::of(block);
        let mut direct_paths = HashSet::new();

        if let Some(kind) = media {
            for field in kind.direct_fields(block) {
                out.push(AssetReference::new(
                    Locator {
                        owner: owner.clone(),
                        field: ReferenceField::Value(field.path.clone()),
                    },
                    field.url,
                    ReferenceEncoding::DirectUrlField,
                    field.id,
                ));
                direct_paths.insert(field.path);
            }
            if direct_paths.is_empty() {
                let id = block
                    .attributes
                    .get(kind.id_field())
                    .and_then(AttrValue::as_i64)
                    .and_then(|i| u64::try_from(i).ok());
                for chunk in block.markup_chunks() {
                    self.scan_markup(&owner, chunk, Some(kind.markup_url_attributes()), id, out);
                }
            }
        } else if self.config.scanner.scan_markup {
            for chunk in block.markup_chunks() {
                self.scan_markup(&owner, chunk, None, None, out);
            }
        }

        for (name, value) in &block.attributes {
            let path = JsonPath::root().key(name.as_str());
            self.scan_attribute(&owner, &path, value, &block.attributes, false, &direct_paths, out);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_attribute(
        &self,
        owner: &ReferenceOwner,
        path: &JsonPath,
        value: &AttrValue,
        parent: &Attributes,
        nested: bool,
        skip: &HashSet<JsonPath>,
        out: &mut Collector,
    ) {
        if skip.contains(path) {
            return;
        }
        match value {
            AttrValue::String(s) => {
                let sibling = path
                    .last_key()
                    .and_then(|key| heuristics::identifier_for_url(parent, key))
                    .map(|(_, id)| id);
                self.scan_string(owner, path, s, sibling, nested, out);
            }
            AttrValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    let child = path.index(i);
                    match item {
                        AttrValue::Map(map) => self.scan_map(owner, &child, map, skip, out),
                        other => self.scan_attribute(owner, &child, other, &Attributes::new(), true, skip, out),
                    }
                }
            }
            AttrValue::Map(map) => self.scan_map(owner, path, map, skip, out),
            AttrValue::Null | AttrValue::Bool(_) | AttrValue::Integer(_) | AttrValue::Float(_) => {}
        }
    }

    fn scan_map(&self, owner: &ReferenceOwner, path: &JsonPath, map: &Attributes, skip: &HashSet<JsonPath>, out: &mut Collector) {
        for (key, value) in map {
            self.scan_attribute(owner, &path.key(key.as_str()), value, map, true, skip, out);
        }
    }

    /// Classify one string value; returns whether it held references or payloads
    fn scan_string(
        &self,
        owner: &ReferenceOwner,
        path: &JsonPath,
        value: &str,
        sibling: Option<u64>,
        nested: bool,
        out: &mut Collector,
    ) -> bool {
        let scanner = &self.config.scanner;
        let segment = self.config.segment();
        if heuristics::looks_like_asset_url(value, segment, scanner) {
            let encoding = if nested {
                ReferenceEncoding::JsonEmbedded
            } else {
                ReferenceEncoding::DirectUrlField
            };
            let locator = Locator {
                owner: owner.clone(),
                field: ReferenceField::Value(path.clone()),
            };
            out.push(AssetReference::new(locator, value, encoding, sibling));
            return true;
        }
        if heuristics::looks_like_json(value) {
            if let Ok(decoded) = AttrValue::from_json_str(value) {
                if heuristics::resembles_asset_data(&decoded, scanner.max_json_depth) {
                    self.scan_payload(owner, path, &JsonPath::root(), &decoded, None, ReferenceEncoding::JsonEmbedded, 0, out);
                    return true;
                }
            }
            return false;
        }
        if scanner.decode_url_encoded {
            if let Some((decoded, _)) = heuristics::decode_url_encoded_json(value) {
                if heuristics::resembles_asset_data(&decoded, scanner.max_json_depth) {
                    self.scan_payload(owner, path, &JsonPath::root(), &decoded, None, ReferenceEncoding::JsonUrlEncoded, 0, out);
                    return true;
                }
            }
        }
        false
    }

    #[allow(clippy::too_many_arguments)]
    fn scan_payload(
        &self,
        owner: &ReferenceOwner,
        container: &JsonPath,
        inner: &JsonPath,
        value: &AttrValue,
        parent: Option<&Attributes>,
        encoding: ReferenceEncoding,
        depth: usize,
        out: &mut Collector,
    ) {
        if depth > self.config.scanner.max_json_depth {
            return;
        }
        match value {
            AttrValue::String(s) => {
                if heuristics::looks_like_asset_url(s, self.config.segment(), &self.config.scanner) {
                    let sibling = parent
                        .zip(inner.last_key())
                        .and_then(|(map, key)| heuristics::identifier_for_url(map, key))
                        .map(|(_, id)| id);
                    let locator = Locator {
                        owner: owner.clone(),
                        field: ReferenceField::Embedded {
                            container: container.clone(),
                            inner: inner.clone(),
                        },
                    };
                    out.push(AssetReference::new(locator, s, encoding, sibling));
                }
            }
            AttrValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.scan_payload(owner, container, &inner.index(i), item, None, encoding, depth + 1, out);
                }
            }
            AttrValue::Map(map) => {
                for (key, item) in map {
                    self.scan_payload(owner, container, &inner.key(key.as_str()), item, Some(map), encoding, depth + 1, out);
                }
            }
            AttrValue::Null | AttrValue::Bool(_) | AttrValue::Integer(_) | AttrValue::Float(_) => {}
        }
    }

    /// Collect URL-bearing tag attributes
    ///
    /// With `only`, just the listed `(tag, attribute)` pairs are read and any
    /// value counts; otherwise common URL attributes that look like assets.
    fn scan_markup(
        &self,
        owner: &ReferenceOwner,
        markup: &str,
        only: Option<&[(&str, &str)]>,
        fallback_id: Option<u64>,
        out: &mut Collector,
    ) {
        const URL_ATTRIBUTES: &[&str] = &["src", "href", "data-src", "data-full-url", "data-link", "poster"];
        for tag in markup::tags(markup) {
            for (name, value) in tag.attrs() {
                let wanted = match only {
                    Some(pairs) => pairs.iter().any(|(t, a)| tag.is(t) && name.eq_ignore_ascii_case(a)) && !value.is_empty(),
                    None => {
                        URL_ATTRIBUTES.iter().any(|a| name.eq_ignore_ascii_case(a))
                            && heuristics::looks_like_asset_url(value, self.config.segment(), &self.config.scanner)
                    }
                };
                if !wanted {
                    continue;
                }
                let locator = Locator {
                    owner: owner.clone(),
                    field: ReferenceField::Markup {
                        attribute: name.to_ascii_lowercase(),
                    },
                };
                let sibling = tag.asset_identifier().or(fallback_id);
                out.push(AssetReference::new(locator, value, ReferenceEncoding::MarkupAttribute, sibling));
            }
        }
    }
}
