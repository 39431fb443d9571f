//! Block tree data model
//!
//! A document is an ordered list of [`Block`]s. Named blocks carry typed
//! attributes and an interleaved list of markup chunks and child slots;
//! untyped blocks are freeform markup found between named blocks.

use crate::hash::ContentHash;
use crate::path::BlockPath;
use crate::value::{AttrValue, Attributes};
use std::fmt::{self, Display, Formatter};

/// Namespace used when a delimiter omits one
pub const CORE_NAMESPACE: &str = "core";

/// Fully qualified block name (`namespace/name`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockName {
    namespace: String,
    name: String,
}

impl BlockName {
    /// Create name from parts
    #[inline]
    #[must_use]
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a name in the core namespace
    #[inline]
    #[must_use]
    pub fn core(name: impl Into<String>) -> Self {
        Self::new(CORE_NAMESPACE, name)
    }

    /// Parse `name` or `namespace/name` as written in a delimiter
    ///
    /// Returns `None` unless both parts match `[a-z][a-z0-9_-]*`.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (namespace, name) = match text.split_once('/') {
            Some((ns, name)) => (ns, name),
            None => (CORE_NAMESPACE, text),
        };
        (is_name_part(namespace) && is_name_part(name)).then(|| Self::new(namespace, name))
    }

    /// Namespace part
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Local name part
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check for a core block with the given local name
    #[inline]
    #[must_use]
    pub fn is_core(&self, name: &str) -> bool {
        self.namespace == CORE_NAMESPACE && self.name == name
    }

    /// Name as written in a generated delimiter (core namespace omitted)
    #[must_use]
    pub fn delimiter_name(&self) -> String {
        if self.namespace == CORE_NAMESPACE {
            self.name.clone()
        } else {
            format!("{}/{}", self.namespace, self.name)
        }
    }
}

fn is_name_part(part: &str) -> bool {
    let mut chars = part.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

impl Display for BlockName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Semantic type of a block
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Freeform markup outside any delimiter
    Untyped,
    /// Delimited block
    Named(BlockName),
}

impl BlockKind {
    /// Block name, if delimited
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&BlockName> {
        match self {
            Self::Untyped => None,
            Self::Named(name) => Some(name),
        }
    }
}

impl Display for BlockKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untyped => f.write_str("untyped"),
            Self::Named(name) => write!(f, "{name}"),
        }
    }
}

/// One entry of a block's inner content
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InnerContent {
    /// Literal markup
    Markup(String),
    /// Position of the next child block
    Child,
}

/// Delimiter text captured at parse time
///
/// Reused by the serializer while the block's kind and attributes still
/// match what was parsed, so untouched blocks come out byte-identical.
#[derive(Debug, Clone)]
pub(crate) struct Verbatim {
    pub(crate) opener: String,
    pub(crate) closer: Option<String>,
    pub(crate) kind: BlockKind,
    pub(crate) fingerprint: ContentHash,
}

/// A node in the document tree
#[derive(Debug, Clone)]
pub struct Block {
    /// Semantic type
    pub kind: BlockKind,
    /// Structured attributes (empty for untyped blocks)
    pub attributes: Attributes,
    /// Markup chunks interleaved with child slots
    pub inner_content: Vec<InnerContent>,
    /// Child blocks, one per [`InnerContent::Child`] slot
    pub children: Vec<Block>,
    verbatim: Option<Verbatim>,
}

impl PartialEq for Block {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.attributes == other.attributes
            && self.inner_content == other.inner_content
            && self.children == other.children
    }
}

impl Block {
    /// Create an empty block of the given kind
    #[inline]
    #[must_use]
    pub fn new(kind: BlockKind) -> Self {
        Self {
            kind,
            attributes: Attributes::new(),
            inner_content: Vec::new(),
            children: Vec::new(),
            verbatim: None,
        }
    }

    /// Create an empty named block
    #[inline]
    #[must_use]
    pub fn named(name: BlockName) -> Self {
        Self::new(BlockKind::Named(name))
    }

    /// Create a freeform markup block
    #[must_use]
    pub fn untyped(markup: impl Into<String>) -> Self {
        Self::new(BlockKind::Untyped).with_markup(markup)
    }

    /// Builder: set an attribute
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builder: append a markup chunk (empty chunks are skipped)
    #[must_use]
    pub fn with_markup(mut self, markup: impl Into<String>) -> Self {
        let markup = markup.into();
        if !markup.is_empty() {
            self.inner_content.push(InnerContent::Markup(markup));
        }
        self
    }

    /// Builder: append a child block
    #[must_use]
    pub fn with_child(mut self, child: Block) -> Self {
        self.inner_content.push(InnerContent::Child);
        self.children.push(child);
        self
    }

    /// Block name, if delimited
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&BlockName> {
        self.kind.name()
    }

    /// Check for a core block with the given local name
    #[inline]
    #[must_use]
    pub fn is_core(&self, name: &str) -> bool {
        self.name().is_some_and(|n| n.is_core(name))
    }

    /// Concatenated markup of this block (children excluded)
    #[must_use]
    pub fn rendered_markup(&self) -> String {
        self.markup_chunks().collect()
    }

    /// Iterate markup chunks in order
    pub fn markup_chunks(&self) -> impl Iterator<Item = &str> {
        self.inner_content.iter().filter_map(|c| match c {
            InnerContent::Markup(m) => Some(m.as_str()),
            InnerContent::Child => None,
        })
    }

    /// Iterate markup chunks mutably
    pub fn markup_chunks_mut(&mut self) -> impl Iterator<Item = &mut String> {
        self.inner_content.iter_mut().filter_map(|c| match c {
            InnerContent::Markup(m) => Some(m),
            InnerContent::Child => None,
        })
    }

    /// Replace the markup of a leaf block
    ///
    /// On a block with children the child slots are kept, the new markup
    /// becomes the leading chunk and every other chunk is dropped; use
    /// [`Block::set_wrapper_markup`] to keep the chunks between children.
    pub fn set_rendered_markup(&mut self, markup: impl Into<String>) {
        let markup = markup.into();
        let slots = self.children.len();
        self.inner_content.clear();
        if !markup.is_empty() {
            self.inner_content.push(InnerContent::Markup(markup));
        }
        self.inner_content
            .extend(std::iter::repeat(InnerContent::Child).take(slots));
    }

    /// Replace the markup before the first child and after the last child
    ///
    /// Markup between children is left as it is. Without children the block
    /// ends up with the single chunk `open + close`.
    pub fn set_wrapper_markup(&mut self, open: &str, close: &str) {
        let first = self.inner_content.iter().position(|c| *c == InnerContent::Child);
        let last = self.inner_content.iter().rposition(|c| *c == InnerContent::Child);
        let middle: Vec<InnerContent> = match (first, last) {
            (Some(first), Some(last)) => self.inner_content[first..=last].to_vec(),
            _ => {
                self.set_rendered_markup(format!("{open}{close}"));
                return;
            }
        };
        let mut content = Vec::with_capacity(middle.len() + 2);
        if !open.is_empty() {
            content.push(InnerContent::Markup(open.to_string()));
        }
        content.extend(middle);
        if !close.is_empty() {
            content.push(InnerContent::Markup(close.to_string()));
        }
        self.inner_content = content;
    }

    /// Markup before the first child slot (whole markup for leaf blocks)
    #[must_use]
    pub fn leading_markup(&self) -> String {
        self.inner_content
            .iter()
            .take_while(|c| **c != InnerContent::Child)
            .filter_map(|c| match c {
                InnerContent::Markup(m) => Some(m.as_str()),
                InnerContent::Child => None,
            })
            .collect()
    }

    /// Markup after the last child slot (empty for leaf blocks)
    #[must_use]
    pub fn trailing_markup(&self) -> String {
        if self.children.is_empty() {
            return String::new();
        }
        let tail: Vec<&str> = self
            .inner_content
            .iter()
            .rev()
            .take_while(|c| **c != InnerContent::Child)
            .filter_map(|c| match c {
                InnerContent::Markup(m) => Some(m.as_str()),
                InnerContent::Child => None,
            })
            .collect();
        tail.into_iter().rev().collect()
    }

    /// Check whether the block serializes as a self-closing delimiter
    ///
    /// A block parsed with an explicit closer keeps it even when empty.
    #[must_use]
    pub fn is_void(&self) -> bool {
        self.inner_content.is_empty() && self.verbatim.as_ref().map_or(true, |v| v.closer.is_none())
    }

    pub(crate) fn set_verbatim(&mut self, verbatim: Verbatim) {
        self.verbatim = Some(verbatim);
    }

    pub(crate) fn set_verbatim_closer(&mut self, closer: String) {
        if let Some(v) = self.verbatim.as_mut() {
            v.closer = Some(closer);
        }
    }

    /// Source opener text, if the block is unchanged since parsing
    pub(crate) fn verbatim_opener(&self) -> Option<&str> {
        let v = self.verbatim.as_ref()?;
        let unchanged = v.kind == self.kind
            && v.closer.is_none() == self.is_void()
            && v.fingerprint == ContentHash::of_attributes(&self.attributes);
        unchanged.then_some(v.opener.as_str())
    }

    /// Source closer text, if the block kind is unchanged since parsing
    pub(crate) fn verbatim_closer(&self) -> Option<&str> {
        let v = self.verbatim.as_ref()?;
        if v.kind == self.kind {
            v.closer.as_deref()
        } else {
            None
        }
    }

    /// Drop the captured delimiter text so the serializer regenerates it
    pub fn forget_source(&mut self) {
        self.verbatim = None;
        for child in &mut self.children {
            child.forget_source();
        }
    }
}

/// A parsed document
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockTree {
    /// Top-level blocks in document order
    pub blocks: Vec<Block>,
}

impl BlockTree {
    /// Create tree from top-level blocks
    #[inline]
    #[must_use]
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    /// Check if the tree has no blocks at all
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total number of blocks, nested ones included
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.walk().count()
    }

    /// Get block at path
    #[must_use]
    pub fn get(&self, path: &BlockPath) -> Option<&Block> {
        let (first, rest) = path.indexes().split_first()?;
        let mut current = self.blocks.get(*first)?;
        for idx in rest {
            current = current.children.get(*idx)?;
        }
        Some(current)
    }

    /// Get mutable block at path
    pub fn get_mut(&mut self, path: &BlockPath) -> Option<&mut Block> {
        let (first, rest) = path.indexes().split_first()?;
        let mut current = self.blocks.get_mut(*first)?;
        for idx in rest {
            current = current.children.get_mut(*idx)?;
        }
        Some(current)
    }

    /// Depth-first, pre-order traversal
    #[must_use]
    pub fn walk(&self) -> Walk<'_> {
        let stack = self
            .blocks
            .iter()
            .enumerate()
            .rev()
            .map(|(i, b)| (BlockPath::root().child(i), b))
            .collect();
        Walk { stack }
    }

    /// Visit every block mutably, depth-first, pre-order
    pub fn for_each_mut<F>(&mut self, mut visit: F)
    where
        F: FnMut(&BlockPath, &mut Block),
    {
        fn recurse<F: FnMut(&BlockPath, &mut Block)>(block: &mut Block, path: &BlockPath, visit: &mut F) {
            visit(path, block);
            for (i, child) in block.children.iter_mut().enumerate() {
                recurse(child, &path.child(i), visit);
            }
        }
        for (i, block) in self.blocks.iter_mut().enumerate() {
            recurse(block, &BlockPath::root().child(i), &mut visit);
        }
    }

    /// Block kinds in pre-order, with nesting depth
    #[must_use]
    pub fn outline(&self) -> Vec<(usize, BlockKind)> {
        self.walk().map(|(p, b)| (p.depth(), b.kind.clone())).collect()
    }
}

/// Pre-order iterator over a [`BlockTree`]
#[derive(Debug)]
pub struct Walk<'a> {
    stack: Vec<(BlockPath, &'a Block)>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = (BlockPath, &'a Block);

    fn next(&mut self) -> Option<Self::Item> {
        let (path, block) = self.stack.pop()?;
        for (i, child) in block.children.iter().enumerate().rev() {
            self.stack.push((path.child(i), child));
        }
        Some((path, block))
    }
}
