//! Block tree serializer
//!
//! Unchanged blocks reuse the delimiter text captured by the parser. Blocks
//! whose kind, attributes or void state changed get a generated delimiter
//! with attributes in the delimiter JSON profile.

use crate::block::{Block, BlockKind, BlockName, BlockTree, InnerContent};
use crate::json::{self, JsonProfile};
use crate::value::Attributes;

/// Serialize a tree back to document text
#[must_use]
pub fn serialize(tree: &BlockTree) -> String {
    let mut out = String::new();
    for block in &tree.blocks {
        write_block(block, &mut out);
    }
    out
}

/// Serialize a single block, children included
#[must_use]
pub fn serialize_block(block: &Block) -> String {
    let mut out = String::new();
    write_block(block, &mut out);
    out
}

/// Generate an opening delimiter
#[must_use]
pub fn opener(name: &BlockName, attributes: &Attributes, void: bool) -> String {
    let mut out = String::from("<!-- wp:");
    out.push_str(&name.delimiter_name());
    out.push(' ');
    if !attributes.is_empty() {
        out.push_str(&json::encode_attributes(attributes, JsonProfile::Delimiter));
        out.push(' ');
    }
    out.push_str(if void { "/-->" } else { "-->" });
    out
}

/// Generate a closing delimiter
#[must_use]
pub fn closer(name: &BlockName) -> String {
    format!("<!-- /wp:{} -->", name.delimiter_name())
}

fn write_block(block: &Block, out: &mut String) {
    let BlockKind::Named(name) = &block.kind else {
        write_inner(block, out);
        return;
    };

    let void = block.is_void();
    match block.verbatim_opener() {
        Some(raw) => out.push_str(raw),
        None => out.push_str(&opener(name, &block.attributes, void)),
    }
    if void {
        return;
    }
    write_inner(block, out);
    match block.verbatim_closer() {
        Some(raw) => out.push_str(raw),
        None => out.push_str(&closer(name)),
    }
}

fn write_inner(block: &Block, out: &mut String) {
    let mut children = block.children.iter();
    for content in &block.inner_content {
        match content {
            InnerContent::Markup(markup) => out.push_str(markup),
            InnerContent::Child => {
                if let Some(child) = children.next() {
                    write_block(child, out);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::value::AttrValue;
    use pretty_assertions::assert_eq;

    #[test]
    fn generated_delimiters() {
        let block = Block::named(BlockName::core("image"))
            .with_attribute("id", 42_i64)
            .with_markup("<figure></figure>");
        assert_eq!(
            serialize_block(&block),
            "<!-- wp:image {\"id\":42} --><figure></figure><!-- /wp:image -->"
        );
    }

    #[test]
    fn generated_void_namespaced() {
        let block = Block::named(BlockName::new("acme", "slider"));
        assert_eq!(serialize_block(&block), "<!-- wp:acme/slider /-->");
    }

    #[test]
    fn unchanged_block_keeps_source_spacing() {
        let src = "<!--   wp:image   {\"id\":1, \"url\":\"a\"}   -->x<!--  /wp:image  -->";
        let tree = parse(src).unwrap();
        assert_eq!(serialize(&tree), src);
    }

    #[test]
    fn changed_attributes_regenerate_opener_only() {
        let src = "<!--   wp:image   {\"id\":1}   -->x<!--  /wp:image  -->";
        let mut tree = parse(src).unwrap();
        tree.blocks[0].attributes.insert("id".into(), AttrValue::Integer(2));
        assert_eq!(
            serialize(&tree),
            "<!-- wp:image {\"id\":2} -->x<!--  /wp:image  -->"
        );
    }

    #[test]
    fn explicit_empty_block_keeps_closer() {
        let src = "<!-- wp:paragraph --><!-- /wp:paragraph -->";
        let tree = parse(src).unwrap();
        assert!(!tree.blocks[0].is_void());
        assert_eq!(serialize(&tree), src);
    }

    #[test]
    fn forget_source_normalises_delimiters() {
        let mut tree = parse("<!--  wp:spacer  /-->").unwrap();
        tree.blocks[0].forget_source();
        assert_eq!(serialize(&tree), "<!-- wp:spacer /-->");
    }
}
