use pretty_assertions::assert_eq;
use proptest::prelude::*;
use relink_blocks::{parse, serialize, AttrValue, Attributes, Block, BlockKind, BlockName, BlockTree, ParseError};

const DOCUMENT: &str = r#"<!-- wp:paragraph -->
<p>Intro with a <!-- plain comment --> inside.</p>
<!-- /wp:paragraph -->

<!-- wp:gallery {"linkTo":"none","columns":2} -->
<figure class="wp-block-gallery has-nested-images columns-2"><!-- wp:image {"id":11,"sizeSlug":"large"} -->
<figure class="wp-block-image size-large"><img src="https://old.example/wp-content/uploads/2023/01/a.jpg" alt="" class="wp-image-11"/></figure>
<!-- /wp:image -->

<!-- wp:image {"id":12,"sizeSlug":"large"} -->
<figure class="wp-block-image size-large"><img src="https://old.example/wp-content/uploads/2023/01/b.jpg" alt="" class="wp-image-12"/></figure>
<!-- /wp:image --></figure>
<!-- /wp:gallery -->

<!-- wp:acme/hero {"payload":"%7B%22title%22%3A%22%E5%A4%8F%22%7D","meta":{"nested":[1,true,null]}} /-->
trailing freeform"#;

fn leaf_value() -> impl Strategy<Value = AttrValue> {
    prop_oneof![
        Just(AttrValue::Null),
        any::<bool>().prop_map(AttrValue::Bool),
        any::<i64>().prop_map(AttrValue::Integer),
        "[a-zA-Z0-9 <>&\"'/\\\\{}\\-\u{3042}-\u{3093}]{0,16}".prop_map(AttrValue::String),
    ]
}

fn attr_value() -> impl Strategy<Value = AttrValue> {
    leaf_value().prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(AttrValue::List),
            proptest::collection::vec(("[a-zA-Z_]{1,8}", inner), 0..4)
                .prop_map(|entries| AttrValue::Map(entries.into_iter().collect())),
        ]
    })
}

fn attributes() -> impl Strategy<Value = Attributes> {
    proptest::collection::vec(("[a-zA-Z_]{1,8}", attr_value()), 0..4)
        .prop_map(|entries| entries.into_iter().collect())
}

fn block_name() -> impl Strategy<Value = BlockName> {
    prop_oneof![
        "[a-z][a-z0-9_-]{0,8}".prop_map(BlockName::core),
        ("[a-z][a-z0-9]{0,5}", "[a-z][a-z0-9_-]{0,8}").prop_map(|(ns, n)| BlockName::new(ns, n)),
    ]
}

// Markup never contains "<!--", so it cannot be mistaken for a delimiter.
fn markup() -> impl Strategy<Value = String> {
    "[a-z <>/=\"\n\u{590f}]{1,24}"
}

fn named_block() -> impl Strategy<Value = Block> {
    let leaf = (block_name(), attributes(), proptest::option::of(markup())).prop_map(|(name, attrs, body)| {
        let mut block = Block::named(name);
        block.attributes = attrs;
        match body {
            Some(body) => block.with_markup(body),
            None => block,
        }
    });
    leaf.prop_recursive(3, 16, 3, |inner| {
        (
            block_name(),
            attributes(),
            proptest::collection::vec((proptest::option::of(markup()), inner), 1..3),
            proptest::option::of(markup()),
        )
            .prop_map(|(name, attrs, parts, tail)| {
                let mut block = Block::named(name);
                block.attributes = attrs;
                for (before, child) in parts {
                    if let Some(before) = before {
                        block = block.with_markup(before);
                    }
                    block = block.with_child(child);
                }
                match tail {
                    Some(tail) => block.with_markup(tail),
                    None => block,
                }
            })
    })
}

fn tree() -> impl Strategy<Value = BlockTree> {
    proptest::collection::vec((named_block(), proptest::option::of(markup())), 0..4).prop_map(|parts| {
        let mut blocks = Vec::new();
        for (block, freeform) in parts {
            blocks.push(block);
            if let Some(text) = freeform {
                blocks.push(Block::untyped(text));
            }
        }
        BlockTree::new(blocks)
    })
}

proptest! {
    #[test]
    fn prop_parse_serialize_roundtrip(tree in tree()) {
        let text = serialize(&tree);
        let reparsed = parse(&text).unwrap();
        prop_assert_eq!(&reparsed, &tree);
        prop_assert_eq!(serialize(&reparsed), text);
    }

    #[test]
    fn prop_string_attributes_never_break_delimiters(value in "[ -~\u{3042}]{0,40}") {
        let block = Block::named(BlockName::new("acme", "x")).with_attribute("v", value.as_str());
        let tree = BlockTree::new(vec![block]);
        let reparsed = parse(&serialize(&tree)).unwrap();
        prop_assert_eq!(reparsed.blocks[0].attributes.get("v").and_then(AttrValue::as_str), Some(value.as_str()));
    }
}

#[test]
fn untouched_document_is_byte_identical() {
    let tree = parse(DOCUMENT).unwrap();
    assert_eq!(serialize(&tree), DOCUMENT);
}

#[test]
fn document_structure() {
    let tree = parse(DOCUMENT).unwrap();
    let outline: Vec<(usize, String)> = tree.outline().into_iter().map(|(d, k)| (d, k.to_string())).collect();
    assert_eq!(
        outline,
        vec![
            (1, "core/paragraph".to_string()),
            (1, "untyped".to_string()),
            (1, "core/gallery".to_string()),
            (2, "core/image".to_string()),
            (2, "core/image".to_string()),
            (1, "untyped".to_string()),
            (1, "acme/hero".to_string()),
            (1, "untyped".to_string()),
        ]
    );
    let hero = &tree.blocks[6];
    assert_eq!(
        hero.attributes.get("payload").and_then(AttrValue::as_str),
        Some("%7B%22title%22%3A%22%E5%A4%8F%22%7D")
    );
}

#[test]
fn mutation_of_one_block_leaves_others_byte_identical() {
    let mut tree = parse(DOCUMENT).unwrap();
    tree.blocks[2].children[0].attributes.insert("id".into(), AttrValue::Integer(99));
    let out = serialize(&tree);
    assert!(out.contains("<!-- wp:image {\"id\":99,\"sizeSlug\":\"large\"} -->"));
    assert!(out.contains("<!-- wp:image {\"id\":12,\"sizeSlug\":\"large\"} -->"));
    assert!(out.contains("<!-- wp:acme/hero {\"payload\":\"%7B%22title%22%3A%22%E5%A4%8F%22%7D\",\"meta\":{\"nested\":[1,true,null]}} /-->"));
    assert_eq!(out.len(), DOCUMENT.len());
}

#[test]
fn empty_and_whitespace_documents() {
    assert!(parse("").unwrap().is_empty());
    let tree = parse("  \n").unwrap();
    assert_eq!(tree.blocks.len(), 1);
    assert_eq!(tree.blocks[0].kind, BlockKind::Untyped);
    assert_eq!(serialize(&tree), "  \n");
}

#[test]
fn malformed_documents_fail_without_partial_tree() {
    let cases = [
        "<!-- wp:image {\"id\":1} -->\n<figure></figure>",
        "<!-- wp:image {\"id\":1 -->x<!-- /wp:image -->",
        "<!-- wp:image {\"id\":1}",
        "x<!-- /wp:image -->",
        "<!-- wp:group --><!-- wp:image --><!-- /wp:group -->",
    ];
    for case in cases {
        let result: Result<BlockTree, ParseError> = parse(case);
        assert!(result.is_err(), "expected error for {case:?}");
    }
}

#[test]
fn generated_json_uses_delimiter_profile() {
    let block = Block::named(BlockName::core("image")).with_attribute("alt", "a \"b\" <c> -- 夏");
    let out = serialize(&BlockTree::new(vec![block]));
    assert_eq!(
        out,
        "<!-- wp:image {\"alt\":\"a \\u0022b\\u0022 \\u003cc\\u003e \\u002d\\u002d 夏\"} /-->"
    );
}
