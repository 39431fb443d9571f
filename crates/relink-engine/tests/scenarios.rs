//! End-to-end relink scenarios.
//!
//! Core guarantees exercised here:
//! - A matched image is repointed: identifier, URL and regenerated markup.
//! - Documents with nothing to change come back byte-identical.
//! - JSON payloads keep their non-ASCII text and their encoding.
//! - Exact matches win over fuzzy ones.
//! - Rebasing is idempotent.
//! - Output that cannot be repaired is rejected, never returned.

use pretty_assertions::assert_eq;
use proptest::prelude::*;
use relink_blocks::{parse, serialize, BlockTree};
use relink_engine::{
    AssetCatalog, AssetCatalogEntry, BaseUrl, CorruptionGuard, GuardConfig, GuardError, MatchStrategy,
    PatternReferenceMap, ReferenceResult, RelinkConfig, RelinkError, RelinkInput, ResolvedReference, Rewriter, Scanner,
    UnmatchedReason,
};
use relink_test_utils::{
    attributes_json, catalog, new_upload, old_upload, percent_encode, setup_test_engine, DocumentBuilder, NEW_ORIGIN,
    OLD_ORIGIN,
};
use serde_json::json;

/// Scenario: an image whose file is in the catalog gets the new id and URL.
#[test]
fn matched_image_is_repointed() {
    let doc = DocumentBuilder::new()
        .paragraph("Hello")
        .image(7, &old_upload("2019/05/cat.jpg"), "A cat")
        .build();
    let catalog = catalog(&[("cat.jpg", 42, &new_upload("cat.jpg"))]);

    let output = setup_test_engine().relink(&RelinkInput::new(&doc, &catalog)).unwrap();

    let expected = DocumentBuilder::new()
        .paragraph("Hello")
        .image(42, &new_upload("cat.jpg"), "A cat")
        .build();
    assert_eq!(output.document, expected);
    assert_eq!(output.report.references_found, 1);
    assert_eq!(output.report.references_rewritten, 1);
    assert_eq!(output.report.blocks_updated, vec!["2"]);
    assert!(output.changed);
}

/// Scenario: with an empty catalog nothing changes, and the miss is reported.
#[test]
fn empty_catalog_leaves_document_untouched() {
    let doc = DocumentBuilder::new()
        .image(7, &old_upload("2019/05/cat.jpg"), "A cat")
        .paragraph("Bye")
        .build();
    let catalog = AssetCatalog::new();

    let output = setup_test_engine().relink(&RelinkInput::new(&doc, &catalog)).unwrap();

    assert_eq!(output.document, doc);
    assert!(!output.changed);
    assert_eq!(output.report.unmatched.len(), 1);
    assert_eq!(output.report.unmatched[0].filename, "cat.jpg");
    assert_eq!(output.report.unmatched[0].reason, UnmatchedReason::NotInCatalog);
}

/// Scenario: a URL-encoded payload with a Japanese title is rewritten in
/// place and stays URL-encoded with the title intact.
#[test]
fn url_encoded_payload_keeps_title() {
    let before = json!({"id": 5, "url": old_upload("matsuri.jpg"), "title": "夏祭り"}).to_string();
    let after = json!({"id": 42, "url": new_upload("matsuri.jpg"), "title": "夏祭り"}).to_string();
    let doc = DocumentBuilder::new()
        .custom("acme/slider", &format!(r#"{{"data":"{}"}}"#, percent_encode(&before)))
        .build();
    let catalog = catalog(&[("matsuri.jpg", 42, &new_upload("matsuri.jpg"))]);

    let output = setup_test_engine().relink(&RelinkInput::new(&doc, &catalog)).unwrap();

    assert_eq!(
        output.document,
        format!(r#"<!-- wp:acme/slider {{"data":"{}"}} /-->"#, percent_encode(&after))
    );
    assert_eq!(output.report.rollbacks, 0);
}

/// Tenet: structured attributes keep their escaping profile and non-ASCII text.
#[test]
fn nested_attributes_keep_delimiter_escaping() {
    let doc = format!(
        r#"<!-- wp:acme/cards {{"items":[{{"id":5,"url":"{}","title":"Ünïcode \u0022quoted\u0022 \u003cb\u003e"}}]}} /-->"#,
        old_upload("card.jpg")
    );
    let catalog = catalog(&[("card.jpg", 42, &new_upload("card.jpg"))]);

    let output = setup_test_engine().relink(&RelinkInput::new(&doc, &catalog)).unwrap();

    assert_eq!(
        output.document,
        format!(
            r#"<!-- wp:acme/cards {{"items":[{{"id":42,"url":"{}","title":"Ünïcode \u0022quoted\u0022 \u003cb\u003e"}}]}} /-->"#,
            new_upload("card.jpg")
        )
    );
    assert_eq!(
        attributes_json(&output.document, 0)["items"][0]["title"],
        "Ünïcode \"quoted\" <b>"
    );
}

/// Tenet: a payload identifier moves only with the URL it describes.
#[test]
fn payload_identifier_stays_with_its_asset() {
    let payload = json!({"id": 5, "url": old_upload("a.jpg"), "thumb": old_upload("b.jpg")}).to_string();
    let doc = DocumentBuilder::new()
        .custom("acme/slider", &json!({ "data": payload }).to_string())
        .build();
    let catalog = catalog(&[("a.jpg", 10, &new_upload("a.jpg")), ("b.jpg", 20, &new_upload("b.jpg"))]);

    let output = setup_test_engine().relink(&RelinkInput::new(&doc, &catalog)).unwrap();

    let data = attributes_json(&output.document, 0)["data"].as_str().unwrap().to_string();
    let data: serde_json::Value = serde_json::from_str(&data).unwrap();
    assert_eq!(data, json!({"id": 10, "url": new_upload("a.jpg"), "thumb": new_upload("b.jpg")}));
    assert_eq!(output.report.references_rewritten, 2);
}

/// Tenet: an exact filename match beats an earlier fuzzy candidate.
#[test]
fn exact_match_wins_over_catalog_order() {
    let doc = DocumentBuilder::new()
        .image(7, &old_upload("cat-300x200.jpg"), "")
        .build();
    let catalog = catalog(&[
        ("a-cat.jpg", 1, &new_upload("a-cat.jpg")),
        ("cat.jpg", 2, &new_upload("cat.jpg")),
    ]);

    let output = setup_test_engine().relink(&RelinkInput::new(&doc, &catalog)).unwrap();

    assert_eq!(output.report.strategies.exact, 1);
    assert_eq!(attributes_json(&output.document, 0)["id"], 2);
}

/// Scenario: fuzzy matches are counted by strategy.
#[test]
fn stem_match_is_reported() {
    let doc = DocumentBuilder::new()
        .image(7, &old_upload("Sunset-Beach-scaled.jpg"), "")
        .build();
    let catalog = catalog(&[("sunset-beach.png", 9, &new_upload("sunset-beach.png"))]);

    let output = setup_test_engine().relink(&RelinkInput::new(&doc, &catalog)).unwrap();

    assert_eq!(output.report.strategies.stem, 1);
    assert!(output.document.contains(&new_upload("sunset-beach.png")));
}

/// Tenet: unknown blocks, freeform markup and odd whitespace pass through.
#[test]
fn unrelated_content_passes_through_byte_identical() {
    let doc = DocumentBuilder::new()
        .freeform("<p>Loose   text &amp; <em>markup</em></p>")
        .custom("acme/widget", r#"{"label":"Grüße & more","n":1.50,"flags":[true,null]}"#)
        .paragraph("日本語のテキスト")
        .build();
    let catalog = catalog(&[("cat.jpg", 42, &new_upload("cat.jpg"))]);

    let output = setup_test_engine().relink(&RelinkInput::new(&doc, &catalog)).unwrap();

    assert_eq!(output.document, doc);
    assert_eq!(output.report.nulls_stripped, 0);
    assert!(!output.changed);
}

/// Scenario: rebasing moves every managed URL to the new origin, once.
#[test]
fn rebase_is_idempotent() {
    let doc = DocumentBuilder::new()
        .image_with_url(7, &old_upload("a.jpg"))
        .freeform(&format!(r#"<p><a href="{}">doc</a></p>"#, old_upload("doc.pdf")))
        .build();
    let catalog = AssetCatalog::new();
    let base = BaseUrl::parse(NEW_ORIGIN).unwrap();
    let engine = setup_test_engine();

    let first = engine
        .relink(&RelinkInput::new(&doc, &catalog).with_base_url(&base))
        .unwrap();
    assert!(!first.document.contains(OLD_ORIGIN));
    assert_eq!(first.report.domain_rewrites, 3);

    let second = engine
        .relink(&RelinkInput::new(&first.document, &catalog).with_base_url(&base))
        .unwrap();
    assert_eq!(second.document, first.document);
    assert_eq!(second.report.domain_rewrites, 0);
}

/// Tenet: URLs already served from the target host keep their scheme and path.
#[test]
fn rebase_skips_urls_on_the_target_host() {
    let doc = DocumentBuilder::new()
        .image_with_url(7, "http://new.example/wp-content/uploads/a.jpg")
        .image_with_url(8, "https://new.example/blog/wp-content/uploads/b.jpg")
        .build();
    let catalog = AssetCatalog::new();
    let base = BaseUrl::parse(NEW_ORIGIN).unwrap();

    let output = setup_test_engine()
        .relink(&RelinkInput::new(&doc, &catalog).with_base_url(&base))
        .unwrap();

    assert_eq!(output.document, doc);
    assert_eq!(output.report.domain_rewrites, 0);
}

/// Scenario: fragment references follow the pattern map; misses are reported.
#[test]
fn fragments_are_remapped() {
    let doc = DocumentBuilder::new().fragment(7).fragment(8).build();
    let catalog = AssetCatalog::new();
    let map = PatternReferenceMap::new().with(7, 70);

    let output = setup_test_engine()
        .relink(&RelinkInput::new(&doc, &catalog).with_fragments(&map))
        .unwrap();

    assert_eq!(output.document, DocumentBuilder::new().fragment(70).fragment(8).build());
    assert_eq!(output.report.fragments_rewritten, 1);
    assert_eq!(output.report.fragments_unresolved, vec![8]);
}

/// Tenet: batch results are per document and in input order.
#[test]
fn batch_isolates_failures() {
    let good = DocumentBuilder::new().image(7, &old_upload("cat.jpg"), "").build();
    let catalog = catalog(&[("cat.jpg", 42, &new_upload("cat.jpg"))]);
    let inputs = vec![
        RelinkInput::new(&good, &catalog),
        RelinkInput::new("<!-- wp:image {\"id\":", &catalog),
        RelinkInput::new(&good, &catalog),
    ];

    let results = setup_test_engine().relink_batch(&inputs);

    assert_eq!(results.len(), 3);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(RelinkError::Parse(_))));
    assert_eq!(
        results[0].as_ref().unwrap().document,
        results[2].as_ref().unwrap().document
    );
}

/// Tenet: text that no repair can fix is rejected with the parse error.
#[test]
fn unrepairable_output_is_rejected() {
    let original = parse(r#"<!-- wp:acme/x {"a":1} /-->"#).unwrap();
    let broken = r#"<!-- wp:acme/x {"a":[1} /-->"#;

    let err = CorruptionGuard::new(GuardConfig::default())
        .validate_and_repair(broken, &original)
        .unwrap_err();

    assert!(matches!(err, GuardError::Unparseable { .. }));
}

/// Tenet: a repaired document must still have the original block outline.
#[test]
fn repaired_but_restructured_output_is_rejected() {
    let original = BlockTree::new(Vec::new());
    let repaired = r#"<!-- wp:acme/x {&quot;a&quot;:1} /-->"#;

    let err = CorruptionGuard::new(GuardConfig::default())
        .validate_and_repair(repaired, &original)
        .unwrap_err();

    assert!(matches!(err, GuardError::StructureChanged { position: 0, .. }));
}

proptest! {
    /// Rebasing already rebased text changes nothing.
    #[test]
    fn prop_rebase_twice_equals_once(path in "[a-z]{1,8}/[a-z]{1,8}\\.(jpg|png|pdf)") {
        let doc = DocumentBuilder::new().image_with_url(3, &old_upload(&path)).build();
        let catalog = AssetCatalog::new();
        let base = BaseUrl::parse("https://cdn.example/site").unwrap();
        let engine = setup_test_engine();
        let once = engine.relink(&RelinkInput::new(&doc, &catalog).with_base_url(&base)).unwrap();
        let twice = engine.relink(&RelinkInput::new(&once.document, &catalog).with_base_url(&base)).unwrap();
        prop_assert_eq!(&once.document, &twice.document);
        prop_assert!(once.document.contains("https://cdn.example/site/wp-content/uploads/"));
    }

    /// A rewritten tree serializes to text that parses back to the same tree.
    #[test]
    fn prop_rewritten_tree_survives_serialization(
        stems in prop::collection::vec("[a-z]{1,8}", 1..4),
        new_id in 1u64..100_000,
        title in "[a-zA-Z0-9 夏祭り&'\"]{0,12}",
        encode in any::<bool>(),
    ) {
        let urls: Vec<String> = stems.iter().map(|s| old_upload(&format!("2021/02/{s}.jpg"))).collect();
        let images: Vec<(u64, &str)> = (1u64..).zip(urls.iter().map(String::as_str)).collect();
        let payload = json!({"id": 1, "url": urls[0], "title": title}).to_string();
        let data = if encode { percent_encode(&payload) } else { payload };
        let custom = json!({"slides": [{"imageId": 1, "imageUrl": urls[0], "title": title}], "data": data});
        let doc = DocumentBuilder::new()
            .image_with_url(1, &urls[0])
            .legacy_gallery(&images)
            .custom("acme/slider", &custom.to_string())
            .build();
        let tree = parse(&doc).unwrap();
        let config = RelinkConfig::default();
        let resolved: Vec<ResolvedReference> = Scanner::new(&config)
            .scan(&tree)
            .into_iter()
            .map(|reference| {
                let entry = AssetCatalogEntry::new(new_id, new_upload(&reference.extracted_filename));
                ResolvedReference { reference, entry, strategy: MatchStrategy::Exact }
            })
            .collect();

        let outcome = Rewriter::new().rewrite(&tree, &resolved);

        prop_assert!(outcome.results.iter().any(ReferenceResult::is_applied));
        prop_assert_eq!(parse(&serialize(&outcome.tree)).unwrap(), outcome.tree);
    }

    /// Exact catalog keys always resolve with the exact strategy.
    #[test]
    fn prop_exact_key_resolves_exactly(stem in "[a-z]{3,10}") {
        let name = format!("{stem}.jpg");
        let doc = DocumentBuilder::new().image(1, &old_upload(&name), "").build();
        let catalog = catalog(&[(name.as_str(), 5, &new_upload(&name))]);
        let output = setup_test_engine().relink(&RelinkInput::new(&doc, &catalog)).unwrap();
        prop_assert_eq!(output.report.strategies.exact, 1);
        prop_assert_eq!(output.report.references_rewritten, 1);
    }
}

#[test]
fn strategy_names_serialize_kebab_case() {
    assert_eq!(serde_json::to_value(MatchStrategy::Containment).unwrap(), "containment");
}
