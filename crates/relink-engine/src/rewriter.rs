//! Tree rewriter
//!
//! Applies resolved references to a copy of the tree. Each reference is
//! checked against the value it was scanned from and verified after the edit;
//! a reference that cannot be applied cleanly is rolled back on its own and
//! the rest of the document is still rewritten.

use crate::catalog::AssetCatalogEntry;
use crate::filename;
use crate::heuristics;
use crate::markup::{self, ImageParts};
use crate::matcher::MatchStrategy;
use crate::media::MediaKind;
use crate::scanner::{AssetReference, ReferenceEncoding, ReferenceField};
use crate::urlcodec::{self, EncodeStyle};
use indexmap::IndexMap;
use relink_blocks::json::{self, JsonProfile};
use relink_blocks::{AttrValue, Attributes, Block, BlockPath, BlockTree, JsonPath, PathSegment};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Payload keys whose text must survive re-encoding unchanged
const CRITICAL_KEYS: &[&str] = &["title", "caption", "alt", "description", "name", "label", "text"];

/// A reference paired with the catalog entry it resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedReference {
    pub reference: AssetReference,
    pub entry: AssetCatalogEntry,
    pub strategy: MatchStrategy,
}

/// What happened to one resolved reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceResult {
    /// New URL and identifier written
    Applied,
    /// Left untouched
    RolledBack(String),
}

impl ReferenceResult {
    /// Check whether the reference was written
    #[inline]
    #[must_use]
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Result of [`Rewriter::rewrite`]
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    /// Rewritten copy of the input tree
    pub tree: BlockTree,
    /// One result per input reference, in input order
    pub results: Vec<ReferenceResult>,
    /// Blocks whose attributes or markup changed
    pub blocks_updated: BTreeSet<BlockPath>,
}

/// Applies resolved references to a block tree
#[derive(Debug, Clone, Copy, Default)]
pub struct Rewriter;

/// Per-block state collected while applying references
#[derive(Default)]
struct BlockEdits {
    /// `(old raw value, new url, identifier change)` to substitute in markup
    substitutions: Vec<(String, String, Option<(u64, u64)>)>,
    /// `(old id, new id)` pairs seen on this block
    identifiers: Vec<(u64, u64)>,
    /// New URL for an image whose only reference is in markup
    markup_url: Option<(String, String)>,
    applied: bool,
}

impl Rewriter {
    /// Create rewriter
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Rewrite a copy of `tree`
    #[must_use]
    pub fn rewrite(&self, tree: &BlockTree, resolved: &[ResolvedReference]) -> RewriteOutcome {
        let mut out = tree.clone();
        let mut results = vec![ReferenceResult::RolledBack("not applied".into()); resolved.len()];
        let mut by_block: BTreeMap<BlockPath, Vec<usize>> = BTreeMap::new();
        for (i, r) in resolved.iter().enumerate() {
            match r.reference.locator.block_path() {
                Some(path) => by_block.entry(path.clone()).or_default().push(i),
                None => results[i] = ReferenceResult::RolledBack("reference is not owned by a block".into()),
            }
        }

        let mut blocks_updated = BTreeSet::new();
        let mut child_ids: BTreeMap<BlockPath, Vec<(u64, u64)>> = BTreeMap::new();
        for (path, indexes) in by_block {
            let Some(block) = out.get_mut(&path) else {
                for i in indexes {
                    results[i] = ReferenceResult::RolledBack(format!("block {path} not found"));
                }
                continue;
            };
            let kind = MediaKind::of(block);
            let original_markup = block.rendered_markup();
            let mut edits = BlockEdits::default();
            for i in indexes {
                let r = &resolved[i];
                let result = apply_reference(block, kind, r, &mut edits);
                match &result {
                    ReferenceResult::Applied => debug!(locator = %r.reference.locator, new_url = %r.entry.new_url, "reference rewritten"),
                    ReferenceResult::RolledBack(reason) => warn!(locator = %r.reference.locator, %reason, "reference rolled back"),
                }
                results[i] = result;
            }
            if !edits.applied {
                continue;
            }
            refresh_markup(block, kind, &original_markup, &edits);
            if let Some(parent) = path.parent().filter(|p| !p.is_root()) {
                child_ids.entry(parent).or_default().extend(edits.identifiers.iter().copied());
            }
            blocks_updated.insert(path);
        }

        for (path, ids) in child_ids {
            let Some(gallery) = out.get_mut(&path) else { continue };
            if MediaKind::of(gallery) != Some(MediaKind::Gallery) || gallery.children.is_empty() {
                continue;
            }
            for (old, new) in &ids {
                replace_in_id_list(&mut gallery.attributes, Some(*old), None, *new);
            }
            let parts = markup::capture_gallery(&gallery.rendered_markup());
            let (open, close) = markup::render_gallery_wrapper(&gallery.attributes, &parts);
            gallery.set_wrapper_markup(&open, &close);
            blocks_updated.insert(path);
        }

        RewriteOutcome {
            tree: out,
            results,
            blocks_updated,
        }
    }
}

fn apply_reference(block: &mut Block, kind: Option<MediaKind>, resolved: &ResolvedReference, edits: &mut BlockEdits) -> ReferenceResult {
    let reference = &resolved.reference;
    let entry = &resolved.entry;
    let new_id = entry.new_identifier;
    match &reference.locator.field {
        ReferenceField::Value(path) => {
            let Some(slot) = value_at_mut(&mut block.attributes, path) else {
                return ReferenceResult::RolledBack(format!("attribute '{path}' not found"));
            };
            if slot.as_str() == Some(entry.new_url.as_str()) {
                return ReferenceResult::Applied;
            }
            if slot.as_str() != Some(reference.raw_value.as_str()) {
                return ReferenceResult::RolledBack(format!("attribute '{path}' changed since scan"));
            }
            *slot = AttrValue::from(entry.new_url.as_str());
            update_identifiers(&mut block.attributes, kind, path, reference, new_id, edits);
            edits.substitutions.push((
                reference.raw_value.clone(),
                entry.new_url.clone(),
                reference.sibling_identifier.map(|old| (old, new_id)),
            ));
        }
        ReferenceField::Markup { .. } => {
            if kind == Some(MediaKind::Image) {
                let old = block.attributes.get("id").and_then(AttrValue::as_i64);
                set_identifier(&mut block.attributes, "id", new_id);
                if let Some(old) = old.and_then(|o| u64::try_from(o).ok()) {
                    edits.identifiers.push((old, new_id));
                }
                edits.markup_url = Some((reference.raw_value.clone(), entry.new_url.clone()));
            } else {
                let old = reference.raw_value.as_str();
                let new = markup::escape_attr(&entry.new_url);
                let ids = reference.sibling_identifier.map(|o| (o, new_id));
                let mut changed = false;
                for chunk in block.markup_chunks_mut() {
                    if let Some(updated) = markup::substitute_reference(chunk, old, &new, ids) {
                        *chunk = updated;
                        changed = true;
                    }
                }
                if !changed {
                    return ReferenceResult::RolledBack("url not found in markup".into());
                }
                match kind {
                    Some(MediaKind::Gallery) => {
                        replace_in_id_list(&mut block.attributes, reference.sibling_identifier, None, new_id);
                    }
                    Some(kind) => set_identifier(&mut block.attributes, kind.id_field(), new_id),
                    None => {}
                }
                if let Some(old) = reference.sibling_identifier {
                    edits.identifiers.push((old, new_id));
                }
            }
        }
        ReferenceField::Embedded { container, inner } => {
            let Some(slot) = value_at_mut(&mut block.attributes, container) else {
                return ReferenceResult::RolledBack(format!("attribute '{container}' not found"));
            };
            let Some(payload) = slot.as_str() else {
                return ReferenceResult::RolledBack(format!("attribute '{container}' is not a string"));
            };
            match rewrite_embedded(payload, reference.encoding, inner, &reference.raw_value, &entry.new_url, new_id) {
                Ok(updated) => *slot = AttrValue::String(updated),
                Err(reason) => return ReferenceResult::RolledBack(reason),
            }
            edits.substitutions.push((reference.raw_value.clone(), entry.new_url.clone(), None));
        }
    }
    edits.applied = true;
    ReferenceResult::Applied
}

/// Re-render or patch markup after the attributes of a block changed
fn refresh_markup(block: &mut Block, kind: Option<MediaKind>, original: &str, edits: &BlockEdits) {
    let legacy_gallery = block.children.is_empty() && block.attributes.get("images").and_then(AttrValue::as_list).is_some();
    let rendered = match kind {
        Some(MediaKind::Image) if !original.trim().is_empty() => {
            let mut parts = markup::capture_image(original);
            retarget_image_parts(&mut parts, edits);
            markup::render_image(&block.attributes, &parts)
        }
        Some(MediaKind::Gallery) if legacy_gallery && !original.trim().is_empty() => {
            markup::render_legacy_gallery(&block.attributes, &markup::capture_gallery(original))
        }
        _ => {
            for (old, new, ids) in &edits.substitutions {
                substitute_everywhere(block, old, new, *ids);
            }
            return;
        }
    };
    // keep the whitespace that separated markup from the delimiters
    let body = original.trim();
    let start = original.len() - original.trim_start().len();
    let lead = &original[..start];
    let trail = &original[start + body.len()..];
    block.set_rendered_markup(format!("{lead}{rendered}{trail}"));
}

/// Point captured image parts at the new asset
fn retarget_image_parts(parts: &mut ImageParts, edits: &BlockEdits) {
    let mut moves: Vec<(&str, &str)> = edits.substitutions.iter().map(|(o, n, _)| (o.as_str(), n.as_str())).collect();
    if let Some((old, new)) = &edits.markup_url {
        moves.push((old.as_str(), new.as_str()));
        parts.url = Some(markup::escape_attr(new));
    }
    let Some(link) = parts.link.as_mut() else { return };
    let href = link.href.replace("&amp;", "&");
    for (old, new) in moves {
        let old_unescaped = old.replace("&amp;", "&");
        let same_asset = filename::extracted_filename(&href) == filename::extracted_filename(&old_unescaped);
        if href == old_unescaped || (same_asset && is_file_link(&href)) {
            link.href = markup::escape_attr(new);
            break;
        }
    }
}

fn is_file_link(href: &str) -> bool {
    filename::split_extension(&filename::basename(href)).1.is_some()
}

fn substitute_everywhere(block: &mut Block, old: &str, new: &str, ids: Option<(u64, u64)>) {
    let escaped_old = markup::escape_attr(old);
    let escaped_new = markup::escape_attr(new);
    for chunk in block.markup_chunks_mut() {
        if let Some(updated) = markup::substitute_reference(chunk, old, new, ids) {
            *chunk = updated;
        }
        if escaped_old != old {
            if let Some(updated) = markup::substitute_reference(chunk, &escaped_old, &escaped_new, ids) {
                *chunk = updated;
            }
        }
    }
}

/// Write the new identifier next to a rewritten URL
fn update_identifiers(
    attributes: &mut Attributes,
    kind: Option<MediaKind>,
    path: &JsonPath,
    reference: &AssetReference,
    new_id: u64,
    edits: &mut BlockEdits,
) {
    let old_id = reference.sibling_identifier;
    if let Some(old) = old_id {
        edits.identifiers.push((old, new_id));
    }
    let top_level = path.segments().len() == 1;
    match kind {
        Some(kind) if top_level && kind.url_field() == path.last_key() => {
            set_identifier(attributes, kind.id_field(), new_id);
            return;
        }
        Some(MediaKind::Gallery) => {
            if let [PathSegment::Key(images), PathSegment::Index(index), _] = path.segments() {
                if images == "images" {
                    let image_path = JsonPath::root().key("images").index(*index);
                    if let Some(AttrValue::Map(image)) = value_at_mut(attributes, &image_path) {
                        set_identifier(image, "id", new_id);
                    }
                    replace_in_id_list(attributes, old_id, Some(*index), new_id);
                    return;
                }
            }
        }
        _ => {}
    }
    if old_id.is_none() {
        return;
    }
    let (Some(parent_path), Some(url_key)) = (path.parent(), path.last_key()) else { return };
    let parent = if parent_path.is_root() {
        Some(attributes)
    } else {
        match value_at_mut(attributes, &parent_path) {
            Some(AttrValue::Map(map)) => Some(map),
            _ => None,
        }
    };
    if let Some(map) = parent {
        if let Some((key, _)) = heuristics::identifier_for_url(map, url_key) {
            set_identifier(map, &key, new_id);
        }
    }
}

/// Replace one entry of a gallery `ids` list, by old value or by position
fn replace_in_id_list(attributes: &mut Attributes, old: Option<u64>, index: Option<usize>, new_id: u64) {
    let Some(AttrValue::List(ids)) = attributes.get_mut("ids") else { return };
    let position = old
        .and_then(|old| ids.iter().position(|v| identifier_of(v) == Some(old)))
        .or(index.filter(|i| *i < ids.len()));
    if let Some(slot) = position.and_then(|p| ids.get_mut(p)) {
        replace_identifier(slot, new_id);
    }
}

fn identifier_of(value: &AttrValue) -> Option<u64> {
    match value {
        AttrValue::Integer(i) => u64::try_from(*i).ok(),
        AttrValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Set an identifier key, keeping a string-typed identifier a string
fn set_identifier(map: &mut Attributes, key: &str, new_id: u64) {
    match map.get_mut(key) {
        Some(slot) => replace_identifier(slot, new_id),
        None => {
            map.insert(key.to_string(), AttrValue::from(new_id));
        }
    }
}

fn replace_identifier(slot: &mut AttrValue, new_id: u64) {
    *slot = match slot {
        AttrValue::String(_) => AttrValue::String(new_id.to_string()),
        _ => AttrValue::from(new_id),
    };
}

/// Mutable value at a path rooted in an attribute mapping
fn value_at_mut<'a>(attributes: &'a mut Attributes, path: &JsonPath) -> Option<&'a mut AttrValue> {
    let (first, rest) = path.segments().split_first()?;
    let PathSegment::Key(key) = first else { return None };
    let mut current = attributes.get_mut(key)?;
    for segment in rest {
        current = match (segment, current) {
            (PathSegment::Key(k), AttrValue::Map(map)) => map.get_mut(k)?,
            (PathSegment::Index(i), AttrValue::List(list)) => list.get_mut(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Rewrite one leaf of a JSON payload stored as a string
///
/// The payload is decoded, the leaf at `inner` (and its sibling identifier)
/// replaced, and the result re-encoded in the payload's own style. The new
/// text is decoded once more and every critical text field compared with the
/// original; any difference is an error and the caller keeps the old payload.
pub(crate) fn rewrite_embedded(
    payload: &str,
    encoding: ReferenceEncoding,
    inner: &JsonPath,
    old_url: &str,
    new_url: &str,
    new_id: u64,
) -> Result<String, String> {
    let (mut value, style) = decode_payload(payload, encoding)?;
    let before = critical_fields(&value);

    let Some(leaf) = value.get_path_mut(inner) else {
        return Err(format!("payload has no value at '{inner}'"));
    };
    if leaf.as_str() != Some(old_url) {
        return Err(format!("payload value at '{inner}' changed since scan"));
    }
    *leaf = AttrValue::from(new_url);
    if let (Some(parent), Some(url_key)) = (inner.parent(), inner.last_key()) {
        if let Some(AttrValue::Map(map)) = value.get_path_mut(&parent) {
            if let Some((key, _)) = heuristics::identifier_for_url(map, url_key) {
                set_identifier(map, &key, new_id);
            }
        }
    }

    let profile = if payload.contains("\\u0022") || payload.contains("\\u003c") {
        JsonProfile::Delimiter
    } else {
        JsonProfile::Plain
    };
    let text = json::encode(&value, profile);
    let encoded = match style {
        Some(style) => urlcodec::encode(&text, style),
        None => text,
    };

    let (check, _) = decode_payload(&encoded, encoding).map_err(|e| format!("re-encoded payload does not decode: {e}"))?;
    let after = critical_fields(&check);
    if let Some((path, _)) = before.iter().find(|(path, text)| after.get(path.as_str()) != Some(*text)) {
        return Err(format!("critical field '{path}' changed during re-encoding"));
    }
    Ok(encoded)
}

fn decode_payload(payload: &str, encoding: ReferenceEncoding) -> Result<(AttrValue, Option<EncodeStyle>), String> {
    if encoding == ReferenceEncoding::JsonUrlEncoded {
        let (value, style) =
            heuristics::decode_url_encoded_json(payload).ok_or_else(|| "url-encoded payload does not decode".to_string())?;
        Ok((value, Some(style)))
    } else {
        let value = AttrValue::from_json_str(payload).map_err(|e| format!("payload is not valid json: {e}"))?;
        Ok((value, None))
    }
}

fn critical_fields(value: &AttrValue) -> IndexMap<String, String> {
    let mut fields = IndexMap::new();
    value.visit_strings(&JsonPath::root(), &mut |path: &JsonPath, text: &str| {
        if path.last_key().is_some_and(|k| CRITICAL_KEYS.contains(&k)) {
            fields.insert(path.to_string(), text.to_string());
        }
    });
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RelinkConfig;
    use crate::scanner::Scanner;
    use pretty_assertions::assert_eq;
    use relink_blocks::{parse, serialize};

    fn resolve_all(tree: &BlockTree, entry: AssetCatalogEntry) -> Vec<ResolvedReference> {
        let config = RelinkConfig::default();
        Scanner::new(&config)
            .scan(tree)
            .into_iter()
            .map(|reference| ResolvedReference {
                reference,
                entry: entry.clone(),
                strategy: MatchStrategy::Exact,
            })
            .collect()
    }

    fn rewrite(doc: &str, entry: AssetCatalogEntry) -> (String, RewriteOutcome) {
        let tree = parse(doc).unwrap();
        let resolved = resolve_all(&tree, entry);
        let outcome = Rewriter::new().rewrite(&tree, &resolved);
        (serialize(&outcome.tree), outcome)
    }

    fn resolve_by_name(tree: &BlockTree, entries: &[(&str, AssetCatalogEntry)]) -> Vec<ResolvedReference> {
        let config = RelinkConfig::default();
        Scanner::new(&config)
            .scan(tree)
            .into_iter()
            .filter_map(|reference| {
                let (_, entry) = entries.iter().find(|(name, _)| *name == reference.extracted_filename)?;
                Some(ResolvedReference {
                    reference,
                    entry: entry.clone(),
                    strategy: MatchStrategy::Exact,
                })
            })
            .collect()
    }

    fn two_assets() -> Vec<(&'static str, AssetCatalogEntry)> {
        vec![
            ("a.jpg", AssetCatalogEntry::new(10, "https://n/a.jpg")),
            ("b.jpg", AssetCatalogEntry::new(20, "https://n/b.jpg")),
        ]
    }

    #[test]
    fn identifier_follows_its_own_url_in_nested_map() {
        let doc = r#"<!-- wp:acme/slide {"slide":{"id":5,"url":"https://o/wp-content/uploads/a.jpg","thumb":"https://o/wp-content/uploads/b.jpg"}} /-->"#;
        let tree = parse(doc).unwrap();
        let outcome = Rewriter::new().rewrite(&tree, &resolve_by_name(&tree, &two_assets()));
        assert!(outcome.results.iter().all(ReferenceResult::is_applied));
        let slide = outcome.tree.blocks[0].attributes["slide"].as_map().unwrap();
        assert_eq!(slide["id"], AttrValue::Integer(10));
        assert_eq!(slide["url"].as_str(), Some("https://n/a.jpg"));
        assert_eq!(slide["thumb"].as_str(), Some("https://n/b.jpg"));
    }

    #[test]
    fn identifier_follows_its_own_url_in_embedded_payload() {
        let doc = r#"<!-- wp:acme/slide {"data":"{\"id\":5,\"thumb\":\"https://o/wp-content/uploads/b.jpg\",\"url\":\"https://o/wp-content/uploads/a.jpg\"}"} /-->"#;
        let tree = parse(doc).unwrap();
        let outcome = Rewriter::new().rewrite(&tree, &resolve_by_name(&tree, &two_assets()));
        assert_eq!(outcome.results, vec![ReferenceResult::Applied, ReferenceResult::Applied]);
        assert_eq!(
            outcome.tree.blocks[0].attributes["data"].as_str(),
            Some(r#"{"id":10,"thumb":"https://n/b.jpg","url":"https://n/a.jpg"}"#)
        );
    }

    #[test]
    fn image_block_is_regenerated() {
        let doc = r#"<!-- wp:image {"id":7,"sizeSlug":"large","url":"https://old.example/wp-content/uploads/cat.jpg"} -->
<figure class="wp-block-image size-large"><img src="https://old.example/wp-content/uploads/cat.jpg" alt="Cat" class="wp-image-7"/></figure>
<!-- /wp:image -->"#;
        let (text, outcome) = rewrite(doc, AssetCatalogEntry::new(42, "https://new.example/wp-content/uploads/cat-1.jpg"));
        assert_eq!(
            text,
            r#"<!-- wp:image {"id":42,"sizeSlug":"large","url":"https://new.example/wp-content/uploads/cat-1.jpg"} -->
<figure class="wp-block-image size-large"><img src="https://new.example/wp-content/uploads/cat-1.jpg" alt="Cat" class="wp-image-42"/></figure>
<!-- /wp:image -->"#
        );
        assert_eq!(outcome.results, vec![ReferenceResult::Applied]);
        assert_eq!(outcome.blocks_updated.len(), 1);
    }

    #[test]
    fn input_tree_is_not_modified() {
        let doc = r#"<!-- wp:image {"id":7,"url":"/wp-content/uploads/cat.jpg"} /-->"#;
        let tree = parse(doc).unwrap();
        let before = tree.clone();
        let resolved = resolve_all(&tree, AssetCatalogEntry::new(1, "/n/cat.jpg"));
        let _ = Rewriter::new().rewrite(&tree, &resolved);
        assert_eq!(tree, before);
        assert_eq!(serialize(&tree), doc);
    }

    #[test]
    fn cover_markup_is_substituted() {
        let doc = r#"<!-- wp:cover {"url":"https://o/wp-content/uploads/bg.jpg","id":5} --><div class="wp-block-cover"><img class="wp-block-cover__image-background wp-image-5" src="https://o/wp-content/uploads/bg.jpg" data-object-fit="cover"/><div class="wp-block-cover__inner-container"></div></div><!-- /wp:cover -->"#;
        let (text, _) = rewrite(doc, AssetCatalogEntry::new(9, "https://n/wp-content/uploads/bg.jpg"));
        assert_eq!(
            text,
            r#"<!-- wp:cover {"url":"https://n/wp-content/uploads/bg.jpg","id":9} --><div class="wp-block-cover"><img class="wp-block-cover__image-background wp-image-9" src="https://n/wp-content/uploads/bg.jpg" data-object-fit="cover"/><div class="wp-block-cover__inner-container"></div></div><!-- /wp:cover -->"#
        );
    }

    #[test]
    fn legacy_gallery_updates_ids_and_links() {
        let doc = r#"<!-- wp:gallery {"ids":[3],"images":[{"url":"https://o/wp-content/uploads/a.jpg","id":3,"link":"https://o/wp-content/uploads/a.jpg","alt":""}]} --><figure class="wp-block-gallery columns-1 is-cropped"><ul class="blocks-gallery-grid"><li class="blocks-gallery-item"><figure><img src="https://o/wp-content/uploads/a.jpg" alt="" data-id="3" class="wp-image-3"/></figure></li></ul></figure><!-- /wp:gallery -->"#;
        let (text, outcome) = rewrite(doc, AssetCatalogEntry::new(30, "https://n/a.jpg"));
        assert!(outcome.results.iter().all(ReferenceResult::is_applied));
        let block = &outcome.tree.blocks[0];
        assert_eq!(block.attributes["ids"], AttrValue::List(vec![AttrValue::Integer(30)]));
        assert!(text.contains(r#"data-id="30""#));
        assert!(text.contains(r#"data-link="https://n/a.jpg""#));
        assert!(!text.contains("https://o/"));
    }

    #[test]
    fn nested_gallery_children_and_wrapper() {
        let doc = r#"<!-- wp:gallery {"ids":[1],"linkTo":"none"} --><figure class="wp-block-gallery has-nested-images columns-default is-cropped"><!-- wp:image {"id":1,"url":"/wp-content/uploads/a.jpg"} --><figure class="wp-block-image"><img src="/wp-content/uploads/a.jpg" alt="" class="wp-image-1"/></figure><!-- /wp:image --></figure><!-- /wp:gallery -->"#;
        let (text, outcome) = rewrite(doc, AssetCatalogEntry::new(11, "/n/a.jpg"));
        assert_eq!(
            text,
            r#"<!-- wp:gallery {"ids":[11],"linkTo":"none"} --><figure class="wp-block-gallery has-nested-images columns-default is-cropped"><!-- wp:image {"id":11,"url":"/n/a.jpg"} --><figure class="wp-block-image"><img src="/n/a.jpg" alt="" class="wp-image-11"/></figure><!-- /wp:image --></figure><!-- /wp:gallery -->"#
        );
        assert_eq!(outcome.blocks_updated.len(), 2);
    }

    #[test]
    fn unmanaged_block_nested_and_embedded() {
        let doc = r#"<!-- wp:acme/slider {"slides":[{"imageId":7,"imageUrl":"https://o/wp-content/uploads/s1.jpg"}],"data":"{\"id\":8,\"url\":\"https://o/wp-content/uploads/s1.jpg\",\"title\":\"夏祭り\"}"} --><div class="slider"><img src="https://o/wp-content/uploads/s1.jpg"/></div><!-- /wp:acme/slider -->"#;
        let (_, outcome) = rewrite(doc, AssetCatalogEntry::new(70, "https://n/s1.jpg"));
        assert!(outcome.results.iter().all(ReferenceResult::is_applied));
        let attrs = &outcome.tree.blocks[0].attributes;
        let slide = attrs["slides"].as_list().unwrap()[0].as_map().unwrap();
        assert_eq!(slide["imageId"], AttrValue::Integer(70));
        assert_eq!(slide["imageUrl"].as_str(), Some("https://n/s1.jpg"));
        assert_eq!(
            attrs["data"].as_str(),
            Some(r#"{"id":70,"url":"https://n/s1.jpg","title":"夏祭り"}"#)
        );
        assert_eq!(
            outcome.tree.blocks[0].rendered_markup(),
            r#"<div class="slider"><img src="https://n/s1.jpg"/></div>"#
        );
    }

    #[test]
    fn url_encoded_payload_keeps_its_encoding() {
        let payload = urlcodec::encode(r#"{"id":3,"url":"https://o/wp-content/uploads/fest.jpg","title":"夏祭り"}"#, EncodeStyle::Raw);
        let out = rewrite_embedded(
            &payload,
            ReferenceEncoding::JsonUrlEncoded,
            &JsonPath::root().key("url"),
            "https://o/wp-content/uploads/fest.jpg",
            "https://n/fest.jpg",
            99,
        )
        .unwrap();
        let decoded = urlcodec::decode(&out, EncodeStyle::Raw).unwrap();
        assert_eq!(decoded, r#"{"id":99,"url":"https://n/fest.jpg","title":"夏祭り"}"#);
    }

    #[test]
    fn stale_payload_rolls_back() {
        let err = rewrite_embedded(
            r#"{"url":"https://o/other.jpg"}"#,
            ReferenceEncoding::JsonEmbedded,
            &JsonPath::root().key("url"),
            "https://o/cat.jpg",
            "https://n/cat.jpg",
            1,
        )
        .unwrap_err();
        assert!(err.contains("changed since scan"));
    }

    #[test]
    fn string_identifiers_stay_strings() {
        let mut attrs = Attributes::new();
        attrs.insert("id".into(), AttrValue::from("12"));
        set_identifier(&mut attrs, "id", 40);
        assert_eq!(attrs["id"], AttrValue::from("40"));
    }

    #[test]
    fn failing_reference_rolls_back_alone() {
        let doc = r#"<!-- wp:image {"id":1,"url":"/wp-content/uploads/a.jpg"} /--><!-- wp:image {"id":2,"url":"/wp-content/uploads/b.jpg"} /-->"#;
        let tree = parse(doc).unwrap();
        let mut resolved = resolve_all(&tree, AssetCatalogEntry::new(5, "/n/x.jpg"));
        resolved[0].reference.raw_value = "/wp-content/uploads/stale.jpg".into();
        let outcome = Rewriter::new().rewrite(&tree, &resolved);
        assert!(matches!(outcome.results[0], ReferenceResult::RolledBack(_)));
        assert_eq!(outcome.results[1], ReferenceResult::Applied);
        assert_eq!(outcome.tree.blocks[0], tree.blocks[0]);
    }
}
