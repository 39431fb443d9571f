//! Testing utilities for the relink workspace
//!
//! Shared fixtures, document builders and assertions.

#![allow(missing_docs)]

use indexmap::IndexMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use relink_blocks::{parse, BlockTree};
use relink_engine::{AssetCatalog, RelinkConfig, RelinkEngine};
use serde_json::Value;

pub const OLD_ORIGIN: &str = "https://old.example";
pub const NEW_ORIGIN: &str = "https://new.example";

const UNRESERVED_KEPT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// URL of an upload on the old site
pub fn old_upload(path: &str) -> String {
    format!("{OLD_ORIGIN}/wp-content/uploads/{path}")
}

/// URL of an upload on the new site
pub fn new_upload(path: &str) -> String {
    format!("{NEW_ORIGIN}/wp-content/uploads/{path}")
}

pub fn setup_test_engine() -> RelinkEngine {
    RelinkEngine::new(RelinkConfig::default()).unwrap()
}

/// Catalog from `(old filename, new id, new url)` triples
pub fn catalog(entries: &[(&str, u64, &str)]) -> AssetCatalog {
    entries
        .iter()
        .fold(AssetCatalog::new(), |c, (name, id, url)| c.with_entry(*name, *id, *url))
}

pub fn metadata(entries: &[(&str, &str)]) -> IndexMap<String, String> {
    entries.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}

pub fn parse_ok(text: &str) -> BlockTree {
    parse(text).unwrap_or_else(|e| panic!("fixture does not parse: {e}\n{text}"))
}

/// Attributes of the block at `index` (top level) as JSON
pub fn attributes_json(text: &str, index: usize) -> Value {
    let tree = parse_ok(text);
    let block = &tree.blocks[index];
    Value::Object(block.attributes.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}

/// Builds block documents one block per line
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    parts: Vec<String>,
}

impl DocumentBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paragraph(mut self, text: &str) -> Self {
        self.parts
            .push(format!("<!-- wp:paragraph -->\n<p>{text}</p>\n<!-- /wp:paragraph -->"));
        self
    }

    pub fn image(mut self, id: u64, url: &str, alt: &str) -> Self {
        self.parts.push(format!(
            "<!-- wp:image {{\"id\":{id},\"sizeSlug\":\"large\"}} -->\n<figure class=\"wp-block-image size-large\"><img src=\"{url}\" alt=\"{alt}\" class=\"wp-image-{id}\"/></figure>\n<!-- /wp:image -->"
        ));
        self
    }

    pub fn image_with_url(mut self, id: u64, url: &str) -> Self {
        self.parts.push(format!(
            "<!-- wp:image {{\"id\":{id},\"url\":\"{url}\"}} -->\n<figure class=\"wp-block-image\"><img src=\"{url}\" alt=\"\" class=\"wp-image-{id}\"/></figure>\n<!-- /wp:image -->"
        ));
        self
    }

    /// Gallery storing its images in the `images` attribute
    pub fn legacy_gallery(mut self, images: &[(u64, &str)]) -> Self {
        let ids: Vec<String> = images.iter().map(|(id, _)| id.to_string()).collect();
        let entries: Vec<String> = images
            .iter()
            .map(|(id, url)| format!("{{\"url\":\"{url}\",\"id\":{id},\"alt\":\"\"}}"))
            .collect();
        let items: String = images
            .iter()
            .map(|(id, url)| {
                format!("<li class=\"blocks-gallery-item\"><figure><img src=\"{url}\" alt=\"\" data-id=\"{id}\" class=\"wp-image-{id}\"/></figure></li>")
            })
            .collect();
        self.parts.push(format!(
            "<!-- wp:gallery {{\"ids\":[{}],\"images\":[{}]}} -->\n<figure class=\"wp-block-gallery columns-{} is-cropped\"><ul class=\"blocks-gallery-grid\">{items}</ul></figure>\n<!-- /wp:gallery -->",
            ids.join(","),
            entries.join(","),
            images.len().clamp(1, 3)
        ));
        self
    }

    /// Void custom block with raw attribute JSON
    pub fn custom(mut self, name: &str, json: &str) -> Self {
        self.parts.push(format!("<!-- wp:{name} {json} /-->"));
        self
    }

    pub fn fragment(mut self, reference: u64) -> Self {
        self.parts.push(format!("<!-- wp:block {{\"ref\":{reference}}} /-->"));
        self
    }

    pub fn freeform(mut self, html: &str) -> Self {
        self.parts.push(html.to_string());
        self
    }

    pub fn build(self) -> String {
        self.parts.join("\n\n")
    }
}

/// RFC 3986 percent-encoding, uppercase hex, unreserved characters kept
pub fn percent_encode(text: &str) -> String {
    utf8_percent_encode(text, UNRESERVED_KEPT).to_string()
}
