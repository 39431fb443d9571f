//! Classification heuristics for reference discovery
//!
//! Crate-internal; callers reach these through the scanner and matcher.

use crate::config::ScannerConfig;
use crate::filename;
use crate::urlcodec::{self, EncodeStyle};
use once_cell::sync::Lazy;
use regex::Regex;
use relink_blocks::{AttrValue, Attributes};

/// PHP serialisation markers (`a:2:{`, `s:5:"`, `O:8:"`)
static SERIALIZED_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:^|[;{}])(?:a:\d+:\{|s:\d+:"|O:\d+:")"#).expect("valid pattern"));

/// Keys that suggest a decoded structure describes media
const ASSET_KEYS: &[&str] = &[
    "id", "ID", "url", "src", "alt", "title", "sizes", "filename", "mime", "width", "height", "caption",
    "thumbnail", "full", "image", "media",
];

/// Keys that hold an asset identifier next to a URL
const IDENTIFIER_KEYS: &[&str] = &["id", "ID", "attachment_id", "attachmentId", "imageId", "image_id", "mediaId", "media_id"];

/// Keys naming the URL an identifier belongs to, in priority order
const PRIMARY_URL_KEYS: &[&str] = &[
    "url", "src", "imageUrl", "image_url", "mediaUrl", "media_url", "fullUrl", "full_url", "source_url", "href",
];

/// Check whether a string looks like a URL or path to a media asset
///
/// Needs a `/`, no whitespace, and either the managed segment or a known
/// media extension.
#[must_use]
pub(crate) fn looks_like_asset_url(value: &str, segment: &str, config: &ScannerConfig) -> bool {
    let value = value.trim();
    if value.len() < 5 || value.len() > 2048 || !value.contains('/') {
        return false;
    }
    if value.chars().any(|c| c.is_whitespace() || matches!(c, '"' | '<' | '>' | '{' | '}')) {
        return false;
    }
    let unescaped = value.replace("\\/", "/");
    if unescaped.contains(&format!("/{segment}/")) {
        return true;
    }
    let name = filename::basename(&unescaped);
    match filename::split_extension(&name).1 {
        Some(ext) => config.media_extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)),
        None => false,
    }
}

/// Check whether a string could be a JSON object or array
#[must_use]
pub(crate) fn looks_like_json(value: &str) -> bool {
    let value = value.trim();
    (value.starts_with('{') && value.ends_with('}')) || (value.starts_with('[') && value.ends_with(']'))
}

/// Check whether a string could be percent-encoded JSON
#[must_use]
pub(crate) fn looks_like_url_encoded_json(value: &str) -> bool {
    let value = value.trim();
    let head = value.get(..3).unwrap_or_default();
    head.eq_ignore_ascii_case("%7B") || head.eq_ignore_ascii_case("%5B")
}

/// Decode a percent-encoded JSON payload, returning the value and style
#[must_use]
pub(crate) fn decode_url_encoded_json(value: &str) -> Option<(AttrValue, EncodeStyle)> {
    if !looks_like_url_encoded_json(value) {
        return None;
    }
    let style = EncodeStyle::detect(value);
    let decoded = urlcodec::decode(value, style)?;
    if !looks_like_json(&decoded) {
        return None;
    }
    AttrValue::from_json_str(&decoded).ok().map(|v| (v, style))
}

/// Check whether a decoded value structurally resembles asset data
#[must_use]
pub(crate) fn resembles_asset_data(value: &AttrValue, max_depth: usize) -> bool {
    if max_depth == 0 {
        return false;
    }
    match value {
        AttrValue::Map(map) => {
            map.keys().any(|k| ASSET_KEYS.contains(&k.as_str()))
                || map.values().any(|v| resembles_asset_data(v, max_depth - 1))
        }
        AttrValue::List(items) => items.iter().any(|v| resembles_asset_data(v, max_depth - 1)),
        AttrValue::Null | AttrValue::Bool(_) | AttrValue::Integer(_) | AttrValue::Float(_) | AttrValue::String(_) => false,
    }
}

/// Check whether a key names an asset identifier
#[inline]
#[must_use]
pub(crate) fn is_identifier_key(key: &str) -> bool {
    IDENTIFIER_KEYS.contains(&key)
}

/// First positive identifier found among a mapping's identifier keys
#[must_use]
pub(crate) fn sibling_identifier(map: &Attributes) -> Option<(String, u64)> {
    map.iter()
        .filter(|(k, _)| is_identifier_key(k))
        .find_map(|(k, v)| {
            let id = u64::try_from(v.as_i64()?).ok().filter(|id| *id > 0)?;
            Some((k.clone(), id))
        })
}

/// Identifier confirmed to belong to the URL stored under `url_key`
///
/// A mapping's identifier describes one asset: the URL under the first
/// primary URL key present, or the only URL-like string when no primary key
/// exists. Other URLs in the same mapping (thumbnails, posters, links) never
/// claim it.
#[must_use]
pub(crate) fn identifier_for_url(map: &Attributes, url_key: &str) -> Option<(String, u64)> {
    if owning_url_key(map)? != url_key {
        return None;
    }
    sibling_identifier(map)
}

fn owning_url_key(map: &Attributes) -> Option<&str> {
    if let Some(key) = PRIMARY_URL_KEYS
        .iter()
        .find(|k| map.get(**k).and_then(AttrValue::as_str).is_some())
    {
        return Some(*key);
    }
    let mut urls = map
        .iter()
        .filter(|(_, v)| v.as_str().is_some_and(|s| s.contains('/') && !s.contains(char::is_whitespace)))
        .map(|(k, _)| k.as_str());
    let first = urls.next()?;
    urls.next().is_none().then_some(first)
}

/// Check for PHP serialisation markers
#[must_use]
pub(crate) fn is_serialized_data(value: &str) -> bool {
    SERIALIZED_MARKER.is_match(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config() -> ScannerConfig {
        ScannerConfig::default()
    }

    #[test]
    fn asset_url_detection() {
        let seg = "wp-content/uploads";
        assert!(looks_like_asset_url("https://a.example/wp-content/uploads/2020/01/x", seg, &config()));
        assert!(looks_like_asset_url("https://cdn.example/img/cat.JPG?v=1", seg, &config()));
        assert!(looks_like_asset_url("/media/clip.mp4", seg, &config()));
        assert!(looks_like_asset_url("https:\\/\\/a.example\\/wp-content\\/uploads\\/x.png", seg, &config()));
        assert!(!looks_like_asset_url("cat.jpg", seg, &config()));
        assert!(!looks_like_asset_url("https://a.example/about/", seg, &config()));
        assert!(!looks_like_asset_url("see https://a.example/x.jpg", seg, &config()));
        assert!(!looks_like_asset_url("{\"url\":\"/x.jpg\"}", seg, &config()));
    }

    #[test]
    fn json_shapes() {
        assert!(looks_like_json(" {\"a\":1} "));
        assert!(looks_like_json("[1]"));
        assert!(!looks_like_json("{oops"));
        assert!(looks_like_url_encoded_json("%7B%22a%22%3A1%7D"));
        assert!(looks_like_url_encoded_json("%5b1%5d"));
        assert!(!looks_like_url_encoded_json("%20"));
    }

    #[test]
    fn decode_url_encoded_payload() {
        let (value, style) = decode_url_encoded_json("%7B%22title%22%3A%22%E5%A4%8F%22%7D").unwrap();
        assert_eq!(style, EncodeStyle::Raw);
        assert_eq!(value.as_map().unwrap().get("title").and_then(AttrValue::as_str), Some("夏"));
        assert!(decode_url_encoded_json("%7Bnot-json").is_none());
    }

    #[test]
    fn asset_data_resemblance() {
        assert!(resembles_asset_data(&AttrValue::from(json!({"url": "x"})), 4));
        assert!(resembles_asset_data(&AttrValue::from(json!([{"slides": [{"image": 1}]}])), 4));
        assert!(!resembles_asset_data(&AttrValue::from(json!({"color": "red"})), 4));
        assert!(!resembles_asset_data(&AttrValue::from(json!({"a": {"b": {"url": 1}}})), 2));
    }

    #[test]
    fn sibling_identifier_lookup() {
        let value = AttrValue::from(json!({"url": "x", "imageId": "17"}));
        assert_eq!(sibling_identifier(value.as_map().unwrap()), Some(("imageId".to_string(), 17)));
        let value = AttrValue::from(json!({"id": 0}));
        assert_eq!(sibling_identifier(value.as_map().unwrap()), None);
    }

    #[test]
    fn identifier_belongs_to_primary_url_only() {
        let value = AttrValue::from(json!({"id": 5, "url": "/u/a.jpg", "thumb": "/u/b.jpg"}));
        let map = value.as_map().unwrap();
        assert_eq!(identifier_for_url(map, "url"), Some(("id".to_string(), 5)));
        assert_eq!(identifier_for_url(map, "thumb"), None);

        let value = AttrValue::from(json!({"imageId": 7, "poster": "/u/p.jpg"}));
        assert_eq!(identifier_for_url(value.as_map().unwrap(), "poster"), Some(("imageId".to_string(), 7)));

        let value = AttrValue::from(json!({"id": 7, "left": "/u/l.jpg", "right": "/u/r.jpg"}));
        assert_eq!(identifier_for_url(value.as_map().unwrap(), "left"), None);
    }

    #[test]
    fn serialized_markers() {
        assert!(is_serialized_data("a:2:{i:0;s:5:\"x.jpg\";}"));
        assert!(is_serialized_data("s:7:\"cat.jpg\""));
        assert!(!is_serialized_data("https://a.example/cat.jpg"));
    }
}
