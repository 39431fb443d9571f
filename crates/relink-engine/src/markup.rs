//! Lightweight markup handling
//!
//! A forgiving tag scanner (no validation, no tree) plus the deterministic
//! renderers for managed media blocks. Renderers take attributes first and
//! fall back to presentation parts captured from the existing markup, so
//! custom classes, captions and links survive regeneration.

use relink_blocks::{AttrValue, Attributes};
use std::fmt::Write as _;

/// An opening or self-closing tag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag<'a> {
    /// Tag name as written
    pub name: &'a str,
    /// Byte offset of `<`
    pub start: usize,
    /// Byte offset just past `>`
    pub end: usize,
    attrs: Vec<(&'a str, &'a str)>,
}

impl<'a> Tag<'a> {
    /// Attribute value by case-insensitive name
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.attrs
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| *v)
    }

    /// All attributes in source order
    #[must_use]
    pub fn attrs(&self) -> &[(&'a str, &'a str)] {
        &self.attrs
    }

    /// Class tokens
    #[must_use]
    pub fn classes(&self) -> Vec<&'a str> {
        self.attr("class").map(|c| c.split_whitespace().collect()).unwrap_or_default()
    }

    /// Check the tag name, ignoring case
    #[inline]
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    /// Identifier embedded in a `wp-image-N` class or a `data-id` attribute
    #[must_use]
    pub fn asset_identifier(&self) -> Option<u64> {
        self.classes()
            .iter()
            .find_map(|c| c.strip_prefix("wp-image-").and_then(|n| n.parse().ok()))
            .or_else(|| self.attr("data-id").and_then(|v| v.trim().parse().ok()))
    }
}

/// Scan opening tags in document order
///
/// Comments and closing tags are skipped. Scanning stops at the first
/// unterminated tag.
#[must_use]
pub fn tags(markup: &str) -> Vec<Tag<'_>> {
    let bytes = markup.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while let Some(rel) = markup[i..].find('<') {
        let start = i + rel;
        let rest = &markup[start..];
        if rest.starts_with("<!--") {
            match rest.find("-->") {
                Some(end) => i = start + end + 3,
                None => break,
            }
            continue;
        }
        match bytes.get(start + 1) {
            Some(b) if b.is_ascii_alphabetic() => match parse_tag(markup, start) {
                Some(tag) => {
                    i = tag.end;
                    out.push(tag);
                }
                None => break,
            },
            _ => i = start + 1,
        }
    }
    out
}

fn parse_tag(markup: &str, start: usize) -> Option<Tag<'_>> {
    let bytes = markup.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'-') {
        i += 1;
    }
    let name = &markup[start + 1..i];
    let mut attrs = Vec::new();
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        match bytes.get(i)? {
            b'>' => break,
            b'/' if bytes.get(i + 1) == Some(&b'>') => {
                i += 1;
                break;
            }
            b'/' => {
                i += 1;
                continue;
            }
            _ => {}
        }
        let name_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() && !matches!(bytes[i], b'=' | b'>' | b'/') {
            i += 1;
        }
        let attr_name = &markup[name_start..i];
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if bytes.get(i) != Some(&b'=') {
            attrs.push((attr_name, ""));
            continue;
        }
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let value = match bytes.get(i)? {
            q @ (b'"' | b'\'') => {
                let close = markup[i + 1..].find(char::from(*q))? + i + 1;
                let value = &markup[i + 1..close];
                i = close + 1;
                value
            }
            _ => {
                let value_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                    i += 1;
                }
                &markup[value_start..i]
            }
        };
        attrs.push((attr_name, value));
    }
    Some(Tag {
        name,
        start,
        end: i + 1,
        attrs,
    })
}

/// Escape text for use inside a double-quoted attribute
#[must_use]
pub fn escape_attr(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            c => out.push(c),
        }
    }
    out
}

/// Inner markup of the first `<tag ...>...</tag>` element
fn element_inner<'a>(markup: &'a str, tag: &Tag<'_>) -> Option<&'a str> {
    let close = format!("</{}>", tag.name);
    let rest = &markup[tag.end..];
    let end = rest.find(&close).or_else(|| rest.to_ascii_lowercase().find(&close.to_ascii_lowercase()))?;
    Some(&rest[..end])
}

/// Link wrapped around an image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkParts {
    pub href: String,
    pub target: Option<String>,
    pub rel: Option<String>,
    pub class: Option<String>,
}

/// Presentation parts of an image figure, as markup-ready strings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageParts {
    pub url: Option<String>,
    pub alt: String,
    pub title: Option<String>,
    pub caption: Option<String>,
    pub custom_classes: Vec<String>,
    pub link: Option<LinkParts>,
    pub width: Option<String>,
    pub height: Option<String>,
}

fn is_generated_image_class(class: &str) -> bool {
    class == "wp-block-image"
        || class == "is-resized"
        || class.starts_with("size-")
        || class.starts_with("align")
}

/// Capture presentation parts from existing image markup
#[must_use]
pub fn capture_image(markup: &str) -> ImageParts {
    let tags = tags(markup);
    let mut parts = ImageParts::default();
    if let Some(figure) = tags.iter().find(|t| t.is("figure")) {
        parts.custom_classes = figure
            .classes()
            .into_iter()
            .filter(|c| !is_generated_image_class(c))
            .map(String::from)
            .collect();
    }
    let img_index = tags.iter().position(|t| t.is("img"));
    if let Some(img) = img_index.map(|i| &tags[i]) {
        parts.url = img.attr("src").map(String::from);
        parts.alt = img.attr("alt").unwrap_or_default().to_string();
        parts.title = img.attr("title").map(String::from);
        parts.width = img.attr("width").map(String::from);
        parts.height = img.attr("height").map(String::from);
    }
    let link = tags[..img_index.unwrap_or(tags.len())]
        .iter()
        .rev()
        .find(|t| t.is("a") && t.attr("href").is_some());
    if let Some(a) = link {
        parts.link = Some(LinkParts {
            href: a.attr("href").unwrap_or_default().to_string(),
            target: a.attr("target").map(String::from),
            rel: a.attr("rel").map(String::from),
            class: a.attr("class").map(String::from),
        });
    }
    if let Some(caption) = tags.iter().find(|t| t.is("figcaption")) {
        parts.caption = element_inner(markup, caption).map(String::from);
    }
    parts
}

fn attr_str<'a>(attributes: &'a Attributes, key: &str) -> Option<&'a str> {
    attributes.get(key).and_then(AttrValue::as_str).filter(|s| !s.is_empty())
}

fn attr_number(attributes: &Attributes, key: &str) -> Option<String> {
    match attributes.get(key)? {
        AttrValue::Integer(i) => Some(i.to_string()),
        AttrValue::Float(f) => Some(f.to_string()),
        AttrValue::String(s) if !s.is_empty() => Some(escape_attr(s)),
        _ => None,
    }
}

/// Render an image figure from attributes and captured parts
#[must_use]
pub fn render_image(attributes: &Attributes, parts: &ImageParts) -> String {
    let url = attr_str(attributes, "url")
        .map(escape_attr)
        .or_else(|| parts.url.clone())
        .unwrap_or_default();
    let alt = attr_str(attributes, "alt").map_or_else(|| parts.alt.clone(), escape_attr);
    let id = attributes.get("id").and_then(AttrValue::as_i64);
    let width = attr_number(attributes, "width").or_else(|| parts.width.clone());
    let height = attr_number(attributes, "height").or_else(|| parts.height.clone());

    let mut classes = vec!["wp-block-image".to_string()];
    if let Some(align) = attr_str(attributes, "align") {
        classes.push(format!("align{align}"));
    }
    if let Some(size) = attr_str(attributes, "sizeSlug") {
        classes.push(format!("size-{size}"));
    }
    if attributes.contains_key("width") || attributes.contains_key("height") {
        classes.push("is-resized".to_string());
    }
    match attr_str(attributes, "className") {
        Some(custom) => classes.extend(custom.split_whitespace().map(String::from)),
        None => classes.extend(parts.custom_classes.iter().cloned()),
    }
    dedup_in_order(&mut classes);

    let mut img = format!("<img src=\"{url}\" alt=\"{alt}\"");
    if let Some(id) = id {
        let _ = write!(img, " class=\"wp-image-{id}\"");
    }
    if let Some(w) = width {
        let _ = write!(img, " width=\"{w}\"");
    }
    if let Some(h) = height {
        let _ = write!(img, " height=\"{h}\"");
    }
    if let Some(title) = attr_str(attributes, "title").map(escape_attr).or_else(|| parts.title.clone()) {
        let _ = write!(img, " title=\"{title}\"");
    }
    img.push_str("/>");

    let href = attr_str(attributes, "href")
        .map(escape_attr)
        .or_else(|| parts.link.as_ref().map(|l| l.href.clone()));
    let body = match href {
        Some(href) => {
            let mut a = format!("<a href=\"{href}\"");
            let link = parts.link.clone().unwrap_or_default();
            if let Some(target) = attr_str(attributes, "linkTarget").map(escape_attr).or(link.target) {
                let _ = write!(a, " target=\"{target}\"");
            }
            if let Some(rel) = attr_str(attributes, "rel").map(escape_attr).or(link.rel) {
                let _ = write!(a, " rel=\"{rel}\"");
            }
            if let Some(class) = attr_str(attributes, "linkClass").map(escape_attr).or(link.class) {
                let _ = write!(a, " class=\"{class}\"");
            }
            format!("{a}>{img}</a>")
        }
        None => img,
    };

    let mut out = format!("<figure class=\"{}\">{body}", classes.join(" "));
    if let Some(caption) = attr_str(attributes, "caption").map(String::from).or_else(|| parts.caption.clone()) {
        if !caption.is_empty() {
            let _ = write!(out, "<figcaption class=\"wp-element-caption\">{caption}</figcaption>");
        }
    }
    out.push_str("</figure>");
    out
}

/// Check that image markup agrees with the structured url and identifier
///
/// An identifier disagrees only when the markup embeds a different one.
#[must_use]
pub fn image_markup_agrees(markup: &str, url: Option<&str>, id: Option<i64>) -> bool {
    let tags = tags(markup);
    let Some(img) = tags.iter().find(|t| t.is("img")) else {
        return url.is_none();
    };
    if let Some(url) = url {
        if img.attr("src").map(unescape_amp).as_deref() != Some(url) {
            return false;
        }
    }
    match (id, img.asset_identifier()) {
        (Some(expected), Some(found)) => i64::try_from(found).ok() == Some(expected),
        _ => true,
    }
}

/// Check that legacy gallery markup lists the `images` attribute in order
///
/// Every entry needs an `<img>` whose source matches its `url`; embedded
/// identifiers (`data-id`, `wp-image-N`) must match its `id`.
#[must_use]
pub fn legacy_gallery_markup_agrees(markup: &str, images: &[AttrValue]) -> bool {
    let tags = tags(markup);
    let imgs: Vec<&Tag<'_>> = tags.iter().filter(|t| t.is("img")).collect();
    let entries: Vec<&Attributes> = images.iter().filter_map(AttrValue::as_map).collect();
    if imgs.len() != entries.len() {
        return false;
    }
    imgs.iter().zip(entries).all(|(img, entry)| {
        let url_agrees = match attr_str(entry, "url") {
            Some(url) => img.attr("src").map(unescape_amp).as_deref() == Some(url),
            None => true,
        };
        let id_agrees = match (entry.get("id").and_then(AttrValue::as_i64), img.asset_identifier()) {
            (Some(expected), Some(found)) => i64::try_from(found).ok() == Some(expected),
            _ => true,
        };
        url_agrees && id_agrees
    })
}

fn unescape_amp(value: &str) -> String {
    value.replace("&amp;", "&")
}

fn dedup_in_order(classes: &mut Vec<String>) {
    let mut seen = std::collections::HashSet::new();
    classes.retain(|c| seen.insert(c.clone()));
}

/// Presentation parts of a gallery wrapper
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GalleryParts {
    pub custom_classes: Vec<String>,
    pub caption: Option<String>,
}

fn is_generated_gallery_class(class: &str) -> bool {
    matches!(class, "wp-block-gallery" | "has-nested-images" | "is-cropped" | "blocks-gallery-grid")
        || class.starts_with("columns-")
        || class.starts_with("align")
}

/// Capture wrapper classes and caption of a gallery
#[must_use]
pub fn capture_gallery(markup: &str) -> GalleryParts {
    let tags = tags(markup);
    let custom_classes = tags
        .iter()
        .find(|t| t.is("figure"))
        .map(|f| {
            f.classes()
                .into_iter()
                .filter(|c| !is_generated_gallery_class(c))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let caption = tags
        .iter()
        .find(|t| t.is("figcaption") && t.classes().contains(&"blocks-gallery-caption"))
        .and_then(|t| element_inner(markup, t))
        .map(String::from);
    GalleryParts {
        custom_classes,
        caption,
    }
}

fn gallery_classes(attributes: &Attributes, parts: &GalleryParts, nested: bool, image_count: usize) -> String {
    let mut classes = vec!["wp-block-gallery".to_string()];
    if nested {
        classes.push("has-nested-images".to_string());
    }
    match attributes.get("columns").and_then(AttrValue::as_i64) {
        Some(n) => classes.push(format!("columns-{n}")),
        None if nested => classes.push("columns-default".to_string()),
        None => classes.push(format!("columns-{}", image_count.clamp(1, 3))),
    }
    if attributes.get("imageCrop") != Some(&AttrValue::Bool(false)) {
        classes.push("is-cropped".to_string());
    }
    if let Some(align) = attr_str(attributes, "align") {
        classes.push(format!("align{align}"));
    }
    match attr_str(attributes, "className") {
        Some(custom) => classes.extend(custom.split_whitespace().map(String::from)),
        None => classes.extend(parts.custom_classes.iter().cloned()),
    }
    dedup_in_order(&mut classes);
    classes.join(" ")
}

/// Opening and closing wrapper markup of a nested gallery
#[must_use]
pub fn render_gallery_wrapper(attributes: &Attributes, parts: &GalleryParts) -> (String, String) {
    let open = format!("<figure class=\"{}\">", gallery_classes(attributes, parts, true, 0));
    let close = match attr_str(attributes, "caption").map(String::from).or_else(|| parts.caption.clone()) {
        Some(caption) if !caption.is_empty() => {
            format!("<figcaption class=\"blocks-gallery-caption wp-element-caption\">{caption}</figcaption></figure>")
        }
        _ => "</figure>".to_string(),
    };
    (open, close)
}

/// Render a legacy gallery from its `images` attribute
#[must_use]
pub fn render_legacy_gallery(attributes: &Attributes, parts: &GalleryParts) -> String {
    let images = attributes.get("images").and_then(AttrValue::as_list).unwrap_or_default();
    let mut out = format!(
        "<figure class=\"{}\"><ul class=\"blocks-gallery-grid\">",
        gallery_classes(attributes, parts, false, images.len())
    );
    for image in images.iter().filter_map(AttrValue::as_map) {
        let field = |key: &str| attr_str(image, key).map(escape_attr);
        let url = field("url").unwrap_or_default();
        let _ = write!(
            out,
            "<li class=\"blocks-gallery-item\"><figure><img src=\"{url}\" alt=\"{}\"",
            field("alt").unwrap_or_default()
        );
        let id = image.get("id").and_then(AttrValue::as_i64);
        if let Some(id) = id {
            let _ = write!(out, " data-id=\"{id}\"");
        }
        if let Some(full) = field("fullUrl") {
            let _ = write!(out, " data-full-url=\"{full}\"");
        }
        if let Some(link) = field("link") {
            let _ = write!(out, " data-link=\"{link}\"");
        }
        if let Some(id) = id {
            let _ = write!(out, " class=\"wp-image-{id}\"");
        }
        out.push_str("/>");
        if let Some(caption) = attr_str(image, "caption") {
            let _ = write!(out, "<figcaption class=\"blocks-gallery-item__caption\">{caption}</figcaption>");
        }
        out.push_str("</figure></li>");
    }
    out.push_str("</ul>");
    if let Some(caption) = attr_str(attributes, "caption").map(String::from).or_else(|| parts.caption.clone()) {
        if !caption.is_empty() {
            let _ = write!(out, "<figcaption class=\"blocks-gallery-caption\">{caption}</figcaption>");
        }
    }
    out.push_str("</figure>");
    out
}

/// Replace a URL in markup and re-point identifier tokens of the tags using it
///
/// Occurrences must end at a URL boundary, so `cat.jpg` does not match
/// inside `cat.jpg.webp`. Returns `None` when nothing changed.
#[must_use]
pub fn substitute_reference(markup: &str, old_url: &str, new_url: &str, ids: Option<(u64, u64)>) -> Option<String> {
    if old_url.is_empty() || old_url == new_url {
        return None;
    }
    let mut text = replace_bounded(markup, old_url, new_url);
    let old_escaped = old_url.replace('/', "\\/");
    if old_escaped != old_url {
        text = replace_bounded(&text, &old_escaped, &new_url.replace('/', "\\/"));
    }
    if let Some((old_id, new_id)) = ids.filter(|(o, n)| o != n) {
        text = repoint_identifiers(&text, new_url, old_id, new_id);
    }
    (text != markup).then_some(text)
}

fn replace_bounded(text: &str, needle: &str, replacement: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (idx, _) in text.match_indices(needle) {
        let after = text[idx + needle.len()..].chars().next();
        let bounded = !matches!(after, Some(c) if c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | '%'));
        if bounded && idx >= last {
            out.push_str(&text[last..idx]);
            out.push_str(replacement);
            last = idx + needle.len();
        }
    }
    out.push_str(&text[last..]);
    out
}

fn repoint_identifiers(text: &str, url: &str, old_id: u64, new_id: u64) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for tag in tags(text) {
        if !tag.attrs().iter().any(|(_, v)| v.contains(url)) {
            continue;
        }
        let raw = &text[tag.start..tag.end];
        let updated = replace_number_token(raw, "wp-image-", old_id, new_id);
        let updated = replace_number_token(&updated, "data-id=\"", old_id, new_id);
        let updated = replace_number_token(&updated, "data-id='", old_id, new_id);
        out.push_str(&text[last..tag.start]);
        out.push_str(&updated);
        last = tag.end;
    }
    out.push_str(&text[last..]);
    out
}

fn replace_number_token(text: &str, prefix: &str, old: u64, new: u64) -> String {
    let needle = format!("{prefix}{old}");
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (idx, _) in text.match_indices(&needle) {
        let end = idx + needle.len();
        if text[end..].starts_with(|c: char| c.is_ascii_digit()) {
            continue;
        }
        out.push_str(&text[last..idx]);
        let _ = write!(out, "{prefix}{new}");
        last = end;
    }
    out.push_str(&text[last..]);
    out
}
