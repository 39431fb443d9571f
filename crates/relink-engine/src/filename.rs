//! Filename extraction and normalisation
//!
//! Asset URLs carry generated suffixes that the catalog keys do not:
//! thumbnail sizes (`-300x200`), upload duplicates (`-1`) and downscaled
//! originals (`-scaled`). They are stripped before matching.

use crate::urlcodec::{self, EncodeStyle};
use once_cell::sync::Lazy;
use regex::Regex;

/// One generated suffix at the end of a stem
static GENERATED_SUFFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?P<stem>.+?)(?:-scaled|-\d+x\d+|-[1-9]\d?)$").expect("valid pattern"));

const MAX_SUFFIX_PASSES: usize = 4;

/// Last path segment of a URL or path, without query or fragment
///
/// Escaped slashes (`\/`) are treated as slashes and the segment is
/// percent-decoded when that yields valid UTF-8.
#[must_use]
pub fn basename(raw: &str) -> String {
    let unescaped = raw.trim().replace("\\/", "/");
    let path = unescaped
        .split(|c: char| c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let name = path.rsplit('/').next().unwrap_or_default();
    urlcodec::decode(name, EncodeStyle::Raw).unwrap_or_else(|| name.to_string())
}

/// Split `name.ext` into stem and extension
///
/// Only short alphanumeric extensions count; a leading dot is part of the stem.
#[must_use]
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => {
            let ext = &name[idx + 1..];
            if (1..=5).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                (&name[..idx], Some(ext))
            } else {
                (name, None)
            }
        }
        _ => (name, None),
    }
}

/// Base filename with generated suffixes removed
///
/// `photo-300x200-1.jpg`, `photo-scaled.jpg` and `photo.jpg` all yield
/// `photo.jpg`.
#[must_use]
pub fn extracted_filename(raw: &str) -> String {
    let base = basename(raw);
    let (stem, ext) = split_extension(&base);
    let stem = strip_generated_suffixes(stem);
    match ext {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    }
}

/// Lowercase stem of the extracted filename, extension removed
#[must_use]
pub fn normalized_stem(raw: &str) -> String {
    let extracted = extracted_filename(raw);
    split_extension(&extracted).0.to_lowercase()
}

fn strip_generated_suffixes(stem: &str) -> &str {
    let mut current = stem;
    for _ in 0..MAX_SUFFIX_PASSES {
        match GENERATED_SUFFIX.captures(current).and_then(|c| c.name("stem")) {
            Some(m) => current = &current[..m.end()],
            None => break,
        }
    }
    current
}
