//! Corruption guard
//!
//! Last gate before a relinked document is handed back. The output must
//! parse and keep the block outline of the tree it was serialized from.
//! Known corruption patterns in delimiter JSON are repaired first, one
//! repair per round, and a repair only counts when the document parses
//! afterwards or the parse error moves further into the text.

use crate::config::GuardConfig;
use crate::error::GuardError;
use crate::markup;
use crate::media::MediaKind;
use once_cell::sync::Lazy;
use regex::Regex;
use relink_blocks::{parse, serialize, strip_null_entries, AttrValue, Block, BlockPath, BlockTree};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// JSON part of a block opener, ending at the first `}` before `-->`
static DELIMITER_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<!--\s+wp:[a-z][a-z0-9_-]*(?:/[a-z][a-z0-9_-]*)?\s+(\{.*?\})\s+/?-->").expect("valid pattern")
});

/// A textual repair applied to delimiter JSON
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Repair {
    /// `&quot;` and numeric quote entities written instead of `"`
    HtmlEntityQuotes,
    /// One extra layer of backslash escaping (`{\"id\":5}`)
    UnslashDelimiterJson,
    /// Literal newlines, tabs and other control characters inside strings
    RawControlInJson,
    /// `\'` and other escapes JSON does not define
    InvalidJsonEscape,
}

impl Repair {
    /// Every repair, in the order they are tried
    pub const ALL: [Self; 4] = [
        Self::HtmlEntityQuotes,
        Self::UnslashDelimiterJson,
        Self::RawControlInJson,
        Self::InvalidJsonEscape,
    ];

    /// Stable name used in reports
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::HtmlEntityQuotes => "html-entity-quotes",
            Self::UnslashDelimiterJson => "unslash-delimiter-json",
            Self::RawControlInJson => "raw-control-in-json",
            Self::InvalidJsonEscape => "invalid-json-escape",
        }
    }

    /// Apply to every delimiter JSON region; `None` when nothing changed
    #[must_use]
    pub fn apply(self, text: &str) -> Option<String> {
        rewrite_regions(text, |json| match self {
            Self::HtmlEntityQuotes => fix_entity_quotes(json),
            Self::UnslashDelimiterJson => unslash(json),
            Self::RawControlInJson => escape_raw_controls(json),
            Self::InvalidJsonEscape => fix_invalid_escapes(json),
        })
    }
}

/// Result of a successful guard pass
#[derive(Debug, Clone)]
pub struct GuardOutcome {
    /// Final document text
    pub text: String,
    /// Tree parsed from `text`
    pub tree: BlockTree,
    /// Repairs applied, in order
    pub repairs: Vec<Repair>,
    /// Image and legacy gallery blocks rebuilt from their attributes
    pub rebuilt: Vec<BlockPath>,
    /// Null attribute entries removed
    pub nulls_stripped: usize,
}

impl GuardOutcome {
    /// Repair names, for reports
    #[must_use]
    pub fn repair_names(&self) -> Vec<&'static str> {
        self.repairs.iter().map(|r| r.name()).collect()
    }
}

/// Output validator and repairer
#[derive(Debug, Clone, Copy, Default)]
pub struct CorruptionGuard {
    config: GuardConfig,
}

impl CorruptionGuard {
    /// Create guard
    #[inline]
    #[must_use]
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    /// Validate serialized output against the tree it came from
    ///
    /// # Errors
    /// [`GuardError::Unparseable`] when no repair sequence makes the text
    /// parse; [`GuardError::StructureChanged`] when the block outline differs
    pub fn validate_and_repair(&self, text: &str, original: &BlockTree) -> Result<GuardOutcome, GuardError> {
        let (mut current, mut tree, repairs) = self.repair(text)?;
        check_structure(original, &tree)?;

        let mut rebuilt = Vec::new();
        if self.config.rebuild_mismatched_markup {
            rebuilt = rebuild_mismatched_markup(&mut tree, original);
        }
        let mut nulls_stripped = 0;
        if self.config.strip_nulls {
            nulls_stripped = strip_changed_nulls(&mut tree, original);
        }
        if !rebuilt.is_empty() || nulls_stripped > 0 {
            current = serialize(&tree);
            tree = parse(&current).map_err(|error| GuardError::Unparseable {
                error,
                attempted: repairs.iter().map(|r| r.name().to_string()).collect(),
            })?;
        }
        if !repairs.is_empty() || !rebuilt.is_empty() || nulls_stripped > 0 {
            info!(
                repairs = repairs.len(),
                rebuilt = rebuilt.len(),
                nulls_stripped,
                "guard modified output"
            );
        }
        Ok(GuardOutcome {
            text: current,
            tree,
            repairs,
            rebuilt,
            nulls_stripped,
        })
    }

    /// Run the repair loop until the text parses
    ///
    /// # Errors
    /// [`GuardError::Unparseable`] with the last parse error and the repairs
    /// applied so far
    pub fn repair(&self, text: &str) -> Result<(String, BlockTree, Vec<Repair>), GuardError> {
        let mut current = text.to_string();
        let mut applied: Vec<Repair> = Vec::new();
        let mut rounds = 0;
        loop {
            let error = match parse(&current) {
                Ok(tree) => return Ok((current, tree, applied)),
                Err(error) => error,
            };
            let unparseable = |error, applied: &[Repair]| GuardError::Unparseable {
                error,
                attempted: applied.iter().map(|r| r.name().to_string()).collect(),
            };
            if !self.config.repairs_enabled || rounds >= self.config.max_repair_rounds {
                return Err(unparseable(error, &applied));
            }
            rounds += 1;

            let step = Repair::ALL.iter().find_map(|repair| {
                let candidate = repair.apply(&current)?;
                match parse(&candidate) {
                    Ok(_) => Some((*repair, candidate)),
                    Err(next) if next.offset() > error.offset() => Some((*repair, candidate)),
                    Err(_) => None,
                }
            });
            match step {
                Some((repair, candidate)) => {
                    debug!(repair = repair.name(), offset = error.offset(), "repair applied");
                    applied.push(repair);
                    current = candidate;
                }
                None => return Err(unparseable(error, &applied)),
            }
        }
    }
}

fn check_structure(original: &BlockTree, output: &BlockTree) -> Result<(), GuardError> {
    let expected = original.outline();
    let found = output.outline();
    let describe = |entry: Option<&(usize, relink_blocks::BlockKind)>| match entry {
        Some((depth, kind)) => format!("{kind} at depth {depth}"),
        None => "end of document".to_string(),
    };
    let len = expected.len().max(found.len());
    for position in 0..len {
        if expected.get(position) != found.get(position) {
            return Err(GuardError::StructureChanged {
                position,
                expected: describe(expected.get(position)),
                found: describe(found.get(position)),
            });
        }
    }
    Ok(())
}

/// Blocks whose own kind, attributes or markup differ from the original
fn changed_since(block: &Block, original: Option<&Block>) -> bool {
    original.map_or(true, |o| {
        o.kind != block.kind || o.attributes != block.attributes || o.inner_content != block.inner_content
    })
}

fn rebuild_mismatched_markup(tree: &mut BlockTree, original: &BlockTree) -> Vec<BlockPath> {
    let targets: Vec<BlockPath> = tree
        .walk()
        .filter(|(path, block)| {
            let markup = block.rendered_markup();
            !markup.trim().is_empty()
                && changed_since(block, original.get(path))
                && !markup_agrees(block, &markup)
        })
        .map(|(path, _)| path)
        .collect();
    for path in &targets {
        if let Some(block) = tree.get_mut(path) {
            let original_markup = block.rendered_markup();
            let body = original_markup.trim();
            let start = original_markup.len() - original_markup.trim_start().len();
            let rendered = if legacy_images(block).is_some() {
                markup::render_legacy_gallery(&block.attributes, &markup::capture_gallery(body))
            } else {
                markup::render_image(&block.attributes, &markup::capture_image(body))
            };
            let markup = format!(
                "{}{rendered}{}",
                &original_markup[..start],
                &original_markup[start + body.len()..]
            );
            block.set_rendered_markup(markup);
            debug!(block = %path, "markup rebuilt from attributes");
        }
    }
    targets
}

/// Image blocks and legacy galleries regenerate their markup; others never do
fn markup_agrees(block: &Block, markup: &str) -> bool {
    match MediaKind::of(block) {
        Some(MediaKind::Image) => markup::image_markup_agrees(
            markup,
            block.attributes.get("url").and_then(AttrValue::as_str),
            block.attributes.get("id").and_then(AttrValue::as_i64),
        ),
        Some(MediaKind::Gallery) => {
            legacy_images(block).map_or(true, |images| markup::legacy_gallery_markup_agrees(markup, images))
        }
        _ => true,
    }
}

fn legacy_images(block: &Block) -> Option<&[AttrValue]> {
    if MediaKind::of(block) != Some(MediaKind::Gallery) || !block.children.is_empty() {
        return None;
    }
    block.attributes.get("images").and_then(AttrValue::as_list)
}

fn strip_changed_nulls(tree: &mut BlockTree, original: &BlockTree) -> usize {
    let mut removed = 0;
    tree.for_each_mut(|path, block| {
        if changed_since(block, original.get(path)) {
            removed += strip_null_entries(&mut block.attributes);
        }
    });
    removed
}

fn rewrite_regions<F>(text: &str, transform: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in DELIMITER_JSON.captures_iter(text) {
        let Some(region) = caps.get(1) else { continue };
        if let Some(fixed) = transform(region.as_str()).filter(|f| f != region.as_str()) {
            out.push_str(&text[last..region.start()]);
            out.push_str(&fixed);
            last = region.end();
        }
    }
    if last == 0 {
        return None;
    }
    out.push_str(&text[last..]);
    Some(out)
}

fn fix_entity_quotes(json: &str) -> Option<String> {
    let fixed = json.replace("&quot;", "\"").replace("&#34;", "\"").replace("&#x22;", "\"");
    (fixed != json).then_some(fixed)
}

fn unslash(json: &str) -> Option<String> {
    if !json.contains("\\\"") || serde_json::from_str::<serde_json::Value>(json).is_ok() {
        return None;
    }
    let mut out = String::with_capacity(json.len());
    let mut chars = json.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Walk JSON text, handing each character inside a string to `inside`
///
/// `inside` sees the rest of the text starting at the current character and
/// returns how many characters it consumed.
fn map_string_chars<F>(json: &str, mut inside: F) -> String
where
    F: FnMut(&[char], &mut String) -> usize,
{
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if in_string && c != '"' {
            i += inside(&chars[i..], &mut out).max(1);
            continue;
        }
        out.push(c);
        in_string = !in_string && c == '"';
        i += 1;
    }
    out
}

fn escape_raw_controls(json: &str) -> Option<String> {
    let fixed = map_string_chars(json, |rest, out| match rest {
        ['\\', next, ..] => {
            out.push('\\');
            out.push(*next);
            2
        }
        ['\n', ..] => {
            out.push_str("\\n");
            1
        }
        ['\r', ..] => {
            out.push_str("\\r");
            1
        }
        ['\t', ..] => {
            out.push_str("\\t");
            1
        }
        [c, ..] if u32::from(*c) < 0x20 => {
            out.push_str(&format!("\\u{:04x}", u32::from(*c)));
            1
        }
        [c, ..] => {
            out.push(*c);
            1
        }
        [] => 1,
    });
    (fixed != json).then_some(fixed)
}

fn fix_invalid_escapes(json: &str) -> Option<String> {
    let fixed = map_string_chars(json, |rest, out| match rest {
        ['\\', next @ ('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't'), ..] => {
            out.push('\\');
            out.push(*next);
            2
        }
        ['\\', 'u', hex @ ..] if hex.len() >= 4 && hex[..4].iter().all(char::is_ascii_hexdigit) => {
            out.push_str("\\u");
            2
        }
        ['\\', '\'', ..] => {
            out.push('\'');
            2
        }
        ['\\', other, ..] => {
            out.push_str("\\\\");
            out.push(*other);
            2
        }
        ['\\'] => {
            out.push_str("\\\\");
            1
        }
        [c, ..] => {
            out.push(*c);
            1
        }
        [] => 1,
    });
    (fixed != json).then_some(fixed)
}
