//! Domain rewriter
//!
//! Moves absolute managed-asset URLs onto a new origin. Only the part in
//! front of the managed segment changes:
//!
//! ```text
//! https://old.example/blog/wp-content/uploads/2021/cat.jpg
//! └──────── prefix ──────┘
//! ```
//!
//! The escaped-slash form written by inline scripts (`https:\/\/...`) and
//! percent-encoded JSON payloads are handled as well. URLs already served
//! from the target host are left alone, so rebasing twice is a no-op.

use crate::error::ConfigError;
use crate::heuristics;
use crate::urlcodec::{self, EncodeStyle};
use indexmap::IndexMap;
use regex::{Captures, Regex};
use relink_blocks::{BlockPath, BlockTree};
use std::collections::BTreeSet;
use std::fmt::{self, Display, Formatter};
use tracing::debug;
use url::Url;

/// Origin plus optional base path that managed assets are served from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BaseUrl {
    /// `scheme://host[:port][/path]` without trailing slash
    prefix: String,
    /// Offset of `//` in `prefix`
    authority_start: usize,
    /// Lower-case host name
    host: String,
    /// Explicit, non-default port
    port: Option<u16>,
}

impl BaseUrl {
    /// Parse an absolute http(s) URL
    ///
    /// # Errors
    /// Returns [`ConfigError::BaseUrl`] for other schemes, a missing host,
    /// credentials, or a query/fragment part
    pub fn parse(url: &str) -> Result<Self, ConfigError> {
        let invalid = |message: &str| ConfigError::BaseUrl {
            url: url.to_string(),
            message: message.to_string(),
        };
        let parsed = Url::parse(url.trim()).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid("scheme must be http or https"));
        }
        let Some(host) = parsed.host_str().filter(|h| !h.is_empty()) else {
            return Err(invalid("missing host"));
        };
        if parsed.query().is_some() || parsed.fragment().is_some() {
            return Err(invalid("must not contain a query or fragment"));
        }
        if !parsed.username().is_empty() || parsed.password().is_some() {
            return Err(invalid("must not contain credentials"));
        }
        let host = host.to_ascii_lowercase();
        let port = parsed.port();
        let authority = match port {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        };
        let prefix = format!("{}://{authority}{}", parsed.scheme(), parsed.path().trim_end_matches('/'));
        Ok(Self {
            authority_start: parsed.scheme().len() + 1,
            prefix,
            host,
            port,
        })
    }

    /// Full prefix, e.g. `https://new.example/blog`
    #[inline]
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Prefix without scheme, e.g. `//new.example/blog`
    #[inline]
    #[must_use]
    pub fn scheme_relative(&self) -> &str {
        &self.prefix[self.authority_start..]
    }

    /// Host name, lower-cased
    #[inline]
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Check whether a matched URL prefix is already served from this host
    fn same_host(&self, prefix: &str) -> bool {
        let Some((_, rest)) = prefix.split_once("//") else {
            return false;
        };
        let authority = rest.split('/').next().unwrap_or_default();
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().ok()),
            None => (authority, None),
        };
        host.eq_ignore_ascii_case(&self.host) && port == self.port
    }
}

impl Display for BaseUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.prefix)
    }
}

/// Result of [`DomainRewriter::rebase`]
#[derive(Debug, Clone)]
pub struct RebaseOutcome {
    /// Rebased copy of the input tree
    pub tree: BlockTree,
    /// Number of URL prefixes replaced
    pub rewrites: usize,
    /// Blocks that changed
    pub blocks_updated: BTreeSet<BlockPath>,
}

/// Rewrites the origin of managed-asset URLs
#[derive(Debug, Clone)]
pub struct DomainRewriter {
    plain: Regex,
    escaped: Regex,
}

impl DomainRewriter {
    /// Create a rewriter for the given managed segment (`wp-content/uploads`)
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] for an empty segment
    pub fn new(segment: &str) -> Result<Self, ConfigError> {
        let segment = segment.trim_matches('/');
        if segment.is_empty() {
            return Err(ConfigError::invalid("managed_segment", "must not be empty"));
        }
        let plain_segment = regex::escape(segment);
        let escaped_segment = segment
            .split('/')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(r"\\/");
        let plain = format!(
            r#"(?P<prefix>(?i:https?:)?//[A-Za-z0-9.\-]+(?::\d+)?(?:/[^\s"'<>()/\\?#]+)*?)/{plain_segment}/"#
        );
        let escaped = format!(
            r#"(?P<prefix>(?i:https?:)?\\/\\/[A-Za-z0-9.\-]+(?::\d+)?(?:\\/[^\s"'<>()/\\?#]+)*?)\\/{escaped_segment}\\/"#
        );
        let compile = |pattern: &str| Regex::new(pattern).map_err(|e| ConfigError::invalid("managed_segment", e.to_string()));
        Ok(Self {
            plain: compile(&plain)?,
            escaped: compile(&escaped)?,
        })
    }

    /// Rebase every managed URL in free text; returns the text and the
    /// number of prefixes replaced
    #[must_use]
    pub fn rebase_text(&self, text: &str, base: &BaseUrl) -> (String, usize) {
        let mut count = 0;
        let plain = replace_prefixes(&self.plain, text, &mut count, |p| target_for(p, base));
        let escaped = replace_prefixes(&self.escaped, &plain, &mut count, |p| {
            target_for(&p.replace("\\/", "/"), base).map(|t| t.replace('/', "\\/"))
        });
        (escaped, count)
    }

    /// Rebase a string value, looking inside percent-encoded payloads
    fn rebase_value(&self, value: &str, base: &BaseUrl) -> (String, usize) {
        if heuristics::looks_like_url_encoded_json(value) {
            let style = EncodeStyle::detect(value);
            if let Some(decoded) = urlcodec::decode(value, style) {
                let (rebased, count) = self.rebase_text(&decoded, base);
                if count > 0 {
                    return (urlcodec::encode(&rebased, style), count);
                }
                return (value.to_string(), 0);
            }
        }
        self.rebase_text(value, base)
    }

    /// Rebase a copy of `tree`: string attributes (nested and embedded) and
    /// markup chunks
    #[must_use]
    pub fn rebase(&self, tree: &BlockTree, base: &BaseUrl) -> RebaseOutcome {
        let mut out = tree.clone();
        let mut rewrites = 0;
        let mut blocks_updated = BTreeSet::new();
        out.for_each_mut(|path, block| {
            let mut count = 0;
            for value in block.attributes.values_mut() {
                value.map_strings(&mut |s: &str| {
                    let (rebased, n) = self.rebase_value(s, base);
                    count += n;
                    (n > 0).then_some(rebased)
                });
            }
            for chunk in block.markup_chunks_mut() {
                let (rebased, n) = self.rebase_text(chunk, base);
                if n > 0 {
                    *chunk = rebased;
                    count += n;
                }
            }
            if count > 0 {
                debug!(block = %path, rewrites = count, "block rebased");
                rewrites += count;
                blocks_updated.insert(path.clone());
            }
        });
        RebaseOutcome {
            tree: out,
            rewrites,
            blocks_updated,
        }
    }

    /// Rebase metadata values; returns only the entries that changed
    #[must_use]
    pub fn rebase_metadata(&self, metadata: &IndexMap<String, String>, base: &BaseUrl) -> (IndexMap<String, String>, usize) {
        let mut changed = IndexMap::new();
        let mut total = 0;
        for (key, value) in metadata {
            let (rebased, n) = self.rebase_value(value, base);
            if n > 0 {
                total += n;
                changed.insert(key.clone(), rebased);
            }
        }
        (changed, total)
    }
}

/// Prefix a matched URL should carry, or `None` when its host is the
/// target's; scheme-relative URLs stay scheme-relative
fn target_for(prefix: &str, base: &BaseUrl) -> Option<String> {
    if base.same_host(prefix) {
        None
    } else if prefix.starts_with("//") {
        Some(base.scheme_relative().to_string())
    } else {
        Some(base.prefix().to_string())
    }
}

fn replace_prefixes<F>(regex: &Regex, text: &str, count: &mut usize, target: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    regex
        .replace_all(text, |caps: &Captures<'_>| {
            let whole = &caps[0];
            let prefix = &caps["prefix"];
            match target(prefix) {
                Some(wanted) if wanted != prefix => {
                    *count += 1;
                    format!("{wanted}{}", &whole[prefix.len()..])
                }
                _ => whole.to_string(),
            }
        })
        .into_owned()
}
