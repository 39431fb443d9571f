//! Percent-encoding for URL-encoded attribute payloads
//!
//! Payloads are re-encoded in the style they were found in, so a rewrite
//! changes only the bytes of the replaced value.

use once_cell::sync::Lazy;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;

/// RFC 3986 unreserved characters stay literal
const RAW_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// Form encoding keeps only `-`, `_` and `.`; space is handled separately
const FORM_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

/// A `%` not followed by two hex digits
static MALFORMED_ESCAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%(?:[^0-9A-Fa-f]|[0-9A-Fa-f](?:[^0-9A-Fa-f]|$)|$)").expect("valid pattern"));

/// Encoding style of a percent-encoded payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EncodeStyle {
    /// RFC 3986: space is `%20`, `~` kept
    Raw,
    /// Form encoding: space is `+`, `~` encoded
    Form,
}

impl EncodeStyle {
    /// Guess the style an encoded string was written in
    #[must_use]
    pub(crate) fn detect(encoded: &str) -> Self {
        if encoded.contains('+') && !encoded.contains("%20") {
            Self::Form
        } else {
            Self::Raw
        }
    }
}

/// Decode percent escapes
///
/// Returns `None` for truncated escapes or bytes that are not UTF-8.
#[must_use]
pub(crate) fn decode(encoded: &str, style: EncodeStyle) -> Option<String> {
    if MALFORMED_ESCAPE.is_match(encoded) {
        return None;
    }
    let decoded = match style {
        EncodeStyle::Raw => percent_decode_str(encoded).decode_utf8().ok()?.into_owned(),
        EncodeStyle::Form => percent_decode_str(&encoded.replace('+', " ")).decode_utf8().ok()?.into_owned(),
    };
    Some(decoded)
}

/// Percent-encode text (uppercase hex)
#[must_use]
pub(crate) fn encode(text: &str, style: EncodeStyle) -> String {
    match style {
        EncodeStyle::Raw => utf8_percent_encode(text, RAW_SET).to_string(),
        // a literal `%` is itself escaped, so every `%20` here was a space
        EncodeStyle::Form => utf8_percent_encode(text, FORM_SET).to_string().replace("%20", "+"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn decode_multibyte() {
        assert_eq!(
            decode("%E5%A4%8F%E7%A5%AD%E3%82%8A", EncodeStyle::Raw).as_deref(),
            Some("夏祭り")
        );
    }

    #[test]
    fn decode_rejects_truncated_escape() {
        assert_eq!(decode("%7B%2", EncodeStyle::Raw), None);
        assert_eq!(decode("%ZZ", EncodeStyle::Raw), None);
        assert_eq!(decode("%FF", EncodeStyle::Raw), None);
        assert_eq!(decode("%", EncodeStyle::Form), None);
    }

    #[test]
    fn styles_differ_on_space_and_tilde() {
        assert_eq!(encode("a b~", EncodeStyle::Raw), "a%20b~");
        assert_eq!(encode("a b~", EncodeStyle::Form), "a+b%7E");
        assert_eq!(encode("100% off", EncodeStyle::Form), "100%25+off");
        assert_eq!(decode("a+b", EncodeStyle::Form).as_deref(), Some("a b"));
        assert_eq!(decode("a+b", EncodeStyle::Raw).as_deref(), Some("a+b"));
        assert_eq!(decode("a%2Bb", EncodeStyle::Form).as_deref(), Some("a+b"));
    }

    #[test]
    fn detect_style() {
        assert_eq!(EncodeStyle::detect("%7B%22a%22%3A%22b+c%22%7D"), EncodeStyle::Form);
        assert_eq!(EncodeStyle::detect("%7B%22a%22%3A%22b%20c%22%7D"), EncodeStyle::Raw);
    }

    proptest! {
        #[test]
        fn prop_encode_decode(text in "\\PC{0,40}") {
            for style in [EncodeStyle::Raw, EncodeStyle::Form] {
                prop_assert_eq!(decode(&encode(&text, style), style), Some(text.clone()));
            }
        }
    }
}
