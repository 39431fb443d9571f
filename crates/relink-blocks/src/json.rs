//! JSON encoding for attribute values
//!
//! Two escaping profiles are provided:
//!
//! - [`JsonProfile::Delimiter`] for JSON written inside a block delimiter
//!   comment. Characters the surrounding comment/markup could misread are
//!   written as `\uXXXX` escapes: `"`, `<`, `>`, `&` and any `--` pair.
//! - [`JsonProfile::Plain`] for JSON stored as a string value (embedded
//!   payloads, fingerprints). Only what JSON itself requires is escaped.
//!
//! Both profiles keep non-ASCII text literal and never escape `/`. Encoding
//! runs through `serde_json`'s serializer; the delimiter profile is a
//! compact [`Formatter`] with extra escapes.

use crate::value::{AttrValue, Attributes};
use serde::Serialize;
use serde_json::ser::{CharEscape, CompactFormatter, Formatter, Serializer};
use std::io;

/// Escaping profile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonProfile {
    /// Restricted profile for block delimiter comments
    Delimiter,
    /// Standard JSON escaping
    Plain,
}

/// Encode a value to a JSON string
#[must_use]
pub fn encode(value: &AttrValue, profile: JsonProfile) -> String {
    encode_with_profile(value, profile)
}

/// Encode an attribute mapping as a JSON object
#[must_use]
pub fn encode_attributes(attributes: &Attributes, profile: JsonProfile) -> String {
    encode_with_profile(attributes, profile)
}

fn encode_with_profile<T: Serialize + ?Sized>(value: &T, profile: JsonProfile) -> String {
    match profile {
        JsonProfile::Delimiter => write_json(value, DelimiterFormatter),
        JsonProfile::Plain => write_json(value, CompactFormatter),
    }
}

fn write_json<T: Serialize + ?Sized, F: Formatter>(value: &T, formatter: F) -> String {
    let mut buf = Vec::with_capacity(64);
    let written = value.serialize(&mut Serializer::with_formatter(&mut buf, formatter));
    debug_assert!(written.is_ok(), "attribute values serialize into memory");
    // escapes are ASCII and fragments are slices of valid strings
    String::from_utf8(buf).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Compact output with markup-safe string escapes
struct DelimiterFormatter;

impl Formatter for DelimiterFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let bytes = fragment.as_bytes();
        let mut start = 0;
        let mut i = 0;
        while i < bytes.len() {
            let (escape, width) = match bytes[i] {
                b'<' => (&b"\\u003c"[..], 1),
                b'>' => (&b"\\u003e"[..], 1),
                b'&' => (&b"\\u0026"[..], 1),
                b'-' if bytes.get(i + 1) == Some(&b'-') => (&b"\\u002d\\u002d"[..], 2),
                _ => {
                    i += 1;
                    continue;
                }
            };
            writer.write_all(&bytes[start..i])?;
            writer.write_all(escape)?;
            i += width;
            start = i;
        }
        writer.write_all(&bytes[start..])
    }

    fn write_char_escape<W>(&mut self, writer: &mut W, char_escape: CharEscape) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        match char_escape {
            CharEscape::Quote => writer.write_all(b"\\u0022"),
            other => CompactFormatter.write_char_escape(writer, other),
        }
    }
}
