//! Attribute values
//!
//! Block attributes are modelled as a closed set of variants so every
//! traversal is exhaustive. Conversion to and from `serde_json::Value` keeps
//! key order (serde_json is built with `preserve_order`).

use crate::path::{JsonPath, PathSegment};
use indexmap::IndexMap;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Ordered attribute mapping
pub type Attributes = IndexMap<String, AttrValue>;

/// A typed attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    /// JSON `null`; only ever observed, the guard strips it before output
    Null,
    /// Boolean
    Bool(bool),
    /// Integer that fits in `i64`
    Integer(i64),
    /// Any other number
    Float(f64),
    /// String
    String(String),
    /// Ordered list
    List(Vec<AttrValue>),
    /// Nested mapping
    Map(Attributes),
}

impl AttrValue {
    /// Parse a JSON document into a value
    ///
    /// # Errors
    /// Returns the serde_json error for malformed input
    pub fn from_json_str(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Self::from(value))
    }

    /// Convert to a `serde_json::Value`
    ///
    /// Non-finite floats have no JSON form and become `null`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Integer(i) => Value::Number((*i).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f).map_or(Value::Null, Value::Number),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Short type name for diagnostics
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "mapping",
        }
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read as integer
    ///
    /// Integral floats and numeric strings are accepted, because identifiers
    /// show up in all three shapes in imported content.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            #[allow(clippy::cast_possible_truncation)]
            Self::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            Self::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Borrow as mapping
    #[inline]
    #[must_use]
    pub fn as_map(&self) -> Option<&Attributes> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Borrow as list
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[AttrValue]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Check for the null marker
    #[inline]
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get value at path
    #[must_use]
    pub fn get_path(&self, path: &JsonPath) -> Option<&AttrValue> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, current) {
                (PathSegment::Key(k), Self::Map(map)) => map.get(k)?,
                (PathSegment::Index(i), Self::List(list)) => list.get(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Get mutable value at path
    pub fn get_path_mut(&mut self, path: &JsonPath) -> Option<&mut AttrValue> {
        let mut current = self;
        for segment in path.segments() {
            current = match (segment, current) {
                (PathSegment::Key(k), Self::Map(map)) => map.get_mut(k)?,
                (PathSegment::Index(i), Self::List(list)) => list.get_mut(*i)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Visit every string leaf with its path, depth-first
    pub fn visit_strings<F>(&self, path: &JsonPath, visit: &mut F)
    where
        F: FnMut(&JsonPath, &str),
    {
        match self {
            Self::String(s) => visit(path, s),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.visit_strings(&path.index(i), visit);
                }
            }
            Self::Map(map) => {
                for (k, v) in map {
                    v.visit_strings(&path.key(k.as_str()), visit);
                }
            }
            Self::Null | Self::Bool(_) | Self::Integer(_) | Self::Float(_) => {}
        }
    }

    /// Rewrite every string leaf in place; returns how many leaves changed
    pub fn map_strings<F>(&mut self, rewrite: &mut F) -> usize
    where
        F: FnMut(&str) -> Option<String>,
    {
        match self {
            Self::String(s) => match rewrite(s) {
                Some(new) if new != *s => {
                    *s = new;
                    1
                }
                _ => 0,
            },
            Self::List(items) => items.iter_mut().map(|i| i.map_strings(rewrite)).sum(),
            Self::Map(map) => map.values_mut().map(|v| v.map_strings(rewrite)).sum(),
            Self::Null | Self::Bool(_) | Self::Integer(_) | Self::Float(_) => 0,
        }
    }

    /// Remove null entries recursively; returns how many were removed
    ///
    /// Nulls inside lists are removed as well, which shifts later indexes.
    pub fn strip_nulls(&mut self) -> usize {
        match self {
            Self::List(items) => {
                let before = items.len();
                items.retain(|v| !v.is_null());
                let removed = before - items.len();
                removed + items.iter_mut().map(Self::strip_nulls).sum::<usize>()
            }
            Self::Map(map) => strip_null_entries(map),
            Self::Null | Self::Bool(_) | Self::Integer(_) | Self::Float(_) | Self::String(_) => 0,
        }
    }
}

/// Remove null entries from a mapping recursively
pub fn strip_null_entries(map: &mut Attributes) -> usize {
    let before = map.len();
    map.retain(|_, v| !v.is_null());
    let removed = before - map.len();
    removed + map.values_mut().map(AttrValue::strip_nulls).sum::<usize>()
}

impl Serialize for AttrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(f) if f.is_finite() => serializer.serialize_f64(*f),
            Self::Float(_) => serializer.serialize_unit(),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => serializer.collect_seq(items),
            Self::Map(map) => serializer.collect_map(map),
        }
    }
}

impl From<Value> for AttrValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<u64> for AttrValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or(Self::Float(value as f64), Self::Integer)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> AttrValue {
        AttrValue::from(json!({
            "id": 7,
            "images": [{"url": "a.jpg", "id": 3}, {"url": "b.jpg", "id": null}],
            "ratio": 0.5,
            "caption": null
        }))
    }

    #[test]
    fn conversion_keeps_key_order() {
        let value = sample();
        let keys: Vec<_> = value.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["id", "images", "ratio", "caption"]);
        assert_eq!(value.to_json()["images"][1]["url"], "b.jpg");
    }

    #[test]
    fn get_path_navigates_maps_and_lists() {
        let value = sample();
        let path = JsonPath::root().key("images").index(1).key("url");
        assert_eq!(value.get_path(&path).and_then(AttrValue::as_str), Some("b.jpg"));
        assert!(value.get_path(&JsonPath::root().key("missing")).is_none());
        assert!(value.get_path(&JsonPath::root().key("id").index(0)).is_none());
    }

    #[test]
    fn get_path_mut_replaces_leaf() {
        let mut value = sample();
        let path = JsonPath::root().key("images").index(0).key("url");
        *value.get_path_mut(&path).unwrap() = AttrValue::from("c.jpg");
        assert_eq!(value.get_path(&path).and_then(AttrValue::as_str), Some("c.jpg"));
    }

    #[test]
    fn visit_strings_reports_paths() {
        let mut seen = Vec::new();
        sample().visit_strings(&JsonPath::root(), &mut |p, s| seen.push((p.to_string(), s.to_string())));
        assert_eq!(
            seen,
            vec![
                ("images[0].url".to_string(), "a.jpg".to_string()),
                ("images[1].url".to_string(), "b.jpg".to_string()),
            ]
        );
    }

    #[test]
    fn map_strings_counts_changes() {
        let mut value = sample();
        let changed = value.map_strings(&mut |s| (s == "a.jpg").then(|| "z.jpg".to_string()));
        assert_eq!(changed, 1);
    }

    #[test]
    fn strip_nulls_is_recursive() {
        let mut value = sample();
        assert_eq!(value.strip_nulls(), 2);
        assert!(value.as_map().unwrap().get("caption").is_none());
        let second = value.get_path(&JsonPath::root().key("images").index(1)).unwrap();
        assert!(second.as_map().unwrap().get("id").is_none());
    }

    #[test]
    fn as_i64_accepts_numeric_shapes() {
        assert_eq!(AttrValue::Integer(4).as_i64(), Some(4));
        assert_eq!(AttrValue::Float(4.0).as_i64(), Some(4));
        assert_eq!(AttrValue::from("42").as_i64(), Some(42));
        assert_eq!(AttrValue::Float(4.5).as_i64(), None);
        assert_eq!(AttrValue::from("x").as_i64(), None);
    }
}
