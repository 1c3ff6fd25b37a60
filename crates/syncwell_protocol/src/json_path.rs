//! JSON paths for partial record updates.
//!
//! A path addresses a node inside a record's document using dotted keys and
//! bracketed array indexes, e.g. `address.lines[1]` or `matrix[0][2]`.

use crate::error::{ProtocolError, ProtocolResult};
use serde_json::{Map, Value};
use std::fmt;

/// Largest array index a path may address.
///
/// Setting an index pads the array up to it, so the bound caps how much a
/// single partial write can allocate.
pub const MAX_ARRAY_INDEX: usize = 65_535;

/// One step of a [`JsonPath`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// An object key. A numeric key also indexes into an existing array.
    Key(String),
    /// An array index, written in brackets.
    Index(usize),
}

/// A parsed path into a JSON document.
///
/// # Invariants
///
/// - A path has at least one segment
/// - Bracketed segments are always [`Segment::Index`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// Parses a dotted/bracketed path.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidPath`] for empty paths, empty
    /// segments, unbalanced brackets, non-numeric indexes and indexes (or
    /// numeric keys) above [`MAX_ARRAY_INDEX`].
    pub fn parse(path: &str) -> ProtocolResult<Self> {
        let invalid = |reason| ProtocolError::InvalidPath {
            path: path.to_string(),
            reason,
        };

        if path.trim().is_empty() {
            return Err(invalid("empty path"));
        }

        let mut segments = Vec::new();
        for part in path.split('.') {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid("empty segment"));
            }

            let (key, mut rest) = match part.find('[') {
                Some(start) => part.split_at(start),
                None => (part, ""),
            };
            if key.contains(']') {
                return Err(invalid("unexpected ']'"));
            }
            if is_oversized_index(key) {
                return Err(invalid("index out of range"));
            }
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }

            while !rest.is_empty() {
                let close = rest.find(']').ok_or_else(|| invalid("unterminated index"))?;
                let index = rest[1..close]
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid("index must be a non-negative integer"))?;
                if index > MAX_ARRAY_INDEX {
                    return Err(invalid("index out of range"));
                }
                segments.push(Segment::Index(index));

                rest = &rest[close + 1..];
                if !rest.is_empty() && !rest.starts_with('[') {
                    return Err(invalid("unexpected characters after index"));
                }
            }
        }

        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    /// Returns the path as it was written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the parsed segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Returns the node at this path, if present.
    pub fn get<'a>(&self, root: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(root, |node, segment| match array_index(segment, node) {
                Some(index) => node.as_array()?.get(index),
                None => match segment {
                    Segment::Key(key) => node.as_object()?.get(key),
                    Segment::Index(_) => None,
                },
            })
    }

    /// Writes `value` at this path.
    ///
    /// Missing intermediate nodes are created: an array for an index
    /// segment, an object for a key segment. Scalars in the way are
    /// replaced and arrays are padded with `null`.
    pub fn set(&self, root: &mut Value, value: Value) {
        let current = std::mem::take(root);
        *root = set_in(current, &self.segments, value);
    }

    /// Removes the node at this path.
    ///
    /// Object keys are removed; array slots are set to `null` so the
    /// positions of later elements do not shift. Missing paths are ignored.
    pub fn erase(&self, root: &mut Value) {
        let _ = erase_in(root, &self.segments);
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A numeric key indexes into arrays, so it is held to the same bound.
fn is_oversized_index(key: &str) -> bool {
    !key.is_empty()
        && key.bytes().all(|b| b.is_ascii_digit())
        && key.parse::<usize>().map_or(true, |index| index > MAX_ARRAY_INDEX)
}

/// Resolves the array index a segment denotes against `node`.
fn array_index(segment: &Segment, node: &Value) -> Option<usize> {
    match segment {
        Segment::Index(index) => Some(*index),
        Segment::Key(key) if node.is_array() => key.parse().ok(),
        Segment::Key(_) => None,
    }
}

fn set_in(node: Value, segments: &[Segment], value: Value) -> Value {
    let Some((segment, rest)) = segments.split_first() else {
        return value;
    };

    if let Some(index) = array_index(segment, &node) {
        let mut items = match node {
            Value::Array(items) => items,
            _ => Vec::new(),
        };
        if items.len() <= index {
            items.resize(index + 1, Value::Null);
        }
        let child = std::mem::take(&mut items[index]);
        items[index] = set_in(child, rest, value);
        return Value::Array(items);
    }

    let Segment::Key(key) = segment else {
        return node;
    };
    let mut map = match node {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let child = map.remove(key).unwrap_or(Value::Null);
    map.insert(key.clone(), set_in(child, rest, value));
    Value::Object(map)
}

fn erase_in(root: &mut Value, segments: &[Segment]) -> Option<()> {
    let (last, parents) = segments.split_last()?;

    let mut node = root;
    for segment in parents {
        node = match array_index(segment, node) {
            Some(index) => node.as_array_mut()?.get_mut(index)?,
            None => match segment {
                Segment::Key(key) => node.as_object_mut()?.get_mut(key)?,
                Segment::Index(_) => return None,
            },
        };
    }

    match array_index(last, node) {
        Some(index) => *node.as_array_mut()?.get_mut(index)? = Value::Null,
        None => {
            if let Segment::Key(key) = last {
                node.as_object_mut()?.remove(key);
            }
        }
    }
    Some(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn path(raw: &str) -> JsonPath {
        JsonPath::parse(raw).unwrap()
    }

    #[test]
    fn parse_keys_and_indexes() {
        let parsed = path("address.lines[1].text");
        assert_eq!(
            parsed.segments(),
            &[
                Segment::Key("address".into()),
                Segment::Key("lines".into()),
                Segment::Index(1),
                Segment::Key("text".into()),
            ]
        );
        assert_eq!(parsed.to_string(), "address.lines[1].text");

        let nested = path("matrix[0][2]");
        assert_eq!(
            nested.segments(),
            &[
                Segment::Key("matrix".into()),
                Segment::Index(0),
                Segment::Index(2)
            ]
        );
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        for raw in ["", "  ", "a..b", "a[", "a[x]", "a[1]b", "a]", "a[-1]"] {
            assert!(
                matches!(JsonPath::parse(raw), Err(ProtocolError::InvalidPath { .. })),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn parse_rejects_indexes_out_of_range() {
        for raw in [
            "a[18446744073709551615]",
            "a[99999999999999999999999]",
            "a[4000000000]",
            "a[65536]",
            "tags.4000000000",
            "matrix[0][70000]",
        ] {
            assert!(
                matches!(JsonPath::parse(raw), Err(ProtocolError::InvalidPath { .. })),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn set_at_largest_index_pads_array() {
        let mut doc = json!({});
        path(&format!("a[{MAX_ARRAY_INDEX}]")).set(&mut doc, json!(1));
        let items = doc["a"].as_array().unwrap();
        assert_eq!(items.len(), MAX_ARRAY_INDEX + 1);
        assert_eq!(items[MAX_ARRAY_INDEX], json!(1));
        assert_eq!(path("tags.65535").segments().len(), 2);
    }

    #[test]
    fn set_creates_intermediate_containers() {
        let mut doc = json!({});
        path("pets[1].name").set(&mut doc, json!("Rex"));
        assert_eq!(doc, json!({ "pets": [null, { "name": "Rex" }] }));
    }

    #[test]
    fn set_replaces_scalars_in_the_way() {
        let mut doc = json!({ "a": 5 });
        path("a.b").set(&mut doc, json!(true));
        assert_eq!(doc, json!({ "a": { "b": true } }));
    }

    #[test]
    fn set_preserves_siblings() {
        let mut doc = json!({ "firstname": "Egon", "address": { "city": "Berlin", "zip": "10115" } });
        path("address.city").set(&mut doc, json!("Hamburg"));
        assert_eq!(
            doc,
            json!({ "firstname": "Egon", "address": { "city": "Hamburg", "zip": "10115" } })
        );
    }

    #[test]
    fn numeric_key_indexes_existing_array() {
        let mut doc = json!({ "tags": ["a", "b"] });
        path("tags.1").set(&mut doc, json!("z"));
        assert_eq!(doc, json!({ "tags": ["a", "z"] }));
    }

    #[test]
    fn erase_removes_keys_and_nulls_slots() {
        let mut doc = json!({ "a": { "b": 1, "c": 2 }, "list": [1, 2, 3] });
        path("a.b").erase(&mut doc);
        path("list[1]").erase(&mut doc);
        assert_eq!(doc, json!({ "a": { "c": 2 }, "list": [1, null, 3] }));
    }

    #[test]
    fn erase_missing_path_is_noop() {
        let mut doc = json!({ "a": 1 });
        path("x.y[3]").erase(&mut doc);
        assert_eq!(doc, json!({ "a": 1 }));
    }

    fn segment_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,6}".prop_map(|key| key),
            (0usize..4).prop_map(|index| format!("[{index}]")),
        ]
    }

    fn path_strategy() -> impl Strategy<Value = String> {
        ("[a-z]{1,6}", prop::collection::vec(segment_strategy(), 0..4)).prop_map(
            |(head, tail)| {
                let mut raw = head;
                for segment in tail {
                    if !segment.starts_with('[') {
                        raw.push('.');
                    }
                    raw.push_str(&segment);
                }
                raw
            },
        )
    }

    proptest! {
        #[test]
        fn set_then_get_returns_value(raw in path_strategy(), value in any::<i64>()) {
            let parsed = JsonPath::parse(&raw).unwrap();
            let mut doc = json!({ "keep": "me" });
            parsed.set(&mut doc, json!(value));
            prop_assert_eq!(parsed.get(&doc), Some(&json!(value)));
        }

        #[test]
        fn erase_after_set_clears_value(raw in path_strategy()) {
            let parsed = JsonPath::parse(&raw).unwrap();
            let mut doc = json!({});
            parsed.set(&mut doc, json!("x"));
            parsed.erase(&mut doc);
            let remaining = parsed.get(&doc);
            prop_assert!(remaining.is_none() || remaining == Some(&Value::Null));
        }
    }
}
