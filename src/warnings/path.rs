//! Typed field paths over JSON values.
//!
//! A path is a dotted list of segments. A segment is an object key, a
//! numeric array index, or `*`, which fans out over every element of an
//! array. At most one `*` is allowed per path.
//!
//! ```text
//! metrics.burn_multiple
//! profiles.*.red_flags
//! rounds.0.amount
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("Field path is empty")]
    Empty,

    #[error("Field path '{path}' has an empty segment at position {position}")]
    EmptySegment { path: String, position: usize },

    #[error("Field path '{0}' has more than one wildcard segment")]
    MultipleWildcards(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    /// A numeric segment. Used as an array index, or as a key on objects.
    Index(usize),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(PathError::Empty);
        }

        let mut segments = Vec::new();
        for (position, part) in raw.split('.').enumerate() {
            let segment = match part {
                "" => {
                    return Err(PathError::EmptySegment {
                        path: raw.to_string(),
                        position,
                    });
                }
                "*" => Segment::Wildcard,
                p if p.bytes().all(|b| b.is_ascii_digit()) => match p.parse() {
                    Ok(i) => Segment::Index(i),
                    Err(_) => Segment::Key(p.to_string()),
                },
                p => Segment::Key(p.to_string()),
            };
            segments.push(segment);
        }

        if segments.iter().filter(|s| **s == Segment::Wildcard).count() > 1 {
            return Err(PathError::MultipleWildcards(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments.contains(&Segment::Wildcard)
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Every value the path reaches. Missing keys, out-of-range indexes and
    /// wildcards over non-arrays reach nothing.
    pub fn resolve<'v>(&self, root: &'v Value) -> Vec<&'v Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match (segment, value) {
                    (Segment::Key(k), Value::Object(map)) => next.extend(map.get(k)),
                    (Segment::Index(i), Value::Array(items)) => next.extend(items.get(*i)),
                    (Segment::Index(i), Value::Object(map)) => {
                        next.extend(map.get(&i.to_string()))
                    }
                    (Segment::Wildcard, Value::Array(items)) => next.extend(items.iter()),
                    _ => {}
                }
            }
            if next.is_empty() {
                return next;
            }
            current = next;
        }
        current
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for FieldPath {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<FieldPath> for String {
    fn from(path: FieldPath) -> Self {
        path.raw
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_segments() {
        let path = FieldPath::parse("profiles.*.red_flags.0").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Key("profiles".into()),
                Segment::Wildcard,
                Segment::Key("red_flags".into()),
                Segment::Index(0),
            ]
        );
        assert!(path.has_wildcard());
        assert_eq!(path.to_string(), "profiles.*.red_flags.0");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(FieldPath::parse(""), Err(PathError::Empty));
        assert!(matches!(
            FieldPath::parse("a..b"),
            Err(PathError::EmptySegment { position: 1, .. })
        ));
        assert!(matches!(
            FieldPath::parse("a.*.b.*"),
            Err(PathError::MultipleWildcards(_))
        ));
    }

    #[test]
    fn test_resolve_nested_key() {
        let data = json!({"metrics": {"burn_multiple": 4.2}});
        let path = FieldPath::parse("metrics.burn_multiple").unwrap();
        assert_eq!(path.resolve(&data), vec![&json!(4.2)]);
        let missing = FieldPath::parse("metrics.runway").unwrap();
        assert!(missing.resolve(&data).is_empty());
    }

    #[test]
    fn test_resolve_wildcard_over_array() {
        let data = json!({
            "profiles": [
                {"name": "a", "red_flags": []},
                {"name": "b", "red_flags": ["lawsuit"]},
                {"name": "c"}
            ]
        });
        let path = FieldPath::parse("profiles.*.red_flags").unwrap();
        let values = path.resolve(&data);
        assert_eq!(values, vec![&json!([]), &json!(["lawsuit"])]);
    }

    #[test]
    fn test_wildcard_over_object_reaches_nothing() {
        let data = json!({"profiles": {"a": 1}});
        let path = FieldPath::parse("profiles.*").unwrap();
        assert!(path.resolve(&data).is_empty());
    }

    #[test]
    fn test_index_segment() {
        let data = json!({"rounds": [{"amount": 1}, {"amount": 2}], "years": {"2024": 9}});
        assert_eq!(
            FieldPath::parse("rounds.1.amount").unwrap().resolve(&data),
            vec![&json!(2)]
        );
        assert_eq!(
            FieldPath::parse("years.2024").unwrap().resolve(&data),
            vec![&json!(9)]
        );
    }

    #[test]
    fn test_serde_as_string() {
        let path: FieldPath = serde_json::from_str("\"a.*.b\"").unwrap();
        assert!(path.has_wildcard());
        assert_eq!(serde_json::to_string(&path).unwrap(), "\"a.*.b\"");
        assert!(serde_json::from_str::<FieldPath>("\"a..b\"").is_err());
    }
}
