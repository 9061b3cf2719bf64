//! Compiled JSONPath expressions
//!
//! Only the restricted grammar used by ApiSchema is accepted: a `$` root
//! followed by `.property` segments, where any property may be followed by a
//! single `[*]` wildcard. Two expressions are equal iff their canonical forms
//! match.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Serialize, Serializer};

use crate::error::{RelSchemaError, Result};

static PATH_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\$(\.[A-Za-z0-9_-]+(\[\*\])?)*$").expect("static JSONPath regex is valid")
});

static PATH_SEGMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.([A-Za-z0-9_-]+)|(\[\*\])").expect("static JSONPath segment regex is valid")
});

/// One step of a compiled path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum JsonPathSegment {
    Property(String),
    AnyArrayElement,
}

/// A compiled JSONPath: segments plus the canonical string form
#[derive(Debug, Clone)]
pub struct JsonPathExpression {
    canonical: String,
    segments: Vec<JsonPathSegment>,
}

impl JsonPathExpression {
    /// Compile a path string such as `$.addresses[*].periods[*].beginDate`.
    pub fn compile(path: &str) -> Result<Self> {
        let invalid = |message: &str| RelSchemaError::InvalidJsonPath {
            path: path.to_string(),
            message: message.to_string(),
        };

        if !path.starts_with('$') {
            return Err(invalid("path must start with '$'"));
        }
        if !PATH_SHAPE.is_match(path) {
            return Err(invalid(
                "expected '.property' segments of [A-Za-z0-9_-], each optionally followed by '[*]'",
            ));
        }

        let segments = PATH_SEGMENT
            .captures_iter(path)
            .map(|caps| match caps.get(1) {
                Some(name) => JsonPathSegment::Property(name.as_str().to_string()),
                None => JsonPathSegment::AnyArrayElement,
            })
            .collect::<Vec<_>>();

        Ok(Self::from_segments(segments))
    }

    /// The root path `$`
    pub fn root() -> Self {
        Self::from_segments(Vec::new())
    }

    pub fn from_segments(segments: Vec<JsonPathSegment>) -> Self {
        let mut canonical = String::from("$");
        for segment in &segments {
            match segment {
                JsonPathSegment::Property(name) => {
                    canonical.push('.');
                    canonical.push_str(name);
                }
                JsonPathSegment::AnyArrayElement => canonical.push_str("[*]"),
            }
        }
        Self {
            canonical,
            segments,
        }
    }

    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    pub fn segments(&self) -> &[JsonPathSegment] {
        &self.segments
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn has_wildcard(&self) -> bool {
        self.segments
            .iter()
            .any(|segment| matches!(segment, JsonPathSegment::AnyArrayElement))
    }

    /// Segment-wise prefix test (`$.a` is a prefix of `$.a.b` but not of `$.ab`).
    pub fn starts_with(&self, prefix: &JsonPathExpression) -> bool {
        self.segments.len() >= prefix.segments.len()
            && self.segments[..prefix.segments.len()] == prefix.segments[..]
    }

    /// Segments after `prefix`, if `prefix` is a segment-wise prefix of this path.
    pub fn relative_to(&self, prefix: &JsonPathExpression) -> Option<&[JsonPathSegment]> {
        if self.starts_with(prefix) {
            Some(&self.segments[prefix.segments.len()..])
        } else {
            None
        }
    }

    /// Path with the last segment removed (root stays root).
    pub fn parent(&self) -> JsonPathExpression {
        let mut segments = self.segments.clone();
        segments.pop();
        Self::from_segments(segments)
    }

    /// Prefix through the last `[*]` segment; `None` when the path has no wildcard.
    pub fn array_scope(&self) -> Option<JsonPathExpression> {
        let last = self
            .segments
            .iter()
            .rposition(|segment| matches!(segment, JsonPathSegment::AnyArrayElement))?;
        Some(Self::from_segments(self.segments[..=last].to_vec()))
    }

    /// Append the segments of a relative path (its root `$` is dropped).
    pub fn join(&self, relative: &JsonPathExpression) -> JsonPathExpression {
        let mut segments = self.segments.clone();
        segments.extend(relative.segments.iter().cloned());
        Self::from_segments(segments)
    }

    pub fn child(&self, segment: JsonPathSegment) -> JsonPathExpression {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self::from_segments(segments)
    }

    pub fn last_property(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|segment| match segment {
            JsonPathSegment::Property(name) => Some(name.as_str()),
            JsonPathSegment::AnyArrayElement => None,
        })
    }

    pub fn ends_with_wildcard(&self) -> bool {
        matches!(self.segments.last(), Some(JsonPathSegment::AnyArrayElement))
    }
}

impl PartialEq for JsonPathExpression {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for JsonPathExpression {}

impl Hash for JsonPathExpression {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for JsonPathExpression {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for JsonPathExpression {
    fn cmp(&self, other: &Self) -> Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl fmt::Display for JsonPathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl Serialize for JsonPathExpression {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical)
    }
}
