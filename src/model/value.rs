//! Typed property values and their comparison semantics.
//!
//! Property bags are closed tagged variants rather than untyped maps so that
//! every DSL comparison operator has exactly one, centrally checked meaning.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single property value on a node or edge.
///
/// Serializes untagged: JSON property columns and ingestion payloads carry
/// plain scalars. Variant order matters for deserialization — `Timestamp`
/// must be tried before `Str` so RFC 3339 strings parse as timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Str(String),
    List(Vec<PropertyValue>),
}

/// Kind tag for a property value, used by the advisory schema and by
/// validation-time compatibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Str,
    Int,
    Float,
    Bool,
    List,
    Timestamp,
}

impl fmt::Display for PropertyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PropertyKind::Str => "string",
            PropertyKind::Int => "integer",
            PropertyKind::Float => "float",
            PropertyKind::Bool => "boolean",
            PropertyKind::List => "list",
            PropertyKind::Timestamp => "timestamp",
        };
        f.write_str(s)
    }
}

impl PropertyKind {
    /// Two kinds are comparable when they share a value domain.
    /// Int and Float coerce to each other; everything else matches exactly.
    pub fn is_comparable_with(self, other: PropertyKind) -> bool {
        self == other || (self.is_numeric() && other.is_numeric())
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, PropertyKind::Int | PropertyKind::Float)
    }
}

/// Comparison operators of the DSL WHERE clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Like,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "!=",
            CompareOp::Gt => ">",
            CompareOp::Lt => "<",
            CompareOp::Gte => ">=",
            CompareOp::Lte => "<=",
            CompareOp::Like => "LIKE",
        };
        f.write_str(s)
    }
}

impl PropertyValue {
    pub fn kind(&self) -> PropertyKind {
        match self {
            PropertyValue::Str(_) => PropertyKind::Str,
            PropertyValue::Int(_) => PropertyKind::Int,
            PropertyValue::Float(_) => PropertyKind::Float,
            PropertyValue::Bool(_) => PropertyKind::Bool,
            PropertyValue::List(_) => PropertyKind::List,
            PropertyValue::Timestamp(_) => PropertyKind::Timestamp,
        }
    }

    /// Numeric view with Int→Float coercion.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            PropertyValue::Int(i) => Some(*i as f64),
            PropertyValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Evaluate `self <op> rhs`.
    ///
    /// Returns `None` when the kinds are not comparable — validation rejects
    /// such queries up front, so a `None` at runtime means validation was
    /// bypassed and the caller should raise a defensive TypeMismatch.
    pub fn compare(&self, op: CompareOp, rhs: &PropertyValue) -> Option<bool> {
        // Numeric coercion path first: Int and Float share one domain.
        if let (Some(a), Some(b)) = (self.as_f64(), rhs.as_f64()) {
            return Some(match op {
                CompareOp::Eq => a == b,
                CompareOp::Ne => a != b,
                CompareOp::Gt => a > b,
                CompareOp::Lt => a < b,
                CompareOp::Gte => a >= b,
                CompareOp::Lte => a <= b,
                CompareOp::Like => return None,
            });
        }

        match (self, rhs) {
            (PropertyValue::Str(a), PropertyValue::Str(b)) => Some(match op {
                CompareOp::Eq => a == b,
                CompareOp::Ne => a != b,
                CompareOp::Gt => a > b,
                CompareOp::Lt => a < b,
                CompareOp::Gte => a >= b,
                CompareOp::Lte => a <= b,
                CompareOp::Like => sql_like_matches(a, b),
            }),
            (PropertyValue::Bool(a), PropertyValue::Bool(b)) => match op {
                CompareOp::Eq => Some(a == b),
                CompareOp::Ne => Some(a != b),
                _ => None,
            },
            (PropertyValue::Timestamp(a), PropertyValue::Timestamp(b)) => Some(match op {
                CompareOp::Eq => a == b,
                CompareOp::Ne => a != b,
                CompareOp::Gt => a > b,
                CompareOp::Lt => a < b,
                CompareOp::Gte => a >= b,
                CompareOp::Lte => a <= b,
                CompareOp::Like => return None,
            }),
            (PropertyValue::List(a), PropertyValue::List(b)) => match op {
                CompareOp::Eq => Some(a == b),
                CompareOp::Ne => Some(a != b),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Str(s) => write!(f, "'{s}'"),
            PropertyValue::Int(i) => write!(f, "{i}"),
            PropertyValue::Float(x) => write!(f, "{x}"),
            PropertyValue::Bool(b) => write!(f, "{b}"),
            PropertyValue::Timestamp(t) => write!(f, "'{}'", t.to_rfc3339()),
            PropertyValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

/// SQL LIKE matching: `%` matches any run of characters, `_` exactly one.
///
/// The pattern is compiled to an anchored regex; all other characters are
/// matched literally.
pub fn sql_like_matches(value: &str, pattern: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 8);
    regex.push('^');
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            c if c.is_ascii_alphanumeric() => regex.push(c),
            c => {
                regex.push('\\');
                regex.push(c);
            }
        }
    }
    regex.push('$');

    match regex_lite::Regex::new(&regex) {
        Ok(re) => re.is_match(value),
        // Unreachable for escaped input; fail closed if it ever happens.
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_coercion() {
        let int = PropertyValue::Int(3);
        let float = PropertyValue::Float(3.0);
        assert_eq!(int.compare(CompareOp::Eq, &float), Some(true));
        assert_eq!(
            PropertyValue::Int(12).compare(CompareOp::Gt, &PropertyValue::Int(10)),
            Some(true)
        );
        assert_eq!(
            PropertyValue::Float(2.5).compare(CompareOp::Lte, &PropertyValue::Int(2)),
            Some(false)
        );
    }

    #[test]
    fn test_incomparable_kinds_return_none() {
        let int = PropertyValue::Int(10);
        let s = PropertyValue::Str("high".into());
        assert_eq!(int.compare(CompareOp::Gt, &s), None);
        assert_eq!(s.compare(CompareOp::Lt, &int), None);
    }

    #[test]
    fn test_like_is_string_only() {
        let int = PropertyValue::Int(10);
        assert_eq!(int.compare(CompareOp::Like, &PropertyValue::Int(1)), None);
    }

    #[test]
    fn test_like_wildcards() {
        assert!(sql_like_matches("test_parser", "test_%"));
        assert!(!sql_like_matches("test", "test_%")); // '_' needs at least one char
        assert!(sql_like_matches("tests", "test_"));
        assert!(!sql_like_matches("test", "test_"));
        assert!(sql_like_matches("abc", "%b%"));
        assert!(!sql_like_matches("abc", "b%"));
    }

    #[test]
    fn test_like_escapes_regex_metacharacters() {
        assert!(sql_like_matches("a.b", "a.b"));
        assert!(!sql_like_matches("axb", "a.b")); // '.' is literal in LIKE
        assert!(sql_like_matches("f(x)", "f(%)"));
    }

    #[test]
    fn test_untagged_json_round_trip() {
        let values = vec![
            PropertyValue::Int(42),
            PropertyValue::Float(1.5),
            PropertyValue::Bool(true),
            PropertyValue::Str("main".into()),
            PropertyValue::List(vec![PropertyValue::Str("a".into()), PropertyValue::Int(1)]),
        ];
        for v in values {
            let json = serde_json::to_string(&v).unwrap();
            let back: PropertyValue = serde_json::from_str(&json).unwrap();
            assert_eq!(v, back);
        }
    }

    #[test]
    fn test_timestamp_parses_before_plain_string() {
        let back: PropertyValue = serde_json::from_str("\"2024-06-01T12:00:00Z\"").unwrap();
        assert_eq!(back.kind(), PropertyKind::Timestamp);
        let back: PropertyValue = serde_json::from_str("\"hello\"").unwrap();
        assert_eq!(back.kind(), PropertyKind::Str);
    }
}
