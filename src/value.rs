//! Value types - the tagged unit of data in the script runtime
//!
//! Every runtime value is one of seven kinds:
//! - `None`: the absent value
//! - `Integer`: signed 64-bit integer
//! - `Decimal`: 64-bit float
//! - `Text`: UTF-8 string
//! - `Boolean`: true/false
//! - `List`: reference to a [`List`](crate::List) collection
//! - `Map`: reference to a [`Map`](crate::Map) collection
//!
//! The kind carries a byte tag (0..=6) used for compact persistence.

use crate::collection::{List, Map};
use crate::{Error, Result};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// The seven value kinds, with their persisted byte tags.
///
/// Tags are part of the wire format (the `type` column of backend tables and
/// the tag half of every encoded row) and must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// The absent value (tag 0)
    None,
    /// Signed 64-bit integer (tag 1)
    Integer,
    /// 64-bit float (tag 2)
    Decimal,
    /// UTF-8 string (tag 3)
    Text,
    /// true/false (tag 4)
    Boolean,
    /// Reference to a list collection (tag 5)
    List,
    /// Reference to a map collection (tag 6)
    Map,
}

impl ValueKind {
    /// Get the persisted byte tag for this kind
    pub fn tag(&self) -> u8 {
        match self {
            ValueKind::None => 0,
            ValueKind::Integer => 1,
            ValueKind::Decimal => 2,
            ValueKind::Text => 3,
            ValueKind::Boolean => 4,
            ValueKind::List => 5,
            ValueKind::Map => 6,
        }
    }

    /// Decode a persisted byte tag
    pub fn from_tag(tag: u8) -> Result<ValueKind> {
        match tag {
            0 => Ok(ValueKind::None),
            1 => Ok(ValueKind::Integer),
            2 => Ok(ValueKind::Decimal),
            3 => Ok(ValueKind::Text),
            4 => Ok(ValueKind::Boolean),
            5 => Ok(ValueKind::List),
            6 => Ok(ValueKind::Map),
            _ => Err(Error::Format(format!("unknown value tag: {}", tag))),
        }
    }

    /// Get the string representation of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::None => "none",
            ValueKind::Integer => "integer",
            ValueKind::Decimal => "decimal",
            ValueKind::Text => "text",
            ValueKind::Boolean => "boolean",
            ValueKind::List => "list",
            ValueKind::Map => "map",
        }
    }

    /// Get all value kinds
    pub fn all() -> &'static [ValueKind] {
        &[
            ValueKind::None,
            ValueKind::Integer,
            ValueKind::Decimal,
            ValueKind::Text,
            ValueKind::Boolean,
            ValueKind::List,
            ValueKind::Map,
        ]
    }
}

impl FromStr for ValueKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" | "null" | "nil" => Ok(ValueKind::None),
            "integer" | "int" => Ok(ValueKind::Integer),
            "decimal" | "float" | "double" => Ok(ValueKind::Decimal),
            "text" | "string" | "str" => Ok(ValueKind::Text),
            "boolean" | "bool" => Ok(ValueKind::Boolean),
            "list" | "array" => Ok(ValueKind::List),
            "map" | "dict" => Ok(ValueKind::Map),
            _ => Err(Error::Format(format!("unknown value kind: {}", s))),
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A runtime value.
///
/// Scalar kinds own their payload; `List`/`Map` hold a cheap reference to the
/// underlying collection, so `Clone` on a collection-kind `Value` clones the
/// *handle*, not the data. Use [`Value::deep_clone`] for the structural copy.
///
/// Mutating a list or map goes through the referenced collection; the `Value`
/// wrapper itself is immutable.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Integer(i64),
    Decimal(f64),
    Text(String),
    Boolean(bool),
    List(List),
    Map(Map),
}

impl Value {
    /// Get the kind of this value
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::None => ValueKind::None,
            Value::Integer(_) => ValueKind::Integer,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::Text(_) => ValueKind::Text,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
        }
    }

    /// Check whether this is the absent value
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Coerce to an integer. Widens from `Decimal` (truncating); any other
    /// kind is a `TypeMismatch`.
    pub fn as_integer(&self) -> Result<i64> {
        match self {
            Value::Integer(n) => Ok(*n),
            Value::Decimal(d) => Ok(*d as i64),
            other => Err(Error::TypeMismatch {
                expected: ValueKind::Integer,
                actual: other.kind(),
            }),
        }
    }

    /// Coerce to a decimal. Widens from `Integer`; any other kind is a
    /// `TypeMismatch`.
    pub fn as_decimal(&self) -> Result<f64> {
        match self {
            Value::Decimal(d) => Ok(*d),
            Value::Integer(n) => Ok(*n as f64),
            other => Err(Error::TypeMismatch {
                expected: ValueKind::Decimal,
                actual: other.kind(),
            }),
        }
    }

    /// Borrow the text payload
    pub fn as_text(&self) -> Result<&str> {
        match self {
            Value::Text(s) => Ok(s),
            other => Err(Error::TypeMismatch {
                expected: ValueKind::Text,
                actual: other.kind(),
            }),
        }
    }

    /// Get the boolean payload
    pub fn as_boolean(&self) -> Result<bool> {
        match self {
            Value::Boolean(b) => Ok(*b),
            other => Err(Error::TypeMismatch {
                expected: ValueKind::Boolean,
                actual: other.kind(),
            }),
        }
    }

    /// Get a handle to the referenced list
    pub fn as_list(&self) -> Result<List> {
        match self {
            Value::List(l) => Ok(l.clone()),
            other => Err(Error::TypeMismatch {
                expected: ValueKind::List,
                actual: other.kind(),
            }),
        }
    }

    /// Get a handle to the referenced map
    pub fn as_map(&self) -> Result<Map> {
        match self {
            Value::Map(m) => Ok(m.clone()),
            other => Err(Error::TypeMismatch {
                expected: ValueKind::Map,
                actual: other.kind(),
            }),
        }
    }

    /// Structural copy.
    ///
    /// Scalars copy their payload. Collection kinds produce an independent
    /// `Local` collection with a fresh identity and recursively cloned
    /// elements, regardless of the source backend.
    pub fn deep_clone(&self) -> Result<Value> {
        match self {
            Value::List(l) => Ok(Value::List(l.deep_clone()?)),
            Value::Map(m) => Ok(Value::Map(m.deep_clone()?)),
            scalar => Ok(scalar.clone()),
        }
    }
}

/// Equality: scalars by tag + payload (`Integer(1) != Decimal(1.0)`);
/// collection kinds by collection identity, never deep structure.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a == b,
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::List(a), Value::List(b)) => a.identity() == b.identity(),
            (Value::Map(a), Value::Map(b)) => a.identity() == b.identity(),
            _ => false,
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().tag().hash(state);
        match self {
            Value::None => {}
            Value::Integer(n) => n.hash(state),
            Value::Decimal(d) => d.to_bits().hash(state),
            Value::Text(s) => s.hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::List(l) => l.identity().hash(state),
            Value::Map(m) => m.identity().hash(state),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::Decimal(d)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<List> for Value {
    fn from(l: List) -> Self {
        Value::List(l)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_roundtrip() {
        for kind in ValueKind::all() {
            assert_eq!(ValueKind::from_tag(kind.tag()).unwrap(), *kind);
        }
        assert!(ValueKind::from_tag(7).is_err());
    }

    #[test]
    fn test_kind_aliases() {
        assert_eq!(ValueKind::from_str("int").unwrap(), ValueKind::Integer);
        assert_eq!(ValueKind::from_str("string").unwrap(), ValueKind::Text);
        assert_eq!(ValueKind::from_str("null").unwrap(), ValueKind::None);
    }

    #[test]
    fn test_numeric_widening() {
        assert_eq!(Value::Integer(3).as_decimal().unwrap(), 3.0);
        assert_eq!(Value::Decimal(3.9).as_integer().unwrap(), 3);
        assert!(Value::Text("3".into()).as_integer().is_err());
    }

    #[test]
    fn test_type_mismatch_reports_kinds() {
        let err = Value::Boolean(true).as_text().unwrap_err();
        match err {
            crate::Error::TypeMismatch { expected, actual } => {
                assert_eq!(expected, ValueKind::Text);
                assert_eq!(actual, ValueKind::Boolean);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_scalar_equality_is_tag_sensitive() {
        assert_eq!(Value::Integer(1), Value::Integer(1));
        assert_ne!(Value::Integer(1), Value::Decimal(1.0));
        assert_ne!(Value::Text("true".into()), Value::Boolean(true));
        assert_eq!(Value::None, Value::None);
    }
}
