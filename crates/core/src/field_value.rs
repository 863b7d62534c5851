use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::ValueKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    /// Milliseconds since Unix epoch.
    Timestamp(i64),
    Uuid(Uuid),
    Bytes(Vec<u8>),
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Integer(a), Self::Integer(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b).is_eq(),
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Uuid(a), Self::Uuid(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for FieldValue {}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            FieldValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<i64> {
        match self {
            FieldValue::Timestamp(ms) => Some(*ms),
            _ => None,
        }
    }

    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            FieldValue::Uuid(u) => Some(*u),
            _ => None,
        }
    }

    /// Whether this value may be stored in a field of `kind`. Null fits every kind;
    /// nullability is checked separately against the descriptor.
    pub fn fits(&self, kind: &ValueKind) -> bool {
        matches!(
            (self, kind),
            (Self::Null, _)
                | (Self::Text(_), ValueKind::Text { .. })
                | (Self::Integer(_), ValueKind::Integer)
                | (Self::Float(_), ValueKind::Float)
                | (Self::Boolean(_), ValueKind::Boolean)
                | (Self::Timestamp(_), ValueKind::Timestamp)
                | (Self::Uuid(_), ValueKind::Uuid)
                | (Self::Bytes(_), ValueKind::Bytes)
        )
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(n: i64) -> Self {
        FieldValue::Integer(n)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Boolean(b)
    }
}

impl From<Uuid> for FieldValue {
    fn from(u: Uuid) -> Self {
        FieldValue::Uuid(u)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_equality_is_total() {
        assert_eq!(FieldValue::Float(f64::NAN), FieldValue::Float(f64::NAN));
        assert_ne!(FieldValue::Float(0.0), FieldValue::Float(-0.0));
    }

    #[test]
    fn timestamp_and_integer_are_distinct() {
        assert_ne!(FieldValue::Timestamp(5), FieldValue::Integer(5));
    }

    #[test]
    fn fits_checks_kind() {
        assert!(FieldValue::Null.fits(&ValueKind::Integer));
        assert!(FieldValue::Integer(1).fits(&ValueKind::Integer));
        assert!(FieldValue::from("x").fits(&ValueKind::Text { max_length: Some(4) }));
        assert!(!FieldValue::from("x").fits(&ValueKind::Integer));
        assert!(!FieldValue::Timestamp(1).fits(&ValueKind::Integer));
    }
}
