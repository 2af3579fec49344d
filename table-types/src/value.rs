//! Typed entry values.
//!
//! Every entry is bound to one of a fixed set of types at creation. The
//! wire encoding is a tagged enum, so the type tag always decodes ahead of
//! the payload.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed type enumeration for entry values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    /// A single boolean.
    Boolean,
    /// A single 64-bit float.
    Double,
    /// A UTF-8 string.
    String,
    /// An array of booleans.
    BooleanArray,
    /// An array of 64-bit floats.
    DoubleArray,
    /// An array of UTF-8 strings.
    StringArray,
    /// Opaque bytes.
    Raw,
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntryType::Boolean => "boolean",
            EntryType::Double => "double",
            EntryType::String => "string",
            EntryType::BooleanArray => "boolean[]",
            EntryType::DoubleArray => "double[]",
            EntryType::StringArray => "string[]",
            EntryType::Raw => "raw",
        };
        f.write_str(name)
    }
}

/// A typed entry payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum EntryValue {
    /// A single boolean.
    Boolean(bool),
    /// A single 64-bit float.
    Double(f64),
    /// A UTF-8 string.
    String(String),
    /// An array of booleans.
    BooleanArray(Vec<bool>),
    /// An array of 64-bit floats.
    DoubleArray(Vec<f64>),
    /// An array of UTF-8 strings.
    StringArray(Vec<String>),
    /// Opaque bytes.
    Raw(Vec<u8>),
}

impl EntryValue {
    /// The type tag of this value.
    pub fn entry_type(&self) -> EntryType {
        match self {
            EntryValue::Boolean(_) => EntryType::Boolean,
            EntryValue::Double(_) => EntryType::Double,
            EntryValue::String(_) => EntryType::String,
            EntryValue::BooleanArray(_) => EntryType::BooleanArray,
            EntryValue::DoubleArray(_) => EntryType::DoubleArray,
            EntryValue::StringArray(_) => EntryType::StringArray,
            EntryValue::Raw(_) => EntryType::Raw,
        }
    }

    /// Get the boolean payload, if this is a Boolean value.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            EntryValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the double payload, if this is a Double value.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            EntryValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Get the string payload, if this is a String value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            EntryValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the raw payload, if this is a Raw value.
    pub fn as_raw(&self) -> Option<&[u8]> {
        match self {
            EntryValue::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl From<bool> for EntryValue {
    fn from(v: bool) -> Self {
        EntryValue::Boolean(v)
    }
}

impl From<f64> for EntryValue {
    fn from(v: f64) -> Self {
        EntryValue::Double(v)
    }
}

impl From<&str> for EntryValue {
    fn from(v: &str) -> Self {
        EntryValue::String(v.to_string())
    }
}

impl From<String> for EntryValue {
    fn from(v: String) -> Self {
        EntryValue::String(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tags_match_variants() {
        assert_eq!(EntryValue::Boolean(true).entry_type(), EntryType::Boolean);
        assert_eq!(EntryValue::Double(1.5).entry_type(), EntryType::Double);
        assert_eq!(
            EntryValue::String("x".into()).entry_type(),
            EntryType::String
        );
        assert_eq!(
            EntryValue::BooleanArray(vec![true]).entry_type(),
            EntryType::BooleanArray
        );
        assert_eq!(
            EntryValue::DoubleArray(vec![1.0]).entry_type(),
            EntryType::DoubleArray
        );
        assert_eq!(
            EntryValue::StringArray(vec!["a".into()]).entry_type(),
            EntryType::StringArray
        );
        assert_eq!(EntryValue::Raw(vec![1, 2]).entry_type(), EntryType::Raw);
    }

    #[test]
    fn accessors_are_type_checked() {
        let v = EntryValue::Double(2.5);
        assert_eq!(v.as_double(), Some(2.5));
        assert_eq!(v.as_boolean(), None);
        assert_eq!(v.as_str(), None);
    }

    #[test]
    fn value_roundtrips_through_messagepack() {
        let values = vec![
            EntryValue::Boolean(true),
            EntryValue::Double(-0.25),
            EntryValue::String("hello".into()),
            EntryValue::DoubleArray(vec![1.0, 2.0, 3.0]),
            EntryValue::Raw(vec![0xDE, 0xAD]),
        ];
        for value in values {
            let bytes = rmp_serde::to_vec(&value).unwrap();
            let restored: EntryValue = rmp_serde::from_slice(&bytes).unwrap();
            assert_eq!(value, restored);
        }
    }

    #[test]
    fn from_impls_pick_expected_types() {
        assert_eq!(EntryValue::from(true).entry_type(), EntryType::Boolean);
        assert_eq!(EntryValue::from(1.0).entry_type(), EntryType::Double);
        assert_eq!(EntryValue::from("s").entry_type(), EntryType::String);
    }

    #[test]
    fn display_names_are_stable() {
        assert_eq!(EntryType::Boolean.to_string(), "boolean");
        assert_eq!(EntryType::DoubleArray.to_string(), "double[]");
        assert_eq!(EntryType::Raw.to_string(), "raw");
    }
}
