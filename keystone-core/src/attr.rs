//! Typed attribute values and items.
//!
//! Every backend persists entities as an [`Item`]: a map from attribute name to a typed
//! [`AttributeValue`]. The value model mirrors what document/KV stores expose natively:
//! strings, numbers (kept in their decimal string form), binary, booleans, null, lists
//! and maps.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// A stored document.
pub type Item = BTreeMap<String, AttributeValue>;

/// A single typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    /// UTF-8 string
    #[serde(rename = "S")]
    S(String),
    /// Number in canonical decimal form
    #[serde(rename = "N")]
    N(String),
    /// Binary (base64 in JSON form)
    #[serde(rename = "B", with = "b64")]
    B(Vec<u8>),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
}

/// Scalar attribute types allowed in key schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    S,
    N,
    B,
}

impl ScalarType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S => "S",
            Self::N => "N",
            Self::B => "B",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AttributeValue {
    /// Build a number value from anything with a decimal `Display`.
    pub fn number(n: impl fmt::Display) -> Self {
        Self::N(n.to_string())
    }

    /// Empty list, used as the `if_not_exists` default for appends.
    pub fn empty_list() -> Self {
        Self::L(Vec::new())
    }

    /// The scalar key type of this value, if it can be used as a key.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Self::S(_) => Some(ScalarType::S),
            Self::N(_) => Some(ScalarType::N),
            Self::B(_) => Some(ScalarType::B),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::S(_) => "S",
            Self::N(_) => "N",
            Self::B(_) => "B",
            Self::Bool(_) => "BOOL",
            Self::Null(_) => "NULL",
            Self::L(_) => "L",
            Self::M(_) => "M",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[AttributeValue]> {
        match self {
            Self::L(l) => Some(l),
            _ => None,
        }
    }

    /// Parse a number value as `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::N(n) => n.parse().ok(),
            _ => None,
        }
    }

    /// Canonical string form of a key value, used by backends to address items.
    pub fn key_string(&self) -> Option<String> {
        match self {
            Self::S(s) => Some(s.clone()),
            Self::N(n) => Some(canonical_number(n)),
            Self::B(b) => Some(hex::encode(b)),
            _ => None,
        }
    }

    /// Order two values of the same scalar type.
    ///
    /// Numbers compare numerically, strings lexically and binaries bytewise. Values of
    /// different types (or non-scalar values) are unordered.
    pub fn compare(&self, other: &AttributeValue) -> Option<Ordering> {
        match (self, other) {
            (Self::S(a), Self::S(b)) => Some(a.cmp(b)),
            (Self::B(a), Self::B(b)) => Some(a.cmp(b)),
            (Self::N(a), Self::N(b)) => compare_numbers(a, b),
            _ => None,
        }
    }

    /// Add two number values.
    pub fn add_numbers(&self, other: &AttributeValue) -> Result<AttributeValue, StoreError> {
        let (Self::N(a), Self::N(b)) = (self, other) else {
            return Err(StoreError::Validation(format!(
                "cannot add {} and {}",
                self.type_name(),
                other.type_name()
            )));
        };
        if let (Ok(x), Ok(y)) = (a.parse::<i128>(), b.parse::<i128>()) {
            return x
                .checked_add(y)
                .map(Self::number)
                .ok_or_else(|| StoreError::Validation(format!("number overflow in {a} + {b}")));
        }
        match (a.parse::<f64>(), b.parse::<f64>()) {
            (Ok(a), Ok(b)) => Ok(Self::number(a + b)),
            _ => Err(StoreError::Validation(format!("invalid number operands {a} + {b}"))),
        }
    }
}

fn compare_numbers(a: &str, b: &str) -> Option<Ordering> {
    if let (Ok(a), Ok(b)) = (a.parse::<i128>(), b.parse::<i128>()) {
        return Some(a.cmp(&b));
    }
    let a = a.parse::<f64>().ok()?;
    let b = b.parse::<f64>().ok()?;
    a.partial_cmp(&b)
}

fn canonical_number(n: &str) -> String {
    match n.parse::<i128>() {
        Ok(i) => i.to_string(),
        Err(_) => n.parse::<f64>().map(|f| f.to_string()).unwrap_or_else(|_| n.to_string()),
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::S(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::S(value.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::number(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::number(value)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        Self::number(value)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(value: Vec<u8>) -> Self {
        Self::B(value)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(value: Vec<AttributeValue>) -> Self {
        Self::L(value)
    }
}

/// Typed accessor over an item, used by entities to decode themselves.
///
/// Missing or mistyped attributes become [`StoreError::Serialization`] naming the
/// entity and attribute.
pub struct ItemReader<'a> {
    item: &'a Item,
    entity: &'static str,
}

impl<'a> ItemReader<'a> {
    pub fn new(item: &'a Item, entity: &'static str) -> Self {
        Self { item, entity }
    }

    fn missing(&self, name: &str, expected: &str) -> StoreError {
        StoreError::Serialization(format!(
            "{}: attribute '{}' missing or not of type {}",
            self.entity, name, expected
        ))
    }

    pub fn string(&self, name: &str) -> Result<String, StoreError> {
        self.opt_string(name)
            .ok_or_else(|| self.missing(name, "S"))
    }

    pub fn opt_string(&self, name: &str) -> Option<String> {
        self.item
            .get(name)
            .and_then(AttributeValue::as_str)
            .map(str::to_string)
    }

    pub fn i64(&self, name: &str) -> Result<i64, StoreError> {
        self.item
            .get(name)
            .and_then(AttributeValue::as_i64)
            .ok_or_else(|| self.missing(name, "N"))
    }

    pub fn u32(&self, name: &str) -> Result<u32, StoreError> {
        let value = self.i64(name)?;
        u32::try_from(value).map_err(|_| self.missing(name, "N(u32)"))
    }

    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.item
            .get(name)
            .and_then(AttributeValue::as_bool)
            .unwrap_or(default)
    }

    pub fn bytes(&self, name: &str) -> Result<Vec<u8>, StoreError> {
        match self.item.get(name) {
            Some(AttributeValue::B(b)) => Ok(b.clone()),
            _ => Err(self.missing(name, "B")),
        }
    }

    pub fn string_list(&self, name: &str) -> Vec<String> {
        self.item
            .get(name)
            .and_then(AttributeValue::as_list)
            .map(|values| {
                values
                    .iter()
                    .filter_map(AttributeValue::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn number_list(&self, name: &str) -> Vec<i64> {
        self.item
            .get(name)
            .and_then(AttributeValue::as_list)
            .map(|values| values.iter().filter_map(AttributeValue::as_i64).collect())
            .unwrap_or_default()
    }
}

/// Approximate stored size of an item in bytes (attribute names plus JSON-encoded values).
pub fn item_size(item: &Item) -> usize {
    item.iter()
        .map(|(name, value)| name.len() + serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0))
        .sum()
}

mod b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
