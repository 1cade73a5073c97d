//! # Management Values
//!
//! Every operation, parameter, attribute and response flowing through the controller is a
//! [`Value`]: a dynamically-typed tree of scalars, lists and ordered objects.
//!
//! ## Representation
//!
//! | Variant | Holds |
//! |---------|-------|
//! | `Undefined` | nothing (the "no value" marker, serialized as `null`) |
//! | `Boolean` | `bool` |
//! | `Int` | `i64` |
//! | `Double` | `f64` |
//! | `String` | `String` |
//! | `List` | `Vec<Value>` |
//! | `Object` | `IndexMap<String, Value>` (keys keep insertion order) |
//!
//! Objects keep insertion order so that two reads of the same model produce
//! byte-identical output.
//!
//! ## Textual Form
//!
//! The canonical text form is compact JSON. [`Display`](std::fmt::Display) writes it and
//! [`FromStr`](std::str::FromStr) parses it back:
//!
//! ```rust
//! use mgmt_controller::Value;
//!
//! let op: Value = r#"{"operation":"read-resource","recursive":true}"#.parse().unwrap();
//! assert_eq!(op.get("operation").and_then(Value::as_str), Some("read-resource"));
//! assert_eq!(op.to_string(), r#"{"operation":"read-resource","recursive":true}"#);
//! ```

use indexmap::IndexMap;
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A dynamically-typed management value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Undefined,
    Boolean(bool),
    Int(i64),
    Double(f64),
    String(String),
    List(Vec<Value>),
    Object(IndexMap<String, Value>),
}

/// The type tag of a [`Value`], used by attribute and parameter definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelType {
    Undefined,
    Boolean,
    Int,
    Double,
    String,
    List,
    Object,
}

impl ModelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelType::Undefined => "UNDEFINED",
            ModelType::Boolean => "BOOLEAN",
            ModelType::Int => "INT",
            ModelType::Double => "DOUBLE",
            ModelType::String => "STRING",
            ModelType::List => "LIST",
            ModelType::Object => "OBJECT",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Value {
    /// An empty object, the usual starting point when building operations.
    pub fn object() -> Self {
        Value::Object(IndexMap::new())
    }

    pub fn list() -> Self {
        Value::List(Vec::new())
    }

    pub fn model_type(&self) -> ModelType {
        match self {
            Value::Undefined => ModelType::Undefined,
            Value::Boolean(_) => ModelType::Boolean,
            Value::Int(_) => ModelType::Int,
            Value::Double(_) => ModelType::Double,
            Value::String(_) => ModelType::String,
            Value::List(_) => ModelType::List,
            Value::Object(_) => ModelType::Object,
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Value::Undefined)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut IndexMap<String, Value>> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    /// Renders the value as a plain string: strings as-is, everything else as JSON text.
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// Looks up a key on an object value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_object().and_then(|map| map.get(key))
    }

    /// Follows a chain of object keys.
    pub fn get_path<S: AsRef<str>>(&self, path: &[S]) -> Option<&Value> {
        path.iter()
            .try_fold(self, |node, key| node.get(key.as_ref()))
    }

    /// True when `key` is present and holds something other than `Undefined`.
    pub fn has_defined(&self, key: &str) -> bool {
        self.get(key).map(Value::is_defined).unwrap_or(false)
    }

    /// Returns a mutable slot for `key`, turning an undefined value into an object first.
    ///
    /// Assigning through a non-object value replaces it with an empty object.
    pub fn entry(&mut self, key: &str) -> &mut Value {
        if !matches!(self, Value::Object(_)) {
            *self = Value::object();
        }
        match self {
            Value::Object(map) => map.entry(key.to_string()).or_default(),
            _ => unreachable!("value was just replaced with an object"),
        }
    }

    /// Mutable slot at a chain of keys, creating intermediate objects.
    pub fn entry_path<S: AsRef<str>>(&mut self, path: &[S]) -> &mut Value {
        path.iter()
            .fold(self, |node, key| node.entry(key.as_ref()))
    }

    /// Sets `key` to `value`, returning `self` for chaining.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> &mut Self {
        *self.entry(key) = value.into();
        self
    }

    /// Builder-style variant of [`Value::set`].
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.as_object_mut().and_then(|map| map.shift_remove(key))
    }

    /// Appends to a list value, turning an undefined value into a list first.
    pub fn push(&mut self, value: impl Into<Value>) {
        if !matches!(self, Value::List(_)) {
            *self = Value::list();
        }
        if let Value::List(items) = self {
            items.push(value.into());
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.as_object()
            .into_iter()
            .flat_map(|map| map.keys().map(String::as_str))
    }

    /// Compact JSON text.
    pub fn to_json(&self) -> String {
        self.to_string()
    }

    /// Indented JSON text, used for human-facing output.
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| self.to_string())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl FromStr for Value {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        i64::try_from(v)
            .map(Value::Int)
            .unwrap_or(Value::Double(v as f64))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::String(v.clone())
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or_default()
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Value::List(iter.into_iter().collect())
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined => serializer.serialize_unit(),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Double(d) => serializer.serialize_f64(*d),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map {
                    out.serialize_entry(key, value)?;
                }
                out.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a management value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Undefined)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Undefined)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Boolean(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(i64::try_from(v)
            .map(Value::Int)
            .unwrap_or(Value::Double(v as f64)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Double(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element::<Value>()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut out = IndexMap::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            out.insert(key, value);
        }
        Ok(Value::Object(out))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}
