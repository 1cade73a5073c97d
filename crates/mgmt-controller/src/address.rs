//! # Path Addresses
//!
//! A [`PathAddress`] names a resource as an ordered list of `type=value` segments walked from
//! the root, e.g. `/serverchild=svrA/child=childA`. The empty address is the root.
//!
//! Registration patterns are addresses too: a segment whose value is [`WILDCARD`] (`*`)
//! matches any value of that type.

use crate::error::OperationError;
use crate::value::Value;
use std::fmt;
use std::str::FromStr;

/// The segment value that matches every name of a given type.
pub const WILDCARD: &str = "*";

/// One `type=value` step of an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PathElement {
    key: String,
    value: String,
}

impl PathElement {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// A pattern element matching every child of type `key`.
    pub fn wildcard(key: impl Into<String>) -> Self {
        Self::new(key, WILDCARD)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_wildcard(&self) -> bool {
        self.value == WILDCARD
    }

    /// Pattern match: same type, and either a wildcard or the same value.
    pub fn matches(&self, concrete: &PathElement) -> bool {
        self.key == concrete.key && (self.is_wildcard() || self.value == concrete.value)
    }

    /// Parses one segment from its structured form.
    ///
    /// Accepts `{type: value}`, `{"type": t, "value": v}` and `[t, v]`.
    pub fn from_value(value: &Value) -> Result<Self, OperationError> {
        match value {
            Value::Object(map) if map.len() == 2 && map.contains_key("type") => {
                let key = map.get("type").and_then(Value::as_str);
                let val = map.get("value").and_then(Value::as_str);
                match (key, val) {
                    (Some(k), Some(v)) => Ok(Self::new(k, v)),
                    _ => Err(OperationError::InvalidAddress(value.to_string())),
                }
            }
            Value::Object(map) if map.len() == 1 => {
                let (key, val) = map
                    .iter()
                    .next()
                    .ok_or_else(|| OperationError::InvalidAddress(value.to_string()))?;
                Ok(Self::new(key.as_str(), val.to_plain_string()))
            }
            Value::List(pair) if pair.len() == 2 => {
                match (pair[0].as_str(), pair[1].as_str()) {
                    (Some(k), Some(v)) => Ok(Self::new(k, v)),
                    _ => Err(OperationError::InvalidAddress(value.to_string())),
                }
            }
            other => Err(OperationError::InvalidAddress(other.to_string())),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::object().with(&self.key, self.value.as_str())
    }
}

impl fmt::Display for PathElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

impl FromStr for PathElement {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('=') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                Ok(Self::new(key, value))
            }
            _ => Err(OperationError::InvalidAddress(s.to_string())),
        }
    }
}

/// An ordered list of [`PathElement`]s naming a resource (or a pattern of resources).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct PathAddress(Vec<PathElement>);

impl PathAddress {
    /// The root address.
    pub fn root() -> Self {
        Self(Vec::new())
    }

    pub fn from_elements(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }

    /// Convenience constructor from `(type, value)` pairs.
    pub fn pairs(pairs: &[(&str, &str)]) -> Self {
        Self(pairs.iter().map(|(k, v)| PathElement::new(*k, *v)).collect())
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&PathElement> {
        self.0.last()
    }

    /// Returns a new address with `element` appended.
    pub fn append(&self, element: PathElement) -> Self {
        let mut elements = self.0.clone();
        elements.push(element);
        Self(elements)
    }

    /// The address of the parent resource; the root is its own parent.
    pub fn parent(&self) -> Self {
        let end = self.0.len().saturating_sub(1);
        Self(self.0[..end].to_vec())
    }

    /// The first `len` segments.
    pub fn prefix(&self, len: usize) -> Self {
        Self(self.0[..len.min(self.0.len())].to_vec())
    }

    /// The segments from `start` onwards, used to make an address relative to a proxy.
    pub fn sub_address(&self, start: usize) -> Self {
        Self(self.0[start.min(self.0.len())..].to_vec())
    }

    /// True when `self`, read as a pattern, matches `concrete` segment by segment.
    pub fn matches(&self, concrete: &PathAddress) -> bool {
        self.0.len() == concrete.0.len()
            && self.0.iter().zip(&concrete.0).all(|(p, c)| p.matches(c))
    }

    /// True when `self`, read as a pattern, matches a prefix of `concrete`.
    pub fn contains(&self, concrete: &PathAddress) -> bool {
        self.0.len() <= concrete.0.len()
            && self.0.iter().zip(&concrete.0).all(|(p, c)| p.matches(c))
    }

    /// True when no segment is a wildcard.
    pub fn is_concrete(&self) -> bool {
        self.0.iter().all(|e| !e.is_wildcard())
    }

    /// Parses the structured form of an address: undefined (root), a list of segments, or
    /// the `/a=b/c=d` string form.
    pub fn from_value(value: &Value) -> Result<Self, OperationError> {
        match value {
            Value::Undefined => Ok(Self::root()),
            Value::String(s) => s.parse(),
            Value::List(items) => items
                .iter()
                .map(PathElement::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Self),
            other => Err(OperationError::InvalidAddress(other.to_string())),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::List(self.0.iter().map(PathElement::to_value).collect())
    }
}

impl fmt::Display for PathAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("/");
        }
        for element in &self.0 {
            write!(f, "/{element}")?;
        }
        Ok(())
    }
}

impl FromStr for PathAddress {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.split('/')
            .filter(|segment| !segment.is_empty())
            .map(str::parse::<PathElement>)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl From<Vec<PathElement>> for PathAddress {
    fn from(elements: Vec<PathElement>) -> Self {
        Self(elements)
    }
}

impl<'a> IntoIterator for &'a PathAddress {
    type Item = &'a PathElement;
    type IntoIter = std::slice::Iter<'a, PathElement>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_form() {
        let address: PathAddress = "/serverchild=svrA/child=childA".parse().unwrap();
        assert_eq!(address.len(), 2);
        assert_eq!(address.to_string(), "/serverchild=svrA/child=childA");
        assert_eq!(PathAddress::root().to_string(), "/");
        assert_eq!("/".parse::<PathAddress>().unwrap(), PathAddress::root());
        assert!("/novalue".parse::<PathAddress>().is_err());
    }

    #[test]
    fn test_structured_forms() {
        let list: Value = r#"[{"server":"serverA"},{"type":"child","value":"c"},["x","y"]]"#
            .parse()
            .unwrap();
        let address = PathAddress::from_value(&list).unwrap();
        assert_eq!(address.to_string(), "/server=serverA/child=c/x=y");
        assert_eq!(
            PathAddress::from_value(&address.to_value()).unwrap(),
            address
        );
        assert!(PathAddress::from_value(&Value::Int(3)).is_err());
    }

    #[test]
    fn test_pattern_matching() {
        let pattern = PathAddress::from_elements(vec![
            PathElement::wildcard("serverchild"),
            PathElement::new("child", "childA"),
        ]);
        let hit = PathAddress::pairs(&[("serverchild", "svrA"), ("child", "childA")]);
        let miss = PathAddress::pairs(&[("serverchild", "svrA"), ("child", "other")]);
        assert!(pattern.matches(&hit));
        assert!(!pattern.matches(&miss));
        assert!(pattern.prefix(1).contains(&miss));
        assert!(!pattern.is_concrete());
        assert_eq!(hit.sub_address(1).to_string(), "/child=childA");
        assert_eq!(hit.parent().to_string(), "/serverchild=svrA");
    }
}
