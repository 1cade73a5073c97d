//! # Resources
//!
//! A [`Resource`] is one node of the management model: an ordered map of attribute values
//! plus children grouped by child type, each group ordered by insertion.
//!
//! Children are held behind [`Arc`] so a published tree can be shared with readers while a
//! write transaction copies only the nodes it touches (see [`crate::tree`]).

use crate::address::{PathAddress, PathElement};
use crate::value::Value;
use indexmap::IndexMap;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resource {
    model: IndexMap<String, Value>,
    children: IndexMap<String, IndexMap<String, Arc<Resource>>>,
}

impl Resource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A childless resource holding the given attributes.
    pub fn with_attributes<K, V, I>(attributes: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            model: attributes
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            children: IndexMap::new(),
        }
    }

    /// Adds (or replaces) a child, for seeding a model before it is published.
    pub fn with_child(mut self, element: &PathElement, child: Resource) -> Self {
        self.children
            .entry(element.key().to_string())
            .or_default()
            .insert(element.value().to_string(), Arc::new(child));
        self
    }

    pub fn model(&self) -> &IndexMap<String, Value> {
        &self.model
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.model.get(name)
    }

    /// Sets an attribute, returning the previous value.
    pub fn set_attribute(&mut self, name: &str, value: Value) -> Option<Value> {
        self.model.insert(name.to_string(), value)
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.model.shift_remove(name)
    }

    pub fn child(&self, element: &PathElement) -> Option<&Arc<Resource>> {
        self.children
            .get(element.key())
            .and_then(|group| group.get(element.value()))
    }

    pub fn has_child(&self, element: &PathElement) -> bool {
        self.child(element).is_some()
    }

    /// Child types that currently have at least one child, in insertion order.
    pub fn child_types(&self) -> impl Iterator<Item = &str> {
        self.children
            .iter()
            .filter(|(_, group)| !group.is_empty())
            .map(|(key, _)| key.as_str())
    }

    pub fn children_names(&self, child_type: &str) -> Vec<String> {
        self.children
            .get(child_type)
            .map(|group| group.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn children(&self, child_type: &str) -> impl Iterator<Item = (&str, &Arc<Resource>)> {
        self.children
            .get(child_type)
            .into_iter()
            .flat_map(|group| group.iter().map(|(name, child)| (name.as_str(), child)))
    }

    /// Walks `address` down from this node.
    pub fn navigate(&self, address: &PathAddress) -> Option<&Resource> {
        address
            .into_iter()
            .try_fold(self, |node, element| node.child(element).map(Arc::as_ref))
    }

    /// Mutable access to the resource at `address`, copying shared nodes along the way.
    pub(crate) fn navigate_mut(&mut self, address: &PathAddress) -> Option<&mut Resource> {
        let mut node = self;
        for element in address {
            node = node.child_mut(element)?;
        }
        Some(node)
    }

    /// Mutable access to a direct child, copying it first if it is shared.
    pub(crate) fn child_mut(&mut self, element: &PathElement) -> Option<&mut Resource> {
        self.children
            .get_mut(element.key())
            .and_then(|group| group.get_mut(element.value()))
            .map(Arc::make_mut)
    }

    /// Adds a child. Returns the rejected child if one with the same name exists.
    pub(crate) fn add_child(
        &mut self,
        element: &PathElement,
        child: Resource,
    ) -> Result<(), Resource> {
        let group = self.children.entry(element.key().to_string()).or_default();
        if group.contains_key(element.value()) {
            return Err(child);
        }
        group.insert(element.value().to_string(), Arc::new(child));
        Ok(())
    }

    pub(crate) fn remove_child(&mut self, element: &PathElement) -> Option<Arc<Resource>> {
        let group = self.children.get_mut(element.key())?;
        let removed = group.shift_remove(element.value());
        if group.is_empty() {
            self.children.shift_remove(element.key());
        }
        removed
    }

    /// Plain attribute and child view of the node, with no registration information.
    pub fn to_value(&self, recursive: bool) -> Value {
        let mut out = Value::Object(self.model.clone());
        for (child_type, group) in &self.children {
            let slot = out.entry(child_type);
            *slot = Value::object();
            for (name, child) in group {
                let rendered = if recursive {
                    child.to_value(true)
                } else {
                    Value::Undefined
                };
                slot.set(name, rendered);
            }
        }
        out
    }
}
