//! # Resource Registration
//!
//! The registration tree is the schema of the management model. Each node is bound to an
//! address *pattern* (a segment value may be the wildcard `*`) and carries:
//!
//! - the operations valid there, each with an [`OperationDefinition`] and a step handler,
//!   optionally *inherited* by every descendant (the global operations live at the root);
//! - the attribute definitions with their [`AccessType`];
//! - the capabilities the resource provides;
//! - optionally a [`ProxyController`], in which case the whole subtree below it belongs to
//!   another controller.
//!
//! The tree is built mutably at boot and then frozen behind an `Arc` when the controller
//! starts; lookups never lock.
//!
//! ## Lookup
//!
//! Resolving a concrete address walks from the root. At each segment an exact registration
//! (`child=childA`) wins over a wildcard one (`child=*`). If a proxy registration is reached
//! before the address is exhausted, the proxy owns the rest of the address.

mod attribute;

pub use attribute::{AccessType, AttributeAccess, AttributeDefinition, OperationDefinition};

use crate::address::{PathAddress, PathElement};
use crate::context::OperationStepHandler;
use crate::error::{OperationError, RegistrationError};
use crate::proxy::{ProxyController, ProxyStepHandler};
use crate::value::Value;
use indexmap::{IndexMap, IndexSet};
use std::sync::Arc;

/// A registered operation.
#[derive(Clone)]
pub struct OperationEntry {
    pub definition: OperationDefinition,
    pub handler: Arc<dyn OperationStepHandler>,
    pub inherited: bool,
}

/// One node of the registration tree.
pub struct ResourceRegistration {
    address: PathAddress,
    description: String,
    operations: IndexMap<String, OperationEntry>,
    attributes: IndexMap<String, AttributeAccess>,
    capabilities: IndexSet<String>,
    children: IndexMap<String, IndexMap<String, ResourceRegistration>>,
    proxy: Option<Arc<dyn ProxyController>>,
}

/// How an operation addressed at some resource will be executed.
pub enum ResolvedOperation<'a> {
    /// Handled locally by a registered handler.
    Local {
        registration: &'a ResourceRegistration,
        entry: OperationEntry,
    },
    /// Forwarded whole to the proxy that owns the address.
    Proxied { proxy: Arc<dyn ProxyController> },
}

impl ResolvedOperation<'_> {
    pub fn handler(&self) -> Arc<dyn OperationStepHandler> {
        match self {
            ResolvedOperation::Local { entry, .. } => entry.handler.clone(),
            ResolvedOperation::Proxied { proxy } => Arc::new(ProxyStepHandler::new(proxy.clone())),
        }
    }

    /// True when the operation may run without the controller write lock.
    pub fn is_read_only(&self) -> bool {
        match self {
            ResolvedOperation::Local { entry, .. } => entry.definition.is_read_only(),
            ResolvedOperation::Proxied { .. } => true,
        }
    }
}

impl ResourceRegistration {
    /// Creates the root registration.
    pub fn root(description: impl Into<String>) -> Self {
        Self::node(PathAddress::root(), description.into())
    }

    fn node(address: PathAddress, description: String) -> Self {
        Self {
            address,
            description,
            operations: IndexMap::new(),
            attributes: IndexMap::new(),
            capabilities: IndexSet::new(),
            children: IndexMap::new(),
            proxy: None,
        }
    }

    /// The pattern this node is registered under.
    pub fn address(&self) -> &PathAddress {
        &self.address
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_remote(&self) -> bool {
        self.proxy.is_some()
    }

    pub fn proxy_controller(&self) -> Option<&Arc<dyn ProxyController>> {
        self.proxy.as_ref()
    }

    // ---------------------------------------------------------------------
    // Registration (boot time)
    // ---------------------------------------------------------------------

    /// Registers an operation on this node.
    pub fn register_operation_handler(
        &mut self,
        definition: OperationDefinition,
        handler: Arc<dyn OperationStepHandler>,
        inherited: bool,
    ) -> Result<(), RegistrationError> {
        let name = definition.name().to_string();
        if self.operations.contains_key(&name) {
            return Err(RegistrationError::DuplicateOperation {
                name,
                address: self.address.clone(),
            });
        }
        self.operations.insert(
            name,
            OperationEntry {
                definition,
                handler,
                inherited,
            },
        );
        Ok(())
    }

    /// Registers a child resource type (or a specific named child) under this node.
    pub fn register_sub_model(
        &mut self,
        element: PathElement,
        description: impl Into<String>,
    ) -> Result<&mut ResourceRegistration, RegistrationError> {
        if self.proxy.is_some() {
            return Err(RegistrationError::ProxyConflict(self.address.clone()));
        }
        let address = self.address.append(element.clone());
        let group = self.children.entry(element.key().to_string()).or_default();
        if group.contains_key(element.value()) {
            return Err(RegistrationError::DuplicateSubModel(address));
        }
        Ok(group
            .entry(element.value().to_string())
            .or_insert_with(|| Self::node(address, description.into())))
    }

    /// Hands the subtree at `element` to `proxy`.
    pub fn register_proxy_controller(
        &mut self,
        element: PathElement,
        proxy: Arc<dyn ProxyController>,
    ) -> Result<(), RegistrationError> {
        let description = format!("Remote controller at {element}");
        let node = self.register_sub_model(element, description)?;
        node.proxy = Some(proxy);
        Ok(())
    }

    pub fn register_read_only_attribute(
        &mut self,
        definition: AttributeDefinition,
    ) -> Result<(), RegistrationError> {
        self.register_attribute(definition, AccessType::ReadOnly, None, None)
    }

    /// Registers a writable attribute. Without a custom handler writes only touch the model.
    pub fn register_read_write_attribute(
        &mut self,
        definition: AttributeDefinition,
        write_handler: Option<Arc<dyn OperationStepHandler>>,
    ) -> Result<(), RegistrationError> {
        self.register_attribute(definition, AccessType::ReadWrite, None, write_handler)
    }

    pub fn register_metric(
        &mut self,
        definition: AttributeDefinition,
        read_handler: Arc<dyn OperationStepHandler>,
    ) -> Result<(), RegistrationError> {
        self.register_attribute(definition, AccessType::Metric, Some(read_handler), None)
    }

    fn register_attribute(
        &mut self,
        definition: AttributeDefinition,
        access: AccessType,
        read_handler: Option<Arc<dyn OperationStepHandler>>,
        write_handler: Option<Arc<dyn OperationStepHandler>>,
    ) -> Result<(), RegistrationError> {
        let name = definition.name().to_string();
        if self.attributes.contains_key(&name) {
            return Err(RegistrationError::DuplicateAttribute {
                name,
                address: self.address.clone(),
            });
        }
        self.attributes.insert(
            name,
            AttributeAccess {
                definition,
                access,
                read_handler,
                write_handler,
            },
        );
        Ok(())
    }

    pub fn register_capability(&mut self, capability: impl Into<String>) {
        self.capabilities.insert(capability.into());
    }

    /// Mutable access to the node registered at exactly `pattern`.
    pub fn sub_model_mut(&mut self, pattern: &PathAddress) -> Option<&mut ResourceRegistration> {
        let mut node = self;
        for element in pattern {
            node = node
                .children
                .get_mut(element.key())?
                .get_mut(element.value())?;
        }
        Some(node)
    }

    /// Registers an operation at the node registered at `pattern`.
    pub fn register_operation_at(
        &mut self,
        pattern: &PathAddress,
        definition: OperationDefinition,
        handler: Arc<dyn OperationStepHandler>,
    ) -> Result<(), RegistrationError> {
        self.sub_model_mut(pattern)
            .ok_or_else(|| RegistrationError::NoSuchParent(pattern.clone()))?
            .register_operation_handler(definition, handler, false)
    }

    /// Registers a sub-model at `pattern`, whose parent must already be registered.
    pub fn register_sub_model_at(
        &mut self,
        pattern: &PathAddress,
        description: impl Into<String>,
    ) -> Result<&mut ResourceRegistration, RegistrationError> {
        let element = pattern.last().cloned().ok_or(RegistrationError::RootPattern)?;
        let parent = pattern.parent();
        self.sub_model_mut(&parent)
            .ok_or(RegistrationError::NoSuchParent(parent))?
            .register_sub_model(element, description)
    }

    /// Registers a proxy at `pattern`, whose parent must already be registered.
    pub fn register_proxy_controller_at(
        &mut self,
        pattern: &PathAddress,
        proxy: Arc<dyn ProxyController>,
    ) -> Result<(), RegistrationError> {
        let element = pattern.last().cloned().ok_or(RegistrationError::RootPattern)?;
        let parent = pattern.parent();
        self.sub_model_mut(&parent)
            .ok_or(RegistrationError::NoSuchParent(parent))?
            .register_proxy_controller(element, proxy)
    }

    // ---------------------------------------------------------------------
    // Lookup (run time)
    // ---------------------------------------------------------------------

    /// The registration for a direct child, exact match first, then wildcard.
    pub fn child_registration(&self, element: &PathElement) -> Option<&ResourceRegistration> {
        let group = self.children.get(element.key())?;
        group
            .get(element.value())
            .or_else(|| group.get(crate::address::WILDCARD))
    }

    /// Every registration matched walking `address` from the root, root first.
    ///
    /// Stops early at a proxy, which stands for the remainder of the address.
    pub fn lookup(&self, address: &PathAddress) -> Option<Vec<&ResourceRegistration>> {
        let mut chain = vec![self];
        let mut node = self;
        for element in address {
            if node.is_remote() {
                break;
            }
            node = node.child_registration(element)?;
            chain.push(node);
        }
        Some(chain)
    }

    /// The registration responsible for `address` (a proxy if one owns it).
    pub fn get_sub_model(&self, address: &PathAddress) -> Option<&ResourceRegistration> {
        self.lookup(address).and_then(|chain| chain.last().copied())
    }

    /// The proxy owning `address`, with the address of the proxy node itself.
    pub fn proxy_for(&self, address: &PathAddress) -> Option<(PathAddress, Arc<dyn ProxyController>)> {
        let chain = self.lookup(address)?;
        chain
            .iter()
            .enumerate()
            .find_map(|(depth, node)| node.proxy.clone().map(|p| (address.prefix(depth), p)))
    }

    /// The operation `name` as seen at `address`: own registrations first, then the closest
    /// inherited one.
    pub fn get_operation_entry(&self, address: &PathAddress, name: &str) -> Option<OperationEntry> {
        let chain = self.lookup(address)?;
        let target = chain.last()?;
        if let Some(entry) = target.operations.get(name) {
            return Some(entry.clone());
        }
        chain
            .iter()
            .rev()
            .skip(1)
            .find_map(|node| node.operations.get(name).filter(|e| e.inherited).cloned())
    }

    /// Decides how operation `name` at `address` will run.
    pub fn resolve(&self, address: &PathAddress, name: &str) -> Result<ResolvedOperation<'_>, OperationError> {
        if let Some((_, proxy)) = self.proxy_for(address) {
            return Ok(ResolvedOperation::Proxied { proxy });
        }
        let registration = self
            .get_sub_model(address)
            .ok_or_else(|| OperationError::UnknownAddress(address.clone()))?;
        let entry = self
            .get_operation_entry(address, name)
            .ok_or_else(|| OperationError::UnknownOperation {
                name: name.to_string(),
                address: address.clone(),
            })?;
        Ok(ResolvedOperation::Local {
            registration,
            entry,
        })
    }

    /// Operation names valid at this node given its ancestors; own operations first.
    pub fn operation_names(&self, address: &PathAddress) -> Vec<String> {
        let Some(chain) = self.lookup(address) else {
            return Vec::new();
        };
        let mut names: IndexSet<String> = IndexSet::new();
        for (depth, node) in chain.iter().enumerate().rev() {
            let own = depth + 1 == chain.len();
            for (name, entry) in &node.operations {
                if own || entry.inherited {
                    names.insert(name.clone());
                }
            }
        }
        names.into_iter().collect()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeAccess> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &AttributeAccess)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &str> {
        self.capabilities.iter().map(String::as_str)
    }

    /// Registered child types, in registration order.
    pub fn child_types(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    /// Registered child patterns of one type (`*` or specific names).
    pub fn child_patterns(&self, child_type: &str) -> impl Iterator<Item = (&str, &ResourceRegistration)> {
        self.children
            .get(child_type)
            .into_iter()
            .flat_map(|group| group.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// Description node for `read-resource-description`. Proxied children are described
    /// by their registration only; callers delegate through the proxy for more.
    pub fn describe(&self, recursive: bool, operations: bool) -> Value {
        let mut out = Value::object().with("description", self.description.as_str());
        let attributes = out.entry("attributes");
        *attributes = Value::object();
        for (name, access) in &self.attributes {
            let mut description = access.definition.describe();
            description.set("access-type", access.access.as_str());
            attributes.set(name, description);
        }
        if !self.capabilities.is_empty() {
            out.set(
                "capabilities",
                self.capabilities
                    .iter()
                    .map(|c| Value::from(c.as_str()))
                    .collect::<Value>(),
            );
        }
        if operations {
            let ops = out.entry("operations");
            *ops = Value::object();
            for (name, entry) in &self.operations {
                ops.set(name, entry.definition.describe());
            }
        }
        let children = out.entry("children");
        *children = Value::object();
        for (child_type, group) in &self.children {
            let slot = children.entry(child_type);
            slot.set("description", format!("Children of type {child_type}"));
            let models = slot.entry("model-description");
            *models = Value::object();
            for (pattern, child) in group {
                let described = if recursive && !child.is_remote() {
                    child.describe(true, operations)
                } else {
                    Value::object().with("description", child.description.as_str())
                };
                models.set(pattern, described);
            }
        }
        out
    }
}
