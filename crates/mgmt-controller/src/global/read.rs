//! Read-only global operations.
//!
//! `read-resource` and `read-resource-description` may reach into proxied controllers. Both
//! render the local part synchronously, then queue one proxy step per proxied child (each
//! with its own response slot) followed by a step that splices the proxied results into the
//! local one, so the response is complete by the time the operation prepares.

use crate::address::{PathAddress, PathElement};
use crate::context::{step_fn, OperationContext, OperationStepHandler, Stage};
use crate::error::OperationError;
use crate::operation::{bool_param, names, string_param, OperationBuilder};
use crate::proxy::{ProxyController, ProxyStepHandler};
use crate::registry::{AccessType, ResourceRegistration};
use crate::resource::Resource;
use crate::value::Value;
use async_trait::async_trait;
use std::sync::Arc;

/// The local registration for the executing step's address.
pub(super) fn registration_at<'a>(
    root: &'a ResourceRegistration,
    address: &PathAddress,
) -> Result<&'a ResourceRegistration, OperationError> {
    root.get_sub_model(address)
        .filter(|registration| !registration.is_remote())
        .ok_or_else(|| OperationError::UnknownAddress(address.clone()))
}

/// A pending delegation: the proxy to ask, the operation to send and where to put the result.
struct Delegation {
    proxy: Arc<dyn ProxyController>,
    operation: Value,
    path: Vec<String>,
}

/// Queues the delegations, then a step that splices their results into the current result.
fn queue_delegations(
    context: &mut OperationContext,
    delegations: Vec<Delegation>,
) -> Result<(), OperationError> {
    if delegations.is_empty() {
        return Ok(());
    }
    let mut pending = Vec::with_capacity(delegations.len());
    let mut splices = Vec::with_capacity(delegations.len());
    for delegation in delegations {
        let slot = context.new_response();
        splices.push((delegation.path, slot));
        pending.push((delegation.proxy, delegation.operation, slot));
    }

    let splice_op = OperationBuilder::new("splice-proxied-results")
        .address(context.current_address())
        .build();
    let splice = step_fn(move |ctx, _| {
        for (path, slot) in &splices {
            let value = ctx.response(*slot).result.clone();
            *ctx.result_mut().entry_path(path.as_slice()) = value;
        }
        Ok(())
    });
    context.add_step_first(splice_op, splice, Stage::Model)?;
    for (proxy, operation, slot) in pending.into_iter().rev() {
        let handler: Arc<dyn OperationStepHandler> = Arc::new(ProxyStepHandler::new(proxy));
        context.add_step_first_with_response(operation, handler, Stage::Model, slot)?;
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct ReadOptions {
    recursive: bool,
    proxies: bool,
    include_defaults: bool,
}

fn render_resource(
    registration: &ResourceRegistration,
    resource: &Resource,
    address: &PathAddress,
    options: ReadOptions,
    path: &mut Vec<String>,
    delegations: &mut Vec<Delegation>,
) -> Value {
    let mut out = Value::object();
    for (name, access) in registration.attributes() {
        if access.access == AccessType::Metric {
            continue;
        }
        let value = match resource.attribute(name) {
            Some(value) if value.is_defined() => value.clone(),
            _ if options.include_defaults => access.definition.default().cloned().unwrap_or_default(),
            _ => Value::Undefined,
        };
        out.set(name, value);
    }

    for child_type in registration.child_types() {
        if resource.children_names(child_type).is_empty() {
            out.set(child_type, Value::Undefined);
            continue;
        }
        let mut children = Value::object();
        for (name, child) in resource.children(child_type) {
            let element = PathElement::new(child_type, name);
            let rendered = match registration.child_registration(&element) {
                Some(child_registration) if child_registration.is_remote() => {
                    if let (true, true, Some(proxy)) = (
                        options.recursive,
                        options.proxies,
                        child_registration.proxy_controller(),
                    ) {
                        let child_address = address.append(element);
                        let mut child_path = path.clone();
                        child_path.extend([child_type.to_string(), name.to_string()]);
                        delegations.push(Delegation {
                            proxy: proxy.clone(),
                            operation: OperationBuilder::new(names::READ_RESOURCE)
                                .address(&child_address)
                                .param(names::RECURSIVE, true)
                                .param(names::PROXIES, true)
                                .param(names::INCLUDE_DEFAULTS, options.include_defaults)
                                .build(),
                            path: child_path,
                        });
                    }
                    Value::Undefined
                }
                Some(child_registration) if options.recursive => {
                    path.extend([child_type.to_string(), name.to_string()]);
                    let rendered = render_resource(
                        child_registration,
                        child,
                        &address.append(element),
                        options,
                        path,
                        delegations,
                    );
                    path.truncate(path.len() - 2);
                    rendered
                }
                _ => Value::Undefined,
            };
            children.set(name, rendered);
        }
        out.set(child_type, children);
    }
    out
}

/// `read-resource`
pub struct ReadResourceHandler;

#[async_trait]
impl OperationStepHandler for ReadResourceHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let options = ReadOptions {
            recursive: bool_param(operation, names::RECURSIVE, false)?,
            proxies: bool_param(operation, names::PROXIES, false)?,
            include_defaults: bool_param(operation, names::INCLUDE_DEFAULTS, true)?,
        };
        let address = context.current_address().clone();
        let root = context.root_registration();
        let registration = registration_at(&root, &address)?;

        let mut delegations = Vec::new();
        let result = render_resource(
            registration,
            context.read_resource()?,
            &address,
            options,
            &mut Vec::new(),
            &mut delegations,
        );
        *context.result_mut() = result;
        queue_delegations(context, delegations)
    }
}

/// `read-attribute`
pub struct ReadAttributeHandler;

#[async_trait]
impl OperationStepHandler for ReadAttributeHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let name = string_param(operation, names::NAME)?;
        let include_defaults = bool_param(operation, names::INCLUDE_DEFAULTS, true)?;
        let address = context.current_address().clone();
        let root = context.root_registration();
        let access = registration_at(&root, &address)?
            .attribute(name)
            .ok_or_else(|| {
                OperationError::invalid_parameter(names::NAME, format!("no attribute '{name}' at {address}"))
            })?;

        if let Some(read_handler) = &access.read_handler {
            return context.add_step_first(operation.clone(), read_handler.clone(), context.current_stage());
        }
        let value = match context.read_resource()?.attribute(name) {
            Some(value) if value.is_defined() => value.clone(),
            _ if include_defaults => access.definition.default().cloned().unwrap_or_default(),
            _ => Value::Undefined,
        };
        *context.result_mut() = value;
        Ok(())
    }
}

/// `read-children-names`
pub struct ReadChildrenNamesHandler;

#[async_trait]
impl OperationStepHandler for ReadChildrenNamesHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let child_type = string_param(operation, names::CHILD_TYPE)?;
        let address = context.current_address().clone();
        let root = context.root_registration();
        if !registration_at(&root, &address)?
            .child_types()
            .any(|t| t == child_type)
        {
            return Err(OperationError::invalid_parameter(
                names::CHILD_TYPE,
                format!("no child type '{child_type}' at {address}"),
            ));
        }
        let names: Value = context
            .read_resource()?
            .children_names(child_type)
            .into_iter()
            .map(Value::from)
            .collect();
        *context.result_mut() = names;
        Ok(())
    }
}

/// `read-children-types`
pub struct ReadChildrenTypesHandler;

#[async_trait]
impl OperationStepHandler for ReadChildrenTypesHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        _operation: &Value,
    ) -> Result<(), OperationError> {
        let address = context.current_address().clone();
        let root = context.root_registration();
        let types: Value = registration_at(&root, &address)?
            .child_types()
            .map(Value::from)
            .collect();
        *context.result_mut() = types;
        Ok(())
    }
}

/// `read-operation-names`
pub struct ReadOperationNamesHandler;

#[async_trait]
impl OperationStepHandler for ReadOperationNamesHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        _operation: &Value,
    ) -> Result<(), OperationError> {
        let address = context.current_address().clone();
        let names: Value = context
            .root_registration()
            .operation_names(&address)
            .into_iter()
            .map(Value::from)
            .collect();
        *context.result_mut() = names;
        Ok(())
    }
}

/// `read-operation-description`
pub struct ReadOperationDescriptionHandler;

#[async_trait]
impl OperationStepHandler for ReadOperationDescriptionHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let name = string_param(operation, names::NAME)?;
        let address = context.current_address().clone();
        let entry = context
            .root_registration()
            .get_operation_entry(&address, name)
            .ok_or_else(|| OperationError::UnknownOperation {
                name: name.to_string(),
                address: address.clone(),
            })?;
        *context.result_mut() = entry.definition.describe();
        Ok(())
    }
}

fn collect_described_proxies(
    registration: &ResourceRegistration,
    recursive: bool,
    operations: bool,
    path: &mut Vec<String>,
    delegations: &mut Vec<Delegation>,
) {
    for child_type in registration.child_types() {
        for (pattern, child) in registration.child_patterns(child_type) {
            let segment = [
                "children".to_string(),
                child_type.to_string(),
                "model-description".to_string(),
                pattern.to_string(),
            ];
            if let Some(proxy) = child.proxy_controller() {
                let mut child_path = path.clone();
                child_path.extend(segment);
                delegations.push(Delegation {
                    proxy: proxy.clone(),
                    operation: OperationBuilder::new(names::READ_RESOURCE_DESCRIPTION)
                        .address(proxy.proxy_node_address())
                        .param(names::RECURSIVE, true)
                        .param(names::OPERATIONS, operations)
                        .param(names::PROXIES, true)
                        .build(),
                    path: child_path,
                });
            } else if recursive {
                path.extend(segment);
                collect_described_proxies(child, recursive, operations, path, delegations);
                path.truncate(path.len() - 4);
            }
        }
    }
}

/// `read-resource-description`
pub struct ReadResourceDescriptionHandler;

#[async_trait]
impl OperationStepHandler for ReadResourceDescriptionHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let recursive = bool_param(operation, names::RECURSIVE, false)?;
        let operations = bool_param(operation, names::OPERATIONS, false)?;
        let proxies = bool_param(operation, names::PROXIES, false)?;
        let address = context.current_address().clone();
        let root = context.root_registration();
        let registration = registration_at(&root, &address)?;

        let mut description = registration.describe(recursive, operations);
        if operations {
            for name in root.operation_names(&address) {
                if description.get_path(&["operations", name.as_str()]).is_some() {
                    continue;
                }
                if let Some(entry) = root.get_operation_entry(&address, &name) {
                    *description.entry_path(&["operations", name.as_str()]) = entry.definition.describe();
                }
            }
        }
        *context.result_mut() = description;

        let mut delegations = Vec::new();
        if recursive && proxies {
            collect_described_proxies(registration, recursive, operations, &mut Vec::new(), &mut delegations);
        }
        queue_delegations(context, delegations)
    }
}
