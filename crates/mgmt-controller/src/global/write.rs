//! `write-attribute` and `undefine-attribute`.

use super::read::registration_at;
use crate::context::{OperationContext, OperationStepHandler, Stage};
use crate::error::OperationError;
use crate::operation::{names, string_param};
use crate::registry::AccessType;
use crate::value::Value;
use async_trait::async_trait;
use tracing::debug;

/// `write-attribute`
///
/// Attributes registered with a write handler delegate to it (as the next step, with the
/// same operation). The rest are written straight into the model; an undefined value
/// removes the attribute.
pub struct WriteAttributeHandler;

#[async_trait]
impl OperationStepHandler for WriteAttributeHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let name = string_param(operation, names::NAME)?;
        let value = operation.get(names::VALUE).cloned().unwrap_or_default();
        let address = context.current_address().clone();
        let root = context.root_registration();
        let access = registration_at(&root, &address)?
            .attribute(name)
            .ok_or_else(|| {
                OperationError::invalid_parameter(names::NAME, format!("no attribute '{name}' at {address}"))
            })?;

        if access.access != AccessType::ReadWrite {
            return Err(OperationError::failed(format!(
                "Attribute '{name}' at {address} is not writable"
            )));
        }
        if !value.is_defined() && !access.definition.is_nillable() && access.definition.default().is_none() {
            return Err(OperationError::failed(format!(
                "Attribute '{name}' at {address} is not nillable"
            )));
        }
        access.definition.validate(&value)?;

        if let Some(write_handler) = &access.write_handler {
            return context.add_step_first(operation.clone(), write_handler.clone(), Stage::Model);
        }
        let resource = context.read_resource_for_update()?;
        let previous = if value.is_defined() {
            resource.set_attribute(name, value)
        } else {
            resource.remove_attribute(name)
        };
        debug!(%address, attribute = name, previous = %previous.unwrap_or_default(), "Attribute written");
        Ok(())
    }
}

/// `undefine-attribute`: a `write-attribute` with an undefined value.
pub struct UndefineAttributeHandler;

#[async_trait]
impl OperationStepHandler for UndefineAttributeHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let mut write = operation.clone();
        write.set(names::OP, names::WRITE_ATTRIBUTE);
        write.set(names::VALUE, Value::Undefined);
        WriteAttributeHandler.execute(context, &write).await
    }
}
