//! Model-only `add` and `remove`.
//!
//! Resources with no runtime side register these directly. Resources that do have one
//! (services, worker pools) usually wrap them: run the model-only part, then queue a
//! `Runtime` step.

use crate::context::{OperationContext, OperationStepHandler};
use crate::error::OperationError;
use crate::operation::names;
use crate::registry::{AttributeDefinition, OperationDefinition};
use crate::resource::Resource;
use crate::value::Value;
use async_trait::async_trait;

/// Creates the resource at the operation's address from the operation's parameters.
#[derive(Debug, Clone)]
pub struct ModelOnlyAddHandler {
    attributes: Vec<AttributeDefinition>,
}

impl ModelOnlyAddHandler {
    pub fn new(attributes: Vec<AttributeDefinition>) -> Self {
        Self { attributes }
    }

    /// The `add` definition, taking every attribute as a parameter.
    pub fn definition(&self) -> OperationDefinition {
        self.attributes.iter().cloned().fold(
            OperationDefinition::new(names::ADD).description("Adds the resource"),
            OperationDefinition::parameter,
        )
    }

    /// Validates the parameters and builds the new resource. Unset parameters are left out.
    pub fn populate(&self, operation: &Value) -> Result<Resource, OperationError> {
        let mut values = Vec::new();
        for attribute in &self.attributes {
            let value = operation.get(attribute.name()).cloned().unwrap_or_default();
            attribute.validate(&value)?;
            if value.is_defined() {
                values.push((attribute.name().to_string(), value));
            }
        }
        Ok(Resource::with_attributes(values))
    }
}

#[async_trait]
impl OperationStepHandler for ModelOnlyAddHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let resource = self.populate(operation)?;
        context.create_resource(resource)
    }
}

/// Removes the resource at the operation's address.
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelOnlyRemoveHandler;

impl ModelOnlyRemoveHandler {
    pub fn definition() -> OperationDefinition {
        OperationDefinition::new(names::REMOVE).description("Removes the resource")
    }
}

#[async_trait]
impl OperationStepHandler for ModelOnlyRemoveHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        _operation: &Value,
    ) -> Result<(), OperationError> {
        context.remove_resource().map(|_| ())
    }
}
