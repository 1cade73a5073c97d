//! `validate-operation`: checks an operation against its registered definition without
//! executing it. Operations addressed into a proxied controller are validated by that
//! controller.

use crate::context::{OperationContext, OperationStepHandler};
use crate::error::OperationError;
use crate::operation::{names, parse_operation, OperationBuilder};
use crate::proxy::ProxyStepHandler;
use crate::registry::ResolvedOperation;
use crate::value::Value;
use async_trait::async_trait;
use std::sync::Arc;

pub struct ValidateOperationHandler;

#[async_trait]
impl OperationStepHandler for ValidateOperationHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let target = operation
            .get(names::VALUE)
            .filter(|v| v.is_defined())
            .ok_or_else(|| OperationError::MissingParameter(names::VALUE.to_string()))?;
        let (name, address) = parse_operation(target)?;

        match context.root_registration().resolve(&address, &name)? {
            ResolvedOperation::Local { entry, .. } => entry.definition.validate(target),
            ResolvedOperation::Proxied { proxy } => {
                let node = proxy.proxy_node_address().clone();
                let mut inner = target.clone();
                inner.set(names::ADDRESS, address.sub_address(node.len()).to_value());
                let forward = OperationBuilder::new(names::VALIDATE_OPERATION)
                    .address(&node)
                    .param(names::VALUE, inner)
                    .build();
                let stage = context.current_stage();
                context.add_step_first(forward, Arc::new(ProxyStepHandler::new(proxy)), stage)
            }
        }
    }
}
