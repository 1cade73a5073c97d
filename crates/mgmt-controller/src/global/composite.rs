//! `composite`: several operations as one transaction.
//!
//! Every step is resolved and validated up front, so a malformed composite fails before any
//! of it runs. The steps then run depth-first, each in its own response slot, and a final
//! step collects the slots into the composite's result as `{"step-1": {...}, ...}`.
//!
//! Any failing step stops the pipeline and rolls the whole composite back. The composite's
//! own result handler then rewrites its result so that every step reports as rolled back and
//! names the steps that failed.

use crate::address::PathAddress;
use crate::context::{step_fn, OperationContext, OperationStepHandler, ResponseId, Stage};
use crate::error::OperationError;
use crate::operation::{names, parse_operation, OperationBuilder};
use crate::registry::ResolvedOperation;
use crate::transaction::ResultAction;
use crate::value::Value;
use async_trait::async_trait;
use std::sync::Arc;

/// Joins a step address onto the address the composite itself targets.
fn step_address(base: &PathAddress, relative: &PathAddress) -> PathAddress {
    relative
        .elements()
        .iter()
        .cloned()
        .fold(base.clone(), |address, element| address.append(element))
}

/// `composite`
pub struct CompositeHandler;

#[async_trait]
impl OperationStepHandler for CompositeHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let steps = operation
            .get(names::STEPS)
            .and_then(Value::as_list)
            .ok_or_else(|| OperationError::invalid_parameter(names::STEPS, "expected a list of operations"))?;
        let base = context.current_address().clone();
        let root = context.root_registration();

        let mut planned: Vec<(String, Value, Arc<dyn OperationStepHandler>)> = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            let label = format!("step-{}", index + 1);
            let invalid = |e: OperationError| OperationError::invalid_parameter(names::STEPS, format!("{label}: {e}"));
            let (name, relative) = parse_operation(step).map_err(invalid)?;
            let address = step_address(&base, &relative);
            let resolved = root.resolve(&address, &name).map_err(invalid)?;
            if let ResolvedOperation::Local { entry, .. } = &resolved {
                entry.definition.validate(step).map_err(invalid)?;
            }
            let mut step = step.clone();
            step.set(names::ADDRESS, address.to_value());
            planned.push((label, step, resolved.handler()));
        }

        let own = context.current_response();
        let mut queued = Vec::with_capacity(planned.len());
        let mut slots: Vec<(String, ResponseId)> = Vec::with_capacity(planned.len());
        for (label, step, handler) in planned {
            let slot = context.new_response();
            slots.push((label, slot));
            queued.push((step, handler, slot));
        }

        let collected = slots.clone();
        let collect = step_fn(move |ctx, _| {
            let mut result = Value::object();
            for (label, slot) in &collected {
                result.set(label, ctx.response(*slot).to_value(false));
            }
            *ctx.result_mut() = result;
            Ok(())
        });
        let collect_op = OperationBuilder::new("collect-composite-results")
            .address(&base)
            .build();
        context.add_step_first(collect_op, collect, Stage::Model)?;
        for (step, handler, slot) in queued.into_iter().rev() {
            context.add_step_first_with_response(step, handler, Stage::Model, slot)?;
        }

        context.complete_step(move |action, ctx| {
            if action != ResultAction::Rollback {
                return;
            }
            let mut result = Value::object();
            let mut failures = Value::object();
            for (label, slot) in &slots {
                let response = ctx.response(*slot);
                let mut outcome = Value::object()
                    .with(names::OUTCOME, names::FAILED)
                    .with(names::ROLLED_BACK, true);
                if let Some(failure) = &response.failure {
                    outcome.set(names::FAILURE_DESCRIPTION, failure.clone());
                    failures.set(label, failure.clone());
                }
                result.set(label, outcome);
            }
            let response = ctx.response_mut(own);
            response.result = result;
            if failures.keys().next().is_some() {
                response.failure = Some(Value::from(format!(
                    "Composite operation failed and was rolled back. Steps that failed: {failures}"
                )));
            }
        });
        Ok(())
    }
}
