//! Stages, the step handler trait and the result-handler callback type.

use super::OperationContext;
use crate::error::OperationError;
use crate::transaction::ResultAction;
use crate::value::Value;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// The ordered phases of operation execution.
///
/// All `Model` steps run before any `Runtime` step, all `Runtime` steps before any
/// `Verify` step, and so on. A stage with no queued steps is skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Read and stage changes to the model.
    Model,
    /// Apply the staged changes to running services.
    Runtime,
    /// Confirm the runtime reached the intended state.
    Verify,
    /// Finalize the response.
    Done,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Model, Stage::Runtime, Stage::Verify, Stage::Done];

    pub(crate) fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Model => "MODEL",
            Stage::Runtime => "RUNTIME",
            Stage::Verify => "VERIFY",
            Stage::Done => "DONE",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of work in an operation.
///
/// A handler reads or writes the model through the context, may queue further steps with
/// [`OperationContext::add_step`], and may register a result handler with
/// [`OperationContext::complete_step`]. Returning `Err` with a recoverable error fails the
/// operation and rolls it back.
#[async_trait]
pub trait OperationStepHandler: Send + Sync {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError>;
}

/// Called once with the final decision, in reverse order of registration.
pub type ResultHandler = Box<dyn FnOnce(ResultAction, &mut OperationContext) + Send + Sync>;

struct FnStep<F>(F);

#[async_trait]
impl<F> OperationStepHandler for FnStep<F>
where
    F: Fn(&mut OperationContext, &Value) -> Result<(), OperationError> + Send + Sync,
{
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        (self.0)(context, operation)
    }
}

/// Wraps a synchronous closure as a step handler.
///
/// ```rust
/// use mgmt_controller::context::step_fn;
///
/// let handler = step_fn(|ctx, _op| {
///     *ctx.result_mut() = "pong".into();
///     Ok(())
/// });
/// ```
pub fn step_fn<F>(f: F) -> Arc<dyn OperationStepHandler>
where
    F: Fn(&mut OperationContext, &Value) -> Result<(), OperationError> + Send + Sync + 'static,
{
    Arc::new(FnStep(f))
}
