//! # Operation Context & Step Pipeline
//!
//! Every operation executes inside an [`OperationContext`]. The context owns the operation's
//! view of the model, the queues of pending steps, the stack of result handlers, and the
//! responses being built.
//!
//! ## Execution Model
//!
//! Steps are queued per [`Stage`] and drained stage by stage:
//!
//! ```text
//!   MODEL ──► RUNTIME ──► VERIFY ──► DONE ──► prepared ──► decision ──► result handlers
//!     │          │           │
//!     └── any recoverable failure: stop, mark rollback-only, unwind ──┘
//! ```
//!
//! - Within a stage steps run in queue order. A step may queue more steps for the current
//!   stage or a later one; queuing for an earlier stage is a contract violation.
//!   [`OperationContext::add_step_first`] runs the new step immediately after the current
//!   one, which is how nested work executes depth-first.
//! - A step calls [`OperationContext::complete_step`] to register a result handler. Handlers
//!   are kept on a stack and invoked in reverse order once the outcome is known, so the
//!   last step to complete is the first to observe the decision. A step that returns
//!   without completing has nothing to undo.
//! - A step returning a recoverable error records the failure description on its response,
//!   marks the operation rollback-only and stops the pipeline. Every completed step's
//!   handler then sees [`ResultAction::Rollback`].
//! - Returning an error *after* completing, completing twice, or a
//!   [`OperationError::ContractViolation`] is fatal: the operation unwinds, the process is
//!   marked reload-required and `execute` returns an error instead of a response.
//!
//! ## Model Access
//!
//! Reads are served from the snapshot taken when the operation started, or from the staged
//! copy once the operation holds write intent. Writes are only allowed in the `Model` stage,
//! and the controller write lock is released as soon as that stage drains, so a step that
//! blocks in `Runtime` or `Verify` never holds up other writers.
//!
//! ## Blocking
//!
//! Anything that waits on the outside world (a service starting, a proxied controller)
//! should go through [`OperationContext::bounded`], which applies the configured blocking
//! timeout and observes cancellation.

mod attachments;
mod step;

pub use attachments::{AttachmentKey, Attachments};
pub use step::{step_fn, OperationStepHandler, ResultHandler, Stage};

use crate::address::PathAddress;
use crate::config::ControllerSettings;
use crate::error::OperationError;
use crate::message::{MessageSeverity, OperationMessageHandler};
use crate::operation::{names, OperationAttachments, ResponseStream};
use crate::process::ProcessStateHandle;
use crate::registry::ResourceRegistration;
use crate::resource::Resource;
use crate::transaction::ResultAction;
use crate::tree::ModelTransaction;
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

/// Index of a response slot. Slot [`ResponseId::ROOT`] is the operation's own response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResponseId(usize);

impl ResponseId {
    pub const ROOT: ResponseId = ResponseId(0);
}

/// The response being built by one step (or a group of steps sharing it).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepResponse {
    pub result: Value,
    pub failure: Option<Value>,
    pub headers: IndexMap<String, Value>,
}

impl StepResponse {
    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Renders the slot in response form.
    pub fn to_value(&self, rolled_back: bool) -> Value {
        let mut out = Value::object();
        match &self.failure {
            Some(failure) => {
                out.set(names::OUTCOME, names::FAILED);
                out.set(names::FAILURE_DESCRIPTION, failure.clone());
                if self.result.is_defined() {
                    out.set(names::RESULT, self.result.clone());
                }
                if rolled_back {
                    out.set(names::ROLLED_BACK, true);
                }
            }
            None => {
                out.set(names::OUTCOME, names::SUCCESS);
                out.set(names::RESULT, self.result.clone());
            }
        }
        if !self.headers.is_empty() {
            out.set(names::RESPONSE_HEADERS, Value::Object(self.headers.clone()));
        }
        out
    }
}

struct Step {
    handler: Arc<dyn OperationStepHandler>,
    operation: Value,
    address: PathAddress,
    response: ResponseId,
}

struct ActiveStep {
    address: PathAddress,
    response: ResponseId,
    completed: bool,
}

/// How the step pipeline ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PipelineOutcome {
    Prepared,
    Failed,
    Fatal(String),
}

/// The execution context of a single operation.
pub struct OperationContext {
    operation_id: u64,
    registration: Arc<ResourceRegistration>,
    model: ModelTransaction,
    queues: [VecDeque<Step>; 4],
    stage: Stage,
    root_address: PathAddress,
    active: Option<ActiveStep>,
    completed: Vec<ResultHandler>,
    responses: Vec<StepResponse>,
    rollback_only: bool,
    first_failure: Option<Value>,
    violation: Option<String>,
    attachments: Attachments,
    input: OperationAttachments,
    streams: Vec<ResponseStream>,
    messages: Arc<dyn OperationMessageHandler>,
    completions: Vec<(String, oneshot::Receiver<Value>)>,
    settings: ControllerSettings,
    process_state: ProcessStateHandle,
}

impl OperationContext {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        operation_id: u64,
        registration: Arc<ResourceRegistration>,
        model: ModelTransaction,
        root_address: PathAddress,
        messages: Arc<dyn OperationMessageHandler>,
        input: OperationAttachments,
        settings: ControllerSettings,
        process_state: ProcessStateHandle,
    ) -> Self {
        Self {
            operation_id,
            registration,
            model,
            queues: Default::default(),
            stage: Stage::Model,
            root_address,
            active: None,
            completed: Vec::new(),
            responses: vec![StepResponse::default()],
            rollback_only: false,
            first_failure: None,
            violation: None,
            attachments: Attachments::default(),
            input,
            streams: Vec::new(),
            messages,
            completions: Vec::new(),
            settings,
            process_state,
        }
    }

    pub fn operation_id(&self) -> u64 {
        self.operation_id
    }

    pub fn current_stage(&self) -> Stage {
        self.stage
    }

    /// The address of the executing step (the operation's address outside of a step).
    pub fn current_address(&self) -> &PathAddress {
        self.active
            .as_ref()
            .map(|a| &a.address)
            .unwrap_or(&self.root_address)
    }

    /// The registration tree, detached from the context borrow.
    pub fn root_registration(&self) -> Arc<ResourceRegistration> {
        self.registration.clone()
    }

    pub fn message_handler(&self) -> Arc<dyn OperationMessageHandler> {
        self.messages.clone()
    }

    pub fn report(&self, severity: MessageSeverity, message: &str) {
        self.messages.handle_report(severity, message);
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn process_state(&self) -> &ProcessStateHandle {
        &self.process_state
    }

    // ---------------------------------------------------------------------
    // Model access
    // ---------------------------------------------------------------------

    /// The root this operation currently reads from.
    pub fn snapshot(&self) -> Arc<Resource> {
        self.model.root().clone()
    }

    pub fn read_resource(&self) -> Result<&Resource, OperationError> {
        self.model.read(self.current_address())
    }

    pub fn read_resource_at(&self, address: &PathAddress) -> Result<&Resource, OperationError> {
        self.model.read(address)
    }

    /// Takes the controller write lock if this operation does not hold it yet.
    pub async fn acquire_write_intent(&mut self) -> Result<(), OperationError> {
        self.ensure_model_stage("acquiring write intent")?;
        self.model.acquire_write_intent().await
    }

    pub fn has_write_intent(&self) -> bool {
        self.model.has_write_intent()
    }

    fn ensure_model_stage(&self, what: &str) -> Result<(), OperationError> {
        if self.stage == Stage::Model {
            Ok(())
        } else {
            Err(OperationError::ContractViolation(format!(
                "{what} is only allowed in the MODEL stage, not {}",
                self.stage
            )))
        }
    }

    pub fn read_resource_for_update(&mut self) -> Result<&mut Resource, OperationError> {
        let address = self.current_address().clone();
        self.read_resource_for_update_at(&address)
    }

    pub fn read_resource_for_update_at(
        &mut self,
        address: &PathAddress,
    ) -> Result<&mut Resource, OperationError> {
        self.ensure_model_stage("modifying a resource")?;
        self.model.read_for_update(address)
    }

    /// Creates `resource` at the current address.
    pub fn create_resource(&mut self, resource: Resource) -> Result<(), OperationError> {
        let address = self.current_address().clone();
        self.create_resource_at(&address, resource)
    }

    pub fn create_resource_at(
        &mut self,
        address: &PathAddress,
        resource: Resource,
    ) -> Result<(), OperationError> {
        self.ensure_model_stage("creating a resource")?;
        trace!(%address, "Creating resource");
        self.model.create(address, resource)
    }

    /// Removes the resource at the current address, returning it.
    pub fn remove_resource(&mut self) -> Result<Arc<Resource>, OperationError> {
        let address = self.current_address().clone();
        self.remove_resource_at(&address)
    }

    pub fn remove_resource_at(&mut self, address: &PathAddress) -> Result<Arc<Resource>, OperationError> {
        self.ensure_model_stage("removing a resource")?;
        trace!(%address, "Removing resource");
        self.model.remove(address)
    }

    // ---------------------------------------------------------------------
    // Steps
    // ---------------------------------------------------------------------

    /// Queues a step at the end of `stage`. The step's address is read from `operation`.
    pub fn add_step(
        &mut self,
        operation: Value,
        handler: Arc<dyn OperationStepHandler>,
        stage: Stage,
    ) -> Result<(), OperationError> {
        let response = self.current_response();
        self.queue_step(operation, handler, stage, response, false)
    }

    /// Queues a step to run right after the current one (if `stage` is the current stage).
    pub fn add_step_first(
        &mut self,
        operation: Value,
        handler: Arc<dyn OperationStepHandler>,
        stage: Stage,
    ) -> Result<(), OperationError> {
        let response = self.current_response();
        self.queue_step(operation, handler, stage, response, true)
    }

    /// Like [`OperationContext::add_step`], writing into response slot `response`.
    pub fn add_step_with_response(
        &mut self,
        operation: Value,
        handler: Arc<dyn OperationStepHandler>,
        stage: Stage,
        response: ResponseId,
    ) -> Result<(), OperationError> {
        self.queue_step(operation, handler, stage, response, false)
    }

    /// Like [`OperationContext::add_step_first`], writing into response slot `response`.
    pub fn add_step_first_with_response(
        &mut self,
        operation: Value,
        handler: Arc<dyn OperationStepHandler>,
        stage: Stage,
        response: ResponseId,
    ) -> Result<(), OperationError> {
        self.queue_step(operation, handler, stage, response, true)
    }

    fn queue_step(
        &mut self,
        operation: Value,
        handler: Arc<dyn OperationStepHandler>,
        stage: Stage,
        response: ResponseId,
        first: bool,
    ) -> Result<(), OperationError> {
        if stage < self.stage {
            return Err(OperationError::ContractViolation(format!(
                "cannot add a {stage} step while executing the {} stage",
                self.stage
            )));
        }
        let address = PathAddress::from_value(
            operation.get(names::ADDRESS).unwrap_or(&Value::Undefined),
        )?;
        let step = Step {
            handler,
            operation,
            address,
            response,
        };
        let queue = &mut self.queues[stage.index()];
        if first {
            queue.push_front(step);
        } else {
            queue.push_back(step);
        }
        Ok(())
    }

    pub(crate) fn push_initial(
        &mut self,
        operation: Value,
        address: PathAddress,
        handler: Arc<dyn OperationStepHandler>,
    ) {
        self.queues[Stage::Model.index()].push_back(Step {
            handler,
            operation,
            address,
            response: ResponseId::ROOT,
        });
    }

    /// Marks the current step complete and registers its result handler.
    ///
    /// The handler runs after every later step, with the operation's final decision.
    pub fn complete_step<F>(&mut self, handler: F)
    where
        F: FnOnce(ResultAction, &mut OperationContext) + Send + Sync + 'static,
    {
        match self.active.as_mut() {
            Some(active) if active.completed => {
                self.violation = Some(format!(
                    "step at {} completed more than once",
                    active.address
                ));
            }
            Some(active) => {
                active.completed = true;
                self.completed.push(Box::new(handler));
            }
            None => {
                self.violation = Some("complete_step called outside of a step".to_string());
            }
        }
    }

    /// Completes the current step with a handler that only acts on rollback.
    pub fn on_rollback<F>(&mut self, undo: F)
    where
        F: FnOnce(&mut OperationContext) + Send + Sync + 'static,
    {
        self.complete_step(move |action, ctx| {
            if action == ResultAction::Rollback {
                undo(ctx);
            }
        });
    }

    pub fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    // ---------------------------------------------------------------------
    // Responses
    // ---------------------------------------------------------------------

    /// Allocates a fresh response slot, e.g. for one sub-step of a composite.
    pub fn new_response(&mut self) -> ResponseId {
        self.responses.push(StepResponse::default());
        ResponseId(self.responses.len() - 1)
    }

    /// The slot of the executing step (the root slot outside of a step).
    pub fn current_response(&self) -> ResponseId {
        self.active
            .as_ref()
            .map(|a| a.response)
            .unwrap_or(ResponseId::ROOT)
    }

    pub fn result(&self) -> &Value {
        &self.responses[self.current_response().0].result
    }

    pub fn result_mut(&mut self) -> &mut Value {
        let id = self.current_response();
        &mut self.responses[id.0].result
    }

    pub fn response(&self, id: ResponseId) -> &StepResponse {
        &self.responses[id.0]
    }

    pub fn response_mut(&mut self, id: ResponseId) -> &mut StepResponse {
        &mut self.responses[id.0]
    }

    pub fn set_response_header(&mut self, name: &str, value: impl Into<Value>) {
        let id = self.current_response();
        self.responses[id.0]
            .headers
            .insert(name.to_string(), value.into());
    }

    /// The first failure recorded by any step.
    pub fn first_failure(&self) -> Option<&Value> {
        self.first_failure.as_ref()
    }

    fn record_failure(&mut self, response: ResponseId, failure: Value) {
        if self.first_failure.is_none() {
            self.first_failure = Some(failure.clone());
        }
        self.responses[response.0].failure.get_or_insert(failure);
    }

    // ---------------------------------------------------------------------
    // Attachments and streams
    // ---------------------------------------------------------------------

    pub fn attach<T: Send + Sync + 'static>(&mut self, key: AttachmentKey<T>, value: T) -> Option<T> {
        self.attachments.attach(key, value)
    }

    pub fn attachment<T: Send + Sync + 'static>(&self, key: AttachmentKey<T>) -> Option<&T> {
        self.attachments.get(key)
    }

    pub fn attachment_mut<T: Send + Sync + 'static>(&mut self, key: AttachmentKey<T>) -> Option<&mut T> {
        self.attachments.get_mut(key)
    }

    pub fn detach<T: Send + Sync + 'static>(&mut self, key: AttachmentKey<T>) -> Option<T> {
        self.attachments.detach(key)
    }

    pub fn input_attachments(&self) -> &OperationAttachments {
        &self.input
    }

    pub fn input_stream(&self, index: usize) -> Option<&[u8]> {
        self.input.input_streams().get(index).map(Vec::as_slice)
    }

    pub fn input_stream_count(&self) -> usize {
        self.input.input_streams().len()
    }

    /// Attaches a stream to the response and returns the id to reference it by.
    pub fn attach_result_stream(&mut self, mime_type: &str, bytes: Vec<u8>) -> String {
        let uuid = uuid::Uuid::new_v4().to_string();
        self.streams.push(ResponseStream {
            uuid: uuid.clone(),
            mime_type: mime_type.to_string(),
            bytes,
        });
        uuid
    }

    pub(crate) fn take_streams(&mut self) -> Vec<ResponseStream> {
        std::mem::take(&mut self.streams)
    }

    // ---------------------------------------------------------------------
    // Waiting
    // ---------------------------------------------------------------------

    pub fn is_cancelled(&self) -> bool {
        self.input
            .cancellation()
            .map(|c| c.is_cancelled())
            .unwrap_or(false)
    }

    /// Wraps `future` in the blocking timeout and cancellation of this operation.
    ///
    /// The returned future does not borrow the context.
    pub fn bounded<F>(
        &self,
        what: &str,
        future: F,
    ) -> impl Future<Output = Result<F::Output, OperationError>> + Send
    where
        F: Future + Send,
        F::Output: Send,
    {
        let timeout = self.settings.blocking_timeout;
        let cancellation = self.input.cancellation().cloned();
        let what = what.to_string();
        async move {
            let cancelled = async {
                match &cancellation {
                    Some(c) => c.cancelled().await,
                    None => std::future::pending::<()>().await,
                }
            };
            tokio::select! {
                result = tokio::time::timeout(timeout, future) => {
                    result.map_err(|_| OperationError::Timeout { timeout, what })
                }
                _ = cancelled => Err(OperationError::Cancelled),
            }
        }
    }

    /// Registers a final-response receiver (e.g. from a proxied child) that the controller
    /// awaits, bounded, before returning.
    pub fn await_completion(&mut self, what: impl Into<String>, receiver: oneshot::Receiver<Value>) {
        self.completions.push((what.into(), receiver));
    }

    pub(crate) async fn drain_completions(&mut self) {
        let timeout = self.settings.blocking_timeout;
        for (what, receiver) in std::mem::take(&mut self.completions) {
            match tokio::time::timeout(timeout, receiver).await {
                Ok(Ok(response)) => trace!(%what, %response, "Participant completed"),
                Ok(Err(_)) => debug!(%what, "Participant went away before completing"),
                Err(_) => warn!(%what, ?timeout, "Timed out waiting for participant to complete"),
            }
        }
    }

    // ---------------------------------------------------------------------
    // Pipeline
    // ---------------------------------------------------------------------

    /// Drains the stage queues in order.
    pub(crate) async fn run_steps(&mut self) -> PipelineOutcome {
        for stage in Stage::ALL {
            self.stage = stage;
            if stage != Stage::Model && self.model.holds_write_lock() {
                debug!("Model stage complete; releasing the controller write lock");
                self.model.release_write_lock();
            }
            if !self.queues[stage.index()].is_empty() {
                debug!(%stage, "Entering stage");
            }
            while let Some(step) = self.queues[stage.index()].pop_front() {
                if self.is_cancelled() {
                    self.record_failure(
                        step.response,
                        Value::from(OperationError::Cancelled.to_string()),
                    );
                    self.rollback_only = true;
                    return PipelineOutcome::Failed;
                }
                if let Some(outcome) = self.execute_step(step).await {
                    return outcome;
                }
            }
        }
        if self.is_cancelled() {
            self.record_failure(
                ResponseId::ROOT,
                Value::from(OperationError::Cancelled.to_string()),
            );
            self.rollback_only = true;
            return PipelineOutcome::Failed;
        }
        PipelineOutcome::Prepared
    }

    async fn execute_step(&mut self, step: Step) -> Option<PipelineOutcome> {
        let Step {
            handler,
            operation,
            address,
            response,
        } = step;
        trace!(stage = %self.stage, %address, "Executing step");
        self.active = Some(ActiveStep {
            address: address.clone(),
            response,
            completed: false,
        });
        let result = handler.execute(self, &operation).await;
        let completed = self.active.take().map(|a| a.completed).unwrap_or(false);

        if let Some(violation) = self.violation.take() {
            return Some(PipelineOutcome::Fatal(violation));
        }
        match result {
            Ok(()) if self.rollback_only => Some(PipelineOutcome::Failed),
            Ok(()) => None,
            Err(e) if e.is_fatal() => Some(PipelineOutcome::Fatal(e.to_string())),
            Err(e) if completed => Some(PipelineOutcome::Fatal(format!(
                "step at {address} failed after completing: {e}"
            ))),
            Err(e) => {
                warn!(stage = %self.stage, %address, error = %e, "Operation step failed");
                self.record_failure(response, Value::from(e.to_string()));
                self.rollback_only = true;
                Some(PipelineOutcome::Failed)
            }
        }
    }

    /// Invokes the registered result handlers, most recent first.
    pub(crate) fn unwind(&mut self, action: ResultAction) {
        let count = self.completed.len();
        if count > 0 {
            debug!(%action, handlers = count, "Running result handlers");
        }
        while let Some(handler) = self.completed.pop() {
            handler(action, self);
        }
    }

    pub(crate) fn commit_model(&mut self) -> Result<(), OperationError> {
        self.model.commit()
    }

    pub(crate) fn rollback_model(&mut self) {
        self.model.rollback();
    }
}
