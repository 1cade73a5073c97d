//! # Controller Entry Point
//!
//! [`ModelController`] is the single way into a management model. A [`ManagedController`]
//! owns the published [`ResourceTree`], the frozen registration tree and the process state,
//! and runs every operation through the same sequence:
//!
//! 1. check the caller's [`AccessToken`] (the only failure raised before anything else);
//! 2. parse the operation, resolve it against the registrations (a proxy owning the address
//!    wins) and validate its parameters; failures here become a failed response with no
//!    rollback work;
//! 3. take the write lock unless the operation is read-only or proxied; it is released when
//!    the Model stage drains;
//! 4. run the step pipeline;
//! 5. on success hand the tentative response to the caller's [`TransactionControl`] and
//!    apply its decision; a commit that conflicts with a concurrent writer rolls back
//!    instead; on failure unwind and discard staged changes;
//! 6. wait (bounded) for proxied participants to report completion.
//!
//! Fatal failures unwind like recoverable ones, then mark the process reload-required and
//! surface as [`ControllerError::Fatal`].

use crate::address::PathAddress;
use crate::config::ControllerSettings;
use crate::context::{OperationContext, PipelineOutcome, ResponseId};
use crate::error::{ControllerError, OperationError, RegistrationError};
use crate::global;
use crate::message::OperationMessageHandler;
use crate::operation::{
    failed_response, names, parse_operation, Operation, OperationAttachments, OperationResponse,
    ResponseStream,
};
use crate::process::ProcessStateHandle;
use crate::registry::{ResolvedOperation, ResourceRegistration};
use crate::resource::Resource;
use crate::transaction::{PreparedTransaction, ResultAction, TransactionControl};
use crate::tree::ResourceTree;
use crate::value::Value;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Opaque permission to execute operations on one controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    controller: uuid::Uuid,
}

/// The execute API.
#[async_trait]
pub trait ModelController: Send + Sync {
    /// Executes `operation`, returning its response and any result streams.
    async fn execute_operation(
        &self,
        access: &AccessToken,
        operation: Operation,
        handler: Arc<dyn OperationMessageHandler>,
        control: Arc<dyn TransactionControl>,
    ) -> Result<OperationResponse, ControllerError>;

    /// Executes `operation`, returning only its response.
    async fn execute(
        &self,
        access: &AccessToken,
        operation: Value,
        handler: Arc<dyn OperationMessageHandler>,
        control: Arc<dyn TransactionControl>,
        attachments: OperationAttachments,
    ) -> Result<Value, ControllerError> {
        let operation = Operation::new(operation).with_attachments(attachments);
        self.execute_operation(access, operation, handler, control)
            .await
            .map(|response| response.response)
    }
}

/// Builds a [`ManagedController`]. Registration happens here, before the controller runs.
pub struct ControllerBuilder {
    name: String,
    registration: ResourceRegistration,
    model: Resource,
    settings: ControllerSettings,
    process_state: ProcessStateHandle,
}

impl ControllerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            registration: ResourceRegistration::root(format!("The {name} management model")),
            name,
            model: Resource::new(),
            settings: ControllerSettings::default(),
            process_state: ProcessStateHandle::new(),
        }
    }

    /// The root registration, for registering operations, attributes and sub-models.
    pub fn registration_mut(&mut self) -> &mut ResourceRegistration {
        &mut self.registration
    }

    /// Initial model content.
    pub fn with_model(mut self, model: Resource) -> Self {
        self.model = model;
        self
    }

    pub fn with_settings(mut self, settings: ControllerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_process_state(mut self, process_state: ProcessStateHandle) -> Self {
        self.process_state = process_state;
        self
    }

    /// Registers the global operations, freezes the registrations and returns the controller
    /// with the token callers need to use it.
    pub fn build(mut self) -> Result<(Arc<ManagedController>, AccessToken), RegistrationError> {
        global::register_global_operations(&mut self.registration)?;
        let id = uuid::Uuid::new_v4();
        info!(controller = %self.name, "Controller started");
        let controller = Arc::new(ManagedController {
            name: self.name,
            id,
            registration: Arc::new(self.registration),
            tree: Arc::new(ResourceTree::new(self.model)),
            settings: self.settings,
            process_state: self.process_state,
            next_operation: AtomicU64::new(0),
        });
        Ok((controller, AccessToken { controller: id }))
    }
}

pub struct ManagedController {
    name: String,
    id: uuid::Uuid,
    registration: Arc<ResourceRegistration>,
    tree: Arc<ResourceTree>,
    settings: ControllerSettings,
    process_state: ProcessStateHandle,
    next_operation: AtomicU64,
}

impl ManagedController {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process_state(&self) -> &ProcessStateHandle {
        &self.process_state
    }

    /// The currently published model, outside of any operation.
    pub fn model_snapshot(&self) -> Arc<Resource> {
        self.tree.snapshot()
    }

    pub fn model_version(&self) -> u64 {
        self.tree.version()
    }

    pub fn registration(&self) -> &Arc<ResourceRegistration> {
        &self.registration
    }

    fn validation_failure(&self, error: OperationError) -> OperationResponse {
        debug!(error = %error, "Operation rejected before execution");
        self.finish(failed_response(error.to_string()), Vec::new())
    }

    fn finish(&self, mut response: Value, streams: Vec<ResponseStream>) -> OperationResponse {
        if self.process_state.is_degraded() {
            response
                .entry(names::RESPONSE_HEADERS)
                .set(names::PROCESS_STATE, self.process_state.state().as_str());
        }
        OperationResponse { response, streams }
    }

    #[allow(clippy::too_many_arguments)]
    async fn run(
        &self,
        id: u64,
        operation: Value,
        address: PathAddress,
        name: &str,
        attachments: OperationAttachments,
        messages: Arc<dyn OperationMessageHandler>,
        control: Arc<dyn TransactionControl>,
    ) -> Result<OperationResponse, ControllerError> {
        let (handler, read_only) = match self.registration.resolve(&address, name) {
            Ok(resolved) => {
                if let ResolvedOperation::Local { entry, .. } = &resolved {
                    if let Err(e) = entry.definition.validate(&operation) {
                        return Ok(self.validation_failure(e));
                    }
                }
                (resolved.handler(), resolved.is_read_only())
            }
            Err(e) => return Ok(self.validation_failure(e)),
        };

        let mut model = self.tree.begin(self.settings.write_lock_timeout);
        if !read_only {
            if let Err(e) = model.acquire_write_intent().await {
                warn!(error = %e, "Could not acquire the controller write lock");
                return Ok(self.finish(failed_response(e.to_string()), Vec::new()));
            }
        }

        let mut context = OperationContext::new(
            id,
            self.registration.clone(),
            model,
            address.clone(),
            messages,
            attachments,
            self.settings,
            self.process_state.clone(),
        );
        context.push_initial(operation, address, handler);

        let response = match context.run_steps().await {
            PipelineOutcome::Fatal(reason) => {
                error!(%reason, "Operation failed fatally; process requires reload");
                context.unwind(ResultAction::Rollback);
                context.rollback_model();
                self.process_state.require_reload();
                context.drain_completions().await;
                return Err(ControllerError::Fatal(reason));
            }
            PipelineOutcome::Failed => {
                context.unwind(ResultAction::Rollback);
                context.rollback_model();
                context.drain_completions().await;
                let mut root = context.response(ResponseId::ROOT).clone();
                if root.failure.is_none() {
                    root.failure = Some(
                        context
                            .first_failure()
                            .cloned()
                            .unwrap_or_else(|| Value::from("Operation was marked rollback-only")),
                    );
                }
                info!(failure = %root.failure.as_ref().map(crate::value::Value::to_plain_string).unwrap_or_default(), "Operation rolled back");
                root.to_value(true)
            }
            PipelineOutcome::Prepared => {
                let tentative = context.response(ResponseId::ROOT).to_value(false);
                let (transaction, decision) = PreparedTransaction::new();
                debug!(transaction = %transaction.id(), "Operation prepared");
                control.operation_prepared(transaction, &tentative).await;
                let action = match self.settings.prepared_timeout {
                    Some(timeout) => match tokio::time::timeout(timeout, decision).await {
                        Ok(decision) => decision.unwrap_or(ResultAction::Rollback),
                        Err(_) => {
                            warn!(?timeout, "No commit decision for prepared operation; rolling back");
                            ResultAction::Rollback
                        }
                    },
                    None => decision.await.unwrap_or(ResultAction::Rollback),
                };

                let mut conflict = None;
                let action = match action {
                    ResultAction::Keep => match context.commit_model() {
                        Ok(()) => ResultAction::Keep,
                        Err(e) => {
                            warn!(error = %e, "Commit conflicted with a concurrent operation; rolling back");
                            conflict = Some(e);
                            ResultAction::Rollback
                        }
                    },
                    ResultAction::Rollback => {
                        context.rollback_model();
                        ResultAction::Rollback
                    }
                };
                context.unwind(action);
                context.drain_completions().await;
                debug!(%action, "Operation completed");
                match action {
                    ResultAction::Keep => context.response(ResponseId::ROOT).to_value(false),
                    ResultAction::Rollback => {
                        let mut root = context.response(ResponseId::ROOT).clone();
                        let failure = conflict
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| "Operation was rolled back".to_string());
                        root.failure = Some(Value::from(failure));
                        root.to_value(true)
                    }
                }
            }
        };
        let streams = context.take_streams();
        Ok(self.finish(response, streams))
    }
}

#[async_trait]
impl ModelController for ManagedController {
    async fn execute_operation(
        &self,
        access: &AccessToken,
        operation: Operation,
        handler: Arc<dyn OperationMessageHandler>,
        control: Arc<dyn TransactionControl>,
    ) -> Result<OperationResponse, ControllerError> {
        if access.controller != self.id {
            warn!(controller = %self.name, "Rejected operation from caller without access");
            return Err(ControllerError::AccessDenied);
        }
        let Operation {
            operation,
            attachments,
        } = operation;
        let (name, address) = match parse_operation(&operation) {
            Ok(parsed) => parsed,
            Err(e) => return Ok(self.validation_failure(e)),
        };
        let id = self.next_operation.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!("operation", controller = %self.name, id, op = %name, %address);
        self.run(id, operation, address, &name, attachments, handler, control)
            .instrument(span)
            .await
    }
}
