//! # Server Model
//!
//! The server controller's registrations and handlers.
//!
//! `serverchild=*/child=*` resources are model-only. `worker=*` resources are backed by the
//! [`WorkerContainer`], so their handlers follow the usual three-stage shape:
//!
//! | operation | MODEL | RUNTIME | VERIFY | on rollback |
//! |---|---|---|---|---|
//! | `add` | create resource | start worker | confirm running | stop worker |
//! | `remove` | remove resource | stop worker | | restart worker |
//! | `write-attribute keepalive-time` | write model | reconfigure worker | | restore old keepalive |

use super::{
    create_if_absent, resource_name, CHILD, KEEPALIVE_TIME, METRIC, SERVERCHILD, SETUP, TEST_OP,
    VALUE, WORKER,
};
use crate::services::{KeepAlive, TimeUnit, WorkerContainer};
use async_trait::async_trait;
use mgmt_controller::global::{ModelOnlyAddHandler, ModelOnlyRemoveHandler};
use mgmt_controller::operation::names;
use mgmt_controller::{
    step_fn, AccessToken, AttributeDefinition, ControllerBuilder, ControllerSettings,
    ManagedController, ModelType, OperationBuilder, OperationContext, OperationDefinition,
    OperationError, OperationStepHandler, PathAddress, PathElement, RegistrationError, Resource,
    ResourceRegistration, Stage, Value,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEFAULT_SERVERCHILD: &str = "svrA";
pub const DEFAULT_CHILD: &str = "childA";

fn string_attribute(name: &str) -> AttributeDefinition {
    AttributeDefinition::new(name, ModelType::String)
}

pub fn keepalive_definition() -> AttributeDefinition {
    AttributeDefinition::new(KEEPALIVE_TIME, ModelType::Object)
        .description("How long idle worker threads are kept alive")
        .default_value(KeepAlive::default().to_value())
        .field(
            AttributeDefinition::new("time", ModelType::Int)
                .required()
                .description("Amount of time"),
        )
        .field(
            AttributeDefinition::new("unit", ModelType::String)
                .required()
                .allowed_values(TimeUnit::ALL.iter().map(TimeUnit::as_str))
                .description("Unit of the amount"),
        )
}

fn keepalive_param(operation: &Value) -> Result<KeepAlive, OperationError> {
    match operation.get(KEEPALIVE_TIME) {
        Some(value) if value.is_defined() => KeepAlive::from_value(value)
            .map_err(|e| OperationError::invalid_parameter(KEEPALIVE_TIME, e.to_string())),
        _ => Ok(KeepAlive::default()),
    }
}

fn runtime_failure(e: impl ToString) -> OperationError {
    OperationError::failed(e.to_string())
}

/// Seeds `serverchild=svrA/child=childA`.
struct ServerSetupHandler;

#[async_trait]
impl OperationStepHandler for ServerSetupHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        _operation: &Value,
    ) -> Result<(), OperationError> {
        let child = Resource::with_attributes([(names::NAME, "childName"), (VALUE, "childValue")]);
        let serverchild = Resource::with_attributes([(names::NAME, "serverA")])
            .with_child(&PathElement::new(CHILD, DEFAULT_CHILD), child);
        let address = PathAddress::root().append(PathElement::new(SERVERCHILD, DEFAULT_SERVERCHILD));
        if create_if_absent(context, &address, serverchild)? {
            info!("Server model initialized");
        }
        Ok(())
    }
}

/// Starts a worker after its resource is created.
struct AddWorkerHandler {
    model: ModelOnlyAddHandler,
    workers: WorkerContainer,
}

#[async_trait]
impl OperationStepHandler for AddWorkerHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let name = resource_name(context)?;
        let keepalive = keepalive_param(operation)?;
        let resource = self.model.populate(operation)?;
        context.create_resource(resource)?;

        let address = context.current_address().clone();
        let workers = self.workers.clone();
        let worker = name.clone();
        let start = step_fn(move |ctx, _| {
            workers.start(&worker, keepalive).map_err(runtime_failure)?;
            let workers = workers.clone();
            let worker = worker.clone();
            ctx.on_rollback(move |_| {
                workers.stop(&worker);
            });
            Ok(())
        });
        let workers = self.workers.clone();
        let verify = step_fn(move |_, _| workers.confirm(&name).map_err(runtime_failure));

        let step = |op: &str| OperationBuilder::new(op).address(&address).build();
        context.add_step(step("start-worker"), start, Stage::Runtime)?;
        context.add_step(step("verify-worker"), verify, Stage::Verify)
    }
}

/// Stops a worker after its resource is removed.
struct RemoveWorkerHandler {
    workers: WorkerContainer,
}

#[async_trait]
impl OperationStepHandler for RemoveWorkerHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        _operation: &Value,
    ) -> Result<(), OperationError> {
        let name = resource_name(context)?;
        context.remove_resource()?;

        let workers = self.workers.clone();
        let stop = step_fn(move |ctx, _| {
            match workers.stop(&name) {
                Some(stopped) => {
                    let workers = workers.clone();
                    let name = name.clone();
                    ctx.on_rollback(move |_| workers.restore(&name, stopped));
                }
                None => debug!(worker = %name, "Worker was not running"),
            }
            Ok(())
        });
        let address = context.current_address().clone();
        context.add_step(
            OperationBuilder::new("stop-worker").address(&address).build(),
            stop,
            Stage::Runtime,
        )
    }
}

/// Writes `keepalive-time` and applies it to the running worker.
struct KeepAliveWriteHandler {
    workers: WorkerContainer,
}

#[async_trait]
impl OperationStepHandler for KeepAliveWriteHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let name = resource_name(context)?;
        let value = operation.get(names::VALUE).cloned().unwrap_or_default();
        let keepalive = if value.is_defined() {
            KeepAlive::from_value(&value)
                .map_err(|e| OperationError::invalid_parameter(names::VALUE, e.to_string()))?
        } else {
            KeepAlive::default()
        };

        let resource = context.read_resource_for_update()?;
        if value.is_defined() {
            resource.set_attribute(KEEPALIVE_TIME, value);
        } else {
            resource.remove_attribute(KEEPALIVE_TIME);
        }

        let workers = self.workers.clone();
        let apply = step_fn(move |ctx, _| {
            let previous = workers
                .reconfigure(&name, keepalive)
                .map_err(runtime_failure)?;
            let workers = workers.clone();
            let name = name.clone();
            ctx.on_rollback(move |_| {
                if let Err(e) = workers.reconfigure(&name, previous) {
                    warn!(worker = %name, error = %e, "Failed to restore keepalive on rollback");
                }
            });
            Ok(())
        });
        let address = context.current_address().clone();
        context.add_step(
            OperationBuilder::new("reconfigure-worker").address(&address).build(),
            apply,
            Stage::Runtime,
        )
    }
}

/// Registers the server model on `root`.
pub fn register(
    root: &mut ResourceRegistration,
    workers: WorkerContainer,
) -> Result<(), RegistrationError> {
    root.register_operation_handler(
        OperationDefinition::new(SETUP).description("Creates the initial server resources"),
        Arc::new(ServerSetupHandler),
        false,
    )?;

    let serverchild = root.register_sub_model(PathElement::wildcard(SERVERCHILD), "A server child")?;
    serverchild.register_read_only_attribute(string_attribute(names::NAME))?;
    let add = ModelOnlyAddHandler::new(vec![string_attribute(names::NAME)]);
    serverchild.register_operation_handler(add.definition(), Arc::new(add), false)?;
    serverchild.register_operation_handler(
        ModelOnlyRemoveHandler::definition(),
        Arc::new(ModelOnlyRemoveHandler),
        false,
    )?;

    let child = serverchild.register_sub_model(PathElement::wildcard(CHILD), "A nested child")?;
    child.register_read_only_attribute(string_attribute(names::NAME))?;
    child.register_read_write_attribute(string_attribute(VALUE), None)?;
    let reads = Arc::new(AtomicI64::new(0));
    child.register_metric(
        AttributeDefinition::new(METRIC, ModelType::Int).description("Number of times this metric was read"),
        step_fn(move |ctx, _| {
            *ctx.result_mut() = Value::from(reads.fetch_add(1, Ordering::Relaxed) + 1);
            Ok(())
        }),
    )?;
    let add = ModelOnlyAddHandler::new(vec![string_attribute(names::NAME), string_attribute(VALUE)]);
    child.register_operation_handler(add.definition(), Arc::new(add), false)?;
    child.register_operation_handler(
        ModelOnlyRemoveHandler::definition(),
        Arc::new(ModelOnlyRemoveHandler),
        false,
    )?;
    child.register_operation_handler(
        OperationDefinition::new(TEST_OP)
            .description("Does nothing")
            .read_only(),
        step_fn(|_, _| Ok(())),
        false,
    )?;

    let worker = root.register_sub_model(PathElement::wildcard(WORKER), "A worker service")?;
    worker.register_read_write_attribute(
        keepalive_definition(),
        Some(Arc::new(KeepAliveWriteHandler {
            workers: workers.clone(),
        })),
    )?;
    let model = ModelOnlyAddHandler::new(vec![keepalive_definition()]);
    worker.register_operation_handler(
        model.definition(),
        Arc::new(AddWorkerHandler {
            model,
            workers: workers.clone(),
        }),
        false,
    )?;
    worker.register_operation_handler(
        ModelOnlyRemoveHandler::definition(),
        Arc::new(RemoveWorkerHandler { workers }),
        false,
    )
}

/// Builds the server controller over `workers`.
pub fn build(
    workers: WorkerContainer,
    settings: ControllerSettings,
) -> Result<(Arc<ManagedController>, AccessToken), RegistrationError> {
    let mut builder = ControllerBuilder::new("server").with_settings(settings);
    register(builder.registration_mut(), workers)?;
    builder.build()
}
