use async_trait::async_trait;
use mgmt_controller::operation::{failure_description, is_success, Cancellation};
use mgmt_controller::{
    step_fn, AccessToken, ControllerBuilder, ControllerClient, ControllerError, ControllerSettings,
    DiscardMessages, ManagedController, Operation, OperationAttachments, OperationBuilder,
    OperationContext, OperationDefinition, OperationError, OperationStepHandler, PathAddress,
    PreparedTransaction, ProcessState, Resource, RollbackOnPrepared, Stage, TransactionControl, Value,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

type Log = Arc<Mutex<Vec<String>>>;

fn op(name: &str) -> Value {
    OperationBuilder::new(name).build()
}

/// Writes `label=true` on the root, logs and registers a result handler that logs the decision.
fn recording_step(label: &'static str, log: Log) -> Arc<dyn OperationStepHandler> {
    step_fn(move |ctx, _| {
        ctx.read_resource_for_update()?
            .set_attribute(label, Value::from(true));
        log.lock().push(format!("exec:{label}"));
        let log = log.clone();
        ctx.complete_step(move |action, _| log.lock().push(format!("{action}:{label}")));
        Ok(())
    })
}

fn build(
    register: impl FnOnce(&mut mgmt_controller::ResourceRegistration),
    settings: ControllerSettings,
) -> (Arc<ManagedController>, ControllerClient) {
    let mut builder = ControllerBuilder::new("pipeline").with_settings(settings);
    register(builder.registration_mut());
    let (controller, access) = builder.build().unwrap();
    let client = ControllerClient::new(controller.clone(), access);
    (controller, client)
}

#[tokio::test]
async fn test_stages_run_in_order_and_add_step_first_runs_depth_first() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let root_log = log.clone();
    let (_, client) = build(
        |root| {
            let handler = step_fn(move |ctx, _| {
                let logged = |label: &'static str, log: Log| {
                    step_fn(move |ctx, _| {
                        log.lock().push(format!("{}:{label}", ctx.current_stage()));
                        Ok(())
                    })
                };
                root_log.lock().push("MODEL:root".to_string());
                ctx.add_step(op("x"), logged("verify", root_log.clone()), Stage::Verify)?;
                ctx.add_step(op("x"), logged("runtime", root_log.clone()), Stage::Runtime)?;
                ctx.add_step(op("x"), logged("second", root_log.clone()), Stage::Model)?;
                ctx.add_step_first(op("x"), logged("first", root_log.clone()), Stage::Model)?;
                ctx.add_step(op("x"), logged("done", root_log.clone()), Stage::Done)?;
                Ok(())
            });
            root.register_operation_handler(OperationDefinition::new("staged"), handler, false)
                .unwrap();
        },
        ControllerSettings::default(),
    );

    let response = client.execute(op("staged")).await.unwrap();

    assert!(is_success(&response), "{response}");
    assert_eq!(
        *log.lock(),
        vec![
            "MODEL:root",
            "MODEL:first",
            "MODEL:second",
            "RUNTIME:runtime",
            "VERIFY:verify",
            "DONE:done"
        ]
    );
}

#[tokio::test]
async fn test_failure_unwinds_completed_steps_in_reverse_order() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let steps_log = log.clone();
    let (controller, client) = build(
        |root| {
            let handler = step_fn(move |ctx, _| {
                ctx.add_step(op("x"), recording_step("one", steps_log.clone()), Stage::Model)?;
                ctx.add_step(op("x"), recording_step("two", steps_log.clone()), Stage::Model)?;
                ctx.add_step(
                    op("x"),
                    step_fn(|_, _| Err(OperationError::failed("third step refused"))),
                    Stage::Model,
                )?;
                Ok(())
            });
            root.register_operation_handler(OperationDefinition::new("scenario-c"), handler, false)
                .unwrap();
        },
        ControllerSettings::default(),
    );
    let before = controller.model_snapshot();

    let response = client.execute(op("scenario-c")).await.unwrap();

    assert!(!is_success(&response));
    assert_eq!(failure_description(&response).as_deref(), Some("third step refused"));
    assert_eq!(response.get("rolled-back"), Some(&Value::from(true)));
    assert_eq!(
        *log.lock(),
        vec!["exec:one", "exec:two", "rollback:two", "rollback:one"]
    );
    assert_eq!(*controller.model_snapshot(), *before);
    assert_eq!(controller.model_version(), 0);
}

#[tokio::test]
async fn test_successful_write_commits_and_runs_handlers_with_keep() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let steps_log = log.clone();
    let (controller, client) = build(
        |root| {
            root.register_operation_handler(
                OperationDefinition::new("touch"),
                recording_step("touched", steps_log),
                false,
            )
            .unwrap();
        },
        ControllerSettings::default(),
    );

    let response = client.execute(op("touch")).await.unwrap();

    assert!(is_success(&response));
    assert_eq!(*log.lock(), vec!["exec:touched", "commit:touched"]);
    assert_eq!(
        controller.model_snapshot().attribute("touched"),
        Some(&Value::from(true))
    );
    assert_eq!(controller.model_version(), 1);
}

#[tokio::test]
async fn test_rollback_decision_discards_staged_changes() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let steps_log = log.clone();
    let (controller, access) = {
        let mut builder = ControllerBuilder::new("pipeline");
        builder
            .registration_mut()
            .register_operation_handler(
                OperationDefinition::new("touch"),
                recording_step("touched", steps_log),
                false,
            )
            .unwrap();
        builder.build().unwrap()
    };
    let client = ControllerClient::new(controller.clone(), access);

    let response = client
        .execute_with_control(
            op("touch"),
            Arc::new(DiscardMessages),
            Arc::new(RollbackOnPrepared),
            OperationAttachments::default(),
        )
        .await
        .unwrap()
        .response;

    assert!(!is_success(&response));
    assert_eq!(response.get("rolled-back"), Some(&Value::from(true)));
    assert_eq!(*log.lock(), vec!["exec:touched", "rollback:touched"]);
    assert_eq!(controller.model_snapshot().attribute("touched"), None);
}

#[tokio::test]
async fn test_rollback_only_without_error_fails_the_operation() {
    let (_, client) = build(
        |root| {
            let handler = step_fn(|ctx, _| {
                ctx.set_rollback_only();
                Ok(())
            });
            root.register_operation_handler(OperationDefinition::new("veto"), handler, false)
                .unwrap();
        },
        ControllerSettings::default(),
    );

    let response = client.execute(op("veto")).await.unwrap();

    assert_eq!(
        failure_description(&response).as_deref(),
        Some("Operation was marked rollback-only")
    );
}

#[tokio::test]
async fn test_adding_a_step_for_an_earlier_stage_is_fatal() {
    let (controller, client) = build(
        |root| {
            let handler = step_fn(|ctx, _| {
                let late = step_fn(|ctx, _| ctx.add_step(op("x"), step_fn(|_, _| Ok(())), Stage::Model));
                ctx.add_step(op("x"), late, Stage::Runtime)
            });
            root.register_operation_handler(OperationDefinition::new("backwards"), handler, false)
                .unwrap();
        },
        ControllerSettings::default(),
    );

    let result = client.execute(op("backwards")).await;

    assert!(matches!(result, Err(ControllerError::Fatal(_))));
    assert_eq!(controller.process_state().state(), ProcessState::ReloadRequired);

    // Later responses carry the degraded state.
    let response = client.execute(op("read-resource")).await.unwrap();
    assert!(is_success(&response));
    assert_eq!(
        response.get_path(&["response-headers", "process-state"]),
        Some(&Value::from("reload-required"))
    );
}

#[tokio::test]
async fn test_error_after_completing_is_fatal() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let steps_log = log.clone();
    let (controller, client) = build(
        |root| {
            let handler = step_fn(move |ctx, _| {
                let log = steps_log.clone();
                ctx.complete_step(move |action, _| log.lock().push(format!("{action}")));
                Err(OperationError::failed("changed my mind"))
            });
            root.register_operation_handler(OperationDefinition::new("flip-flop"), handler, false)
                .unwrap();
        },
        ControllerSettings::default(),
    );

    let result = client.execute(op("flip-flop")).await;

    match result {
        Err(ControllerError::Fatal(reason)) => assert!(reason.contains("after completing"), "{reason}"),
        other => panic!("expected a fatal error, got {other:?}"),
    }
    assert_eq!(*log.lock(), vec!["rollback"]);
    assert!(controller.process_state().is_degraded());
}

#[tokio::test]
async fn test_completing_twice_is_fatal() {
    let (_, client) = build(
        |root| {
            let handler = step_fn(|ctx, _| {
                ctx.complete_step(|_, _| {});
                ctx.complete_step(|_, _| {});
                Ok(())
            });
            root.register_operation_handler(OperationDefinition::new("twice"), handler, false)
                .unwrap();
        },
        ControllerSettings::default(),
    );

    let result = client.execute(op("twice")).await;

    assert!(matches!(result, Err(ControllerError::Fatal(_))));
}

#[tokio::test]
async fn test_model_writes_outside_model_stage_are_fatal() {
    let (controller, client) = build(
        |root| {
            let handler = step_fn(|ctx, _| {
                let runtime = step_fn(|ctx, _| {
                    ctx.read_resource_for_update()?
                        .set_attribute("late", Value::from(1));
                    Ok(())
                });
                ctx.add_step(op("x"), runtime, Stage::Runtime)
            });
            root.register_operation_handler(OperationDefinition::new("late-write"), handler, false)
                .unwrap();
        },
        ControllerSettings::default(),
    );

    let result = client.execute(op("late-write")).await;

    assert!(matches!(result, Err(ControllerError::Fatal(_))));
    assert_eq!(controller.model_snapshot().attribute("late"), None);
}

#[tokio::test]
async fn test_read_only_operation_cannot_write() {
    let (controller, client) = build(
        |root| {
            let handler = step_fn(|ctx, _| {
                ctx.read_resource_for_update()?
                    .set_attribute("sneaky", Value::from(1));
                Ok(())
            });
            root.register_operation_handler(
                OperationDefinition::new("sneaky-read").read_only(),
                handler,
                false,
            )
            .unwrap();
        },
        ControllerSettings::default(),
    );

    let result = client.execute(op("sneaky-read")).await;

    assert!(matches!(result, Err(ControllerError::Fatal(_))));
    assert_eq!(controller.model_snapshot().attribute("sneaky"), None);
}

struct SlowStep;

#[async_trait]
impl OperationStepHandler for SlowStep {
    async fn execute(&self, context: &mut OperationContext, _operation: &Value) -> Result<(), OperationError> {
        context
            .bounded("a slow service", tokio::time::sleep(Duration::from_secs(30)))
            .await?;
        Ok(())
    }
}

#[tokio::test]
async fn test_blocking_wait_times_out_as_recoverable_failure() {
    let settings = ControllerSettings {
        blocking_timeout: Duration::from_millis(50),
        ..ControllerSettings::default()
    };
    let (controller, client) = build(
        |root| {
            root.register_operation_handler(OperationDefinition::new("slow"), Arc::new(SlowStep), false)
                .unwrap();
        },
        settings,
    );

    let response = client.execute(op("slow")).await.unwrap();

    let failure = failure_description(&response).unwrap();
    assert!(failure.contains("Timed out"), "{failure}");
    assert!(failure.contains("a slow service"), "{failure}");
    assert!(!controller.process_state().is_degraded());
}

#[tokio::test]
async fn test_cancellation_forces_rollback() {
    let (_, client) = build(
        |root| {
            root.register_operation_handler(OperationDefinition::new("slow"), Arc::new(SlowStep), false)
                .unwrap();
        },
        ControllerSettings::default(),
    );
    let cancellation = Cancellation::new();
    let canceller = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let response = client
        .execute_with_control(
            op("slow"),
            Arc::new(DiscardMessages),
            Arc::new(mgmt_controller::CommitOnPrepared),
            OperationAttachments::new().with_cancellation(cancellation),
        )
        .await
        .unwrap()
        .response;

    assert_eq!(failure_description(&response).as_deref(), Some("Operation cancelled"));
}

#[tokio::test]
async fn test_validation_failures_never_run_steps() {
    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let steps_log = log.clone();
    let (_, client) = build(
        |root| {
            root.register_operation_handler(
                OperationDefinition::new("touch").parameter(
                    mgmt_controller::AttributeDefinition::new("count", mgmt_controller::ModelType::Int)
                        .required(),
                ),
                recording_step("touched", steps_log),
                false,
            )
            .unwrap();
        },
        ControllerSettings::default(),
    );

    let unknown = client.execute(op("no-such-op")).await.unwrap();
    assert!(failure_description(&unknown).unwrap().contains("No operation named 'no-such-op'"));

    let missing = client.execute(op("touch")).await.unwrap();
    assert!(failure_description(&missing).unwrap().contains("count"));

    let mistyped = OperationBuilder::new("touch").param("count", "three").build();
    assert!(!is_success(&client.execute(mistyped).await.unwrap()));

    let extra = OperationBuilder::new("touch")
        .param("count", 3)
        .param("colour", "red")
        .build();
    assert!(failure_description(&client.execute(extra).await.unwrap())
        .unwrap()
        .contains("colour"));

    let bad_address = OperationBuilder::new("read-resource")
        .address(&PathAddress::pairs(&[("nowhere", "x")]))
        .build();
    assert!(!is_success(&client.execute(bad_address).await.unwrap()));

    assert!(log.lock().is_empty());
}

#[tokio::test]
async fn test_foreign_access_token_is_rejected() {
    let (controller, _) = build(|_| {}, ControllerSettings::default());
    let (_, other_access): (Arc<ManagedController>, AccessToken) =
        ControllerBuilder::new("other").build().unwrap();

    let foreign = ControllerClient::new(controller, other_access);
    let result = foreign.execute(op("read-resource")).await;

    assert!(matches!(result, Err(ControllerError::AccessDenied)));
}

#[tokio::test]
async fn test_input_and_result_streams() {
    let (_, client) = build(
        |root| {
            let handler = step_fn(|ctx, _| {
                let input = ctx
                    .input_stream(0)
                    .map(|bytes| bytes.to_ascii_uppercase())
                    .ok_or_else(|| OperationError::failed("no input stream"))?;
                let uuid = ctx.attach_result_stream("text/plain", input);
                *ctx.result_mut() = Value::from(uuid);
                Ok(())
            });
            root.register_operation_handler(OperationDefinition::new("shout").read_only(), handler, false)
                .unwrap();
        },
        ControllerSettings::default(),
    );

    let response = client
        .execute_operation(
            Operation::new(op("shout"))
                .with_attachments(OperationAttachments::new().with_input_stream(b"hello".to_vec())),
        )
        .await
        .unwrap();

    let uuid = response.response.get("result").unwrap().to_plain_string();
    let stream = response.stream(&uuid).unwrap();
    assert_eq!(stream.mime_type, "text/plain");
    assert_eq!(stream.bytes, b"HELLO".to_vec());
}

/// Holds the prepared operation until released.
struct GateControl {
    prepared: Notify,
    release: Notify,
}

#[async_trait]
impl TransactionControl for GateControl {
    async fn operation_prepared(&self, transaction: PreparedTransaction, _result: &Value) {
        self.prepared.notify_one();
        self.release.notified().await;
        transaction.commit().unwrap();
    }
}

#[tokio::test]
async fn test_readers_see_the_pre_write_snapshot_until_commit() {
    let (_, client) = build(
        |root| {
            let handler = step_fn(|ctx, _| {
                ctx.read_resource_for_update()?
                    .set_attribute("value", Value::from("new"));
                Ok(())
            });
            root.register_operation_handler(OperationDefinition::new("update"), handler, false)
                .unwrap();
            root.register_read_write_attribute(
                mgmt_controller::AttributeDefinition::new("value", mgmt_controller::ModelType::String),
                None,
            )
            .unwrap();
        },
        ControllerSettings::default(),
    );
    let gate = Arc::new(GateControl {
        prepared: Notify::new(),
        release: Notify::new(),
    });

    let writer = {
        let client = client.clone();
        let gate = gate.clone();
        tokio::spawn(async move {
            client
                .execute_with_control(op("update"), Arc::new(DiscardMessages), gate, OperationAttachments::default())
                .await
        })
    };
    gate.prepared.notified().await;

    let read = || {
        let client = client.clone();
        async move {
            let read = OperationBuilder::new("read-resource").build();
            client.execute(read).await.unwrap()
        }
    };
    let (a, b, c) = tokio::join!(read(), read(), read());
    assert_eq!(a, b);
    assert_eq!(b, c);
    assert_eq!(a.get_path(&["result", "value"]), Some(&Value::Undefined));

    gate.release.notify_one();
    let written = writer.await.unwrap().unwrap();
    assert!(is_success(&written.response));
    let after = client.execute(op("read-resource")).await.unwrap();
    assert_eq!(after.get_path(&["result", "value"]), Some(&Value::from("new")));
}

#[tokio::test]
async fn test_writers_are_serialized() {
    let settings = ControllerSettings {
        write_lock_timeout: Duration::from_millis(50),
        ..ControllerSettings::default()
    };
    let (_, client) = build(
        |root| {
            root.register_operation_handler(OperationDefinition::new("hold"), Arc::new(SlowStep), false)
                .unwrap();
            root.register_operation_handler(OperationDefinition::new("quick"), step_fn(|_, _| Ok(())), false)
                .unwrap();
        },
        settings,
    );
    let holder = {
        let client = client.clone();
        tokio::spawn(async move { client.execute(op("hold")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let blocked = client.execute(op("quick")).await.unwrap();

    let failure = failure_description(&blocked).unwrap();
    assert!(failure.contains("write lock"), "{failure}");
    holder.abort();
}

struct SlowRuntime;

#[async_trait]
impl OperationStepHandler for SlowRuntime {
    async fn execute(&self, context: &mut OperationContext, _operation: &Value) -> Result<(), OperationError> {
        context
            .bounded("a slow runtime service", tokio::time::sleep(Duration::from_millis(500)))
            .await?;
        Ok(())
    }
}

/// Writes `attribute` in Model, then blocks in a Runtime step.
fn slow_writer(attribute: &'static str) -> Arc<dyn OperationStepHandler> {
    step_fn(move |ctx, operation| {
        ctx.read_resource_for_update()?
            .set_attribute(attribute, Value::from("slow"));
        ctx.add_step(operation.clone(), Arc::new(SlowRuntime), Stage::Runtime)?;
        Ok(())
    })
}

fn quick_writer(attribute: &'static str) -> Arc<dyn OperationStepHandler> {
    step_fn(move |ctx, _| {
        ctx.read_resource_for_update()?
            .set_attribute(attribute, Value::from("fast"));
        Ok(())
    })
}

fn slow_and_fast(slow: &'static str, fast: &'static str) -> (Arc<ManagedController>, ControllerClient) {
    let settings = ControllerSettings {
        write_lock_timeout: Duration::from_millis(100),
        ..ControllerSettings::default()
    };
    build(
        |root| {
            root.register_operation_handler(OperationDefinition::new("slow"), slow_writer(slow), false)
                .unwrap();
            root.register_operation_handler(OperationDefinition::new("fast"), quick_writer(fast), false)
                .unwrap();
        },
        settings,
    )
}

#[tokio::test]
async fn test_runtime_step_does_not_hold_the_write_lock() {
    let (controller, client) = slow_and_fast("left", "right");
    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.execute(op("slow")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fast = client.execute(op("fast")).await.unwrap();

    assert!(is_success(&fast), "{fast:?}");
    assert!(!slow.is_finished());
    let snapshot = controller.model_snapshot();
    assert_eq!(snapshot.attribute("right"), Some(&Value::from("fast")));
    assert_eq!(snapshot.attribute("left"), None);

    let slow = slow.await.unwrap().unwrap();
    assert!(is_success(&slow), "{slow:?}");
    let snapshot = controller.model_snapshot();
    assert_eq!(snapshot.attribute("left"), Some(&Value::from("slow")));
    assert_eq!(snapshot.attribute("right"), Some(&Value::from("fast")));
}

#[tokio::test]
async fn test_conflicting_write_after_model_stage_rolls_back() {
    let (controller, client) = slow_and_fast("shared", "shared");
    let slow = {
        let client = client.clone();
        tokio::spawn(async move { client.execute(op("slow")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fast = client.execute(op("fast")).await.unwrap();
    assert!(is_success(&fast), "{fast:?}");

    let slow = slow.await.unwrap().unwrap();
    let failure = failure_description(&slow).unwrap();
    assert!(failure.contains("concurrent"), "{failure}");
    assert_eq!(
        controller.model_snapshot().attribute("shared"),
        Some(&Value::from("fast"))
    );
    assert!(!controller.process_state().is_degraded());
}

#[tokio::test]
async fn test_initial_model_is_readable() {
    let model = Resource::with_attributes([("name", "root")]);
    let mut builder = ControllerBuilder::new("seeded").with_model(model);
    builder
        .registration_mut()
        .register_read_only_attribute(mgmt_controller::AttributeDefinition::new(
            "name",
            mgmt_controller::ModelType::String,
        ))
        .unwrap();
    let (controller, access) = builder.build().unwrap();
    let client = ControllerClient::new(controller, access);

    let read = OperationBuilder::new("read-attribute").param("name", "name").build();
    let response = client.execute(read).await.unwrap();

    assert_eq!(response.get("result"), Some(&Value::from("root")));
}
