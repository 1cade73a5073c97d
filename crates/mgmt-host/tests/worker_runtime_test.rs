use async_trait::async_trait;
use mgmt_controller::operation::{failure_description, is_success};
use mgmt_controller::{
    DiscardMessages, ManagementClient, OperationAttachments, OperationBuilder, PreparedTransaction,
    TransactionControl, Value,
};
use mgmt_host::model::KEEPALIVE_TIME;
use mgmt_host::services::{KeepAlive, TimeUnit, WorkerContainer, WorkerState};
use std::sync::Arc;
use mgmt_host::{HostConfig, HostSystem, ServerClient};

async fn host(capacity: usize) -> HostSystem {
    let config = HostConfig {
        worker_capacity: capacity,
        ..HostConfig::default()
    };
    HostSystem::start(&config).await.unwrap()
}

fn add_worker(name: &str) -> Value {
    OperationBuilder::new("add")
        .address(&ServerClient::worker_address(name))
        .build()
}

fn remove_worker(name: &str) -> Value {
    OperationBuilder::new("remove")
        .address(&ServerClient::worker_address(name))
        .build()
}

fn write_keepalive(name: &str, keepalive: KeepAlive) -> Value {
    OperationBuilder::new("write-attribute")
        .address(&ServerClient::worker_address(name))
        .param("name", KEEPALIVE_TIME)
        .param("value", keepalive.to_value())
        .build()
}

async fn composite(system: &HostSystem, steps: Vec<Value>) -> Value {
    let operation = OperationBuilder::new("composite").param("steps", steps).build();
    system.server.inner().execute(operation).await.unwrap()
}

#[tokio::test]
async fn test_add_starts_worker() {
    let system = host(2).await;
    let keepalive = KeepAlive::new(5, TimeUnit::Minutes);

    system.server.add_worker("pool", Some(keepalive)).await.unwrap();

    let worker = system.workers.get("pool").unwrap();
    assert_eq!(worker.state, WorkerState::Running);
    assert_eq!(worker.keepalive, keepalive);
    assert_eq!(system.server.keepalive("pool").await.unwrap(), keepalive);
}

#[tokio::test]
async fn test_add_over_capacity_changes_nothing() {
    let system = host(1).await;
    system.server.add_worker("first", None).await.unwrap();
    let version = system.server_controller.model_version();

    let result = system.server.add_worker("second", None).await;

    let err = result.unwrap_err().to_string();
    assert!(err.contains("full"), "{err}");
    assert_eq!(system.server.worker_names().await.unwrap(), vec!["first"]);
    assert_eq!(system.workers.names(), vec!["first"]);
    assert_eq!(system.server_controller.model_version(), version);
}

#[tokio::test]
async fn test_failed_runtime_step_stops_started_worker() {
    let system = host(1).await;

    let response = composite(&system, vec![add_worker("first"), add_worker("second")]).await;

    assert!(!is_success(&response));
    assert!(system.workers.is_empty());
    assert!(system.server.worker_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_keepalive_write_reconfigures_worker() {
    let system = host(2).await;
    system.server.add_worker("pool", None).await.unwrap();
    let longer = KeepAlive::new(2, TimeUnit::Hours);

    system.server.set_keepalive("pool", longer).await.unwrap();

    assert_eq!(system.workers.get("pool").unwrap().keepalive, longer);
}

#[tokio::test]
async fn test_rolled_back_keepalive_write_restores_worker() {
    let system = host(1).await;
    system.server.add_worker("pool", None).await.unwrap();

    let response = composite(
        &system,
        vec![
            write_keepalive("pool", KeepAlive::new(2, TimeUnit::Hours)),
            add_worker("extra"),
        ],
    )
    .await;

    assert!(!is_success(&response));
    assert_eq!(system.workers.get("pool").unwrap().keepalive, KeepAlive::default());
    assert_eq!(system.server.keepalive("pool").await.unwrap(), KeepAlive::default());
}

/// Stops the worker behind the operation's back, then rolls back.
struct StopThenRollback {
    workers: WorkerContainer,
    name: &'static str,
}

#[async_trait]
impl TransactionControl for StopThenRollback {
    async fn operation_prepared(&self, transaction: PreparedTransaction, _result: &Value) {
        self.workers.stop(self.name);
        transaction.rollback().unwrap();
    }
}

#[tokio::test]
async fn test_keepalive_rollback_tolerates_a_vanished_worker() {
    let system = host(1).await;
    system.server.add_worker("pool", None).await.unwrap();
    let control = Arc::new(StopThenRollback {
        workers: system.workers.clone(),
        name: "pool",
    });

    let result = system
        .server
        .inner()
        .execute_with_control(
            write_keepalive("pool", KeepAlive::new(2, TimeUnit::Hours)),
            Arc::new(DiscardMessages),
            control,
            OperationAttachments::default(),
        )
        .await
        .unwrap();

    assert!(!is_success(&result.response));
    assert!(system.workers.is_empty());
    assert_eq!(system.server.keepalive("pool").await.unwrap(), KeepAlive::default());
    assert!(!system.server_controller.process_state().is_degraded());
}

#[tokio::test]
async fn test_remove_stops_worker() {
    let system = host(1).await;
    system.server.add_worker("pool", None).await.unwrap();

    system.server.remove_worker("pool").await.unwrap();

    assert!(system.workers.is_empty());
    assert!(system.server.worker_names().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rolled_back_remove_restores_worker() {
    let system = host(1).await;
    system.server.add_worker("pool", None).await.unwrap();

    let response = composite(
        &system,
        vec![remove_worker("pool"), add_worker("second"), add_worker("third")],
    )
    .await;

    assert!(!is_success(&response));
    let failure = failure_description(&response).unwrap();
    assert!(failure.contains("full"), "{failure}");
    assert_eq!(system.workers.names(), vec!["pool"]);
    assert_eq!(system.workers.get("pool").unwrap().state, WorkerState::Running);
    assert_eq!(system.server.worker_names().await.unwrap(), vec!["pool"]);
}

#[tokio::test]
async fn test_invalid_unit_is_rejected() {
    let system = host(1).await;
    let invalid = Value::object().with("time", 5).with("unit", "FORTNIGHTS");
    let operation = OperationBuilder::new("add")
        .address(&ServerClient::worker_address("pool"))
        .param(KEEPALIVE_TIME, invalid)
        .build();

    let response = system.server.inner().execute(operation).await.unwrap();

    assert!(!is_success(&response));
    let failure = failure_description(&response).unwrap();
    assert!(failure.contains("FORTNIGHTS"), "{failure}");
    assert!(system.workers.is_empty());
}
