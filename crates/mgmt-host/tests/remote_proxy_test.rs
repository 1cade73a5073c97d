use mgmt_controller::operation::{failure_description, is_success};
use mgmt_controller::{ManagementClient, OperationBuilder, PathAddress, Value};
use mgmt_host::model::server::{DEFAULT_CHILD, DEFAULT_SERVERCHILD};
use mgmt_host::model::VALUE;
use mgmt_host::{DomainClient, HostConfig, HostError, HostSystem, ProxyTransport, ServerClient};

async fn remote_host() -> HostSystem {
    let mut config = HostConfig::default();
    config.proxy_transport = ProxyTransport::Remote;
    config.controller.blocking_timeout_ms = 2_000;
    HostSystem::start(&config).await.unwrap()
}

fn child_through_domain() -> PathAddress {
    DomainClient::on_server(&ServerClient::child_address(DEFAULT_SERVERCHILD, DEFAULT_CHILD))
}

#[tokio::test]
async fn test_remote_write_reaches_server() {
    let system = remote_host().await;

    system
        .domain
        .write_attribute(&child_through_domain(), VALUE, Value::from("NewValue"))
        .await
        .unwrap();

    let value = system.server.child_value(DEFAULT_SERVERCHILD, DEFAULT_CHILD).await.unwrap();
    assert_eq!(value, Value::from("NewValue"));
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remote_read_matches_direct_read() {
    let system = remote_host().await;
    let direct = system
        .server
        .read_resource(&ServerClient::child_address(DEFAULT_SERVERCHILD, DEFAULT_CHILD), false)
        .await
        .unwrap();

    let remote = system
        .domain
        .read_resource(&child_through_domain(), false)
        .await
        .unwrap();

    assert_eq!(direct, remote);
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remote_composite_failure_rolls_back_server() {
    let system = remote_host().await;
    let write = OperationBuilder::new("write-attribute")
        .address(&child_through_domain())
        .param("name", VALUE)
        .param("value", "NewValue")
        .build();
    let unknown = OperationBuilder::new("remove")
        .address(&DomainClient::profile_address("missing"))
        .build();
    let composite = OperationBuilder::new("composite")
        .param("steps", vec![write, unknown])
        .build();

    let response = system.domain.inner().execute(composite).await.unwrap();

    assert!(!is_success(&response));
    let failure = failure_description(&response).unwrap();
    assert!(failure.contains("does not exist"), "{failure}");
    let value = system.server.child_value(DEFAULT_SERVERCHILD, DEFAULT_CHILD).await.unwrap();
    assert_eq!(value, Value::from("childValue"));
    system.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_waits_for_transport_actor() {
    let system = remote_host().await;
    system.domain.read_everything().await.unwrap();

    let result = system.shutdown().await;

    assert!(result.is_ok(), "{result:?}");
}

#[tokio::test]
async fn test_shutdown_reports_leaked_client() {
    let mut config = HostConfig::default();
    config.proxy_transport = ProxyTransport::Remote;
    config.controller.blocking_timeout_ms = 50;
    let system = HostSystem::start(&config).await.unwrap();
    let leaked = system.domain.clone();

    let result = system.shutdown().await;

    assert!(matches!(result, Err(HostError::Shutdown(_))), "{result:?}");
    drop(leaked);
}
