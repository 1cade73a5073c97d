//! # Management Host
//!
//! Boots a domain and a server controller and walks through a few operations:
//!
//! 1. Reading the full domain model, the server included.
//! 2. Writing a server child's value through the domain.
//! 3. Adding a worker, whose service starts before the operation commits.

use mgmt_controller::tracing::setup_tracing_with;
use mgmt_controller::{ManagementClient, Value};
use mgmt_host::model::server::{DEFAULT_CHILD, DEFAULT_SERVERCHILD};
use mgmt_host::model::VALUE;
use mgmt_host::services::{KeepAlive, TimeUnit};
use mgmt_host::{DomainClient, HostConfig, HostSystem, ServerClient};
use tracing::{error, info, warn, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    let config = HostConfig::load().unwrap_or_else(|e| {
        eprintln!("Falling back to default configuration: {e}");
        HostConfig::default()
    });
    setup_tracing_with(&config.controller.logging);

    info!("Starting management host");
    let system = HostSystem::start(&config).await.map_err(|e| e.to_string())?;

    let span = tracing::info_span!("read_domain");
    async {
        let model = system.domain.read_everything().await.map_err(|e| e.to_string())?;
        info!(%model, "Domain model");
        Ok::<_, String>(())
    }
    .instrument(span)
    .await?;

    let span = tracing::info_span!("write_through_domain");
    async {
        let child = DomainClient::on_server(&ServerClient::child_address(
            DEFAULT_SERVERCHILD,
            DEFAULT_CHILD,
        ));
        system
            .domain
            .write_attribute(&child, VALUE, Value::from("NewValue"))
            .await
            .map_err(|e| e.to_string())?;
        let value = system
            .server
            .child_value(DEFAULT_SERVERCHILD, DEFAULT_CHILD)
            .await
            .map_err(|e| e.to_string())?;
        info!(%value, "Server child updated through the domain");
        Ok::<_, String>(())
    }
    .instrument(span)
    .await?;

    let span = tracing::info_span!("worker");
    let added = async {
        system
            .server
            .add_worker("pool", Some(KeepAlive::new(30, TimeUnit::Seconds)))
            .await
    }
    .instrument(span)
    .await;
    match added {
        Ok(()) => {
            let workers = system.server.worker_names().await.unwrap_or_default();
            info!(?workers, running = system.workers.len(), "Worker added");
        }
        Err(e) => error!(error = %e, "Adding worker failed"),
    }

    if let Err(e) = system.shutdown().await {
        warn!(error = %e, "Host did not shut down cleanly");
    }
    info!("Management host stopped");
    Ok(())
}
