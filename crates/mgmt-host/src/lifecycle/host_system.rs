use crate::clients::{DomainClient, ServerClient};
use crate::config::{HostConfig, ProxyTransport};
use crate::error::HostError;
use crate::model::{domain, server, server_address, SETUP};
use crate::services::WorkerContainer;
use mgmt_controller::operation::{failure_description, is_success, OperationBuilder};
use mgmt_controller::transport::{ControllerActor, RemoteProxyController};
use mgmt_controller::{ControllerClient, LocalProxyController, ManagedController, ProxyController};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running host: both controllers, their clients and the worker container.
pub struct HostSystem {
    pub domain: DomainClient,
    pub server: ServerClient,
    pub domain_controller: Arc<ManagedController>,
    pub server_controller: Arc<ManagedController>,
    pub workers: WorkerContainer,
    transport: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl HostSystem {
    pub async fn start(config: &HostConfig) -> Result<Self, HostError> {
        let settings = config.controller.settings();
        let workers = WorkerContainer::new(config.worker_capacity);

        let (server_controller, server_access) = server::build(workers.clone(), settings)
            .map_err(|source| HostError::Registration {
                controller: "server",
                source,
            })?;
        let server_client = ControllerClient::new(server_controller.clone(), server_access);

        let mut transport = None;
        let proxy: Arc<dyn ProxyController> = match config.proxy_transport {
            ProxyTransport::Local => {
                Arc::new(LocalProxyController::new(server_address(), server_client.clone()))
            }
            ProxyTransport::Remote => {
                let (actor, client) = ControllerActor::new(
                    "server",
                    server_client.clone(),
                    config.controller.actor_buffer,
                );
                transport = Some(tokio::spawn(actor.run()));
                Arc::new(RemoteProxyController::new(server_address(), client))
            }
        };

        let (domain_controller, domain_access) = domain::build(proxy, settings)
            .map_err(|source| HostError::Registration {
                controller: "domain",
                source,
            })?;
        let domain_client = ControllerClient::new(domain_controller.clone(), domain_access);

        run_setup("server", &server_client).await?;
        run_setup("domain", &domain_client).await?;
        info!(transport = ?config.proxy_transport, workers = config.worker_capacity, "Host started");

        Ok(Self {
            domain: DomainClient::new(domain_client),
            server: ServerClient::new(server_client),
            domain_controller,
            server_controller,
            workers,
            transport,
            shutdown_timeout: settings.blocking_timeout,
        })
    }

    pub async fn shutdown(self) -> Result<(), HostError> {
        info!("Shutting down host");
        let Self {
            domain,
            server,
            domain_controller,
            server_controller,
            transport,
            shutdown_timeout,
            ..
        } = self;
        drop(domain);
        drop(domain_controller);
        drop(server);
        drop(server_controller);

        if let Some(handle) = transport {
            match tokio::time::timeout(shutdown_timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(HostError::Shutdown(e.to_string())),
                Err(_) => {
                    warn!(timeout = ?shutdown_timeout, "Transport actor still referenced; giving up");
                    return Err(HostError::Shutdown(
                        "transport actor did not stop; a client is still in use".to_string(),
                    ));
                }
            }
        }
        info!("Host stopped");
        Ok(())
    }
}

async fn run_setup(controller: &'static str, client: &ControllerClient) -> Result<(), HostError> {
    let response = client
        .execute(OperationBuilder::new(SETUP).build())
        .await
        .map_err(|e| HostError::Setup {
            controller,
            reason: e.to_string(),
        })?;
    if is_success(&response) {
        Ok(())
    } else {
        Err(HostError::Setup {
            controller,
            reason: failure_description(&response).unwrap_or_default(),
        })
    }
}
