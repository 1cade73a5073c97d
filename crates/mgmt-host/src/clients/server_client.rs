//! # Server Client
//!
//! Provides a high-level API for the server controller's children and workers.
use crate::error::HostError;
use crate::model::{CHILD, KEEPALIVE_TIME, METRIC, SERVERCHILD, VALUE, WORKER};
use crate::services::KeepAlive;
use mgmt_controller::{ClientError, ControllerClient, ManagementClient, PathAddress, PathElement, Value};
use tracing::{debug, instrument};

/// Client for the server controller.
#[derive(Clone)]
pub struct ServerClient {
    inner: ControllerClient,
}

impl ServerClient {
    pub fn new(inner: ControllerClient) -> Self {
        Self { inner }
    }

    pub fn child_address(serverchild: &str, child: &str) -> PathAddress {
        PathAddress::root()
            .append(PathElement::new(SERVERCHILD, serverchild))
            .append(PathElement::new(CHILD, child))
    }

    pub fn worker_address(name: &str) -> PathAddress {
        PathAddress::root().append(PathElement::new(WORKER, name))
    }
}

impl ManagementClient for ServerClient {
    type Error = HostError;

    fn inner(&self) -> &ControllerClient {
        &self.inner
    }

    fn map_error(e: ClientError) -> Self::Error {
        HostError::Client(e)
    }
}

impl ServerClient {
    #[instrument(skip(self))]
    pub async fn child_value(&self, serverchild: &str, child: &str) -> Result<Value, HostError> {
        self.read_attribute(&Self::child_address(serverchild, child), VALUE)
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_child_value(&self, serverchild: &str, child: &str, value: &str) -> Result<(), HostError> {
        self.write_attribute(&Self::child_address(serverchild, child), VALUE, Value::from(value))
            .await
    }

    /// Reads the child's `metric`, computed on every read.
    #[instrument(skip(self))]
    pub async fn child_metric(&self, serverchild: &str, child: &str) -> Result<i64, HostError> {
        let value = self
            .read_attribute(&Self::child_address(serverchild, child), METRIC)
            .await?;
        value
            .as_i64()
            .ok_or_else(|| HostError::UnexpectedResult(format!("metric is not an integer: {value}")))
    }

    /// Adds a worker; its service is started before the operation commits.
    #[instrument(skip(self))]
    pub async fn add_worker(&self, name: &str, keepalive: Option<KeepAlive>) -> Result<(), HostError> {
        debug!("Adding worker");
        let mut attributes = Value::object();
        if let Some(keepalive) = keepalive {
            attributes.set(KEEPALIVE_TIME, keepalive.to_value());
        }
        self.add(&Self::worker_address(name), attributes).await
    }

    #[instrument(skip(self))]
    pub async fn set_keepalive(&self, name: &str, keepalive: KeepAlive) -> Result<(), HostError> {
        self.write_attribute(&Self::worker_address(name), KEEPALIVE_TIME, keepalive.to_value())
            .await
    }

    #[instrument(skip(self))]
    pub async fn keepalive(&self, name: &str) -> Result<KeepAlive, HostError> {
        let value = self
            .read_attribute(&Self::worker_address(name), KEEPALIVE_TIME)
            .await?;
        KeepAlive::from_value(&value).map_err(|e| HostError::UnexpectedResult(e.to_string()))
    }

    #[instrument(skip(self))]
    pub async fn remove_worker(&self, name: &str) -> Result<(), HostError> {
        self.remove(&Self::worker_address(name)).await
    }

    pub async fn worker_names(&self) -> Result<Vec<String>, HostError> {
        self.read_children_names(&PathAddress::root(), WORKER).await
    }
}
