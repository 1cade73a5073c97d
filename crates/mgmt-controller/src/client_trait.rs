//! # ManagementClient Trait
//!
//! Provides typed helpers for the common global operations on top of a [`ControllerClient`],
//! so model-specific clients only declare how to reach the controller and how to map errors.
use crate::address::PathAddress;
use crate::client::ControllerClient;
use crate::error::ControllerError;
use crate::operation::{failure_description, is_success, names, OperationBuilder};
use crate::value::Value;
use async_trait::async_trait;

/// Errors returned by the helpers of [`ManagementClient`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Controller(#[from] ControllerError),
    #[error("Operation failed: {0}")]
    OperationFailed(String),
}

/// Trait for model-specific clients to inherit the global operations.
///
/// # Example
///
/// ```rust
/// use mgmt_controller::client_trait::{ClientError, ManagementClient};
/// use mgmt_controller::{ControllerClient, PathAddress};
///
/// struct ServerClient {
///     inner: ControllerClient,
/// }
///
/// impl ManagementClient for ServerClient {
///     type Error = ClientError;
///
///     fn inner(&self) -> &ControllerClient {
///         &self.inner
///     }
///
///     fn map_error(e: ClientError) -> Self::Error {
///         e
///     }
/// }
///
/// async fn usage(client: ServerClient) {
///     let address = PathAddress::pairs(&[("serverchild", "svrA")]);
///     let _ = client.read_attribute(&address, "name").await;
/// }
/// ```
#[async_trait]
pub trait ManagementClient: Send + Sync {
    /// The model-specific error type.
    type Error: Send + Sync;

    /// Access the inner controller client.
    fn inner(&self) -> &ControllerClient;

    /// Map client errors to the model-specific error type.
    fn map_error(e: ClientError) -> Self::Error;

    /// Executes `operation` and returns its `result`, turning a failed outcome into an error.
    async fn execute_for_result(&self, operation: Value) -> Result<Value, Self::Error> {
        let response = self
            .inner()
            .execute(operation)
            .await
            .map_err(|e| Self::map_error(e.into()))?;
        if is_success(&response) {
            Ok(response.get(names::RESULT).cloned().unwrap_or_default())
        } else {
            let description = failure_description(&response)
                .unwrap_or_else(|| "no failure description".to_string());
            Err(Self::map_error(ClientError::OperationFailed(description)))
        }
    }

    #[tracing::instrument(skip(self))]
    async fn read_resource(&self, address: &PathAddress, recursive: bool) -> Result<Value, Self::Error> {
        tracing::debug!("Sending request");
        let operation = OperationBuilder::new(names::READ_RESOURCE)
            .address(address)
            .param(names::RECURSIVE, recursive)
            .param(names::PROXIES, recursive)
            .build();
        self.execute_for_result(operation).await
    }

    #[tracing::instrument(skip(self))]
    async fn read_attribute(&self, address: &PathAddress, name: &str) -> Result<Value, Self::Error> {
        tracing::debug!("Sending request");
        let operation = OperationBuilder::new(names::READ_ATTRIBUTE)
            .address(address)
            .param(names::NAME, name)
            .build();
        self.execute_for_result(operation).await
    }

    #[tracing::instrument(skip(self, value))]
    async fn write_attribute(&self, address: &PathAddress, name: &str, value: Value) -> Result<(), Self::Error> {
        tracing::debug!("Sending request");
        let operation = OperationBuilder::new(names::WRITE_ATTRIBUTE)
            .address(address)
            .param(names::NAME, name)
            .param(names::VALUE, value)
            .build();
        self.execute_for_result(operation).await.map(|_| ())
    }

    #[tracing::instrument(skip(self))]
    async fn read_children_names(&self, address: &PathAddress, child_type: &str) -> Result<Vec<String>, Self::Error> {
        tracing::debug!("Sending request");
        let operation = OperationBuilder::new(names::READ_CHILDREN_NAMES)
            .address(address)
            .param(names::CHILD_TYPE, child_type)
            .build();
        let result = self.execute_for_result(operation).await?;
        Ok(result
            .as_list()
            .unwrap_or_default()
            .iter()
            .map(Value::to_plain_string)
            .collect())
    }

    /// Adds the resource at `address` with `attributes` as parameters.
    #[tracing::instrument(skip(self, attributes))]
    async fn add(&self, address: &PathAddress, attributes: Value) -> Result<(), Self::Error> {
        tracing::debug!("Sending request");
        let mut builder = OperationBuilder::new(names::ADD).address(address);
        if let Some(map) = attributes.as_object() {
            for (name, value) in map {
                builder = builder.param(name, value.clone());
            }
        }
        self.execute_for_result(builder.build()).await.map(|_| ())
    }

    #[tracing::instrument(skip(self))]
    async fn remove(&self, address: &PathAddress) -> Result<(), Self::Error> {
        tracing::debug!("Sending request");
        let operation = OperationBuilder::new(names::REMOVE).address(address).build();
        self.execute_for_result(operation).await.map(|_| ())
    }
}
