//! # Domain Client
//!
//! Provides a high-level API for the domain controller: profiles, and the server's
//! resources as seen through the domain's proxy.
use crate::error::HostError;
use crate::model::{server_address, PROFILE};
use mgmt_controller::operation::names;
use mgmt_controller::{ClientError, ControllerClient, ManagementClient, PathAddress, PathElement, Value};
use tracing::{debug, instrument};

/// Client for the domain controller.
#[derive(Clone)]
pub struct DomainClient {
    inner: ControllerClient,
}

impl DomainClient {
    pub fn new(inner: ControllerClient) -> Self {
        Self { inner }
    }

    pub fn profile_address(profile: &str) -> PathAddress {
        PathAddress::root().append(PathElement::new(PROFILE, profile))
    }

    /// `address` in the server's model, as addressed through the domain.
    pub fn on_server(address: &PathAddress) -> PathAddress {
        address
            .into_iter()
            .cloned()
            .fold(server_address(), |acc, element| acc.append(element))
    }
}

impl ManagementClient for DomainClient {
    type Error = HostError;

    fn inner(&self) -> &ControllerClient {
        &self.inner
    }

    fn map_error(e: ClientError) -> Self::Error {
        HostError::Client(e)
    }
}

impl DomainClient {
    #[instrument(skip(self))]
    pub async fn add_profile(&self, profile: &str, display_name: &str) -> Result<(), HostError> {
        debug!("Adding profile");
        let attributes = Value::object().with(names::NAME, display_name);
        self.add(&Self::profile_address(profile), attributes).await
    }

    #[instrument(skip(self))]
    pub async fn profile_name(&self, profile: &str) -> Result<String, HostError> {
        let value = self
            .read_attribute(&Self::profile_address(profile), names::NAME)
            .await?;
        Ok(value.to_plain_string())
    }

    pub async fn profiles(&self) -> Result<Vec<String>, HostError> {
        self.read_children_names(&PathAddress::root(), PROFILE).await
    }

    #[instrument(skip(self))]
    pub async fn remove_profile(&self, profile: &str) -> Result<(), HostError> {
        self.remove(&Self::profile_address(profile)).await
    }

    /// The whole domain model, proxied server included.
    pub async fn read_everything(&self) -> Result<Value, HostError> {
        self.read_resource(&PathAddress::root(), true).await
    }
}
