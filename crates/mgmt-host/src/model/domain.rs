//! The domain controller: named profiles, and the server controller proxied at
//! `server=serverA`.

use super::{create_if_absent, server_address, PROFILE, SERVER, SERVER_NAME, SETUP};
use async_trait::async_trait;
use mgmt_controller::global::{ModelOnlyAddHandler, ModelOnlyRemoveHandler};
use mgmt_controller::operation::names;
use mgmt_controller::{
    AccessToken, AttributeDefinition, ControllerBuilder, ControllerSettings, ManagedController,
    ModelType, OperationContext, OperationDefinition, OperationError, OperationStepHandler,
    PathAddress, PathElement, ProxyController, RegistrationError, Resource, ResourceRegistration,
    Value,
};
use std::sync::Arc;
use tracing::info;

pub const DEFAULT_PROFILE: &str = "profileA";
pub const DEFAULT_PROFILE_NAME: &str = "Profile A";

fn profile_name() -> AttributeDefinition {
    AttributeDefinition::new(names::NAME, ModelType::String)
        .required()
        .min_length(1)
        .description("Display name of the profile")
}

/// Seeds `profile=profileA` and the placeholder resource for the proxied server.
struct DomainSetupHandler;

#[async_trait]
impl OperationStepHandler for DomainSetupHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        _operation: &Value,
    ) -> Result<(), OperationError> {
        let profile = PathAddress::root().append(PathElement::new(PROFILE, DEFAULT_PROFILE));
        let created = create_if_absent(
            context,
            &profile,
            Resource::with_attributes([(names::NAME, DEFAULT_PROFILE_NAME)]),
        )?;
        create_if_absent(context, &server_address(), Resource::new())?;
        if created {
            info!("Domain model initialized");
        }
        Ok(())
    }
}

/// Registers the domain model on `root`, with `server` handling `server=serverA`.
pub fn register(
    root: &mut ResourceRegistration,
    server: Arc<dyn ProxyController>,
) -> Result<(), RegistrationError> {
    root.register_operation_handler(
        OperationDefinition::new(SETUP).description("Creates the initial domain resources"),
        Arc::new(DomainSetupHandler),
        false,
    )?;

    let profile = root.register_sub_model(PathElement::wildcard(PROFILE), "A named profile")?;
    profile.register_read_write_attribute(profile_name(), None)?;
    let add = ModelOnlyAddHandler::new(vec![profile_name()]);
    profile.register_operation_handler(add.definition(), Arc::new(add), false)?;
    profile.register_operation_handler(
        ModelOnlyRemoveHandler::definition(),
        Arc::new(ModelOnlyRemoveHandler),
        false,
    )?;

    root.register_proxy_controller(PathElement::new(SERVER, SERVER_NAME), server)
}

/// Builds the domain controller.
pub fn build(
    server: Arc<dyn ProxyController>,
    settings: ControllerSettings,
) -> Result<(Arc<ManagedController>, AccessToken), RegistrationError> {
    let mut builder = ControllerBuilder::new("domain").with_settings(settings);
    register(builder.registration_mut(), server)?;
    builder.build()
}
