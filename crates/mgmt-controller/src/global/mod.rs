//! # Global Operations
//!
//! Operations every resource supports, registered once at the root as *inherited*
//! operations. A resource may override any of them by registering its own handler under the
//! same name.
//!
//! | operation | read-only | module |
//! |---|---|---|
//! | `read-resource`, `read-attribute`, `read-children-names`, `read-children-types` | yes | [`read`] |
//! | `read-operation-names`, `read-operation-description`, `read-resource-description` | yes | [`read`] |
//! | `write-attribute`, `undefine-attribute` | no | [`write`] |
//! | `composite` | no | [`composite`] |
//! | `validate-operation` | yes | [`validate`] |
//!
//! [`model`] holds the model-only `add` and `remove` handlers resources register themselves.

pub mod composite;
pub mod model;
pub mod read;
pub mod validate;
pub mod write;

pub use model::{ModelOnlyAddHandler, ModelOnlyRemoveHandler};

use crate::error::RegistrationError;
use crate::operation::names;
use crate::registry::{AttributeDefinition, OperationDefinition, ResourceRegistration};
use crate::value::ModelType;
use std::sync::Arc;

fn flag(name: &str, default: bool, description: &str) -> AttributeDefinition {
    AttributeDefinition::new(name, ModelType::Boolean)
        .default_value(default)
        .description(description)
}

fn required_string(name: &str, description: &str) -> AttributeDefinition {
    AttributeDefinition::new(name, ModelType::String)
        .required()
        .min_length(1)
        .description(description)
}

/// Registers the global operations on the root registration.
pub fn register_global_operations(root: &mut ResourceRegistration) -> Result<(), RegistrationError> {
    let recursive = || flag(names::RECURSIVE, false, "Include the children of the resource");
    let proxies = || flag(names::PROXIES, false, "Follow proxied controllers when recursing");

    root.register_operation_handler(
        OperationDefinition::new(names::READ_RESOURCE)
            .description("Reads the attributes and children of a resource")
            .parameter(recursive())
            .parameter(proxies())
            .parameter(flag(names::INCLUDE_DEFAULTS, true, "Report default values of unset attributes"))
            .reply_type(ModelType::Object)
            .read_only(),
        Arc::new(read::ReadResourceHandler),
        true,
    )?;
    root.register_operation_handler(
        OperationDefinition::new(names::READ_ATTRIBUTE)
            .description("Reads the value of one attribute")
            .parameter(required_string(names::NAME, "The attribute name"))
            .parameter(flag(names::INCLUDE_DEFAULTS, true, "Report the default if the attribute is unset"))
            .read_only(),
        Arc::new(read::ReadAttributeHandler),
        true,
    )?;
    root.register_operation_handler(
        OperationDefinition::new(names::WRITE_ATTRIBUTE)
            .description("Writes the value of one read-write attribute")
            .parameter(required_string(names::NAME, "The attribute name"))
            .parameter(AttributeDefinition::new(names::VALUE, ModelType::Undefined).description("The new value")),
        Arc::new(write::WriteAttributeHandler),
        true,
    )?;
    root.register_operation_handler(
        OperationDefinition::new(names::UNDEFINE_ATTRIBUTE)
            .description("Clears one read-write attribute")
            .parameter(required_string(names::NAME, "The attribute name")),
        Arc::new(write::UndefineAttributeHandler),
        true,
    )?;
    root.register_operation_handler(
        OperationDefinition::new(names::READ_CHILDREN_NAMES)
            .description("Lists the names of the children of one type")
            .parameter(required_string(names::CHILD_TYPE, "The child type"))
            .reply_type(ModelType::List)
            .read_only(),
        Arc::new(read::ReadChildrenNamesHandler),
        true,
    )?;
    root.register_operation_handler(
        OperationDefinition::new(names::READ_CHILDREN_TYPES)
            .description("Lists the child types registered for a resource")
            .reply_type(ModelType::List)
            .read_only(),
        Arc::new(read::ReadChildrenTypesHandler),
        true,
    )?;
    root.register_operation_handler(
        OperationDefinition::new(names::READ_OPERATION_NAMES)
            .description("Lists the operations valid at a resource")
            .reply_type(ModelType::List)
            .read_only(),
        Arc::new(read::ReadOperationNamesHandler),
        true,
    )?;
    root.register_operation_handler(
        OperationDefinition::new(names::READ_OPERATION_DESCRIPTION)
            .description("Describes one operation valid at a resource")
            .parameter(required_string(names::NAME, "The operation name"))
            .reply_type(ModelType::Object)
            .read_only(),
        Arc::new(read::ReadOperationDescriptionHandler),
        true,
    )?;
    root.register_operation_handler(
        OperationDefinition::new(names::READ_RESOURCE_DESCRIPTION)
            .description("Describes the attributes, children and operations of a resource")
            .parameter(recursive())
            .parameter(flag(names::OPERATIONS, false, "Include operation descriptions"))
            .parameter(proxies())
            .reply_type(ModelType::Object)
            .read_only(),
        Arc::new(read::ReadResourceDescriptionHandler),
        true,
    )?;
    root.register_operation_handler(
        OperationDefinition::new(names::COMPOSITE)
            .description("Runs several operations as one transaction")
            .parameter(
                AttributeDefinition::new(names::STEPS, ModelType::List)
                    .required()
                    .description("The operations to run, in order"),
            )
            .reply_type(ModelType::Object),
        Arc::new(composite::CompositeHandler),
        true,
    )?;
    root.register_operation_handler(
        OperationDefinition::new(names::VALIDATE_OPERATION)
            .description("Checks an operation against its definition without running it")
            .parameter(
                AttributeDefinition::new(names::VALUE, ModelType::Object)
                    .required()
                    .description("The operation to validate"),
            )
            .read_only(),
        Arc::new(validate::ValidateOperationHandler),
        true,
    )?;
    Ok(())
}
