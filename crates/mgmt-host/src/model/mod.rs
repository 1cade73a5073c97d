//! # Host Models
//!
//! The registrations of the two controllers a host runs:
//!
//! ```text
//!  domain                                server
//!  ├─ profile=*        {name}            ├─ serverchild=*           {name}
//!  └─ server=serverA   ── proxy ──────►  │   └─ child=*             {name, value, metric}
//!                                        └─ worker=*                {keepalive-time}
//! ```
//!
//! Both register a `setup` operation that seeds their initial resources; the host runs it
//! once after boot.

pub mod domain;
pub mod server;

use mgmt_controller::operation::names;
use mgmt_controller::{OperationContext, OperationError, PathAddress, PathElement, Resource};

pub const SETUP: &str = "setup";
pub const PROFILE: &str = "profile";
pub const SERVER: &str = "server";
pub const SERVER_NAME: &str = "serverA";
pub const SERVERCHILD: &str = "serverchild";
pub const CHILD: &str = "child";
pub const WORKER: &str = "worker";
pub const VALUE: &str = names::VALUE;
pub const METRIC: &str = "metric";
pub const KEEPALIVE_TIME: &str = "keepalive-time";
pub const TEST_OP: &str = "test-op";

/// Address of the proxied server in the domain model.
pub fn server_address() -> PathAddress {
    PathAddress::root().append(PathElement::new(SERVER, SERVER_NAME))
}

/// The last element value of the executing step's address, i.e. the resource's name.
pub(crate) fn resource_name(context: &OperationContext) -> Result<String, OperationError> {
    context
        .current_address()
        .last()
        .map(|element| element.value().to_string())
        .ok_or_else(|| OperationError::InvalidAddress("expected a named resource".to_string()))
}

/// Creates `resource` at `address` unless something already exists there.
pub(crate) fn create_if_absent(
    context: &mut OperationContext,
    address: &PathAddress,
    resource: Resource,
) -> Result<bool, OperationError> {
    if context.snapshot().navigate(address).is_some() {
        return Ok(false);
    }
    context.create_resource_at(address, resource)?;
    Ok(true)
}
