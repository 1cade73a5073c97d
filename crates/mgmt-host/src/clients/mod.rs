//! Typed clients for the host's controllers. Both build on
//! [`ManagementClient`](mgmt_controller::ManagementClient) for the global operations and add
//! the model-specific ones.

mod domain_client;
mod server_client;

pub use domain_client::DomainClient;
pub use server_client::ServerClient;
