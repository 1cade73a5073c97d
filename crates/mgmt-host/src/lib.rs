//! # Management Host
//!
//! A host running two management controllers: a **domain** controller holding profiles, and
//! a **server** controller holding children and runtime workers. The domain sees the whole
//! server model through a proxy at `server=serverA`, so one domain operation can change both
//! models and commit or roll back as a unit.
//!
//! - **[model]**: The registrations and step handlers of both controllers.
//! - **[services]**: The worker container that the server's runtime steps drive.
//! - **[clients]**: Typed clients over [`ManagementClient`](mgmt_controller::ManagementClient).
//! - **[lifecycle]**: Boots the controllers in order, wires the proxy and shuts down.
//! - **[config]**: `mgmt-host.toml` plus `MGMT_HOST__*` overrides.

pub mod clients;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod services;

pub use clients::{DomainClient, ServerClient};
pub use config::{HostConfig, ProxyTransport};
pub use error::HostError;
pub use lifecycle::HostSystem;
