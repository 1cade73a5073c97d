//! # Host Lifecycle & Orchestration
//!
//! This module boots the two controllers of a host, wires them together and shuts them down.
//!
//! ## Boot Order
//!
//! The domain controller's registration needs the proxy for `server=serverA`, and the proxy
//! needs a client for the server controller, so the server always comes first:
//!
//! 1. **Server** - build the server controller over a fresh [`WorkerContainer`](crate::services::WorkerContainer).
//! 2. **Proxy** - wrap the server's client in a `LocalProxyController`, or serve it from a
//!    `ControllerActor` and wrap the actor's transport client in a `RemoteProxyController`.
//! 3. **Domain** - build the domain controller with that proxy registered.
//! 4. **Setup** - run `setup` on the server, then on the domain, so both models hold their
//!    initial resources before any caller sees them.
//!
//! ```rust,ignore
//! let system = HostSystem::start(&HostConfig::default()).await?;
//! let value = system.server.child_value("svrA", "childA").await?;
//! system.shutdown().await?;
//! ```
//!
//! ## Graceful Shutdown
//!
//! Controllers have no tasks of their own; only the transport actor does. Shutdown drops the
//! clients and controllers, which drops the domain's proxy and with it the last transport
//! client, so the actor's channel closes. The actor then rolls back anything still prepared
//! and exits, and shutdown waits for it.
//!
//! A caller that still holds a clone of a client or controller keeps the actor alive; the
//! wait is bounded by the controllers' blocking timeout.

mod host_system;

pub use host_system::HostSystem;
