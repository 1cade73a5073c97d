//! # Controller Transport
//!
//! Reaching a controller through a channel instead of a direct reference. The transport is
//! an actor pair in the style of a resource actor and its client:
//!
//! - [`ControllerActor`] owns a controller and serves `Execute` and `Resolve` requests;
//! - [`TransportClient`] sends them and receives the events of each exchange;
//! - [`RemoteProxyController`] implements the proxy contract on top of the client, so a
//!   parent controller can take a controller behind the transport into its transactions.
//!
//! The message types in [`message`] are the contract a real wire transport would carry.

mod actor;
mod client;
pub mod message;
mod remote;

pub use actor::ControllerActor;
pub use client::{Exchange, TransportClient};
pub use message::{ControllerRequest, ExchangeEvent};
pub use remote::RemoteProxyController;
