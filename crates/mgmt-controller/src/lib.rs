//! # Management Controller
//!
//! This crate is the engine behind a hierarchical management model: a tree of
//! [`Resource`]s, a parallel tree of registrations describing what may exist and what can be
//! done to it, and a [`ModelController`] that executes *operations* against the tree with
//! all-or-nothing semantics.
//!
//! ## Why an Operation Engine?
//!
//! Management requests tend to touch several things at once: the persistent model, the
//! services running inside the process, and other processes altogether. Treating each
//! request as a transaction keeps those three consistent:
//!
//! - every operation runs as a pipeline of *steps*, grouped into stages;
//! - nothing is published until every step succeeded and the caller agreed to commit;
//! - any failure rolls back model changes, runtime changes and remote participants alike.
//!
//! ## Architecture Overview
//!
//! ```text
//!   ControllerClient ──► ModelController::execute
//!                            │
//!                            ├─ ResourceRegistration  (schema: ops, attributes, children, proxies)
//!                            ├─ OperationContext      (steps, stages, responses, result handlers)
//!                            ├─ ResourceTree          (published model, copy-on-write staging)
//!                            └─ TransactionControl    (prepared ──► commit | rollback)
//!                                      │
//!                  ProxyController ◄───┘ (the same protocol, one controller down)
//! ```
//!
//! 1. **Model layer** ([`Value`], [`PathAddress`], [`Resource`], [`tree`]) - the data.
//! 2. **Schema layer** ([`registry`]) - what the data may look like and which operations apply.
//! 3. **Execution layer** ([`OperationContext`], [`transaction`], [`ModelController`]) - the
//!    step pipeline and two-phase commit.
//! 4. **Distribution layer** ([`proxy`], [`transport`]) - forwarding into other controllers,
//!    in-process or over a channel.
//!
//! ## Quick Start
//!
//! ```rust
//! use mgmt_controller::global::ModelOnlyAddHandler;
//! use mgmt_controller::{
//!     AttributeDefinition, ControllerBuilder, ControllerClient, ModelType, OperationBuilder,
//!     PathAddress, PathElement, Value,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut builder = ControllerBuilder::new("example");
//!     let profile = builder
//!         .registration_mut()
//!         .register_sub_model(PathElement::wildcard("profile"), "A named profile")
//!         .unwrap();
//!     let name = AttributeDefinition::new("name", ModelType::String);
//!     profile.register_read_write_attribute(name.clone(), None).unwrap();
//!     let add = ModelOnlyAddHandler::new(vec![name]);
//!     profile
//!         .register_operation_handler(add.definition(), Arc::new(add), false)
//!         .unwrap();
//!
//!     let (controller, access) = builder.build().unwrap();
//!     let client = ControllerClient::new(controller, access);
//!
//!     let address = PathAddress::pairs(&[("profile", "default")]);
//!     let add = OperationBuilder::new("add")
//!         .address(&address)
//!         .param("name", "Default")
//!         .build();
//!     let response = client.execute(add).await.unwrap();
//!     assert_eq!(response.get("outcome"), Some(&Value::from("success")));
//!
//!     let read = OperationBuilder::new("read-attribute")
//!         .address(&address)
//!         .param("name", "name")
//!         .build();
//!     let response = client.execute(read).await.unwrap();
//!     assert_eq!(response.get("result"), Some(&Value::from("Default")));
//! }
//! ```
//!
//! ## Writing Step Handlers
//!
//! A handler is anything implementing [`OperationStepHandler`]. It reads or stages model
//! changes through the [`OperationContext`], may queue further steps (for the `Runtime`
//! stage, for example), and calls [`OperationContext::complete_step`] when it has something
//! to undo:
//!
//! ```rust
//! use async_trait::async_trait;
//! use mgmt_controller::{OperationContext, OperationError, OperationStepHandler, ResultAction, Value};
//!
//! struct Touch;
//!
//! #[async_trait]
//! impl OperationStepHandler for Touch {
//!     async fn execute(&self, context: &mut OperationContext, _op: &Value) -> Result<(), OperationError> {
//!         context.read_resource_for_update()?.set_attribute("touched", Value::from(true));
//!         context.complete_step(|action, _ctx| {
//!             if action == ResultAction::Rollback {
//!                 tracing::debug!("touch rolled back");
//!             }
//!         });
//!         Ok(())
//!     }
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! - Read-only operations never lock; they read the snapshot published when they started.
//! - Operations that write hold the controller write lock from before their first step until
//!   the Model stage drains, so Model stages are serialized. Runtime steps and the wait for a
//!   decision run without it.
//! - Staged writes stay private until commit, so readers never see them. A commit made after
//!   another writer published replays its changes onto the newer model and rolls back if any
//!   of them touches something that writer changed.
//! - Proxied operations never take the parent's lock; the child controller takes its own.
//!
//! ## Testing
//!
//! [`mock::MockProxyController`] scripts a child controller so two-phase behavior can be
//! tested without a second controller; see the `tests/` directory for full pipelines.

pub mod address;
pub mod client;
pub mod client_trait;
pub mod config;
pub mod context;
pub mod controller;
pub mod error;
pub mod global;
pub mod message;
pub mod mock;
pub mod operation;
pub mod process;
pub mod proxy;
pub mod registry;
pub mod resource;
pub mod tracing;
pub mod transaction;
pub mod transport;
pub mod tree;
pub mod value;

// Re-export main types for convenience
pub use address::{PathAddress, PathElement};
pub use client::ControllerClient;
pub use client_trait::{ClientError, ManagementClient};
pub use config::{ControllerConfig, ControllerSettings, LoggingConfig};
pub use context::{step_fn, OperationContext, OperationStepHandler, ResponseId, Stage};
pub use controller::{AccessToken, ControllerBuilder, ManagedController, ModelController};
pub use error::{ControllerError, OperationError, RegistrationError, TransactionError, TransportError};
pub use message::{DiscardMessages, LogMessages, MessageSeverity, OperationMessageHandler};
pub use operation::{Operation, OperationAttachments, OperationBuilder, OperationResponse};
pub use process::{ProcessState, ProcessStateHandle};
pub use proxy::{LocalProxyController, ProxyController, ProxyOperationControl, ProxyStepHandler};
pub use registry::{AccessType, AttributeDefinition, OperationDefinition, ResourceRegistration};
pub use resource::Resource;
pub use transaction::{
    CommitOnPrepared, PreparedTransaction, ResultAction, RollbackOnPrepared, TransactionControl,
};
pub use value::{ModelType, Value};
