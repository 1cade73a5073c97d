//! # Proxy Controllers
//!
//! A proxy stands in for another controller (in-process or behind a transport) and makes
//! that controller's whole model appear as a subtree of the local one.
//!
//! ## Two-Phase Protocol
//!
//! ```text
//!  parent step (ProxyStepHandler)                  child controller
//!  ──────────────────────────────                  ────────────────
//!  execute(op with relative address) ───────────►  runs its own pipeline
//!                                     ◄──────────  operation_prepared(tx, result)
//!  copy result, complete_step ...
//!  ... parent prepares, caller decides
//!  result handler: tx.commit()/rollback() ──────►  commits or rolls back
//!                                     ◄──────────  operation_completed(response)
//! ```
//!
//! - The child never commits on its own: its prepared handle is held by the parent step and
//!   resolved by the parent's result handler, after every participant prepared.
//! - If the child fails to prepare, the parent step fails with the child's failure
//!   description and the parent unwinds.
//! - If the parent abandons the step (timeout, cancellation) and the child prepares late,
//!   the late handle is rolled back immediately.
//!
//! Implementations: [`LocalProxyController`] for a controller in the same process, and
//! [`crate::transport::RemoteProxyController`] for one reached through a transport.

mod local;

pub use local::LocalProxyController;

use crate::address::PathAddress;
use crate::context::{OperationContext, OperationStepHandler};
use crate::error::OperationError;
use crate::message::OperationMessageHandler;
use crate::operation::{failure_description, names, OperationAttachments};
use crate::transaction::{PreparedTransaction, ResultAction};
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A delegate controller that owns the subtree below [`ProxyController::proxy_node_address`].
#[async_trait]
pub trait ProxyController: Send + Sync {
    /// Address of the proxy node in the parent's model.
    fn proxy_node_address(&self) -> &PathAddress;

    /// Forwards `operation`, whose address is already relative to the child's root.
    ///
    /// Exactly one of `operation_prepared` or `operation_failed` must eventually be called
    /// on `control`; after a prepared transaction is resolved, `operation_completed` follows
    /// with the child's final response.
    async fn execute(
        &self,
        operation: Value,
        handler: Arc<dyn OperationMessageHandler>,
        control: Arc<dyn ProxyOperationControl>,
        attachments: OperationAttachments,
    );
}

/// The parent side of a proxied exchange.
#[async_trait]
pub trait ProxyOperationControl: Send + Sync {
    /// The child prepared. `result` is the child's tentative response.
    async fn operation_prepared(&self, transaction: PreparedTransaction, result: &Value);

    /// The child failed before preparing. `response` is its failed response.
    async fn operation_failed(&self, response: &Value);

    /// The child applied the parent's decision. `response` is its final response.
    async fn operation_completed(&self, response: &Value);
}

enum ProxyOutcome {
    Prepared {
        transaction: PreparedTransaction,
        result: Value,
    },
    Failed(Value),
}

/// Collects the child's answers for one proxied step.
struct ProxyStepControl {
    address: PathAddress,
    outcome: Mutex<Option<oneshot::Sender<ProxyOutcome>>>,
    completed: Mutex<Option<oneshot::Sender<Value>>>,
}

#[async_trait]
impl ProxyOperationControl for ProxyStepControl {
    async fn operation_prepared(&self, transaction: PreparedTransaction, result: &Value) {
        let Some(sender) = self.outcome.lock().take() else {
            warn!(address = %self.address, "Proxied controller prepared twice; rolling back");
            let _ = transaction.rollback();
            return;
        };
        let outcome = ProxyOutcome::Prepared {
            transaction,
            result: result.clone(),
        };
        if let Err(ProxyOutcome::Prepared { transaction, .. }) = sender.send(outcome) {
            debug!(address = %self.address, "Proxied step was abandoned; rolling back late prepare");
            if let Err(e) = transaction.rollback() {
                warn!(address = %self.address, error = %e, "Rollback of abandoned proxy failed");
            }
        }
    }

    async fn operation_failed(&self, response: &Value) {
        match self.outcome.lock().take() {
            Some(sender) => {
                let _ = sender.send(ProxyOutcome::Failed(response.clone()));
            }
            None => warn!(address = %self.address, "Proxied controller reported failure after its outcome"),
        }
    }

    async fn operation_completed(&self, response: &Value) {
        if let Some(sender) = self.completed.lock().take() {
            let _ = sender.send(response.clone());
        }
    }
}

/// Step handler that runs an operation through a [`ProxyController`].
///
/// The step's address is the full address in the parent model; it is made relative to the
/// proxy node before forwarding.
pub struct ProxyStepHandler {
    proxy: Arc<dyn ProxyController>,
}

impl ProxyStepHandler {
    pub fn new(proxy: Arc<dyn ProxyController>) -> Self {
        Self { proxy }
    }
}

#[async_trait]
impl OperationStepHandler for ProxyStepHandler {
    async fn execute(
        &self,
        context: &mut OperationContext,
        operation: &Value,
    ) -> Result<(), OperationError> {
        let address = context.current_address().clone();
        let node_depth = self.proxy.proxy_node_address().len();
        if address.len() < node_depth {
            return Err(OperationError::InvalidAddress(format!(
                "{address} is not below proxy {}",
                self.proxy.proxy_node_address()
            )));
        }
        let mut forwarded = operation.clone();
        forwarded.set(names::ADDRESS, address.sub_address(node_depth).to_value());

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (completed_tx, completed_rx) = oneshot::channel();
        let control = Arc::new(ProxyStepControl {
            address: address.clone(),
            outcome: Mutex::new(Some(outcome_tx)),
            completed: Mutex::new(Some(completed_tx)),
        });

        debug!(%address, proxy = %self.proxy.proxy_node_address(), "Forwarding operation to proxy");
        let proxy = self.proxy.clone();
        let handler = context.message_handler();
        let attachments = context.input_attachments().clone();
        let exchange = async move {
            proxy.execute(forwarded, handler, control, attachments).await;
            outcome_rx.await
        };
        let outcome = context
            .bounded(&format!("proxied controller at {address}"), exchange)
            .await?
            .map_err(|_| {
                OperationError::Proxy(format!("controller at {address} returned no outcome"))
            })?;

        match outcome {
            ProxyOutcome::Prepared {
                transaction,
                result,
            } => {
                *context.result_mut() = result.get(names::RESULT).cloned().unwrap_or_default();
                context.await_completion(format!("proxied controller at {address}"), completed_rx);
                context.complete_step(move |action, _| {
                    let resolved = match action {
                        ResultAction::Keep => transaction.commit(),
                        ResultAction::Rollback => transaction.rollback(),
                    };
                    if let Err(e) = resolved {
                        warn!(%address, error = %e, "Failed to resolve proxied transaction");
                    }
                });
                Ok(())
            }
            ProxyOutcome::Failed(response) => Err(OperationError::Failed(
                failure_description(&response)
                    .unwrap_or_else(|| format!("proxied operation at {address} failed")),
            )),
        }
    }
}
