//! In-process proxy: the child controller runs in the same process, on its own task.

use super::{ProxyController, ProxyOperationControl};
use crate::address::PathAddress;
use crate::client::ControllerClient;
use crate::message::OperationMessageHandler;
use crate::operation::{failed_response, OperationAttachments};
use crate::transaction::{PreparedTransaction, TransactionControl};
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Hands the child's prepared handle to the proxy instead of deciding.
struct RelayControl {
    relay: Mutex<Option<oneshot::Sender<(PreparedTransaction, Value)>>>,
}

#[async_trait]
impl TransactionControl for RelayControl {
    async fn operation_prepared(&self, transaction: PreparedTransaction, result: &Value) {
        let Some(relay) = self.relay.lock().take() else {
            let _ = transaction.rollback();
            return;
        };
        if let Err((transaction, _)) = relay.send((transaction, result.clone())) {
            debug!("Parent step went away before the child prepared; rolling back");
            let _ = transaction.rollback();
        }
    }
}

/// Proxies the subtree at `address` to a controller in this process.
pub struct LocalProxyController {
    address: PathAddress,
    client: ControllerClient,
}

impl LocalProxyController {
    pub fn new(address: PathAddress, client: ControllerClient) -> Self {
        Self { address, client }
    }
}

#[async_trait]
impl ProxyController for LocalProxyController {
    fn proxy_node_address(&self) -> &PathAddress {
        &self.address
    }

    async fn execute(
        &self,
        operation: Value,
        handler: Arc<dyn OperationMessageHandler>,
        control: Arc<dyn ProxyOperationControl>,
        attachments: OperationAttachments,
    ) {
        let (relay_tx, relay_rx) = oneshot::channel();
        let relay = Arc::new(RelayControl {
            relay: Mutex::new(Some(relay_tx)),
        });
        let client = self.client.clone();
        let child = tokio::spawn(async move {
            client
                .execute_with_control(operation, handler, relay, attachments)
                .await
                .map(|response| response.response)
                .unwrap_or_else(|e| failed_response(e.to_string()))
        });

        match relay_rx.await {
            Ok((transaction, prepared)) => {
                control.operation_prepared(transaction, &prepared).await;
                let address = self.address.clone();
                tokio::spawn(async move {
                    match child.await {
                        Ok(response) => control.operation_completed(&response).await,
                        Err(e) => warn!(%address, error = %e, "Proxied controller task failed"),
                    }
                });
            }
            Err(_) => {
                let response = child.await.unwrap_or_else(|e| {
                    failed_response(format!("proxied controller task failed: {e}"))
                });
                control.operation_failed(&response).await;
            }
        }
    }
}
