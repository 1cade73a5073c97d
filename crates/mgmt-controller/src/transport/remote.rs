//! Proxy for a controller reached through a [`TransportClient`].

use super::client::{Exchange, TransportClient};
use super::message::ExchangeEvent;
use crate::address::PathAddress;
use crate::error::TransportError;
use crate::message::OperationMessageHandler;
use crate::operation::{failed_response, OperationAttachments};
use crate::proxy::{ProxyController, ProxyOperationControl};
use crate::transaction::{PreparedTransaction, ResultAction};
use crate::value::Value;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct RemoteProxyController {
    address: PathAddress,
    client: TransportClient,
}

impl RemoteProxyController {
    pub fn new(address: PathAddress, client: TransportClient) -> Self {
        Self { address, client }
    }
}

#[async_trait]
impl ProxyController for RemoteProxyController {
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
        let mut exchange = match self.client.execute(operation, attachments.detached()).await {
            Ok(exchange) => exchange,
            Err(e) => {
                warn!(address = %self.address, error = %e, "Could not reach proxied controller");
                control.operation_failed(&failed_response(e.to_string())).await;
                return;
            }
        };

        loop {
            let event = exchange.next_event().await;
            match event {
                Some(ExchangeEvent::Message { severity, message }) => {
                    handler.handle_report(severity, &message);
                }
                Some(ExchangeEvent::Prepared { response }) => {
                    debug!(address = %self.address, exchange = exchange.id, "Proxied controller prepared");
                    let (transaction, decision) = PreparedTransaction::new();
                    control.operation_prepared(transaction, &response).await;
                    let client = self.client.clone();
                    let address = self.address.clone();
                    tokio::spawn(async move {
                        let action = decision.await.unwrap_or(ResultAction::Rollback);
                        if let Err(e) = client.resolve(exchange.id, action).await {
                            warn!(%address, exchange = exchange.id, error = %e, "Failed to resolve proxied exchange");
                        }
                        finish(exchange, handler, control).await;
                    });
                    return;
                }
                Some(ExchangeEvent::Completed { response }) => {
                    control.operation_failed(&response).await;
                    return;
                }
                None => {
                    control
                        .operation_failed(&failed_response(TransportError::ExchangeClosed.to_string()))
                        .await;
                    return;
                }
            }
        }
    }
}

/// Relays the rest of a resolved exchange until its final response.
async fn finish(
    mut exchange: Exchange,
    handler: Arc<dyn OperationMessageHandler>,
    control: Arc<dyn ProxyOperationControl>,
) {
    while let Some(event) = exchange.next_event().await {
        match event {
            ExchangeEvent::Message { severity, message } => handler.handle_report(severity, &message),
            ExchangeEvent::Completed { response } => {
                control.operation_completed(&response).await;
                return;
            }
            ExchangeEvent::Prepared { .. } => {
                warn!(exchange = exchange.id, "Ignoring second prepare on exchange");
            }
        }
    }
    control
        .operation_completed(&failed_response(TransportError::ExchangeClosed.to_string()))
        .await;
}
