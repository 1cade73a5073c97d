//! # Controller Actor
//!
//! The server half of the transport. A `ControllerActor` owns a [`ControllerClient`] and
//! serves [`ControllerRequest`]s from its channel, so a controller can be reached by anything
//! holding a [`TransportClient`] without sharing its access token.
//!
//! Each `Execute` runs on its own task; the actor itself only keeps the table of prepared
//! exchanges waiting for a `Resolve`. When the operation prepares, its handle is registered
//! with the actor *before* the `Prepared` event is sent, and the actor always drains
//! registrations before reading the next request, so a `Resolve` can never overtake the
//! registration it refers to. If the `Prepared` event cannot be delivered, the exchange rolls
//! back and withdraws its registration.

use super::client::TransportClient;
use super::message::{ControllerRequest, ExchangeEvent};
use crate::client::ControllerClient;
use crate::error::TransportError;
use crate::message::{MessageSeverity, OperationMessageHandler};
use crate::operation::failed_response;
use crate::transaction::{PreparedTransaction, TransactionControl};
use crate::value::Value;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

enum Registration {
    Prepared(u64, PreparedTransaction),
    Withdrawn(u64),
}

/// Serves one controller over a request channel.
pub struct ControllerActor {
    name: String,
    receiver: mpsc::Receiver<ControllerRequest>,
    client: ControllerClient,
    pending: HashMap<u64, PreparedTransaction>,
}

impl ControllerActor {
    /// Creates the actor and the client used to reach it.
    ///
    /// `buffer_size` bounds the request channel; senders wait when it is full.
    pub fn new(name: impl Into<String>, client: ControllerClient, buffer_size: usize) -> (Self, TransportClient) {
        let (sender, receiver) = mpsc::channel(buffer_size);
        let actor = Self {
            name: name.into(),
            receiver,
            client,
            pending: HashMap::new(),
        };
        (actor, TransportClient::new(sender))
    }

    /// Runs until every [`TransportClient`] is dropped, then rolls back whatever is still
    /// waiting for a decision.
    pub async fn run(mut self) {
        let controller = self.name.clone();
        info!(%controller, "Actor started");
        let (registrations, mut registered) = mpsc::unbounded_channel::<Registration>();

        loop {
            tokio::select! {
                biased;
                Some(registration) = registered.recv() => {
                    apply_registration(&mut self.pending, registration);
                }
                request = self.receiver.recv() => match request {
                    Some(ControllerRequest::Execute { exchange, operation, attachments, events }) => {
                        debug!(%controller, exchange, %operation, "Execute");
                        let client = self.client.clone();
                        let registrations = registrations.clone();
                        tokio::spawn(async move {
                            let handler = Arc::new(EventMessages { events: events.clone() });
                            let control = Arc::new(ExchangeControl {
                                exchange,
                                registrations,
                                events: events.clone(),
                            });
                            let response = client
                                .execute_with_control(operation, handler, control, attachments)
                                .await
                                .map(|response| response.response)
                                .unwrap_or_else(|e| failed_response(e.to_string()));
                            let _ = events.send(ExchangeEvent::Completed { response });
                        });
                    }
                    Some(ControllerRequest::Resolve { exchange, action, respond_to }) => {
                        let result = match self.pending.remove(&exchange) {
                            Some(transaction) => {
                                info!(%controller, exchange, %action, "Resolve");
                                transaction.resolve(action).or_else(|e| {
                                    warn!(%controller, exchange, error = %e, "Resolve failed");
                                    Ok(())
                                })
                            }
                            None => {
                                warn!(%controller, exchange, "Resolve for unknown exchange");
                                Err(TransportError::UnknownExchange(exchange))
                            }
                        };
                        let _ = respond_to.send(result);
                    }
                    None => break,
                },
            }
        }

        for (exchange, transaction) in self.pending.drain() {
            warn!(%controller, exchange, "Rolling back exchange left prepared at shutdown");
            let _ = transaction.rollback();
        }
        info!(%controller, "Shutdown");
    }
}

fn apply_registration(pending: &mut HashMap<u64, PreparedTransaction>, registration: Registration) {
    match registration {
        Registration::Prepared(exchange, transaction) => {
            debug!(exchange, "Exchange prepared");
            pending.insert(exchange, transaction);
        }
        Registration::Withdrawn(exchange) => {
            debug!(exchange, "Exchange withdrawn");
            pending.remove(&exchange);
        }
    }
}

/// Forwards reports to the exchange.
struct EventMessages {
    events: mpsc::UnboundedSender<ExchangeEvent>,
}

impl OperationMessageHandler for EventMessages {
    fn handle_report(&self, severity: MessageSeverity, message: &str) {
        let _ = self.events.send(ExchangeEvent::Message {
            severity,
            message: message.to_string(),
        });
    }
}

/// Registers the prepared handle with the actor, then tells the client.
struct ExchangeControl {
    exchange: u64,
    registrations: mpsc::UnboundedSender<Registration>,
    events: mpsc::UnboundedSender<ExchangeEvent>,
}

#[async_trait]
impl TransactionControl for ExchangeControl {
    async fn operation_prepared(&self, transaction: PreparedTransaction, result: &Value) {
        if self
            .registrations
            .send(Registration::Prepared(self.exchange, transaction.clone()))
            .is_err()
        {
            warn!(exchange = self.exchange, "Actor stopped before the exchange prepared");
            let _ = transaction.rollback();
            return;
        }
        let prepared = ExchangeEvent::Prepared {
            response: result.clone(),
        };
        if self.events.send(prepared).is_err() {
            debug!(exchange = self.exchange, "Client left the exchange; rolling back");
            let _ = transaction.rollback();
            let _ = self.registrations.send(Registration::Withdrawn(self.exchange));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::ResultAction;

    fn control(
        exchange: u64,
    ) -> (
        ExchangeControl,
        mpsc::UnboundedReceiver<Registration>,
        mpsc::UnboundedReceiver<ExchangeEvent>,
    ) {
        let (registrations, registered) = mpsc::unbounded_channel();
        let (events, received) = mpsc::unbounded_channel();
        let control = ExchangeControl {
            exchange,
            registrations,
            events,
        };
        (control, registered, received)
    }

    fn drain(registered: &mut mpsc::UnboundedReceiver<Registration>) -> HashMap<u64, PreparedTransaction> {
        let mut pending = HashMap::new();
        while let Ok(registration) = registered.try_recv() {
            apply_registration(&mut pending, registration);
        }
        pending
    }

    #[tokio::test]
    async fn test_prepared_exchange_is_pending_and_reported() {
        let (control, mut registered, mut received) = control(7);
        let (transaction, _decision) = PreparedTransaction::new();

        control.operation_prepared(transaction, &Value::from("ok")).await;

        let pending = drain(&mut registered);
        assert!(pending.contains_key(&7));
        assert!(matches!(received.try_recv(), Ok(ExchangeEvent::Prepared { .. })));
    }

    #[tokio::test]
    async fn test_abandoned_exchange_is_rolled_back_and_not_kept_pending() {
        let (control, mut registered, received) = control(9);
        drop(received);
        let (transaction, decision) = PreparedTransaction::new();

        control.operation_prepared(transaction.clone(), &Value::from("ok")).await;

        assert!(drain(&mut registered).is_empty());
        assert!(transaction.is_resolved());
        assert_eq!(decision.await.unwrap(), ResultAction::Rollback);
    }
}
