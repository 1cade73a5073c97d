//! # Transport Client
//!
//! The client half of the transport: starts exchanges on a [`super::ControllerActor`] and
//! resolves them.

use super::message::{ControllerRequest, ExchangeEvent};
use crate::error::TransportError;
use crate::operation::OperationAttachments;
use crate::transaction::ResultAction;
use crate::value::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// A cloneable handle on a controller actor. Clones share the exchange id sequence.
#[derive(Clone)]
pub struct TransportClient {
    sender: mpsc::Sender<ControllerRequest>,
    next_exchange: Arc<AtomicU64>,
}

/// One in-flight exchange: its id and the events the actor sends back.
#[derive(Debug)]
pub struct Exchange {
    pub id: u64,
    pub events: mpsc::UnboundedReceiver<ExchangeEvent>,
}

impl Exchange {
    /// The next event, or `None` once the actor dropped the exchange.
    pub async fn next_event(&mut self) -> Option<ExchangeEvent> {
        self.events.recv().await
    }
}

impl TransportClient {
    pub fn new(sender: mpsc::Sender<ControllerRequest>) -> Self {
        Self {
            sender,
            next_exchange: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Starts an exchange for `operation`.
    pub async fn execute(
        &self,
        operation: Value,
        attachments: OperationAttachments,
    ) -> Result<Exchange, TransportError> {
        let id = self.next_exchange.fetch_add(1, Ordering::Relaxed);
        let (events, receiver) = mpsc::unbounded_channel();
        self.sender
            .send(ControllerRequest::Execute {
                exchange: id,
                operation,
                attachments,
                events,
            })
            .await
            .map_err(|_| TransportError::ActorClosed)?;
        Ok(Exchange {
            id,
            events: receiver,
        })
    }

    /// Sends the decision for a prepared exchange.
    pub async fn resolve(&self, exchange: u64, action: ResultAction) -> Result<(), TransportError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(ControllerRequest::Resolve {
                exchange,
                action,
                respond_to,
            })
            .await
            .map_err(|_| TransportError::ActorClosed)?;
        response.await.map_err(|_| TransportError::ActorDropped)?
    }
}
