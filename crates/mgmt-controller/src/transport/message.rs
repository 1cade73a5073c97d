//! # Transport Messages
//!
//! The request and event types exchanged between a [`super::TransportClient`] and a
//! [`super::ControllerActor`].
//!
//! One logical *exchange* carries one proxied operation:
//!
//! ```text
//!  client                                   actor
//!  ──────                                   ─────
//!  Execute { exchange: 7, .. }      ───►    runs the operation on its controller
//!                                   ◄───    Message { .. }        (zero or more)
//!                                   ◄───    Prepared { response }
//!  Resolve { exchange: 7, commit }  ───►    resolves the prepared transaction
//!                                   ◄───    Completed { response }
//! ```
//!
//! An operation that fails before preparing skips straight to `Completed`.

use crate::error::TransportError;
use crate::message::MessageSeverity;
use crate::operation::OperationAttachments;
use crate::transaction::ResultAction;
use crate::value::Value;
use tokio::sync::{mpsc, oneshot};

/// Type alias for the one-shot response channel used by the actor.
pub type Response<T> = oneshot::Sender<Result<T, TransportError>>;

/// Requests sent to a [`super::ControllerActor`].
#[derive(Debug)]
pub enum ControllerRequest {
    Execute {
        exchange: u64,
        operation: Value,
        attachments: OperationAttachments,
        events: mpsc::UnboundedSender<ExchangeEvent>,
    },
    Resolve {
        exchange: u64,
        action: ResultAction,
        respond_to: Response<()>,
    },
}

/// Events flowing back on one exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeEvent {
    Message {
        severity: MessageSeverity,
        message: String,
    },
    /// The operation prepared; `response` is its tentative response.
    Prepared { response: Value },
    /// The operation finished; `response` is its final response.
    Completed { response: Value },
}
