//! # Two-Phase Transaction Control
//!
//! When every step of an operation has run without failure the operation is *prepared*:
//! its model changes are staged and its runtime effects applied, but nothing is published
//! yet. The engine then hands a [`PreparedTransaction`] and the tentative response to the
//! caller's [`TransactionControl`] and waits for a decision:
//!
//! - [`PreparedTransaction::commit`] publishes the staged model and keeps runtime effects;
//! - [`PreparedTransaction::rollback`] discards both;
//! - dropping every clone of the handle without deciding counts as a rollback.
//!
//! The handle is resolved at most once. A second call returns
//! [`TransactionError::AlreadyResolved`] and has no effect, which keeps a duplicated
//! commit or rollback message harmless.
//!
//! Proxies use the same handle to take part in a parent controller's transaction: the
//! child prepares, relays its handle upwards, and is committed or rolled back with the
//! parent (see [`crate::proxy`]).

use crate::error::TransactionError;
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// The decision applied to a prepared operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultAction {
    Keep,
    Rollback,
}

impl fmt::Display for ResultAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultAction::Keep => f.write_str("commit"),
            ResultAction::Rollback => f.write_str("rollback"),
        }
    }
}

struct Decision {
    id: String,
    sender: Mutex<Option<oneshot::Sender<ResultAction>>>,
}

/// Handle on a prepared operation. Cloneable; resolving any clone resolves all of them.
#[derive(Clone)]
pub struct PreparedTransaction {
    inner: Arc<Decision>,
}

impl fmt::Debug for PreparedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedTransaction")
            .field("id", &self.inner.id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

impl PreparedTransaction {
    /// Creates a handle and the receiver on which the participant awaits the decision.
    pub fn new() -> (Self, oneshot::Receiver<ResultAction>) {
        let (sender, receiver) = oneshot::channel();
        let handle = Self {
            inner: Arc::new(Decision {
                id: uuid::Uuid::new_v4().to_string(),
                sender: Mutex::new(Some(sender)),
            }),
        };
        (handle, receiver)
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    pub fn commit(&self) -> Result<(), TransactionError> {
        self.resolve(ResultAction::Keep)
    }

    pub fn rollback(&self) -> Result<(), TransactionError> {
        self.resolve(ResultAction::Rollback)
    }

    pub fn resolve(&self, action: ResultAction) -> Result<(), TransactionError> {
        let sender = self
            .inner
            .sender
            .lock()
            .take()
            .ok_or_else(|| TransactionError::AlreadyResolved(self.inner.id.clone()))?;
        debug!(transaction = %self.inner.id, %action, "Resolving prepared transaction");
        sender
            .send(action)
            .map_err(|_| TransactionError::ParticipantGone(self.inner.id.clone()))
    }
}

/// Decides the fate of prepared operations.
#[async_trait]
pub trait TransactionControl: Send + Sync {
    /// Called once when the operation prepares. Implementations must eventually resolve
    /// `transaction` (or drop it, which rolls back).
    async fn operation_prepared(&self, transaction: PreparedTransaction, result: &Value);
}

/// The default policy: commit as soon as the operation prepares.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOnPrepared;

#[async_trait]
impl TransactionControl for CommitOnPrepared {
    async fn operation_prepared(&self, transaction: PreparedTransaction, _result: &Value) {
        if let Err(e) = transaction.commit() {
            warn!(error = %e, "Commit of prepared operation failed");
        }
    }
}

/// Rolls back every prepared operation; runs an operation without keeping its effects.
#[derive(Debug, Clone, Copy, Default)]
pub struct RollbackOnPrepared;

#[async_trait]
impl TransactionControl for RollbackOnPrepared {
    async fn operation_prepared(&self, transaction: PreparedTransaction, _result: &Value) {
        if let Err(e) = transaction.rollback() {
            warn!(error = %e, "Rollback of prepared operation failed");
        }
    }
}
