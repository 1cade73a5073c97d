//! # Controller Errors
//!
//! Error types shared by the engine. They follow the failure taxonomy of the operation
//! pipeline:
//!
//! - [`OperationError`]: raised by steps and validation. Almost always *recoverable*: the
//!   operation is rolled back and the error text becomes the response's
//!   `failure-description`. A [`OperationError::ContractViolation`] is the exception: it
//!   means a handler broke the pipeline contract and is treated as fatal.
//! - [`ControllerError`]: the only errors that escape `execute` itself.
//! - [`RegistrationError`]: conflicts found while building the registration tree at boot.
//! - [`TransactionError`]: misuse of a prepared-transaction handle.
//! - [`TransportError`]: the channel to a controller actor failed.

use crate::address::PathAddress;
use std::time::Duration;

/// A failure raised while validating or executing an operation step.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OperationError {
    #[error("{0}")]
    Failed(String),
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
    #[error("No resource definition is registered for address {0}")]
    UnknownAddress(PathAddress),
    #[error("No operation named '{name}' exists at address {address}")]
    UnknownOperation { name: String, address: PathAddress },
    #[error("Resource {0} does not exist")]
    ResourceNotFound(PathAddress),
    #[error("Duplicate resource {0}")]
    DuplicateResource(PathAddress),
    #[error("Resource {0} was changed by a concurrent operation")]
    ConcurrentModification(PathAddress),
    #[error("Missing required parameter '{0}'")]
    MissingParameter(String),
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("Timed out after {timeout:?} waiting for {what}")]
    Timeout { timeout: Duration, what: String },
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Proxied operation failed: {0}")]
    Proxy(String),
    #[error("Operation step contract violated: {0}")]
    ContractViolation(String),
}

impl OperationError {
    pub fn failed(message: impl Into<String>) -> Self {
        OperationError::Failed(message.into())
    }

    pub fn invalid_parameter(name: impl Into<String>, reason: impl Into<String>) -> Self {
        OperationError::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Fatal errors leave the process degraded instead of producing a failed response.
    pub fn is_fatal(&self) -> bool {
        matches!(self, OperationError::ContractViolation(_))
    }
}

/// Errors returned by `ModelController::execute` instead of a response.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ControllerError {
    #[error("Access denied: the caller does not hold this controller's access token")]
    AccessDenied,
    #[error("Fatal failure executing operation: {0}")]
    Fatal(String),
}

/// Boot-time registration conflicts.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistrationError {
    #[error("Operation '{name}' is already registered at {address}")]
    DuplicateOperation { name: String, address: PathAddress },
    #[error("Attribute '{name}' is already registered at {address}")]
    DuplicateAttribute { name: String, address: PathAddress },
    #[error("A resource is already registered at {0}")]
    DuplicateSubModel(PathAddress),
    #[error("No resource is registered at parent address {0}")]
    NoSuchParent(PathAddress),
    #[error("Address {0} is handled by a proxy and cannot be extended locally")]
    ProxyConflict(PathAddress),
    #[error("The root resource cannot be registered as a sub-model")]
    RootPattern,
}

/// Misuse of a prepared-transaction handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransactionError {
    #[error("Transaction {0} was already committed or rolled back")]
    AlreadyResolved(String),
    #[error("Transaction {0} has no participant waiting for a decision")]
    ParticipantGone(String),
}

/// Errors raised by the transport between a proxy and a controller actor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Controller actor closed")]
    ActorClosed,
    #[error("Controller actor dropped response channel")]
    ActorDropped,
    #[error("No prepared exchange {0}")]
    UnknownExchange(u64),
    #[error("Exchange closed before the controller answered")]
    ExchangeClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_contract_violations_are_fatal() {
        assert!(OperationError::ContractViolation("x".into()).is_fatal());
        assert!(!OperationError::failed("boom").is_fatal());
        assert!(!OperationError::Cancelled.is_fatal());
    }

    #[test]
    fn test_messages() {
        let err = OperationError::UnknownOperation {
            name: "frob".into(),
            address: PathAddress::pairs(&[("profile", "a")]),
        };
        assert_eq!(
            err.to_string(),
            "No operation named 'frob' exists at address /profile=a"
        );
    }
}
