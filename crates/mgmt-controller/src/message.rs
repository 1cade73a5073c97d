//! Side-channel for progress and warning messages reported while an operation runs.

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Warn,
    Error,
}

/// Receives messages reported by operation steps. Proxies forward child messages here.
pub trait OperationMessageHandler: Send + Sync {
    fn handle_report(&self, severity: MessageSeverity, message: &str);
}

/// Drops every message.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardMessages;

impl OperationMessageHandler for DiscardMessages {
    fn handle_report(&self, _severity: MessageSeverity, _message: &str) {}
}

/// Writes messages to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMessages;

impl OperationMessageHandler for LogMessages {
    fn handle_report(&self, severity: MessageSeverity, message: &str) {
        match severity {
            MessageSeverity::Info => info!(message, "Operation report"),
            MessageSeverity::Warn => warn!(message, "Operation report"),
            MessageSeverity::Error => error!(message, "Operation report"),
        }
    }
}
