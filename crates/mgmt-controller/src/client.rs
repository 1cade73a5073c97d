//! # Controller Client
//!
//! A cheap, cloneable handle pairing a controller with the [`AccessToken`] that allows
//! using it.

use crate::controller::{AccessToken, ModelController};
use crate::error::ControllerError;
use crate::message::{DiscardMessages, OperationMessageHandler};
use crate::operation::{Operation, OperationAttachments, OperationResponse};
use crate::transaction::{CommitOnPrepared, TransactionControl};
use crate::value::Value;
use std::sync::Arc;

#[derive(Clone)]
pub struct ControllerClient {
    controller: Arc<dyn ModelController>,
    access: AccessToken,
}

impl ControllerClient {
    pub fn new(controller: Arc<dyn ModelController>, access: AccessToken) -> Self {
        Self { controller, access }
    }

    /// Executes `operation` and commits it if it prepares.
    pub async fn execute(&self, operation: Value) -> Result<Value, ControllerError> {
        self.controller
            .execute(
                &self.access,
                operation,
                Arc::new(DiscardMessages),
                Arc::new(CommitOnPrepared),
                OperationAttachments::default(),
            )
            .await
    }

    /// Executes `operation`, leaving the commit decision to `control`.
    pub async fn execute_with_control(
        &self,
        operation: Value,
        handler: Arc<dyn OperationMessageHandler>,
        control: Arc<dyn TransactionControl>,
        attachments: OperationAttachments,
    ) -> Result<OperationResponse, ControllerError> {
        let operation = Operation::new(operation).with_attachments(attachments);
        self.controller
            .execute_operation(&self.access, operation, handler, control)
            .await
    }

    /// Streaming variant of [`ControllerClient::execute`].
    pub async fn execute_operation(&self, operation: Operation) -> Result<OperationResponse, ControllerError> {
        self.controller
            .execute_operation(
                &self.access,
                operation,
                Arc::new(DiscardMessages),
                Arc::new(CommitOnPrepared),
            )
            .await
    }
}
