//! # Mock Proxy Controller
//!
//! [`MockProxyController`] stands in for a child controller. It answers forwarded operations
//! from a queue of expectations and records what it received and how each prepared
//! exchange was resolved, so tests can drive the two-phase protocol without a second
//! controller.
//!
//! | Expectation | What the parent sees |
//! |---|---|
//! | `return_prepared(result)` | a prepared child; the decision is recorded, then the child completes |
//! | `return_failed(description)` | a child that failed before preparing |
//! | `never_respond()` | a child that never answers (for timeout and cancellation tests) |
//!
//! ```rust
//! use mgmt_controller::mock::MockProxyController;
//! use mgmt_controller::{PathAddress, Value};
//!
//! let mock = MockProxyController::new(PathAddress::pairs(&[("server", "serverA")]));
//! mock.expect_execute().return_prepared(Value::from("ok"));
//! mock.expect_execute().return_failed("boom");
//! assert_eq!(mock.remaining(), 2);
//! ```

use crate::address::PathAddress;
use crate::message::OperationMessageHandler;
use crate::operation::{failed_response, names, success_response, OperationAttachments};
use crate::proxy::{ProxyController, ProxyOperationControl};
use crate::transaction::{PreparedTransaction, ResultAction};
use crate::value::Value;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

enum Expectation {
    Prepared(Value),
    Failed(String),
    NeverRespond,
}

/// A scripted [`ProxyController`].
pub struct MockProxyController {
    address: PathAddress,
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
    received: Arc<Mutex<Vec<Value>>>,
    decisions: Arc<Mutex<Vec<ResultAction>>>,
}

impl MockProxyController {
    pub fn new(address: PathAddress) -> Self {
        Self {
            address,
            expectations: Arc::new(Mutex::new(VecDeque::new())),
            received: Arc::new(Mutex::new(Vec::new())),
            decisions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Expects one more forwarded operation.
    pub fn expect_execute(&self) -> ExecuteExpectationBuilder {
        ExecuteExpectationBuilder {
            expectations: self.expectations.clone(),
        }
    }

    /// Operations received so far, with addresses relative to the proxy node.
    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    /// Decisions applied to prepared exchanges, in the order they arrived.
    pub fn decisions(&self) -> Vec<ResultAction> {
        self.decisions.lock().clone()
    }

    pub fn remaining(&self) -> usize {
        self.expectations.lock().len()
    }

    /// Panics unless every expectation was consumed.
    pub fn verify(&self) {
        let remaining = self.remaining();
        if remaining > 0 {
            panic!("Not all expectations were met. {remaining} remaining");
        }
    }
}

#[async_trait]
impl ProxyController for MockProxyController {
    fn proxy_node_address(&self) -> &PathAddress {
        &self.address
    }

    async fn execute(
        &self,
        operation: Value,
        _handler: Arc<dyn OperationMessageHandler>,
        control: Arc<dyn ProxyOperationControl>,
        _attachments: OperationAttachments,
    ) {
        let expectation = self.expectations.lock().pop_front();
        self.received.lock().push(operation.clone());

        match expectation {
            Some(Expectation::Prepared(result)) => {
                let (transaction, decision) = PreparedTransaction::new();
                let tentative = success_response(result.clone());
                let decisions = self.decisions.clone();
                control.operation_prepared(transaction, &tentative).await;
                tokio::spawn(async move {
                    let action = decision.await.unwrap_or(ResultAction::Rollback);
                    decisions.lock().push(action);
                    let response = match action {
                        ResultAction::Keep => success_response(result),
                        ResultAction::Rollback => failed_response("Operation was rolled back")
                            .with(names::ROLLED_BACK, true),
                    };
                    control.operation_completed(&response).await;
                });
            }
            Some(Expectation::Failed(description)) => {
                control.operation_failed(&failed_response(description)).await;
            }
            Some(Expectation::NeverRespond) => {
                tokio::spawn(async move {
                    let _control = control;
                    std::future::pending::<()>().await;
                });
            }
            None => panic!("Unexpected operation forwarded to {}: {operation}", self.address),
        }
    }
}

/// Builder for one forwarded-operation expectation.
pub struct ExecuteExpectationBuilder {
    expectations: Arc<Mutex<VecDeque<Expectation>>>,
}

impl ExecuteExpectationBuilder {
    /// The child prepares with `result` and then waits for the parent's decision.
    pub fn return_prepared(self, result: impl Into<Value>) {
        self.expectations
            .lock()
            .push_back(Expectation::Prepared(result.into()));
    }

    /// The child fails before preparing.
    pub fn return_failed(self, description: impl Into<String>) {
        self.expectations
            .lock()
            .push_back(Expectation::Failed(description.into()));
    }

    /// The child never answers.
    pub fn never_respond(self) {
        self.expectations.lock().push_back(Expectation::NeverRespond);
    }
}
