//! # Operations and Responses
//!
//! Well-known keys, a builder for operation values, the response shape and the out-of-band
//! payloads (input streams, result streams, cancellation) that travel with an operation.
//!
//! An operation is an object value:
//!
//! ```text
//! { "operation": "write-attribute",
//!   "address": [{"serverchild": "svrA"}, {"child": "childA"}],
//!   "name": "value",
//!   "value": "new" }
//! ```
//!
//! A response is an object value with `outcome` (`success` / `failed`), `result`, and on
//! failure `failure-description` and `rolled-back`.

use crate::address::PathAddress;
use crate::error::OperationError;
use crate::value::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Well-known operation and response keys, and the names of the global operations.
pub mod names {
    pub const OP: &str = "operation";
    pub const ADDRESS: &str = "address";
    pub const OPERATION_HEADERS: &str = "operation-headers";
    pub const OUTCOME: &str = "outcome";
    pub const SUCCESS: &str = "success";
    pub const FAILED: &str = "failed";
    pub const RESULT: &str = "result";
    pub const FAILURE_DESCRIPTION: &str = "failure-description";
    pub const ROLLED_BACK: &str = "rolled-back";
    pub const RESPONSE_HEADERS: &str = "response-headers";
    pub const PROCESS_STATE: &str = "process-state";

    pub const NAME: &str = "name";
    pub const VALUE: &str = "value";
    pub const RECURSIVE: &str = "recursive";
    pub const PROXIES: &str = "proxies";
    pub const INCLUDE_DEFAULTS: &str = "include-defaults";
    pub const OPERATIONS: &str = "operations";
    pub const CHILD_TYPE: &str = "child-type";
    pub const STEPS: &str = "steps";

    pub const READ_RESOURCE: &str = "read-resource";
    pub const READ_ATTRIBUTE: &str = "read-attribute";
    pub const WRITE_ATTRIBUTE: &str = "write-attribute";
    pub const UNDEFINE_ATTRIBUTE: &str = "undefine-attribute";
    pub const READ_CHILDREN_NAMES: &str = "read-children-names";
    pub const READ_CHILDREN_TYPES: &str = "read-children-types";
    pub const READ_OPERATION_NAMES: &str = "read-operation-names";
    pub const READ_OPERATION_DESCRIPTION: &str = "read-operation-description";
    pub const READ_RESOURCE_DESCRIPTION: &str = "read-resource-description";
    pub const COMPOSITE: &str = "composite";
    pub const VALIDATE_OPERATION: &str = "validate-operation";
    pub const ADD: &str = "add";
    pub const REMOVE: &str = "remove";
}

/// Keys of an operation value that are never operation parameters.
pub fn is_reserved_key(key: &str) -> bool {
    matches!(key, names::OP | names::ADDRESS | names::OPERATION_HEADERS)
}

/// Fluent builder for operation values.
///
/// ```rust
/// use mgmt_controller::{OperationBuilder, PathAddress};
///
/// let op = OperationBuilder::new("read-resource")
///     .address(&PathAddress::pairs(&[("profile", "profileA")]))
///     .param("recursive", true)
///     .build();
/// assert_eq!(op.get("recursive").and_then(|v| v.as_bool()), Some(true));
/// ```
#[derive(Debug, Clone)]
pub struct OperationBuilder {
    operation: Value,
}

impl OperationBuilder {
    pub fn new(name: &str) -> Self {
        let operation = Value::object()
            .with(names::OP, name)
            .with(names::ADDRESS, Value::list());
        Self { operation }
    }

    pub fn address(mut self, address: &PathAddress) -> Self {
        self.operation.set(names::ADDRESS, address.to_value());
        self
    }

    pub fn param(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.operation.set(name, value);
        self
    }

    pub fn build(self) -> Value {
        self.operation
    }
}

/// Name and address of an operation value. Wildcards belong to registrations only, so an
/// address containing `*` is rejected.
pub fn parse_operation(operation: &Value) -> Result<(String, PathAddress), OperationError> {
    let name = operation
        .get(names::OP)
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| OperationError::MissingParameter(names::OP.to_string()))?;
    let address = PathAddress::from_value(operation.get(names::ADDRESS).unwrap_or(&Value::Undefined))?;
    if !address.is_concrete() {
        return Err(OperationError::InvalidAddress(format!(
            "{address} contains a wildcard"
        )));
    }
    Ok((name.to_string(), address))
}

/// Reads an optional boolean parameter.
pub fn bool_param(operation: &Value, name: &str, default: bool) -> Result<bool, OperationError> {
    match operation.get(name) {
        None | Some(Value::Undefined) => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| OperationError::invalid_parameter(name, "expected a boolean")),
    }
}

/// Reads a required string parameter.
pub fn string_param<'a>(operation: &'a Value, name: &str) -> Result<&'a str, OperationError> {
    match operation.get(name) {
        None | Some(Value::Undefined) => Err(OperationError::MissingParameter(name.to_string())),
        Some(v) => v
            .as_str()
            .ok_or_else(|| OperationError::invalid_parameter(name, "expected a string")),
    }
}

/// A successful response carrying `result`.
pub fn success_response(result: Value) -> Value {
    Value::object()
        .with(names::OUTCOME, names::SUCCESS)
        .with(names::RESULT, result)
}

/// A failed response.
pub fn failed_response(description: impl Into<Value>) -> Value {
    Value::object()
        .with(names::OUTCOME, names::FAILED)
        .with(names::FAILURE_DESCRIPTION, description)
}

pub fn is_success(response: &Value) -> bool {
    response.get(names::OUTCOME).and_then(Value::as_str) == Some(names::SUCCESS)
}

/// The failure description of a response, rendered as text.
pub fn failure_description(response: &Value) -> Option<String> {
    response
        .get(names::FAILURE_DESCRIPTION)
        .filter(|v| v.is_defined())
        .map(Value::to_plain_string)
}

/// Lets a caller abandon an operation before it prepares.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    cancelled: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Out-of-band inputs of an operation.
#[derive(Debug, Clone, Default)]
pub struct OperationAttachments {
    input_streams: Vec<Vec<u8>>,
    cancellation: Option<Cancellation>,
}

impl OperationAttachments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input_stream(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.input_streams.push(bytes.into());
        self
    }

    pub fn with_cancellation(mut self, cancellation: Cancellation) -> Self {
        self.cancellation = Some(cancellation);
        self
    }

    pub fn input_streams(&self) -> &[Vec<u8>] {
        &self.input_streams
    }

    pub fn cancellation(&self) -> Option<&Cancellation> {
        self.cancellation.as_ref()
    }

    /// Same input streams, no cancellation; for forwarding over a transport.
    pub fn detached(&self) -> Self {
        Self {
            input_streams: self.input_streams.clone(),
            cancellation: None,
        }
    }
}

/// A result stream attached by a step; `uuid` is referenced from the response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseStream {
    pub uuid: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// An operation together with its attachments, for the streaming execute variant.
#[derive(Debug, Clone, Default)]
pub struct Operation {
    pub operation: Value,
    pub attachments: OperationAttachments,
}

impl Operation {
    pub fn new(operation: Value) -> Self {
        Self {
            operation,
            attachments: OperationAttachments::default(),
        }
    }

    pub fn with_attachments(mut self, attachments: OperationAttachments) -> Self {
        self.attachments = attachments;
        self
    }
}

/// The response of the streaming execute variant.
#[derive(Debug, Clone)]
pub struct OperationResponse {
    pub response: Value,
    pub streams: Vec<ResponseStream>,
}

impl OperationResponse {
    pub fn stream(&self, uuid: &str) -> Option<&ResponseStream> {
        self.streams.iter().find(|s| s.uuid == uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operation() {
        let op = OperationBuilder::new("read-resource")
            .address(&PathAddress::pairs(&[("server", "serverA")]))
            .build();
        let (name, address) = parse_operation(&op).unwrap();
        assert_eq!(name, "read-resource");
        assert_eq!(address.to_string(), "/server=serverA");

        let nameless = Value::object().with("address", Value::list());
        assert_eq!(
            parse_operation(&nameless),
            Err(OperationError::MissingParameter("operation".into()))
        );

        let wildcard = OperationBuilder::new("add")
            .address(&PathAddress::pairs(&[("item", "*")]))
            .build();
        assert!(matches!(
            parse_operation(&wildcard),
            Err(OperationError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_params() {
        let op = Value::object().with("recursive", "true").with("name", 3);
        assert_eq!(bool_param(&op, "recursive", false), Ok(true));
        assert_eq!(bool_param(&op, "proxies", false), Ok(false));
        assert!(string_param(&op, "name").is_err());
        assert!(string_param(&op, "missing").is_err());
    }

    #[tokio::test]
    async fn test_cancellation_wakes_waiters() {
        let cancellation = Cancellation::new();
        let waiter = {
            let c = cancellation.clone();
            tokio::spawn(async move { c.cancelled().await })
        };
        tokio::task::yield_now().await;
        cancellation.cancel();
        waiter.await.unwrap();
        assert!(cancellation.is_cancelled());
    }
}
