//! Attribute and operation definitions: the typed schema behind the untyped [`Value`]s.

use crate::context::OperationStepHandler;
use crate::error::OperationError;
use crate::value::{ModelType, Value};
use indexmap::IndexMap;
use std::sync::Arc;

/// Schema of a single attribute or operation parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDefinition {
    name: String,
    model_type: ModelType,
    description: String,
    nillable: bool,
    min_length: Option<usize>,
    default: Option<Value>,
    allowed_values: Vec<Value>,
    value_fields: IndexMap<String, AttributeDefinition>,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, model_type: ModelType) -> Self {
        Self {
            name: name.into(),
            model_type,
            description: String::new(),
            nillable: true,
            min_length: None,
            default: None,
            allowed_values: Vec::new(),
            value_fields: IndexMap::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Marks the attribute (or parameter) as required.
    pub fn required(mut self) -> Self {
        self.nillable = false;
        self
    }

    pub fn min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn allowed_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }

    /// Declares a field of an `OBJECT` attribute.
    pub fn field(mut self, field: AttributeDefinition) -> Self {
        self.value_fields.insert(field.name.clone(), field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn is_nillable(&self) -> bool {
        self.nillable
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// Checks `value` against the definition.
    pub fn validate(&self, value: &Value) -> Result<(), OperationError> {
        if !value.is_defined() {
            if self.nillable || self.default.is_some() {
                return Ok(());
            }
            return Err(OperationError::MissingParameter(self.name.clone()));
        }
        let type_ok = match (self.model_type, value) {
            (ModelType::Undefined, _) => true,
            (ModelType::Int, v) => v.as_i64().is_some(),
            (ModelType::Double, v) => v.as_f64().is_some(),
            (ModelType::Boolean, v) => v.as_bool().is_some(),
            (expected, v) => expected == v.model_type(),
        };
        if !type_ok {
            return Err(OperationError::invalid_parameter(
                &self.name,
                format!("expected {} but found {}", self.model_type, value.model_type()),
            ));
        }
        if let Some(min) = self.min_length {
            let len = match value {
                Value::String(s) => s.chars().count(),
                Value::List(items) => items.len(),
                _ => min,
            };
            if len < min {
                return Err(OperationError::invalid_parameter(
                    &self.name,
                    format!("length {len} is shorter than the minimum {min}"),
                ));
            }
        }
        if !self.allowed_values.is_empty() && !self.allowed_values.contains(value) {
            return Err(OperationError::invalid_parameter(
                &self.name,
                format!("{value} is not one of the allowed values"),
            ));
        }
        if let Value::Object(fields) = value {
            for (field_name, field) in &self.value_fields {
                field.validate(fields.get(field_name).unwrap_or(&Value::Undefined))?;
            }
            if !self.value_fields.is_empty() {
                if let Some(unknown) = fields.keys().find(|k| !self.value_fields.contains_key(*k)) {
                    return Err(OperationError::invalid_parameter(
                        &self.name,
                        format!("unknown field '{unknown}'"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// The description node used by `read-resource-description` and operation descriptions.
    pub fn describe(&self) -> Value {
        let mut out = Value::object()
            .with("type", self.model_type.as_str())
            .with("description", self.description.as_str())
            .with("nillable", self.nillable);
        if let Some(min) = self.min_length {
            out.set("min-length", min);
        }
        if let Some(default) = &self.default {
            out.set("default", default.clone());
        }
        if !self.allowed_values.is_empty() {
            out.set("allowed", Value::List(self.allowed_values.clone()));
        }
        if !self.value_fields.is_empty() {
            let fields = out.entry("value-type");
            for (name, field) in &self.value_fields {
                fields.set(name, field.describe());
            }
        }
        out
    }
}

/// How an attribute may be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessType {
    ReadOnly,
    ReadWrite,
    /// Computed at read time by a read handler, never stored in the model.
    Metric,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::ReadOnly => "read-only",
            AccessType::ReadWrite => "read-write",
            AccessType::Metric => "metric",
        }
    }
}

/// A registered attribute: its definition, access kind and optional custom handlers.
#[derive(Clone)]
pub struct AttributeAccess {
    pub definition: AttributeDefinition,
    pub access: AccessType,
    pub read_handler: Option<Arc<dyn OperationStepHandler>>,
    pub write_handler: Option<Arc<dyn OperationStepHandler>>,
}

/// Schema of an operation: its parameters and reply.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDefinition {
    name: String,
    description: String,
    parameters: IndexMap<String, AttributeDefinition>,
    reply_type: ModelType,
    read_only: bool,
}

impl OperationDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: IndexMap::new(),
            reply_type: ModelType::Undefined,
            read_only: false,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn parameter(mut self, parameter: AttributeDefinition) -> Self {
        self.parameters.insert(parameter.name().to_string(), parameter);
        self
    }

    pub fn reply_type(mut self, reply_type: ModelType) -> Self {
        self.reply_type = reply_type;
        self
    }

    /// Read-only operations never take the controller write lock.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn parameters(&self) -> &IndexMap<String, AttributeDefinition> {
        &self.parameters
    }

    /// Validates the parameters of `operation`, ignoring the reserved keys.
    pub fn validate(&self, operation: &Value) -> Result<(), OperationError> {
        if let Some(params) = operation.as_object() {
            if let Some(unknown) = params
                .keys()
                .filter(|k| !crate::operation::is_reserved_key(k))
                .find(|k| !self.parameters.contains_key(*k))
            {
                return Err(OperationError::invalid_parameter(
                    unknown.as_str(),
                    format!("'{}' does not accept this parameter", self.name),
                ));
            }
        }
        for (name, parameter) in &self.parameters {
            parameter.validate(operation.get(name).unwrap_or(&Value::Undefined))?;
        }
        Ok(())
    }

    pub fn describe(&self) -> Value {
        let mut request = Value::object();
        for (name, parameter) in &self.parameters {
            request.set(name, parameter.describe());
        }
        let mut reply = Value::object();
        if self.reply_type != ModelType::Undefined {
            reply.set("type", self.reply_type.as_str());
        }
        Value::object()
            .with("operation-name", self.name.as_str())
            .with("description", self.description.as_str())
            .with("request-properties", request)
            .with("reply-properties", reply)
            .with("read-only", self.read_only)
    }
}
