//! GraphQL operation types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A GraphQL operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A query operation (read-only).
    #[default]
    Query,
    /// A mutation operation (modifies data).
    Mutation,
    /// A subscription operation (real-time updates).
    Subscription,
}

/// A GraphQL operation: document, variables and operation name.
///
/// Serializes to `{"query": ..., "variables": ..., "operationName": ...}`,
/// which is both the HTTP request body and the `start` payload on a channel.
/// The query text is opaque; it is never parsed or validated here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// The GraphQL document.
    pub query: String,

    /// Optional variables for the document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,

    /// Optional operation name (for documents with multiple operations).
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        rename = "operationName"
    )]
    pub operation_name: Option<String>,

    #[serde(skip)]
    pub(crate) operation_type: OperationType,
}

impl Operation {
    /// Create a new query operation.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let operation = Operation::query("query GetUsers { users { id name } }");
    /// ```
    pub fn query(query: impl Into<String>) -> Self {
        Self::with_type(query, OperationType::Query)
    }

    /// Create a new mutation operation.
    pub fn mutation(query: impl Into<String>) -> Self {
        Self::with_type(query, OperationType::Mutation)
    }

    /// Create a new subscription operation.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let operation = Operation::subscription("subscription { ticks { at } }")
    ///     .variable("interval", 5);
    /// ```
    pub fn subscription(query: impl Into<String>) -> Self {
        Self::with_type(query, OperationType::Subscription)
    }

    /// Create an operation from a raw document.
    ///
    /// The operation type is inferred from the leading keyword, defaulting
    /// to a query.
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        let operation_type = Self::infer_operation_type(&query);
        Self {
            query,
            variables: None,
            operation_name: None,
            operation_type,
        }
    }

    fn with_type(query: impl Into<String>, operation_type: OperationType) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
            operation_type,
        }
    }

    /// Set a single variable.
    ///
    /// Values that cannot be serialized are skipped.
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        let variables = self
            .variables
            .get_or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(map) = variables
            && let Ok(value) = serde_json::to_value(value)
        {
            map.insert(name.into(), value);
        }
        self
    }

    /// Replace all variables with a serializable value.
    pub fn variables(mut self, variables: impl Serialize) -> Self {
        self.variables = serde_json::to_value(variables).ok();
        self
    }

    /// Replace all variables from a map.
    pub fn variables_map(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = Some(Value::Object(variables.into_iter().collect()));
        self
    }

    /// Set the operation name.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Get the operation type.
    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Check if this is a subscription.
    pub fn is_subscription(&self) -> bool {
        self.operation_type == OperationType::Subscription
    }

    /// The JSON request body for this operation.
    pub fn to_body(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn infer_operation_type(query: &str) -> OperationType {
        let trimmed = query.trim_start();
        if trimmed.starts_with("subscription") {
            OperationType::Subscription
        } else if trimmed.starts_with("mutation") {
            OperationType::Mutation
        } else {
            OperationType::Query
        }
    }
}
