//! GraphQL response types.

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::fmt;

use crate::error::{Result, TransportError};

/// A GraphQL error returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphQLError {
    /// The error message.
    pub message: String,

    /// Locations in the document where the error occurred.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<GraphQLLocation>,

    /// Path to the field that caused the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<PathSegment>>,

    /// Additional error metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

impl fmt::Display for GraphQLError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref path) = self.path {
            write!(f, " (at ")?;
            for (i, segment) in path.iter().enumerate() {
                if i > 0 {
                    write!(f, ".")?;
                }
                match segment {
                    PathSegment::Field(name) => write!(f, "{name}")?,
                    PathSegment::Index(idx) => write!(f, "[{idx}]")?,
                }
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl std::error::Error for GraphQLError {}

impl GraphQLError {
    /// Read one entry of an `errors` array.
    ///
    /// Entries that are not well-formed error objects are still kept: the
    /// message is taken from a string entry or a `message` field, or else is
    /// the entry's JSON text, and the raw entry lands in `extensions`.
    pub fn from_value(value: Value) -> Self {
        if let Ok(error) = serde_json::from_value::<Self>(value.clone()) {
            return error;
        }
        match value {
            Value::String(message) => Self::new(message),
            other => {
                let message = other
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_owned)
                    .unwrap_or_else(|| other.to_string());
                Self {
                    extensions: Some(other),
                    ..Self::new(message)
                }
            }
        }
    }

    fn new(message: String) -> Self {
        Self {
            message,
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }
}

/// A location in a GraphQL document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphQLLocation {
    /// Line number (1-indexed).
    pub line: u32,
    /// Column number (1-indexed).
    pub column: u32,
}

/// A segment in an error path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    /// A field name.
    Field(String),
    /// An array index.
    Index(usize),
}

/// A GraphQL response: one result of a query, or one event of a subscription.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GraphQLResponse {
    /// The data returned by the operation.
    #[serde(default)]
    pub data: Option<Value>,

    /// Errors that occurred during execution. `null` is read as empty and a
    /// single non-array value as one error.
    #[serde(
        default,
        deserialize_with = "lenient_errors",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub errors: Vec<GraphQLError>,

    /// Additional response metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Value>,
}

fn lenient_errors<'de, D>(deserializer: D) -> std::result::Result<Vec<GraphQLError>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(errors_from_value(Value::deserialize(deserializer)?))
}

fn errors_from_value(value: Value) -> Vec<GraphQLError> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(entries) => entries.into_iter().map(GraphQLError::from_value).collect(),
        other => vec![GraphQLError::from_value(other)],
    }
}

impl GraphQLResponse {
    /// Check if the response contains errors.
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Get all errors as a combined message.
    pub fn error_message(&self) -> Option<String> {
        if self.errors.is_empty() {
            None
        } else {
            Some(
                self.errors
                    .iter()
                    .map(|e| e.message.as_str())
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        }
    }

    /// The payload errors as a transport error, if there are any.
    pub fn error(&self) -> Option<TransportError> {
        let message = self.error_message()?;
        Some(TransportError::Remote {
            message,
            payload: serde_json::to_value(&self.errors).unwrap_or(Value::Null),
        })
    }

    /// Parse the data as a specific type.
    ///
    /// Returns an error if the response has errors or if parsing fails.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T> {
        if let Some(error) = self.error() {
            return Err(error);
        }

        match &self.data {
            Some(data) => serde_json::from_value(data.clone()).map_err(|e| {
                TransportError::Json(format!("Failed to deserialize GraphQL response: {e}"))
            }),
            None => Err(TransportError::Protocol(
                "No data in GraphQL response".into(),
            )),
        }
    }

    /// Read a response out of a subscription payload.
    ///
    /// Never fails: an object is split into `data`, `errors` and
    /// `extensions`, and any other non-null value is taken as the data.
    pub fn from_payload(payload: Value) -> Self {
        match payload {
            Value::Object(mut fields) => Self {
                data: fields.remove("data").filter(|data| !data.is_null()),
                errors: fields
                    .remove("errors")
                    .map(errors_from_value)
                    .unwrap_or_default(),
                extensions: fields.remove("extensions").filter(|ext| !ext.is_null()),
            },
            Value::Null => Self::default(),
            data => Self {
                data: Some(data),
                ..Self::default()
            },
        }
    }
}
