//! Error types for the transport.

use serde_json::Value;
use thiserror::Error;

/// Errors surfaced to observers and callers.
///
/// Every variant is cheap to clone so a single connection failure can be
/// delivered to every subscription sharing the channel.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// The HTTP request could not be performed.
    #[error("HTTP request error: {0}")]
    Request(String),

    /// Connection refused or failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The request timed out in the underlying client.
    #[error("Request timed out")]
    Timeout,

    /// I/O error while reading a body.
    #[error("I/O error: {0}")]
    Io(String),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Invalid header name or value.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Invalid URL, or a handoff address that cannot be mapped.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A frame or body could not be parsed as JSON.
    #[error("JSON error: {0}")]
    Json(String),

    /// The server answered with a status that is neither a result nor a handoff.
    #[error("Request rejected with HTTP {status}")]
    Rejected {
        /// The HTTP status code.
        status: u16,
        /// The response body, if it could be read.
        body: Option<String>,
    },

    /// A `201` handoff arrived without a location header.
    #[error("Location header missing from handoff response")]
    MissingLocation,

    /// A `201` handoff arrived for an operation that cannot be handed off.
    #[error("Unexpected handoff to {0}")]
    UnexpectedHandoff(String),

    /// The remote party broke the message protocol.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    /// An error reported by the remote party inside a message payload.
    #[error("GraphQL error: {message}")]
    Remote {
        /// Combined error message.
        message: String,
        /// The raw payload the error was built from.
        payload: Value,
    },

    /// The channel closed with a non-normal close code.
    #[error("Connection closed with code {code}{}", reason_suffix(.reason))]
    ConnectionClosed {
        /// The websocket close code.
        code: u16,
        /// The close reason sent by the peer.
        reason: String,
    },
}

fn reason_suffix(reason: &str) -> String {
    if reason.is_empty() {
        String::new()
    } else {
        format!(": {reason}")
    }
}

impl TransportError {
    /// Build a remote error from a `connection_error` or `error` payload.
    ///
    /// Payloads may be a single error object, an array of them, or a bare
    /// string; messages are joined with `"; "`.
    pub fn remote(payload: Value) -> Self {
        let message = match &payload {
            Value::String(message) => message.clone(),
            Value::Array(errors) => errors
                .iter()
                .filter_map(|e| e.get("message").and_then(Value::as_str))
                .collect::<Vec<_>>()
                .join("; "),
            other => other
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| other.to_string()),
        };
        Self::Remote { message, payload }
    }

    /// The HTTP status if this is a rejected response.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if err.is_decode() {
            Self::Json(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for TransportError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for TransportError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

/// A specialized Result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
