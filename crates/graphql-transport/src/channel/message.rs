//! Wire messages of the `graphql-ws` subprotocol.
//!
//! Every message is a JSON object tagged by its `type` field.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graphql::Operation;

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens the session. Sent once the socket is open.
    ConnectionInit {
        /// Application-defined payload, typically credentials.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// Starts a subscription under a client-allocated id.
    Start {
        /// The subscription id.
        id: String,
        /// The operation to run.
        payload: Operation,
    },
    /// Stops a running subscription.
    Stop {
        /// The subscription id.
        id: String,
    },
    /// Ends the session.
    ConnectionTerminate,
}

impl ClientMessage {
    /// Serialize for sending as a text frame.
    pub fn to_text(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The session was accepted.
    ConnectionAck {
        /// Optional acknowledgement payload.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    /// The session or a session-level request failed.
    ConnectionError {
        /// The error payload.
        #[serde(default)]
        payload: Value,
    },
    /// Keep-alive. Carries no information.
    #[serde(rename = "ka")]
    KeepAlive,
    /// One result of a subscription.
    Data {
        /// The subscription id.
        id: String,
        /// The result, `{data, errors?}`, read leniently when routed.
        #[serde(default)]
        payload: Value,
    },
    /// The subscription failed. The server may still send `complete`.
    Error {
        /// The subscription id.
        id: String,
        /// The error payload.
        #[serde(default)]
        payload: Value,
    },
    /// The subscription ended.
    Complete {
        /// The subscription id.
        id: String,
    },
}

impl ServerMessage {
    /// The subscription this message is addressed to, if any.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            Self::Data { id, .. } | Self::Error { id, .. } | Self::Complete { id } => Some(id),
            _ => None,
        }
    }
}
