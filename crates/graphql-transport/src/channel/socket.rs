//! The websocket underneath a channel.
//!
//! The multiplexer only needs a sink of text frames and a stream of
//! [`SocketEvent`]s. [`connect`] provides both over tokio-tungstenite.

use std::collections::HashMap;
use std::pin::Pin;

use futures_util::future::ready;
use futures_util::{Sink, SinkExt, Stream, StreamExt, stream};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;

use crate::error::{Result, TransportError};

/// The subprotocol spoken on the channel.
pub const GRAPHQL_WS_PROTOCOL: &str = "graphql-ws";

/// Boxed outbound half of a socket.
pub type SocketSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Boxed inbound half of a socket.
pub type SocketEvents = Pin<Box<dyn Stream<Item = SocketEvent> + Send>>;

/// Something that happened on the socket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    /// The socket is open and frames can be sent.
    Open,
    /// A text frame arrived.
    Text(String),
    /// The peer closed the socket.
    Closed {
        /// The close code.
        code: CloseCode,
        /// The close reason, possibly empty.
        reason: String,
    },
    /// The socket failed.
    Error(String),
}

/// Standard WebSocket close codes as defined in RFC 6455.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CloseCode {
    /// Normal closure; the connection successfully completed.
    #[default]
    Normal,
    /// Endpoint is going away (e.g., server shutting down).
    Away,
    /// Protocol error occurred.
    Protocol,
    /// No status code was provided.
    NoStatus,
    /// Connection was closed abnormally (no close frame received).
    Abnormal,
    /// Policy violation.
    Policy,
    /// Unexpected condition prevented the request from being fulfilled.
    Error,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    /// Convert to the numeric close code.
    pub fn as_u16(&self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::Away => 1001,
            Self::Protocol => 1002,
            Self::NoStatus => 1005,
            Self::Abnormal => 1006,
            Self::Policy => 1008,
            Self::Error => 1011,
            Self::Other(code) => *code,
        }
    }

    /// Create from a numeric close code.
    pub fn from_u16(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::Away,
            1002 => Self::Protocol,
            1005 => Self::NoStatus,
            1006 => Self::Abnormal,
            1008 => Self::Policy,
            1011 => Self::Error,
            code => Self::Other(code),
        }
    }

    /// Check if the close ends the channel without an error.
    ///
    /// Only a normal closure or a close without a status is clean.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Normal | Self::NoStatus)
    }
}

/// Configuration for a channel connection.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// The websocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Payload of the `connection_init` message.
    pub init_payload: Option<Value>,
    /// Custom headers to send during the handshake.
    pub headers: HashMap<String, String>,
    /// Subprotocol requested during the handshake.
    pub subprotocol: String,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self::new("")
    }
}

impl ChannelConfig {
    /// Create a configuration for the given URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            init_payload: None,
            headers: HashMap::new(),
            subprotocol: GRAPHQL_WS_PROTOCOL.to_string(),
        }
    }

    /// Replace the URL, keeping everything else.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Set the `connection_init` payload.
    pub fn init_payload(mut self, payload: Value) -> Self {
        self.init_payload = Some(payload);
        self
    }

    /// Add a custom header for the handshake.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add multiple headers.
    pub fn headers(mut self, headers: impl IntoIterator<Item = (String, String)>) -> Self {
        self.headers.extend(headers);
        self
    }

    /// Request a different subprotocol.
    pub fn subprotocol(mut self, subprotocol: impl Into<String>) -> Self {
        self.subprotocol = subprotocol.into();
        self
    }
}

/// Build the handshake request with the subprotocol and custom headers.
fn build_request(config: &ChannelConfig) -> Result<Request> {
    let mut request = config
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

    let headers = request.headers_mut();
    for (name, value) in &config.headers {
        let header_name = http::header::HeaderName::try_from(name.as_str())?;
        let header_value = http::header::HeaderValue::try_from(value.as_str())?;
        headers.insert(header_name, header_value);
    }
    headers.insert(
        http::header::SEC_WEBSOCKET_PROTOCOL,
        http::header::HeaderValue::try_from(config.subprotocol.as_str())?,
    );

    Ok(request)
}

/// Open a websocket and adapt it to the multiplexer's socket halves.
///
/// The event stream starts with [`SocketEvent::Open`].
pub async fn connect(config: &ChannelConfig) -> Result<(SocketSink, SocketEvents)> {
    let request = build_request(config)?;
    tracing::debug!(target: "graphql_transport::channel", url = %config.url, "opening socket");

    let (ws_stream, _response) = tokio_tungstenite::connect_async(request).await?;
    let (write, read) = ws_stream.split();

    let sink = write.with(|text: String| ready(Ok::<_, TransportError>(Message::Text(text.into()))));

    let events = stream::once(ready(SocketEvent::Open)).chain(read.filter_map(|message| {
        ready(match message {
            Ok(Message::Text(text)) => Some(SocketEvent::Text(text.as_str().to_owned())),
            Ok(Message::Close(Some(frame))) => Some(SocketEvent::Closed {
                code: CloseCode::from_u16(u16::from(frame.code)),
                reason: frame.reason.as_str().to_owned(),
            }),
            Ok(Message::Close(None)) => Some(SocketEvent::Closed {
                code: CloseCode::NoStatus,
                reason: String::new(),
            }),
            Ok(Message::Binary(data)) => {
                tracing::trace!(target: "graphql_transport::channel", bytes = data.len(), "ignoring binary frame");
                None
            }
            // Pong is sent automatically by tungstenite
            Ok(_) => None,
            Err(e) => Some(SocketEvent::Error(e.to_string())),
        })
    }));

    Ok((Box::pin(sink), Box::pin(events)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_close_codes() {
        assert!(CloseCode::from_u16(1000).is_clean());
        assert!(CloseCode::from_u16(1005).is_clean());
        assert!(!CloseCode::from_u16(1006).is_clean());
        assert!(!CloseCode::from_u16(4400).is_clean());
        assert_eq!(CloseCode::from_u16(4400).as_u16(), 4400);
    }

    #[test]
    fn test_handshake_request() {
        let config = ChannelConfig::new("ws://localhost:4000/graphql").header("x-tenant", "a");
        let request = build_request(&config).unwrap();

        assert_eq!(request.headers()["sec-websocket-protocol"], "graphql-ws");
        assert_eq!(request.headers()["x-tenant"], "a");
    }

    #[test]
    fn test_invalid_url() {
        let config = ChannelConfig::new("not a url");
        assert!(matches!(
            build_request(&config),
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
