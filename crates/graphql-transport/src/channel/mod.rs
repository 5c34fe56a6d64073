//! Multiplexed subscriptions over a websocket (`graphql-ws` subprotocol).
//!
//! A [`ChannelMultiplexer`] owns one socket and any number of subscriptions
//! on it. The session starts with `connection_init`; once the server answers
//! `connection_ack` the connection callback receives a [`Subscriber`], and
//! every subscription started through it is addressed by a string id that is
//! never reused on the channel.
//!
//! ```text
//! → {type:"connection_init", payload}
//! ← {type:"connection_ack"}            ← {type:"connection_error", payload}
//! ← {type:"ka"}
//! → {type:"start", id, payload:{query, variables, operationName}}
//! ← {type:"data", id, payload:{data, errors?}}
//! ← {type:"error", id, payload}        ← {type:"complete", id}
//! → {type:"stop", id}                  → {type:"connection_terminate"}
//! ```
//!
//! When the socket closes every remaining subscription receives exactly one
//! terminal message: [`SubscriptionMessage::Complete`] after a clean close
//! (codes 1000 and 1005) and [`SubscriptionMessage::Disconnected`] otherwise.

mod message;
mod multiplexer;
mod operation;
mod socket;

pub use message::{ClientMessage, ServerMessage};
pub use multiplexer::{
    ChannelMultiplexer, ConnectionEvent, ConnectionState, Subscriber, SubscriptionMessage,
    Unsubscribe,
};
pub(crate) use operation::run_channel_operation;
pub use socket::{
    ChannelConfig, CloseCode, GRAPHQL_WS_PROTOCOL, SocketEvent, SocketEvents, SocketSink, connect,
};
