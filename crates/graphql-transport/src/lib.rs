//! Client transport for GraphQL-shaped operations.
//!
//! This crate runs operations against a server over plain HTTP and follows
//! the server when it hands a long-running operation off to another
//! transport:
//!
//! - **Unary requests**: `POST {query, variables, operationName}`; a `200`
//!   body is the result
//! - **Handoff**: a `201` with a `Location` header continues the operation
//!   as a server-sent event stream, a newline-delimited JSON stream, or a
//!   websocket channel
//! - **Channels**: many subscriptions multiplexed on one websocket using the
//!   `graphql-ws` subprotocol
//!
//! Every streaming operation reports to an [`Observer`]: zero or more
//! `on_next` calls followed by exactly one of `on_error` or `on_complete`.
//! The [`OperationHandle`] returned alongside cancels the operation; a
//! cancelled operation completes.
//!
//! # Running operations
//!
//! ```ignore
//! use graphql_transport::{Callbacks, GraphQLClient, Operation};
//!
//! let client = GraphQLClient::new("https://api.example.com/graphql").build()?;
//!
//! // Wait for a single result
//! let response = client.execute(Operation::query("{ viewer { id } }")).await?;
//!
//! // Follow a handoff to an event stream
//! let handle = client.event_source(
//!     Operation::subscription("subscription { ticks }"),
//!     Callbacks::new(
//!         |value| println!("{value}"),
//!         |error| eprintln!("{error}"),
//!         || println!("done"),
//!     ),
//! );
//! handle.cancel();
//! ```
//!
//! # Channels
//!
//! ```ignore
//! use graphql_transport::{ChannelConfig, ChannelMultiplexer, ConnectionEvent};
//!
//! let channel = ChannelMultiplexer::connect(
//!     ChannelConfig::new("wss://api.example.com/graphql"),
//!     |event| {
//!         if let ConnectionEvent::Acknowledged(subscriber) = event {
//!             let _ = subscriber.subscribe(
//!                 Operation::subscription("subscription { ticks }"),
//!                 |message| println!("{message:?}"),
//!             );
//!         }
//!     },
//! );
//! ```
//!
//! # Frames
//!
//! [`FrameDecoder`] splits newline-delimited JSON into values and
//! [`EventStreamDecoder`] parses `text/event-stream` bodies.
//! [`route_stream`] feeds any byte stream through the decoder to an
//! observer.

pub mod channel;
mod decoder;
mod error;
mod event_stream;
pub mod graphql;
pub mod http;
mod observer;
pub mod runner;
mod stream;
mod transport;

pub use error::{Result, TransportError};

// Re-export commonly used types at the crate root
pub use channel::{
    ChannelConfig, ChannelMultiplexer, ConnectionEvent, ConnectionState, Subscriber,
    SubscriptionMessage, Unsubscribe,
};
pub use decoder::{FrameDecoder, LineBuffer, decode_frames};
pub use event_stream::{EventStreamDecoder, MESSAGE_EVENT, ServerEvent, event_frames};
pub use graphql::{GraphQLClient, GraphQLClientBuilder, GraphQLResponse, Operation};
pub use self::http::{HttpClient, HttpClientBuilder, HttpRequest, HttpResponse, ResponseBody};
pub use observer::{Callbacks, Observer, OperationEvent, OperationHandle, OperationId};
pub use runner::{Handoff, RequestContext, channel_address, run_operation};
pub use stream::route_stream;
pub use transport::UnaryTransport;
