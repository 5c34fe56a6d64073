//! GraphQL operations, results, and a client over every transport.
//!
//! This module provides:
//! - [`Operation`], the `{query, variables, operationName}` sent to a server
//! - [`GraphQLResponse`], the `{data, errors, extensions}` result shape
//! - [`GraphQLClient`], which runs operations over HTTP and hands them off
//!   to event streams, newline-delimited JSON, or channels
//!
//! # Example
//!
//! ```ignore
//! use graphql_transport::graphql::{GraphQLClient, Operation};
//!
//! let client = GraphQLClient::new("https://api.example.com/graphql")
//!     .bearer_auth("my-token")
//!     .build()?;
//!
//! let operation = Operation::query(r#"
//!     query GetUser($id: ID!) {
//!         user(id: $id) { id name }
//!     }
//! "#)
//! .variable("id", "123");
//!
//! let response = client.execute(operation).await?;
//! let user: User = response.data()?;
//! ```
//!
//! # Subscriptions
//!
//! ```ignore
//! use graphql_transport::{Callbacks, graphql::Operation};
//!
//! let handle = client.channel(
//!     Operation::subscription("subscription { messageReceived { id content } }"),
//!     Callbacks::new(
//!         |value| println!("received: {value}"),
//!         |error| eprintln!("failed: {error}"),
//!         || println!("done"),
//!     ),
//! );
//!
//! // Later
//! handle.cancel();
//! ```

mod client;
mod request;
mod response;

pub use client::{GraphQLClient, GraphQLClientBuilder};
pub use request::{Operation, OperationType};
pub use response::{GraphQLError, GraphQLLocation, GraphQLResponse, PathSegment};
