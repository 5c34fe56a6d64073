//! HTTP transport built on reqwest.
//!
//! [`HttpClient`] is the default [`UnaryTransport`](crate::UnaryTransport):
//! it performs one request and hands back the status, the headers and a
//! lazily read body. Redirects are not followed so that a `201 Created`
//! handoff reaches the runner.
//!
//! # Example
//!
//! ```ignore
//! use graphql_transport::http::HttpClient;
//!
//! let client = HttpClient::builder()
//!     .connect_timeout(Duration::from_secs(5))
//!     .build()?;
//!
//! let response = client
//!     .get("https://api.example.com/graphql")
//!     .query("query", "{ me { id } }")
//!     .header("accept", "text/event-stream")
//!     .send()
//!     .await?;
//! let mut body = response.into_body();
//! while let Some(chunk) = body.next_chunk().await? {
//!     println!("{} bytes", chunk.len());
//! }
//! ```

mod client;
mod request;
mod response;

pub use client::{HttpClient, HttpClientBuilder, HttpClientConfig};
pub use request::{HttpMethod, HttpRequest, HttpRequestBuilder};
pub use response::{HttpResponse, ResponseBody};
