//! The unary request capability the runner is built on.

use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::error::Result;
use crate::http::{HttpRequest, HttpResponse};

/// Performs one request and yields the response head with a lazy body.
///
/// The returned future is dropped when the operation is cancelled before a
/// response arrives; implementations abort the request at that point.
///
/// [`HttpClient`](crate::http::HttpClient) is the reqwest implementation.
/// Other implementations can be plugged into
/// [`GraphQLClientBuilder::transport`](crate::graphql::GraphQLClientBuilder::transport).
pub trait UnaryTransport: Send + Sync + 'static {
    /// Send `request`.
    fn send(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse>>;
}

impl<T: UnaryTransport + ?Sized> UnaryTransport for Arc<T> {
    fn send(&self, request: HttpRequest) -> BoxFuture<'static, Result<HttpResponse>> {
        (**self).send(request)
    }
}
