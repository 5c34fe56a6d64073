//! HTTP response types.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures_util::stream::{self, BoxStream};
use futures_util::{Stream, StreamExt};
use http::HeaderMap;
use http::header::LOCATION;
use serde::de::DeserializeOwned;

use crate::error::{Result, TransportError};

/// An HTTP response: status, headers and a body that is read lazily.
///
/// The body can be consumed once, either whole with [`text`](Self::text) or
/// [`json`](Self::json), or chunk by chunk with [`into_body`](Self::into_body).
pub struct HttpResponse {
    status: u16,
    headers: HeaderMap,
    url: Option<String>,
    body: ResponseBody,
}

impl HttpResponse {
    /// Create a response from its parts.
    ///
    /// Custom [`UnaryTransport`](crate::UnaryTransport) implementations use
    /// this to hand responses to the runner.
    pub fn new(status: u16, headers: HeaderMap, body: ResponseBody) -> Self {
        Self {
            status,
            headers,
            url: None,
            body,
        }
    }

    /// Create from a reqwest response.
    pub(crate) fn from_reqwest(response: reqwest::Response) -> Self {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let url = Some(response.url().to_string());
        let body = ResponseBody::from_stream(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(TransportError::from)),
        );
        Self {
            status,
            headers,
            url,
            body,
        }
    }

    /// Get the HTTP status code.
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Check if the response indicates success (2xx status).
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Get the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a specific header value. Header names are case-insensitive.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name.as_ref())
            .and_then(|v| v.to_str().ok())
    }

    /// Get the Content-Type header value.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Get the handoff address from the `Location` header.
    pub fn location(&self) -> Option<&str> {
        self.headers.get(LOCATION).and_then(|v| v.to_str().ok())
    }

    /// The URL the response was served from, when the transport knows it.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Get the response body as raw bytes.
    pub async fn bytes(self) -> Result<Bytes> {
        self.body.collect().await
    }

    /// Get the response body as text.
    pub async fn text(self) -> Result<String> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| TransportError::Io(format!("response body is not UTF-8: {e}")))
    }

    /// Parse the response body as JSON.
    pub async fn json<T: DeserializeOwned>(self) -> Result<T> {
        let bytes = self.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Take the streaming body.
    pub fn into_body(self) -> ResponseBody {
        self.body
    }

    /// Consume the response into a rejection error carrying its body.
    pub async fn into_rejection(self) -> TransportError {
        let status = self.status;
        let body = self.text().await.ok().filter(|body| !body.is_empty());
        TransportError::Rejected { status, body }
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("url", &self.url)
            .finish()
    }
}

/// A response body delivered as a stream of byte chunks.
///
/// Dropping the body before it is exhausted aborts the underlying connection.
pub struct ResponseBody {
    inner: BoxStream<'static, Result<Bytes>>,
    bytes_received: u64,
}

impl ResponseBody {
    /// Wrap a stream of chunks.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: stream.boxed(),
            bytes_received: 0,
        }
    }

    /// A body holding a single chunk.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let bytes = bytes.into();
        Self::from_stream(stream::iter((!bytes.is_empty()).then_some(Ok(bytes))))
    }

    /// A body with no content.
    pub fn empty() -> Self {
        Self::from_stream(stream::empty())
    }

    /// Get the number of bytes received so far.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    /// Read the next chunk of data.
    ///
    /// Returns `None` when the body is complete.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        self.next().await.transpose()
    }

    /// Collect all remaining chunks into a single buffer.
    pub async fn collect(mut self) -> Result<Bytes> {
        let mut buffer = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            buffer.extend_from_slice(&chunk);
        }
        Ok(buffer.freeze())
    }
}

impl Stream for ResponseBody {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let poll = self.inner.as_mut().poll_next(cx);
        if let Poll::Ready(Some(Ok(chunk))) = &poll {
            self.bytes_received += chunk.len() as u64;
        }
        poll
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody")
            .field("bytes_received", &self.bytes_received)
            .finish_non_exhaustive()
    }
}
