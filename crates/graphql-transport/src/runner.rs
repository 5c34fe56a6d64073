//! Unary operations and their handoff to long-lived connections.
//!
//! An operation is sent as a `POST` of `{query, variables, operationName}`.
//! The status of the response decides what happens next:
//!
//! | status | outcome |
//! |--------|---------|
//! | `200`  | the body is the result: `on_next` once, then `on_complete` |
//! | `201`  | handoff to the address in `Location`, per [`Handoff`] |
//! | other  | `on_error` with [`TransportError::Rejected`] |
//!
//! A single cancellation token covers the request and whatever takes over
//! after a handoff.

use std::future::Future;

use http::header::{ACCEPT, CACHE_CONTROL};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelConfig, run_channel_operation};
use crate::decoder::decode_frames;
use crate::error::{Result, TransportError};
use crate::event_stream::event_frames;
use crate::graphql::Operation;
use crate::http::{HttpRequest, HttpResponse};
use crate::observer::{Delivery, Observer, OperationHandle};
use crate::stream::route_frames;
use crate::transport::UnaryTransport;

const TARGET: &str = "graphql_transport::runner";

/// How a `201 Created` response is followed.
#[derive(Clone, Debug, Default)]
pub enum Handoff {
    /// The operation is unary; a handoff is a protocol violation.
    #[default]
    None,
    /// `GET` the location as a server-sent event stream.
    EventSource,
    /// `POST` the operation again to the location and read the response as
    /// newline-delimited JSON. A `200` body is streamed the same way.
    Stream,
    /// Run the operation on a channel at the location, mapped to a websocket
    /// address. The URL in the configuration is replaced.
    Channel(ChannelConfig),
}

/// Where an operation is sent.
#[derive(Clone, Debug)]
pub struct RequestContext {
    /// The endpoint URL.
    pub url: String,
    /// Headers sent with every request of the operation. They take
    /// precedence over the defaults.
    pub headers: HeaderMap,
}

impl RequestContext {
    /// Create a context for `url` with no extra headers.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
        }
    }

    /// Add a header.
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add multiple headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }
}

/// Run `operation` on a new task and report it to `observer`.
///
/// # Example
///
/// ```ignore
/// let handle = run_operation(
///     client,
///     RequestContext::new("https://api.example.com/graphql"),
///     Operation::subscription("subscription { ticks }"),
///     Handoff::EventSource,
///     Callbacks::new(
///         |value| println!("{value}"),
///         |error| eprintln!("{error}"),
///         || println!("done"),
///     ),
/// );
/// handle.cancel();
/// ```
pub fn run_operation(
    transport: impl UnaryTransport,
    context: RequestContext,
    operation: Operation,
    handoff: Handoff,
    observer: impl Observer,
) -> OperationHandle {
    let handle = OperationHandle::new();
    let cancel = handle.token();
    let id = handle.id;
    tokio::spawn(async move {
        tracing::debug!(target: TARGET, %id, url = %context.url, "running operation");
        let mut delivery = Delivery::new(observer);
        drive(&transport, &context, operation, handoff, cancel, &mut delivery).await;
    });
    handle
}

pub(crate) async fn drive(
    transport: &dyn UnaryTransport,
    context: &RequestContext,
    operation: Operation,
    handoff: Handoff,
    cancel: CancellationToken,
    delivery: &mut Delivery,
) {
    let body = match operation.to_body() {
        Ok(body) => body,
        Err(error) => return delivery.error(error),
    };
    let request = HttpRequest::post(&context.url)
        .json_body(body.clone())
        .headers(&context.headers);

    let Some(response) = until_cancelled(&cancel, transport.send(request)).await else {
        tracing::debug!(target: TARGET, "cancelled before response");
        return delivery.complete();
    };
    let response = match response {
        Ok(response) => response,
        Err(error) => return delivery.error(error),
    };

    match (response.status(), handoff) {
        (200, Handoff::Stream) => {
            route_frames(decode_frames(response.into_body()), cancel, delivery).await
        }
        (200, _) => deliver_result(response, cancel, delivery).await,
        (201, handoff) => {
            let Some(location) = response.location().map(str::to_owned) else {
                return delivery.error(TransportError::MissingLocation);
            };
            drop(response);

            let address = match resolve_location(&context.url, &location) {
                Ok(address) => address,
                Err(error) => return delivery.error(error),
            };
            tracing::debug!(target: TARGET, %address, ?handoff, "handoff");

            match handoff {
                Handoff::None => delivery.error(TransportError::UnexpectedHandoff(address)),
                Handoff::EventSource => {
                    let request = event_source_request(&address, &context.headers);
                    open_event_stream(transport, request, cancel, delivery).await
                }
                Handoff::Stream => {
                    let request = HttpRequest::post(address)
                        .json_body(body)
                        .headers(&context.headers);
                    open_stream(transport, request, cancel, delivery).await
                }
                Handoff::Channel(config) => match channel_address(&address) {
                    Ok(url) => {
                        run_channel_operation(config.url(url), operation, cancel, delivery).await
                    }
                    Err(error) => delivery.error(error),
                },
            }
        }
        _ => reject(response, cancel, delivery).await,
    }
}

/// Map a handoff location to the channel address.
///
/// Everything from the first `?` is dropped and the leading `http` becomes
/// `ws`, so `https` maps to `wss`. Locations that are not `http` URLs
/// cannot be mapped.
pub fn channel_address(location: &str) -> Result<String> {
    let address = location.split_once('?').map_or(location, |(address, _)| address);
    match address.strip_prefix("http") {
        Some(rest) => Ok(format!("ws{rest}")),
        None => Err(TransportError::InvalidUrl(format!(
            "cannot open a channel at {location}"
        ))),
    }
}

/// Resolve a possibly relative location against the request URL.
pub(crate) fn resolve_location(base: &str, location: &str) -> Result<String> {
    let base = url::Url::parse(base)?;
    Ok(base.join(location)?.into())
}

/// The `GET` that opens a server-sent event stream.
pub(crate) fn event_source_request(url: &str, headers: &HeaderMap) -> HttpRequest {
    HttpRequest::get(url)
        .headers(headers)
        .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
        .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
}

/// Send `request` and route its body as server-sent events.
pub(crate) async fn open_event_stream(
    transport: &dyn UnaryTransport,
    request: HttpRequest,
    cancel: CancellationToken,
    delivery: &mut Delivery,
) {
    let Some(response) = until_cancelled(&cancel, transport.send(request)).await else {
        return delivery.complete();
    };
    match response {
        Ok(response) if response.status() == 200 => {
            route_frames(event_frames(response.into_body()), cancel, delivery).await
        }
        Ok(response) => reject(response, cancel, delivery).await,
        Err(error) => delivery.error(error),
    }
}

/// Send `request` and route its body as newline-delimited JSON.
async fn open_stream(
    transport: &dyn UnaryTransport,
    request: HttpRequest,
    cancel: CancellationToken,
    delivery: &mut Delivery,
) {
    let Some(response) = until_cancelled(&cancel, transport.send(request)).await else {
        return delivery.complete();
    };
    match response {
        Ok(response) if response.status() == 200 => {
            route_frames(decode_frames(response.into_body()), cancel, delivery).await
        }
        Ok(response) => reject(response, cancel, delivery).await,
        Err(error) => delivery.error(error),
    }
}

async fn deliver_result(response: HttpResponse, cancel: CancellationToken, delivery: &mut Delivery) {
    match until_cancelled(&cancel, response.json::<Value>()).await {
        Some(Ok(value)) => {
            delivery.next(value);
            delivery.complete();
        }
        Some(Err(error)) => delivery.error(error),
        None => delivery.complete(),
    }
}

async fn reject(response: HttpResponse, cancel: CancellationToken, delivery: &mut Delivery) {
    tracing::debug!(target: TARGET, status = response.status(), "request rejected");
    match until_cancelled(&cancel, response.into_rejection()).await {
        Some(error) => delivery.error(error),
        None => delivery.complete(),
    }
}

/// Await `future` unless `cancel` fires first.
async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}
