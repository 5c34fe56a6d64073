//! Unary operations and handoff, driven through a scripted transport.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::{self, BoxFuture};
use futures_util::{SinkExt, StreamExt, stream};
use graphql_transport::http::{HttpMethod, HttpRequest, HttpResponse, ResponseBody};
use graphql_transport::{
    ChannelConfig, Handoff, Operation, OperationEvent, RequestContext, TransportError,
    UnaryTransport, run_operation,
};
use http::{HeaderMap, HeaderValue};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

enum Reply {
    Response(HttpResponse),
    Fail(TransportError),
    Pending,
}

#[derive(Clone, Default)]
struct ScriptedTransport {
    replies: Arc<Mutex<VecDeque<Reply>>>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl ScriptedTransport {
    fn reply(self, reply: Reply) -> Self {
        self.replies.lock().push_back(reply);
        self
    }

    fn respond(self, status: u16, headers: &[(&'static str, &'static str)], body: &'static str) -> Self {
        let mut map = HeaderMap::new();
        for &(name, value) in headers {
            map.insert(name, HeaderValue::from_static(value));
        }
        self.reply(Reply::Response(HttpResponse::new(
            status,
            map,
            ResponseBody::from_bytes(body),
        )))
    }

    fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }
}

impl UnaryTransport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'static, graphql_transport::Result<HttpResponse>> {
        self.requests.lock().push(request);
        let reply = self.replies.lock().pop_front();
        Box::pin(async move {
            match reply {
                Some(Reply::Response(response)) => Ok(response),
                Some(Reply::Fail(error)) => Err(error),
                Some(Reply::Pending) | None => future::pending().await,
            }
        })
    }
}

fn start(
    transport: &ScriptedTransport,
    handoff: Handoff,
) -> (graphql_transport::OperationHandle, mpsc::UnboundedReceiver<OperationEvent>) {
    let (events_tx, events) = mpsc::unbounded_channel();
    let handle = run_operation(
        transport.clone(),
        RequestContext::new("http://api.test/graphql"),
        Operation::subscription("subscription { ticks }").variable("every", 1),
        handoff,
        events_tx,
    );
    (handle, events)
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<OperationEvent>) -> Option<OperationEvent> {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
}

async fn next_value(events: &mut mpsc::UnboundedReceiver<OperationEvent>) -> Value {
    match next_event(events).await {
        Some(OperationEvent::Next(value)) => value,
        other => panic!("expected a value, got {other:?}"),
    }
}

async fn expect_complete(events: &mut mpsc::UnboundedReceiver<OperationEvent>) {
    assert!(matches!(next_event(events).await, Some(OperationEvent::Complete)));
    assert!(next_event(events).await.is_none());
}

async fn expect_error(events: &mut mpsc::UnboundedReceiver<OperationEvent>) -> TransportError {
    let error = match next_event(events).await {
        Some(OperationEvent::Error(error)) => error,
        other => panic!("expected an error, got {other:?}"),
    };
    assert!(next_event(events).await.is_none());
    error
}

#[tokio::test]
async fn test_ok_delivers_body_once() {
    let transport = ScriptedTransport::default().respond(200, &[], r#"{"data":{"ticks":1}}"#);
    let (_handle, mut events) = start(&transport, Handoff::None);

    assert_eq!(next_value(&mut events).await, json!({"data": {"ticks": 1}}));
    expect_complete(&mut events).await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, HttpMethod::Post);
    assert_eq!(requests[0].url, "http://api.test/graphql");
    assert_eq!(requests[0].header_str("content-type"), Some("application/json"));
    let body: Value = serde_json::from_str(requests[0].body.as_deref().unwrap()).unwrap();
    assert_eq!(
        body,
        json!({"query": "subscription { ticks }", "variables": {"every": 1}})
    );
}

#[tokio::test]
async fn test_created_without_handoff_is_error() {
    let transport =
        ScriptedTransport::default().respond(201, &[("location", "/sub/1")], "");
    let (_handle, mut events) = start(&transport, Handoff::None);

    match expect_error(&mut events).await {
        TransportError::UnexpectedHandoff(address) => {
            assert_eq!(address, "http://api.test/sub/1")
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_other_status_is_rejected() {
    let transport = ScriptedTransport::default().respond(500, &[], "boom");
    let (_handle, mut events) = start(&transport, Handoff::EventSource);

    match expect_error(&mut events).await {
        TransportError::Rejected { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body.as_deref(), Some("boom"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_missing_location() {
    let transport = ScriptedTransport::default().respond(201, &[], "");
    let (_handle, mut events) = start(&transport, Handoff::EventSource);

    assert!(matches!(
        expect_error(&mut events).await,
        TransportError::MissingLocation
    ));
}

#[tokio::test]
async fn test_transport_failure_is_error() {
    let transport = ScriptedTransport::default()
        .reply(Reply::Fail(TransportError::Connection("refused".into())));
    let (_handle, mut events) = start(&transport, Handoff::None);

    assert!(matches!(
        expect_error(&mut events).await,
        TransportError::Connection(_)
    ));
}

#[tokio::test]
async fn test_cancel_before_response_completes() {
    let transport = ScriptedTransport::default().reply(Reply::Pending);
    let (handle, mut events) = start(&transport, Handoff::EventSource);

    tokio::task::yield_now().await;
    handle.cancel();
    handle.cancel();
    assert!(handle.is_cancelled());

    expect_complete(&mut events).await;
}

#[tokio::test]
async fn test_stream_body_is_split_into_frames() {
    let transport = ScriptedTransport::default().reply(Reply::Response(HttpResponse::new(
        200,
        HeaderMap::new(),
        ResponseBody::from_stream(stream::iter(vec![
            Ok(Bytes::from_static(b"{\"n\":1}\n{\"n\"")),
            Ok(Bytes::from_static(b":2}\n")),
        ])),
    )));
    let (_handle, mut events) = start(&transport, Handoff::Stream);

    assert_eq!(next_value(&mut events).await, json!({"n": 1}));
    assert_eq!(next_value(&mut events).await, json!({"n": 2}));
    expect_complete(&mut events).await;
}

#[tokio::test]
async fn test_stream_handoff_posts_to_location() {
    let transport = ScriptedTransport::default()
        .respond(201, &[("location", "/stream/9?token=t")], "")
        .respond(200, &[], "{\"n\":1}\n");
    let (_handle, mut events) = start(&transport, Handoff::Stream);

    assert_eq!(next_value(&mut events).await, json!({"n": 1}));
    expect_complete(&mut events).await;

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].method, HttpMethod::Post);
    assert_eq!(requests[1].url, "http://api.test/stream/9?token=t");
    assert_eq!(requests[1].body, requests[0].body);
}

#[tokio::test]
async fn test_event_source_handoff() {
    let transport = ScriptedTransport::default()
        .respond(201, &[("location", "http://events.test/sub/3")], "")
        .respond(
            200,
            &[("content-type", "text/event-stream")],
            "event: ping\ndata: {}\n\ndata: {\"n\":1}\n\n",
        );
    let (_handle, mut events) = start(&transport, Handoff::EventSource);

    assert_eq!(next_value(&mut events).await, json!({"n": 1}));
    expect_complete(&mut events).await;

    let requests = transport.requests();
    assert_eq!(requests[1].method, HttpMethod::Get);
    assert_eq!(requests[1].url, "http://events.test/sub/3");
    assert_eq!(requests[1].header_str("accept"), Some("text/event-stream"));
    assert!(requests[1].body.is_none());
}

#[tokio::test]
async fn test_event_source_rejected_after_handoff() {
    let transport = ScriptedTransport::default()
        .respond(201, &[("location", "/sub/3")], "")
        .respond(404, &[], "");
    let (_handle, mut events) = start(&transport, Handoff::EventSource);

    match expect_error(&mut events).await {
        TransportError::Rejected { status, body } => {
            assert_eq!(status, 404);
            assert_eq!(body, None);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_cancel_while_streaming_completes() {
    let (chunks, mut body) = mpsc::unbounded_channel::<graphql_transport::Result<Bytes>>();
    let transport = ScriptedTransport::default().reply(Reply::Response(HttpResponse::new(
        200,
        HeaderMap::new(),
        ResponseBody::from_stream(stream::poll_fn(move |cx| body.poll_recv(cx))),
    )));
    let (handle, mut events) = start(&transport, Handoff::Stream);

    chunks.send(Ok(Bytes::from_static(b"{\"n\":1}\n"))).unwrap();
    assert_eq!(next_value(&mut events).await, json!({"n": 1}));

    handle.cancel();
    expect_complete(&mut events).await;

    // Frames after cancellation are never delivered.
    let _ = chunks.send(Ok(Bytes::from_static(b"{\"n\":2}\n")));
    assert!(events.recv().await.is_none());
}

#[tokio::test]
async fn test_channel_handoff_needs_http_location() {
    let transport =
        ScriptedTransport::default().respond(201, &[("location", "ftp://files.test/sub")], "");
    let (_handle, mut events) = start(&transport, Handoff::Channel(ChannelConfig::default()));

    assert!(matches!(
        expect_error(&mut events).await,
        TransportError::InvalidUrl(_)
    ));
}

fn created(location: &str) -> Reply {
    let mut headers = HeaderMap::new();
    headers.insert("location", HeaderValue::from_str(location).unwrap());
    Reply::Response(HttpResponse::new(201, headers, ResponseBody::from_bytes("")))
}

/// Accept one websocket, returning it with the request path.
async fn accept_socket(listener: &TcpListener) -> (WebSocketStream<TcpStream>, String) {
    let (stream, _) = timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("timed out waiting for the channel")
        .unwrap();
    let mut path = String::new();
    let echo_subprotocol =
        |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
            path = request.uri().to_string();
            response
                .headers_mut()
                .insert("sec-websocket-protocol", HeaderValue::from_static("graphql-ws"));
            Ok(response)
        };
    let socket = tokio_tungstenite::accept_hdr_async(stream, echo_subprotocol)
        .await
        .unwrap();
    (socket, path)
}

async fn next_frame(socket: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a client frame");
        match message {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("socket ended: {other:?}"),
        }
    }
}

async fn reply(socket: &mut WebSocketStream<TcpStream>, message: Value) {
    socket.send(Message::Text(message.to_string().into())).await.unwrap();
}

/// Open the channel handoff and read through `start`.
async fn channel_handoff() -> (
    graphql_transport::OperationHandle,
    mpsc::UnboundedReceiver<OperationEvent>,
    WebSocketStream<TcpStream>,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let location = format!("http://{}/sub?x=1", listener.local_addr().unwrap());
    let transport = ScriptedTransport::default().reply(created(&location));
    let config = ChannelConfig::default().init_payload(json!({"token": "t"}));
    let (handle, events) = start(&transport, Handoff::Channel(config));

    let (mut socket, path) = accept_socket(&listener).await;
    assert_eq!(path, "/sub");
    assert_eq!(
        next_frame(&mut socket).await,
        json!({"type": "connection_init", "payload": {"token": "t"}})
    );
    reply(&mut socket, json!({"type": "connection_ack"})).await;

    let start = next_frame(&mut socket).await;
    assert_eq!(start["type"], "start");
    assert_eq!(start["id"], "1");
    assert_eq!(start["payload"]["query"], "subscription { ticks }");
    assert_eq!(start["payload"]["variables"], json!({"every": 1}));

    (handle, events, socket)
}

#[tokio::test]
async fn test_channel_handoff_runs_operation() {
    let (_handle, mut events, mut socket) = channel_handoff().await;

    reply(
        &mut socket,
        json!({"type": "data", "id": "1", "payload": {"data": {"ticks": 1}}}),
    )
    .await;
    assert_eq!(next_value(&mut events).await, json!({"data": {"ticks": 1}}));

    reply(&mut socket, json!({"type": "complete", "id": "1"})).await;
    expect_complete(&mut events).await;
    assert_eq!(
        next_frame(&mut socket).await,
        json!({"type": "connection_terminate"})
    );
}

#[tokio::test]
async fn test_cancel_after_channel_handoff() {
    let (handle, mut events, mut socket) = channel_handoff().await;

    handle.cancel();
    expect_complete(&mut events).await;

    assert_eq!(next_frame(&mut socket).await, json!({"type": "stop", "id": "1"}));
    assert_eq!(
        next_frame(&mut socket).await,
        json!({"type": "connection_terminate"})
    );
}
