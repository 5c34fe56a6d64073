//! Server-sent event decoding (`text/event-stream`).
//!
//! Used when an operation is handed off to an event-source address. Only
//! events of type `message` carry operation results; their `data` is parsed
//! as JSON and routed like any other frame.

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use serde_json::Value;

use crate::decoder::LineBuffer;
use crate::error::{Result, TransportError};

/// The default event type.
pub const MESSAGE_EVENT: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    /// The event type (`message` unless an `event:` field said otherwise).
    pub event: String,
    /// The data lines, joined with `\n`.
    pub data: String,
    /// The last event id seen on the stream.
    pub id: Option<String>,
    /// The reconnection time requested by the server, in milliseconds.
    pub retry: Option<u64>,
}

/// Incremental `text/event-stream` parser.
///
/// Accepts `\n`, `\r\n` and bare `\r` line endings. An event is dispatched on a blank
/// line; an event still pending when the stream ends is discarded.
#[derive(Debug, Default)]
pub struct EventStreamDecoder {
    lines: LineBuffer,
    event_type: Option<String>,
    data: Vec<String>,
    last_event_id: Option<String>,
    retry: Option<u64>,
}

impl EventStreamDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of the body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.lines.push(chunk);
    }

    /// Take the next complete event, if one is buffered.
    pub fn next_event(&mut self) -> Option<ServerEvent> {
        while let Some(line) = self.lines.next_line_any() {
            let text = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&text) {
                return Some(event);
            }
        }
        None
    }

    fn process_line(&mut self, line: &str) -> Option<ServerEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event_type = Some(value.to_owned()),
            "data" => self.data.push(value.to_owned()),
            "id" if !value.contains('\0') => self.last_event_id = Some(value.to_owned()),
            "retry" => {
                if let Ok(retry) = value.parse() {
                    self.retry = Some(retry);
                }
            }
            other => {
                tracing::trace!(target: "graphql_transport::stream", field = other, "ignoring event field");
            }
        }
        None
    }

    fn dispatch(&mut self) -> Option<ServerEvent> {
        let event_type = self.event_type.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(ServerEvent {
            event: event_type.unwrap_or_else(|| MESSAGE_EVENT.to_owned()),
            data,
            id: self.last_event_id.clone(),
            retry: self.retry,
        })
    }
}

struct EventState<S> {
    body: S,
    decoder: EventStreamDecoder,
    done: bool,
}

/// Decode a `text/event-stream` body into a stream of JSON frames.
///
/// Only `message` events are yielded. Malformed event data or a body error
/// is yielded once and ends the stream.
pub fn event_frames<S>(body: S) -> impl Stream<Item = Result<Value>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let state = EventState {
        body,
        decoder: EventStreamDecoder::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            if let Some(event) = state.decoder.next_event() {
                if event.event != MESSAGE_EVENT {
                    tracing::debug!(target: "graphql_transport::stream", event = %event.event, "skipping named event");
                    continue;
                }
                let frame = serde_json::from_str(&event.data)
                    .map_err(|e| TransportError::Json(format!("malformed event data: {e}")));
                state.done = frame.is_err();
                return Some((frame, state));
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.decoder.push(&chunk),
                Some(Err(error)) => {
                    state.done = true;
                    return Some((Err(error), state));
                }
                None => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn events(input: &[u8]) -> Vec<ServerEvent> {
        let mut decoder = EventStreamDecoder::new();
        decoder.push(input);
        std::iter::from_fn(|| decoder.next_event()).collect()
    }

    #[test]
    fn test_single_data_event() {
        let events = events(b"data: {\"a\":1}\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "{\"a\":1}");
    }

    #[test]
    fn test_multiline_data_and_fields() {
        let events = events(b": keep-alive\r\nevent: update\r\nid: 7\r\nretry: 1500\r\ndata: a\r\ndata:b\r\n\r\n");
        assert_eq!(
            events,
            vec![ServerEvent {
                event: "update".into(),
                data: "a\nb".into(),
                id: Some("7".into()),
                retry: Some(1500),
            }]
        );
    }

    #[test]
    fn test_bare_carriage_returns_end_lines() {
        let events = events(b"event: update\rdata: a\rdata: b\r\rdata: c\r\n\r\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "update");
        assert_eq!(events[0].data, "a\nb");
        assert_eq!(events[1].event, "message");
        assert_eq!(events[1].data, "c");
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut decoder = EventStreamDecoder::new();
        decoder.push(b"data: 1\r");
        assert!(decoder.next_event().is_none());
        decoder.push(b"\n\r");
        assert_eq!(decoder.next_event().unwrap().data, "1");
        decoder.push(b"\ndata: 2\n\n");
        assert_eq!(decoder.next_event().unwrap().data, "2");
    }

    #[test]
    fn test_blank_lines_without_data_do_not_dispatch() {
        let events = events(b"\n\nevent: ping\n\ndata: 1\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "1");
    }

    #[test]
    fn test_pending_event_needs_blank_line() {
        let mut decoder = EventStreamDecoder::new();
        decoder.push(b"data: 1\n");
        assert!(decoder.next_event().is_none());
        decoder.push(b"\n");
        assert_eq!(decoder.next_event().unwrap().data, "1");
    }

    #[tokio::test]
    async fn test_event_frames_skip_named_events() {
        let chunks: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"event: ping\ndata: {}\n\ndata: {\"n\"")),
            Ok(Bytes::from_static(b":1}\n\ndata: {\"n\":2}\n\ndata: {\"n\":3}\n")),
        ];
        let frames: Vec<Result<Value>> = event_frames(stream::iter(chunks)).collect().await;
        let frames: Vec<Value> = frames.into_iter().map(|f| f.unwrap()).collect();
        assert_eq!(frames, vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[tokio::test]
    async fn test_event_frames_malformed_data() {
        let chunks: Vec<Result<Bytes>> = vec![Ok(Bytes::from_static(
            b"data: nope\n\ndata: {}\n\n",
        ))];
        let frames: Vec<Result<Value>> = event_frames(stream::iter(chunks)).collect().await;
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_err());
    }
}
