//! Newline-delimited frame decoding for streamed response bodies.
//!
//! Bodies arrive as arbitrarily sized chunks: a chunk may end in the middle
//! of a frame, carry several frames, or hold a single byte. [`LineBuffer`]
//! accumulates the bytes and hands out complete lines; [`FrameDecoder`] turns
//! each non-empty line into a JSON [`Value`].
//!
//! Lines are split on the raw `\n` byte. That byte never appears inside a
//! multi-byte UTF-8 sequence, so a chunk boundary that splits a character is
//! harmless; UTF-8 is validated once the whole line is available.
//!
//! # Example
//!
//! ```ignore
//! use graphql_transport::FrameDecoder;
//!
//! let mut decoder = FrameDecoder::new();
//! decoder.push(b"{\"a\":1}\n{\"a\"");
//! decoder.push(b":2}\n");
//! while let Some(frame) = decoder.next_frame() {
//!     println!("{}", frame?);
//! }
//! ```

use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt, stream};
use serde_json::Value;

use crate::error::{Result, TransportError};

/// Accumulates bytes and splits them into `\n`-terminated lines.
///
/// The scan cursor is kept between pushes so an unterminated tail is only
/// scanned once. After a line is taken the buffer starts just past its
/// newline and the cursor is back at zero.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buffer: BytesMut,
    cursor: usize,
    after_cr: bool,
}

impl LineBuffer {
    /// Create an empty line buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of input.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Take the next complete line, without its newline.
    ///
    /// Empty lines are returned as empty byte strings; callers decide
    /// whether they are meaningful.
    pub fn next_line(&mut self) -> Option<Bytes> {
        match self.buffer[self.cursor..].iter().position(|&b| b == b'\n') {
            Some(offset) => {
                let end = self.cursor + offset;
                let line = self.buffer.split_to(end).freeze();
                self.buffer.advance(1);
                self.cursor = 0;
                Some(line)
            }
            None => {
                self.cursor = self.buffer.len();
                None
            }
        }
    }

    /// Take the next line ended by `\n`, `\r\n` or a bare `\r`.
    ///
    /// A `\r` at the end of the buffer ends its line at once; a `\n` that
    /// arrives next is dropped as the rest of that line ending.
    pub fn next_line_any(&mut self) -> Option<Bytes> {
        if self.after_cr && !self.buffer.is_empty() {
            self.after_cr = false;
            if self.buffer[0] == b'\n' {
                self.buffer.advance(1);
                self.cursor = 0;
            }
        }
        match self.buffer[self.cursor..]
            .iter()
            .position(|&b| b == b'\n' || b == b'\r')
        {
            Some(offset) => {
                let end = self.cursor + offset;
                let line = self.buffer.split_to(end).freeze();
                self.after_cr = self.buffer[0] == b'\r';
                self.buffer.advance(1);
                self.cursor = 0;
                Some(line)
            }
            None => {
                self.cursor = self.buffer.len();
                None
            }
        }
    }

    /// Take whatever follows the last newline, at end of input.
    pub fn finish(&mut self) -> Option<Bytes> {
        self.cursor = 0;
        self.after_cr = false;
        if self.buffer.is_empty() {
            None
        } else {
            Some(self.buffer.split().freeze())
        }
    }

    /// Number of buffered bytes not yet returned as a line.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Decodes newline-delimited JSON frames.
///
/// Empty lines are skipped. A line that is not valid JSON yields an error;
/// callers are expected to stop decoding at that point.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    lines: LineBuffer,
}

impl FrameDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of the body.
    pub fn push(&mut self, chunk: &[u8]) {
        self.lines.push(chunk);
    }

    /// Decode the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Result<Value>> {
        while let Some(line) = self.lines.next_line() {
            if !line.is_empty() {
                return Some(parse_frame(&line));
            }
        }
        None
    }

    /// Decode the unterminated tail at end of stream, if there is one.
    pub fn flush(&mut self) -> Option<Result<Value>> {
        self.lines.finish().map(|tail| parse_frame(&tail))
    }
}

fn parse_frame(line: &[u8]) -> Result<Value> {
    tracing::trace!(target: "graphql_transport::stream", bytes = line.len(), "frame decoded");
    serde_json::from_slice(line).map_err(|e| TransportError::Json(format!("malformed frame: {e}")))
}

struct DecodeState<S> {
    body: S,
    decoder: FrameDecoder,
    done: bool,
}

/// Decode a chunked body into a lazy stream of frames.
///
/// Frames are yielded in arrival order. A parse failure or a body error is
/// yielded once and ends the stream.
pub fn decode_frames<S>(body: S) -> impl Stream<Item = Result<Value>>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let state = DecodeState {
        body,
        decoder: FrameDecoder::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        loop {
            if let Some(frame) = state.decoder.next_frame() {
                state.done = frame.is_err();
                return Some((frame, state));
            }
            match state.body.next().await {
                Some(Ok(chunk)) => state.decoder.push(&chunk),
                Some(Err(error)) => {
                    state.done = true;
                    return Some((Err(error), state));
                }
                None => {
                    state.done = true;
                    return state.decoder.flush().map(|frame| (frame, state));
                }
            }
        }
    })
}
