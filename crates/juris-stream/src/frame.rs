use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use tracing::debug;

use crate::errors::TransportError;

/// Byte stream produced by a transport for one response body.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, TransportError>> + Send + 'static>>;

/// Splits an arbitrarily chunked byte stream into complete `\n`-terminated lines.
///
/// Bytes are buffered rather than text so that a multi-byte UTF-8 sequence
/// split across two chunks is decoded only once the whole line is present.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    /// Appends a chunk and returns every line it completed, in order.
    ///
    /// A trailing `\r` is stripped so `\r\n` bodies behave like `\n` bodies.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            let raw = &self.buf[start..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            lines.push(String::from_utf8_lossy(raw).into_owned());
            start = end + 1;
        }
        self.buf.drain(..start);
        lines
    }

    /// Number of buffered bytes not yet terminated by a newline.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Discards the unterminated tail and returns how many bytes were dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buf.len();
        self.buf.clear();
        dropped
    }
}

/// Turns a response body into a lazy stream of complete lines.
///
/// Transport errors are forwarded as-is and end the stream; nothing is
/// retried here. An unterminated fragment left at end of body is discarded.
pub fn sse_lines(
    bytes: ByteStream,
) -> impl futures::Stream<Item = Result<String, TransportError>> + Send {
    struct State {
        bytes: ByteStream,
        splitter: LineSplitter,
        pending: VecDeque<String>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes,
            splitter: LineSplitter::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(line) = state.pending.pop_front() {
                    return Ok(Some((line, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        let lines = state.splitter.push_chunk(&chunk);
                        state.pending.extend(lines);
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        let dropped = state.splitter.finish();
                        if dropped > 0 {
                            debug!(dropped, "discarding unterminated trailing SSE fragment");
                        }
                        state.done = true;
                    }
                }
            }
        },
    )
}
