//! Incremental `text/event-stream` decoding.
//!
//! Follows the event stream interpretation rules of the
//! [HTML Living Standard](https://html.spec.whatwg.org/multipage/server-sent-events.html):
//! LF, CR and CRLF line endings, an optional leading byte order mark, comment
//! lines, and the `event`, `data`, `id` and `retry` fields.

use core::{
    pin::Pin,
    str::Utf8Error,
    task::{Context, Poll, ready},
    time::Duration,
};

use bytes::{Buf, Bytes, BytesMut};
use futures_core::Stream;

const LF: u8 = b'\n';
const CR: u8 = b'\r';
const BOM: &[u8] = "\u{FEFF}".as_bytes();

/// Event type used when the stream does not name one.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// One dispatched server-sent event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type (`message` when unnamed).
    pub event: String,
    /// Data payload; multiple `data` lines are joined with `\n`.
    pub data: String,
    /// Last event id seen on the stream at dispatch time.
    pub id: String,
    /// Reconnection time advertised by the server.
    pub retry: Option<Duration>,
}

/// Errors produced by [`SseEventStream`].
#[derive(Debug, PartialEq)]
pub enum SseStreamError<E> {
    /// The underlying byte stream failed.
    Transport(E),
    /// The stream contained invalid UTF-8.
    Utf8(Utf8Error),
}

impl<E: core::fmt::Display> core::fmt::Display for SseStreamError<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Transport(e) => e.fmt(f),
            Self::Utf8(e) => write!(f, "invalid UTF-8 in event stream: {e}"),
        }
    }
}

impl<E> core::error::Error for SseStreamError<E> where E: core::error::Error {}

/// Push-style decoder: feed it byte chunks, pull complete events out.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: BytesMut,
    started: bool,
    event: String,
    data: Option<String>,
    last_event_id: String,
    retry: Option<Duration>,
}

impl SseDecoder {
    /// Create an empty decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of raw bytes.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// The id carried over to subsequent events.
    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    /// Decode the next complete event from the buffered bytes.
    ///
    /// Returns `Ok(None)` when more input is needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a line is not valid UTF-8. The offending line is
    /// consumed, so decoding may continue afterwards.
    pub fn next_event(&mut self) -> Result<Option<SseEvent>, Utf8Error> {
        if !self.started && !self.skip_bom() {
            return Ok(None);
        }

        while let Some(line) = self.next_line() {
            let line = core::str::from_utf8(&line)?;
            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    return Ok(Some(event));
                }
                continue;
            }
            self.apply_line(line);
        }
        Ok(None)
    }

    /// Returns `false` while the buffer is too short to tell whether it
    /// starts with a byte order mark.
    fn skip_bom(&mut self) -> bool {
        let len = self.buffer.len().min(BOM.len());
        if self.buffer[..len] != BOM[..len] {
            self.started = true;
            return true;
        }
        if len < BOM.len() {
            return false;
        }
        self.buffer.advance(BOM.len());
        self.started = true;
        true
    }

    /// Split off the next line without its terminator. A trailing lone CR is
    /// held back until we know whether an LF follows.
    fn next_line(&mut self) -> Option<Bytes> {
        let pos = memchr::memchr2(CR, LF, &self.buffer)?;
        let terminator = match self.buffer[pos] {
            LF => 1,
            _ => match self.buffer.get(pos + 1) {
                None => return None,
                Some(&LF) => 2,
                Some(_) => 1,
            },
        };
        let line = self.buffer.split_to(pos).freeze();
        self.buffer.advance(terminator);
        Some(line)
    }

    fn apply_line(&mut self, line: &str) {
        let (field, value) = match line.find(':') {
            Some(0) => return,
            Some(colon) => {
                let value = &line[colon + 1..];
                (&line[..colon], value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };

        match field {
            "event" => self.event = value.to_string(),
            "data" => match &mut self.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" => {
                if !value.contains('\0') {
                    self.last_event_id = value.to_string();
                }
            }
            "retry" => {
                if let Ok(millis) = value.parse::<u64>() {
                    self.retry = Some(Duration::from_millis(millis));
                }
            }
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = core::mem::take(&mut self.event);
        let retry = self.retry.take();
        let data = self.data.take()?;

        Some(SseEvent {
            event: if event.is_empty() {
                DEFAULT_EVENT_TYPE.to_string()
            } else {
                event
            },
            data,
            id: self.last_event_id.clone(),
            retry,
        })
    }
}

pin_project_lite::pin_project! {
    /// A [`Stream`] of [`SseEvent`]s decoded from a stream of byte chunks.
    #[derive(Debug)]
    pub struct SseEventStream<S> {
        #[pin]
        stream: S,
        decoder: SseDecoder,
        finished: bool,
    }
}

impl<S> SseEventStream<S> {
    /// Wrap a byte stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: SseDecoder::new(),
            finished: false,
        }
    }

    /// Seed the id used for events that do not carry one.
    pub fn with_last_event_id(mut self, id: impl Into<String>) -> Self {
        self.decoder.last_event_id = id.into();
        self
    }
}

impl<S, B, E> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    type Item = Result<SseEvent, SseStreamError<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();
        loop {
            match this.decoder.next_event() {
                Ok(Some(event)) => return Poll::Ready(Some(Ok(event))),
                Ok(None) => {}
                Err(e) => return Poll::Ready(Some(Err(SseStreamError::Utf8(e)))),
            }

            if *this.finished {
                return Poll::Ready(None);
            }

            match ready!(this.stream.as_mut().poll_next(cx)) {
                Some(Ok(chunk)) => this.decoder.push(chunk.as_ref()),
                Some(Err(e)) => return Poll::Ready(Some(Err(SseStreamError::Transport(e)))),
                // An event that was never terminated by a blank line is
                // discarded, as the standard requires.
                None => *this.finished = true,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{StreamExt, stream};

    use super::*;

    fn decode_all(input: &[u8]) -> Vec<SseEvent> {
        let mut decoder = SseDecoder::new();
        decoder.push(input);
        let mut events = Vec::new();
        while let Some(event) = decoder.next_event().expect("valid utf-8") {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_named_event() {
        let events = decode_all(b"event: new-post\ndata: {\"id\":\"p1\"}\nid: 7\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "new-post");
        assert_eq!(events[0].data, "{\"id\":\"p1\"}");
        assert_eq!(events[0].id, "7");
        assert_eq!(events[0].retry, None);
    }

    #[test]
    fn test_unnamed_event_defaults_to_message() {
        let events = decode_all(b"data: hello\n\n");
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn test_multiline_data_and_line_endings() {
        let events = decode_all(b"data: one\r\ndata: two\rdata:three\n\n");
        assert_eq!(events[0].data, "one\ntwo\nthree");
    }

    #[test]
    fn test_comments_and_empty_events_are_skipped() {
        let events = decode_all(b": keep-alive\n\nevent: ping\n\ndata: x\n\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
        // The `event: ping` name must not leak into the next event.
        assert_eq!(events[0].event, "message");
    }

    #[test]
    fn test_id_persists_and_nul_ids_are_ignored() {
        let events = decode_all(b"id: a\ndata: 1\n\ndata: 2\n\nid: b\0c\ndata: 3\n\n");
        assert_eq!(events[0].id, "a");
        assert_eq!(events[1].id, "a");
        assert_eq!(events[2].id, "a");
    }

    #[test]
    fn test_retry_field() {
        let events = decode_all(b"retry: 2500\ndata: x\n\nretry: soon\ndata: y\n\n");
        assert_eq!(events[0].retry, Some(Duration::from_millis(2500)));
        assert_eq!(events[1].retry, None);
    }

    #[test]
    fn test_field_without_colon() {
        let events = decode_all(b"data\n\n");
        assert_eq!(events[0].data, "");
    }

    #[test]
    fn test_bom_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        decoder.push(&BOM[..1]);
        assert_eq!(decoder.next_event(), Ok(None));
        decoder.push(&BOM[1..]);
        decoder.push(b"data: x\n\n");
        let event = decoder.next_event().expect("utf-8").expect("event");
        assert_eq!(event.data, "x");
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: x\r");
        assert_eq!(decoder.next_event(), Ok(None));
        decoder.push(b"\n\r\n");
        let event = decoder.next_event().expect("utf-8").expect("event");
        assert_eq!(event.data, "x");
        assert_eq!(decoder.next_event(), Ok(None));
    }

    #[test]
    fn test_invalid_utf8_is_reported_and_skipped() {
        let mut decoder = SseDecoder::new();
        decoder.push(b"data: \xff\ndata: ok\n\n");
        assert!(decoder.next_event().is_err());
        let event = decoder.next_event().expect("utf-8").expect("event");
        assert_eq!(event.data, "ok");
    }

    #[tokio::test]
    async fn test_stream_across_chunk_boundaries() {
        let chunks: Vec<Result<&[u8], std::io::Error>> = vec![
            Ok(&b"event: new-po"[..]),
            Ok(&b"st\ndata: {\"a\""[..]),
            Ok(&b":1}\n"[..]),
            Ok(&b"\ndata: tail-without-blank-line\n"[..]),
        ];
        let mut events = SseEventStream::new(stream::iter(chunks));

        let first = events.next().await.expect("item").expect("event");
        assert_eq!(first.event, "new-post");
        assert_eq!(first.data, "{\"a\":1}");
        assert!(events.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stream_transport_error() {
        let chunks: Vec<Result<&[u8], &str>> = vec![Ok(&b"data: x\n\n"[..]), Err("reset")];
        let mut events = SseEventStream::new(stream::iter(chunks));

        assert!(events.next().await.expect("item").is_ok());
        assert_eq!(
            events.next().await.expect("item"),
            Err(SseStreamError::Transport("reset"))
        );
    }
}
