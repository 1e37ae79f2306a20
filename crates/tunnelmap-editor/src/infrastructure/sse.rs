//! `text/event-stream` decoding.
//!
//! A control API pushes events as lines of `field: value` separated by a blank
//! line:
//!
//! ```text
//! event: instance
//! data: {"type":"log","logs":"Tunnel handshaked in 12ms","instance":{"id":"a1"}}
//!
//! ```
//!
//! [`SseDecoder`] turns arbitrary byte chunks (as delivered by the HTTP body)
//! into discrete [`SseEvent`]s, holding back incomplete lines until the next
//! chunk arrives.  [`decode_stream`] wraps a chunk stream into an event stream
//! so consumers never deal with buffering.
//!
//! Held-back input is bounded: a line or event larger than the decoder's
//! limit fails the stream with [`SseError::TooLarge`].

use std::collections::VecDeque;

use futures::stream::{self, Stream, StreamExt};
use thiserror::Error;
use tracing::warn;

/// Event name used when a message carries no `event:` field.
pub const DEFAULT_EVENT: &str = "message";

/// Default bound on a single line or event, in bytes.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 256 * 1024;

/// Errors raised while decoding an event stream.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SseError {
    #[error("event stream line or event exceeds {limit} bytes")]
    TooLarge { limit: usize },
}

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    /// `data:` lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

impl SseEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
            id: None,
        }
    }
}

/// Incremental line-oriented SSE parser.
#[derive(Debug)]
pub struct SseDecoder {
    /// Bytes of the current, not yet terminated line.
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    /// Bytes held in `data`.
    data_len: usize,
    id: Option<String>,
    max_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(DEFAULT_MAX_EVENT_BYTES)
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder that rejects lines or events longer than `max_bytes`.
    pub fn with_limit(max_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            event: None,
            data: Vec::new(),
            data_len: 0,
            id: None,
            max_bytes,
        }
    }

    /// Feeds one chunk and returns every event completed by it.
    ///
    /// # Errors
    ///
    /// Returns [`SseError::TooLarge`] when an unterminated line or a pending
    /// event grows past the limit.  The decoder is reset and can be reused.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, SseError> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        if self.buffer.len() > self.max_bytes || self.data_len > self.max_bytes {
            warn!(
                "discarding oversized event stream input ({} buffered, {} pending)",
                self.buffer.len(),
                self.data_len
            );
            *self = Self::with_limit(self.max_bytes);
            return Err(SseError::TooLarge { limit: self.max_bytes });
        }
        Ok(events)
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
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
            "event" => self.event = Some(value.to_string()),
            "data" => {
                self.data_len += value.len();
                self.data.push(value.to_string());
            }
            "id" => self.id = Some(value.to_string()),
            // `retry` and unknown fields carry nothing we act on.
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        self.data_len = 0;
        Some(SseEvent {
            event: event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            id,
        })
    }
}

/// Decodes a stream of body chunks into a stream of events.
///
/// Transport errors are passed through as they occur; an event left
/// incomplete when the body ends is discarded.  Oversized input yields one
/// [`SseError`] and ends the stream.
pub fn decode_stream<S, B, E>(chunks: S) -> impl Stream<Item = Result<SseEvent, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: From<SseError>,
{
    decode_stream_with(chunks, SseDecoder::new())
}

/// [`decode_stream`] with a caller-supplied decoder.
pub fn decode_stream_with<S, B, E>(chunks: S, decoder: SseDecoder) -> impl Stream<Item = Result<SseEvent, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: From<SseError>,
{
    let state = (Some(Box::pin(chunks.fuse())), decoder, VecDeque::new());

    stream::unfold(state, |(mut chunks, mut decoder, mut pending)| async move {
        loop {
            if let Some(event) = pending.pop_front() {
                return Some((Ok(event), (chunks, decoder, pending)));
            }
            let source = chunks.as_mut()?;
            match source.next().await {
                Some(Ok(chunk)) => match decoder.feed(chunk.as_ref()) {
                    Ok(events) => pending.extend(events),
                    Err(e) => return Some((Err(e.into()), (None, decoder, pending))),
                },
                Some(Err(e)) => return Some((Err(e), (chunks, decoder, pending))),
                None => return None,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum ChunkError {
        Reset,
        Decode(SseError),
    }

    impl From<SseError> for ChunkError {
        fn from(e: SseError) -> Self {
            ChunkError::Decode(e)
        }
    }

    #[test]
    fn test_single_event_in_one_chunk() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"event: instance\ndata: {\"a\":1}\n\n").unwrap();
        assert_eq!(events, vec![SseEvent::new("instance", "{\"a\":1}")]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"event: inst").unwrap().is_empty());
        assert!(decoder.feed(b"ance\r\ndata: hel").unwrap().is_empty());
        let events = decoder.feed(b"lo\r\n\r\n").unwrap();
        assert_eq!(events, vec![SseEvent::new("instance", "hello")]);
    }

    #[test]
    fn test_multiple_data_lines_are_joined() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b"data: one\ndata: two\nid: 7\n\n").unwrap();
        assert_eq!(events[0].event, DEFAULT_EVENT);
        assert_eq!(events[0].data, "one\ntwo");
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_comments_and_empty_blocks_are_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.feed(b": keep-alive\n\nevent: ping\n\ndata: x\n\n").unwrap();
        assert_eq!(events, vec![SseEvent::new(DEFAULT_EVENT, "x")]);
    }

    #[tokio::test]
    async fn test_decode_stream_yields_events_then_ends() {
        let chunks = stream::iter(vec![
            Ok::<_, ChunkError>(b"data: a\n\nda".to_vec()),
            Ok(b"ta: b\n\ndata: incomplete".to_vec()),
        ]);

        let events: Vec<_> = decode_stream(chunks).collect().await;

        assert_eq!(
            events,
            vec![
                Ok(SseEvent::new(DEFAULT_EVENT, "a")),
                Ok(SseEvent::new(DEFAULT_EVENT, "b")),
            ]
        );
    }

    #[test]
    fn test_decode_stream_passes_errors_through() {
        let chunks = stream::iter(vec![Ok(b"data: a\n\n".to_vec()), Err(ChunkError::Reset)]);

        let events: Vec<_> = tokio_test::block_on(decode_stream(chunks).collect());

        assert_eq!(events.len(), 2);
        assert_eq!(events[1], Err(ChunkError::Reset));
    }

    #[test]
    fn test_unterminated_line_past_limit_is_rejected() {
        let mut decoder = SseDecoder::with_limit(16);

        assert!(decoder.feed(b"data: 0123456").unwrap().is_empty());
        let result = decoder.feed(b"789abcdef");

        assert_eq!(result, Err(SseError::TooLarge { limit: 16 }));
        // The decoder starts over after the rejection.
        let events = decoder.feed(b"data: ok\n\n").unwrap();
        assert_eq!(events, vec![SseEvent::new(DEFAULT_EVENT, "ok")]);
    }

    #[test]
    fn test_event_without_blank_line_past_limit_is_rejected() {
        let mut decoder = SseDecoder::with_limit(8);

        let result = decoder.feed(b"data: 1234\ndata: 5678\ndata: 9\n");

        assert_eq!(result, Err(SseError::TooLarge { limit: 8 }));
    }

    #[tokio::test]
    async fn test_decode_stream_ends_after_oversized_input() {
        let chunks = stream::iter(vec![
            Ok::<_, ChunkError>(b"data: a\n\n".to_vec()),
            Ok(vec![b'x'; 64]),
            Ok(b"data: b\n\n".to_vec()),
        ]);

        let events: Vec<_> = decode_stream_with(chunks, SseDecoder::with_limit(32)).collect().await;

        assert_eq!(
            events,
            vec![
                Ok(SseEvent::new(DEFAULT_EVENT, "a")),
                Err(ChunkError::Decode(SseError::TooLarge { limit: 32 })),
            ]
        );
    }
}
