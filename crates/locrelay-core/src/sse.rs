//! SSE (Server-Sent Events) parser
//!
//! Splits a `text/event-stream` byte stream into frames without touching
//! the data payload, so a frame can be re-emitted exactly as received.

use tracing::{trace, warn};

use crate::error::SseError;

/// One dispatched event from an SSE stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// `event:` field, if the frame had one
    pub event: Option<String>,
    /// `id:` field, if the frame had one
    pub id: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
    /// `retry:` field in milliseconds
    pub retry: Option<u64>,
}

impl SseFrame {
    /// Event name, defaulting to `message` as browsers do
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Default cap on a single line or frame held by the parser
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1 << 20;

/// SSE parser state
#[derive(Debug)]
pub struct SseParser {
    /// Buffer for incomplete lines
    buffer: Vec<u8>,
    /// Last line ended in `\r`; a `\n` opening the next chunk completes it
    skip_lf: bool,
    /// Current event data being accumulated
    data_buffer: Option<String>,
    /// Current event type (if any)
    event_type: Option<String>,
    /// Current event ID (if any)
    event_id: Option<String>,
    /// Current retry hint (if any)
    retry: Option<u64>,
    /// Cap on buffered line plus pending data
    max_frame_bytes: usize,
    /// Set once the cap was exceeded; the parser then ignores input
    overflowed: bool,
}

impl Default for SseParser {
    fn default() -> Self {
        Self::with_max_frame_bytes(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl SseParser {
    /// Create a new SSE parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a parser that gives up once a frame grows past `limit` bytes
    pub fn with_max_frame_bytes(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            skip_lf: false,
            data_buffer: None,
            event_type: None,
            event_id: None,
            retry: None,
            max_frame_bytes: limit,
            overflowed: false,
        }
    }

    /// Feed bytes into the parser and extract any complete frames.
    ///
    /// Lines end in `\r\n`, `\n` or a bare `\r`. Frames completed before
    /// an overflow are still returned; see [`SseParser::check`].
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseFrame> {
        let mut frames = Vec::new();
        if self.overflowed {
            return frames;
        }

        let mut rest = bytes;
        while !rest.is_empty() {
            if self.skip_lf {
                self.skip_lf = false;
                if rest[0] == b'\n' {
                    rest = &rest[1..];
                    continue;
                }
            }

            match rest.iter().position(|&b| b == b'\r' || b == b'\n') {
                Some(pos) => {
                    self.buffer.extend_from_slice(&rest[..pos]);
                    self.skip_lf = rest[pos] == b'\r';
                    rest = &rest[pos + 1..];

                    let line = std::mem::take(&mut self.buffer);
                    if let Some(frame) = self.process_line(&line) {
                        frames.push(frame);
                    }
                }
                None => {
                    self.buffer.extend_from_slice(rest);
                    rest = &[];
                }
            }

            if self.pending_bytes() > self.max_frame_bytes {
                warn!(
                    limit = self.max_frame_bytes,
                    "SSE frame too large, abandoning stream"
                );
                self.overflow();
                break;
            }
        }

        frames
    }

    /// Fails once a line or frame has exceeded the size cap
    pub fn check(&self) -> Result<(), SseError> {
        if self.overflowed {
            Err(SseError::FrameTooLarge {
                limit: self.max_frame_bytes,
            })
        } else {
            Ok(())
        }
    }

    fn pending_bytes(&self) -> usize {
        self.buffer.len() + self.data_buffer.as_ref().map_or(0, String::len)
    }

    fn overflow(&mut self) {
        self.overflowed = true;
        self.buffer = Vec::new();
        self.data_buffer = None;
        self.event_type = None;
        self.event_id = None;
        self.retry = None;
    }

    /// Whether a partially received frame is pending
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
            || self.data_buffer.is_some()
            || self.event_type.is_some()
            || self.event_id.is_some()
    }

    /// Process a single line of SSE data
    fn process_line(&mut self, line: &[u8]) -> Option<SseFrame> {
        // Empty line signals end of event
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment line (keepalive)
        if line.starts_with(b":") {
            trace!("SSE comment");
            return None;
        }

        let line = match std::str::from_utf8(line) {
            Ok(s) => s,
            Err(_) => {
                warn!("Dropping SSE line with invalid UTF-8");
                return None;
            }
        };

        // Split on first colon; a single leading space in the value is dropped
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "data" => {
                // Multiple data lines are joined with newlines
                match &mut self.data_buffer {
                    Some(data) => {
                        data.push('\n');
                        data.push_str(value);
                    }
                    None => self.data_buffer = Some(value.to_string()),
                }
            }
            "event" => {
                self.event_type = Some(value.to_string());
            }
            "id" => {
                // IDs containing NUL are ignored
                if !value.contains('\0') {
                    self.event_id = Some(value.to_string());
                }
            }
            "retry" => match value.parse::<u64>() {
                Ok(ms) => self.retry = Some(ms),
                Err(_) => trace!("SSE invalid retry: {}", value),
            },
            _ => {
                trace!("SSE unknown field: {}", field);
            }
        }

        None
    }

    /// Dispatch the accumulated frame
    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event_type.take();
        let id = self.event_id.take();

        // A frame without data lines is not dispatched; a pending retry
        // hint carries over to the next one
        let data = self.data_buffer.take()?;
        let retry = self.retry.take();

        Some(SseFrame {
            event,
            id,
            data,
            retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_named_event() {
        let mut parser = SseParser::new();

        let input = b"event: point\nid: 17\ndata: {\"lat\":1.0,\"lon\":2.0}\n\n";
        let frames = parser.feed(input);

        assert_eq!(
            frames,
            vec![SseFrame {
                event: Some("point".into()),
                id: Some("17".into()),
                data: r#"{"lat":1.0,"lon":2.0}"#.into(),
                retry: None,
            }]
        );
    }

    #[test]
    fn test_parse_multiple_events() {
        let mut parser = SseParser::new();

        let input = b"event: heartbeat\ndata: {}\n\nevent: point\ndata: {\"a\":1}\n\n";
        let frames = parser.feed(input);

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event_name(), "heartbeat");
        assert_eq!(frames[0].id, None);
        assert_eq!(frames[1].event_name(), "point");
    }

    #[test]
    fn test_parse_chunked_data() {
        let mut parser = SseParser::new();

        // First chunk - incomplete
        assert!(parser.feed(b"event: point\r\ndata: {\"lat\":").is_empty());
        assert!(parser.has_partial());

        // Second chunk - completes the event
        let frames = parser.feed(b"1}\r\n\r\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, r#"{"lat":1}"#);
        assert!(!parser.has_partial());
    }

    #[test]
    fn test_multiline_data_joined() {
        let mut parser = SseParser::new();

        let frames = parser.feed(b"data: {\ndata:  \"a\": 1\ndata: }\n\n");

        assert_eq!(frames[0].data, "{\n \"a\": 1\n}");
        assert_eq!(frames[0].event_name(), "message");
    }

    #[test]
    fn test_ignore_comments_and_empty_frames() {
        let mut parser = SseParser::new();

        let input = b": keepalive\n\nevent: point\nid: 3\n\ndata: {}\n\n";
        let frames = parser.feed(input);

        // The id-only frame is dropped rather than leaking into the next one
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id, None);
        assert_eq!(frames[0].event, None);
    }

    #[test]
    fn test_retry_hint() {
        let mut parser = SseParser::new();

        let frames = parser.feed(b"retry: 2500\n\nretry: oops\nevent: heartbeat\ndata: {}\n\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].retry, Some(2500));
    }

    #[test]
    fn test_bare_carriage_return_lines() {
        let mut parser = SseParser::new();

        let frames = parser.feed(b"event: point\rid: 5\rdata: {}\r\rdata: two\r\r");

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event_name(), "point");
        assert_eq!(frames[0].id.as_deref(), Some("5"));
        assert_eq!(frames[0].data, "{}");
        assert_eq!(frames[1].data, "two");
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        let mut parser = SseParser::new();

        assert!(parser.feed(b"data: a\r").is_empty());
        // The \n completes the previous line rather than ending the frame
        assert!(parser.feed(b"\ndata: b\r").is_empty());
        let frames = parser.feed(b"\n\r\n");

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "a\nb");
        assert!(!parser.has_partial());
    }

    #[test]
    fn test_oversized_line_stops_parser() {
        let mut parser = SseParser::with_max_frame_bytes(64);

        let frames = parser.feed(b"data: ok\n\n");
        assert_eq!(frames.len(), 1);
        assert_eq!(parser.check(), Ok(()));

        let mut input = b"data: ok\n\ndata: ".to_vec();
        input.extend(std::iter::repeat(b'x').take(100));
        let frames = parser.feed(&input);

        assert_eq!(frames.len(), 1);
        assert_eq!(parser.check(), Err(SseError::FrameTooLarge { limit: 64 }));
        assert!(!parser.has_partial());
        assert!(parser.feed(b"\n\ndata: late\n\n").is_empty());
    }

    #[test]
    fn test_oversized_multiline_frame_stops_parser() {
        let mut parser = SseParser::with_max_frame_bytes(24);

        let frames = parser.feed(b"data: 0123456789\ndata: 0123456789\ndata: 0123456789\n");

        assert!(frames.is_empty());
        assert!(parser.check().is_err());
    }
}
