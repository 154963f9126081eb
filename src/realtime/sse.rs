//! Server-Sent Events framing.
//!
//! The relay speaks a deliberately small subset of SSE: every record is a
//! single `data: <json>` line followed by a blank line, and the end of the
//! stream is the end of the body. [`encode`] produces that framing;
//! [`SseDecoder`] reads it back (and reads the local backend's own stream,
//! which uses the same framing plus a `[DONE]` sentinel).

use bytes::{Bytes, BytesMut};
use futures_core::Stream;
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::http::BodyStream;
use crate::llm::{ChatError, NormalizedEvent};

/// Payload some producers send as the final record. Never content.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Frames one event as `data: <json>\n\n`.
pub fn encode_event(event: &NormalizedEvent) -> Bytes {
    // A struct with one `String` field always serializes.
    let json = serde_json::to_string(event).unwrap_or_else(|_| String::from(r#"{"response":""}"#));
    Bytes::from(format!("data: {json}\n\n"))
}

/// Turns a stream of normalized events into an SSE body.
///
/// The body ends when the events end. An error or abort mid-stream also ends
/// it, since the status line has already been sent by then.
pub fn encode<S>(events: S) -> BodyStream
where
    S: Stream<Item = Result<NormalizedEvent, ChatError>> + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut events = std::pin::pin!(events);
        let mut sent = 0usize;
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    sent += 1;
                    yield encode_event(&event);
                }
                Err(ChatError::Aborted) => {
                    debug!(sent, "relay aborted by client");
                    break;
                }
                Err(e) => {
                    warn!(sent, error = %e, "upstream failed mid-stream");
                    break;
                }
            }
        }
    })
}

/// Incremental SSE reader.
///
/// Raw bytes are buffered until a full line is available, so records (and
/// multi-byte characters) split across network chunks decode exactly as if
/// they had arrived in one piece.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns the `data:` payloads of every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line = self.buf.split_to(pos + 1);
            if let Some(payload) = data_payload(&line[..pos]) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flushes a trailing line that was never newline-terminated.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = self.buf.split();
        data_payload(&rest).into_iter().collect()
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let data = line.strip_prefix(b"data:")?;
    let text = String::from_utf8_lossy(data).trim().to_owned();
    (!text.is_empty()).then_some(text)
}

/// Parses one payload as a [`NormalizedEvent`].
///
/// The sentinel and anything that is not a `{"response": "..."}` object are
/// skipped.
pub fn parse_event(payload: &str) -> Option<NormalizedEvent> {
    if payload == DONE_SENTINEL {
        return None;
    }
    match serde_json::from_str(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, payload, "skipping malformed SSE record");
            None
        }
    }
}
