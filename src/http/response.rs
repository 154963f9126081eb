//! HTTP/1.1 response builder.
//!
//! Responses carry either a fully buffered body, serialized with a
//! `Content-Length`, or a streamed body that the server writes with
//! `Transfer-Encoding: chunked` as the chunks become available.

use std::fmt;
use std::pin::Pin;

use bytes::{BufMut, Bytes, BytesMut};
use futures_core::Stream;
use serde::Serialize;

use super::{Headers, StatusCode};

/// A boxed stream of body chunks. The stream ending marks the end of the body.
pub type BodyStream = Pin<Box<dyn Stream<Item = Bytes> + Send + 'static>>;

/// The payload of a [`Response`].
pub enum Body {
    /// A complete body, sent with `Content-Length`.
    Full(Vec<u8>),
    /// A body produced incrementally, sent with chunked transfer encoding.
    Stream(BodyStream),
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(bytes) => f.debug_tuple("Full").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use chatrelay::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::BadRequest)
///     .json(&serde_json::json!({ "error": "missing messages" }));
///
/// let bytes = response.into_bytes().unwrap();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 400 Bad Request\r\n"));
/// assert!(text.contains("Content-Type: application/json\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::Full(Vec::new()),
            keep_alive: true,
        }
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place, for middleware that decorates a downstream response.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Body::Full(body.into().into_bytes());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

    /// Serializes `value` as the body and sets `Content-Type: application/json`.
    ///
    /// Serialization of the relay's own error and event types cannot fail; if a
    /// caller passes something that does, the body is left empty.
    #[must_use]
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.headers.set("Content-Type", "application/json");
        self.body = Body::Full(serde_json::to_vec(value).unwrap_or_default());
        self
    }

    /// Sets a streamed body. The server writes it with chunked transfer encoding.
    #[must_use]
    pub fn stream(mut self, body: BodyStream) -> Self {
        self.body = Body::Stream(body);
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns `true` if the body is streamed.
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Stream(_))
    }

    /// Splits the response into its serialized head and its body.
    ///
    /// The head contains the status line, all headers and the blank line.
    /// Framing headers are added here:
    /// - `Content-Type: text/plain; charset=utf-8` for a non-empty full body
    ///   without an explicit type.
    /// - `Content-Length` for full bodies, unless the caller already set one
    ///   (a `HEAD` answer carries the length of the body it omits).
    /// - `Transfer-Encoding: chunked` for streams.
    /// - `Connection: keep-alive` or `Connection: close`.
    pub fn into_parts(mut self) -> (BytesMut, Body) {
        match &self.body {
            Body::Full(bytes) => {
                if !bytes.is_empty() && !self.headers.contains("content-type") {
                    self.headers
                        .insert("Content-Type", "text/plain; charset=utf-8");
                }
            }
            Body::Stream(_) => {
                self.headers.set("Transfer-Encoding", "chunked");
            }
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let mut head = BytesMut::with_capacity(128 + self.headers.len() * 64);
        head.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        for (name, value) in self.headers.iter() {
            head.put(format!("{name}: {value}\r\n").as_bytes());
        }
        if let Body::Full(bytes) = &self.body {
            if !self.headers.contains("content-length") {
                head.put(format!("Content-Length: {}\r\n", bytes.len()).as_bytes());
            }
        }
        head.put(&b"\r\n"[..]);

        (head, self.body)
    }

    /// Serializes a fully buffered response into HTTP/1.1 wire format.
    ///
    /// Returns `None` for streamed responses, which must be written chunk by
    /// chunk via [`into_parts`](Self::into_parts).
    pub fn into_bytes(self) -> Option<BytesMut> {
        let (mut head, body) = self.into_parts();
        match body {
            Body::Full(bytes) => {
                head.put(bytes.as_slice());
                Some(head)
            }
            Body::Stream(_) => None,
        }
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}

/// Frames one body chunk for chunked transfer encoding.
pub fn encode_chunk(chunk: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(chunk.len() + 12);
    buf.put(format!("{:x}\r\n", chunk.len()).as_bytes());
    buf.put(chunk);
    buf.put(&b"\r\n"[..]);
    buf
}

/// The terminating zero-length chunk.
pub const LAST_CHUNK: &[u8] = b"0\r\n\r\n";
